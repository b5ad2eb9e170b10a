use crate::*;

use lanchat_core::PeerRecord;
use tokio::net::UdpSocket;

/// alice and bob announce to each other; each ends up holding the other's
/// exchange endpoint with the address taken from the datagram source.
#[tokio::test]
async fn test_join_handshake_populates_both_tables() {
    let (mut alice, mut bob) = start_pair("alice", "bob").await.unwrap();

    let bob_record = bob.record();
    let alice_record = alice.record();
    assert!(wait_until(|| alice.contacts.get("bob") == Some(bob_record.clone())).await);
    assert!(wait_until(|| bob.contacts.get("alice") == Some(alice_record.clone())).await);

    // Both hold themselves too.
    assert_eq!(alice.contacts.get("alice"), Some(alice.record()));
    assert_eq!(bob.contacts.get("bob"), Some(bob.record()));

    let joined = alice.expect_event(EventCategory::PeerJoined).await;
    assert_eq!(joined.text, "bob joined the chat");
    let joined = bob.expect_event(EventCategory::PeerJoined).await;
    assert_eq!(joined.text, "alice joined the chat");

    // The handshake terminates: no repeated joins once both know each other.
    let later = alice.drain(Duration::from_millis(300)).await;
    assert!(later.iter().all(|e| e.category != EventCategory::PeerJoined));

    alice.shutdown().await;
    bob.shutdown().await;
}

/// A WHO round pulls in peers only the other side knows about, and commits
/// once, after the replies have gone quiet.
#[tokio::test]
async fn test_who_round_reconciles_contacts() {
    let (mut alice, bob) = start_pair("alice", "bob").await.unwrap();
    assert!(wait_until(|| alice.contacts.contains("bob")).await);
    // Let the startup bursts die down.
    alice.drain(Duration::from_millis(200)).await;

    let carol = PeerRecord::new("carol", LOOPBACK, 6553);
    bob.contacts.upsert(carol.clone());

    let started = tokio::time::Instant::now();
    alice.discovery_tx.send(DiscoveryCommand::Who).unwrap();
    alice.expect_system("WHO broadcast sent").await;

    let committed = alice.expect_system("peer list updated").await;
    assert!(started.elapsed() >= SETTLE);
    assert_eq!(committed.text, "peer list updated (2 peer(s) answered)");
    assert_eq!(alice.contacts.get("carol"), Some(carol));

    // One window, one commit.
    let later = alice.drain(Duration::from_millis(400)).await;
    assert!(later.iter().all(|e| !e.text.starts_with("peer list updated")));

    alice.shutdown().await;
    bob.shutdown().await;
}

/// Shutting a peer down broadcasts LEAVE; the other side drops it.
#[tokio::test]
async fn test_leave_on_shutdown_removes_peer() {
    let (mut alice, bob) = start_pair("alice", "bob").await.unwrap();
    assert!(wait_until(|| alice.contacts.contains("bob")).await);

    bob.shutdown().await;

    let left = alice.expect_event(EventCategory::PeerLeft).await;
    assert_eq!(left.text, "bob left the chat");
    assert!(!alice.contacts.contains("bob"));
    assert!(alice.contacts.contains("alice"));

    alice.shutdown().await;
}

/// Garbage and malformed datagrams are discarded one by one; valid
/// content around them still lands.
#[tokio::test]
async fn test_malformed_datagrams_are_discarded() {
    let mut alice = TestPeer::bind("alice").await.unwrap();
    let sink = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
    alice.point_at_addr(sink.local_addr().unwrap());
    alice.start();
    alice.expect_system("own address").await;

    let stranger = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
    let target = alice.discovery_addr;
    let datagrams: [&[u8]; 6] = [
        b"GARBAGE",
        &[0xff, 0xfe, 0x00],
        b"JOIN eve notaport",
        b"JOIN alice 1",
        b"SEEN dave 127.0.0.1 7000, junk, alice 10.9.9.9 1",
        b"JOIN frank 7001",
    ];
    for datagram in datagrams {
        stranger.send_to(datagram, target).await.unwrap();
    }

    assert!(wait_until(|| alice.contacts.contains("frank")).await);
    assert_eq!(
        alice.contacts.get("frank"),
        Some(PeerRecord::new("frank", LOOPBACK, 7001))
    );
    assert_eq!(
        alice.contacts.get("dave"),
        Some(PeerRecord::new("dave", LOOPBACK, 7000))
    );
    assert!(!alice.contacts.contains("eve"));
    // Own record is never overwritten by echoes or hearsay.
    assert_eq!(alice.contacts.get("alice"), Some(alice.record()));

    alice.shutdown().await;
}

/// WHO is answered directly to the asker with the full table.
#[tokio::test]
async fn test_who_is_answered_with_seen() {
    let mut alice = TestPeer::bind("alice").await.unwrap();
    let sink = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
    alice.point_at_addr(sink.local_addr().unwrap());
    alice.start();
    alice.expect_system("own address").await;

    let stranger = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
    stranger.send_to(b"WHO", alice.discovery_addr).await.unwrap();

    let mut buf = [0u8; 1024];
    let (len, from) = tokio::time::timeout(WAIT, stranger.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(from, alice.discovery_addr);
    let expected = format!("SEEN alice 127.0.0.1 {}", alice.exchange_addr.port());
    assert_eq!(std::str::from_utf8(&buf[..len]).unwrap(), expected);

    alice.shutdown().await;
}

/// A SEEN listing far larger than a typical datagram is read in full; the
/// last entry lands intact.
#[tokio::test]
async fn test_large_seen_is_read_whole() {
    let mut alice = TestPeer::bind("alice").await.unwrap();
    let sink = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
    alice.point_at_addr(sink.local_addr().unwrap());
    alice.start();
    alice.expect_system("own address").await;

    let mut entries: Vec<PeerRecord> = (0..1500u16)
        .map(|i| PeerRecord::new(format!("peer-{i:04}"), "10.20.30.40".parse().unwrap(), 40000 + i))
        .collect();
    entries.push(PeerRecord::new("zed", LOOPBACK, 5001));
    let datagram = lanchat_core::DiscoveryMessage::seen(entries).to_bytes();
    assert!(datagram.len() > 32 * 1024);

    let stranger = UdpSocket::bind((LOOPBACK, 0)).await.unwrap();
    stranger.send_to(&datagram, alice.discovery_addr).await.unwrap();

    assert!(wait_until(|| alice.contacts.contains("zed")).await);
    assert_eq!(alice.contacts.get("zed"), Some(PeerRecord::new("zed", LOOPBACK, 5001)));
    assert_eq!(
        alice.contacts.get("peer-1499"),
        Some(PeerRecord::new("peer-1499", "10.20.30.40".parse().unwrap(), 41499))
    );

    alice.shutdown().await;
}
