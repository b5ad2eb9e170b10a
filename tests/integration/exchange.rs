use crate::*;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn connected_pair() -> (TestPeer, TestPeer) {
    let (alice, bob) = start_pair("alice", "bob").await.unwrap();
    assert!(wait_until(|| alice.contacts.contains("bob") && bob.contacts.contains("alice")).await);
    (alice, bob)
}

/// `MSG bob hi` from alice reaches bob verbatim as `alice: hi`.
#[tokio::test]
async fn test_text_message_delivered() {
    let (mut alice, mut bob) = connected_pair().await;

    alice
        .exchange_tx
        .send(ExchangeCommand::Msg {
            recipient: "bob".into(),
            text: "hi".into(),
        })
        .unwrap();

    let received = bob.expect_event(EventCategory::MessageReceived).await;
    assert_eq!(received.text, "alice: hi");
    alice.expect_system("message sent to bob").await;

    alice.shutdown().await;
    bob.shutdown().await;
}

/// An image of n bytes is stored as exactly n bytes under the sanitized name.
#[tokio::test]
async fn test_image_stored_with_exact_size() {
    let (mut alice, mut bob) = connected_pair().await;

    let source = std::env::temp_dir().join(format!("lanchat-it-source-{}.png", std::process::id()));
    let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&source, &payload).unwrap();

    alice
        .exchange_tx
        .send(ExchangeCommand::ImgSend {
            recipient: "bob".into(),
            filename: "cat.png".into(),
            size: payload.len() as u64,
            path: source.clone(),
        })
        .unwrap();

    let received = bob.expect_event(EventCategory::ImageReceived).await;
    assert!(received.text.starts_with("image cat.png (50000 bytes)"));
    let stored = std::fs::read(bob.image_dir.join("cat.png")).unwrap();
    assert_eq!(stored.len(), payload.len());
    assert_eq!(stored, payload);
    alice.expect_system("image sent to bob: cat.png").await;

    let _ = std::fs::remove_file(&source);
    alice.shutdown().await;
    bob.shutdown().await;
}

/// A sender that stops short stores nothing and yields one error event.
#[tokio::test]
async fn test_truncated_transfer_stores_nothing() {
    let mut bob = TestPeer::bind("bob").await.unwrap();

    let mut stream = TcpStream::connect(bob.exchange_addr).await.unwrap();
    stream.write_all(b"IMG partial.bin 100\n").await.unwrap();
    let mut ack = [0u8; 2];
    stream.read_exact(&mut ack).await.unwrap();
    assert_eq!(&ack, b"OK");
    stream.write_all(&[0u8; 40]).await.unwrap();
    drop(stream);

    let error = bob.expect_event(EventCategory::Error).await;
    assert!(error.text.contains("expected 100 bytes, received 40"), "{}", error.text);

    let later = bob.drain(Duration::from_millis(200)).await;
    assert!(later.iter().all(|e| e.category != EventCategory::Error));
    assert!(!bob.image_dir.join("partial.bin").exists());

    bob.shutdown().await;
}

/// Unknown recipients produce one error event and no network traffic.
#[tokio::test]
async fn test_unknown_recipient_reports_once() {
    let (mut alice, mut bob) = connected_pair().await;
    bob.drain(Duration::from_millis(100)).await;

    alice
        .exchange_tx
        .send(ExchangeCommand::Msg {
            recipient: "nobody".into(),
            text: "hello".into(),
        })
        .unwrap();

    let error = alice.expect_event(EventCategory::Error).await;
    assert_eq!(error.text, "recipient unknown: nobody");

    let later = alice.drain(Duration::from_millis(200)).await;
    assert!(later.iter().all(|e| e.category != EventCategory::Error));
    let at_bob = bob.drain(Duration::from_millis(50)).await;
    assert!(at_bob
        .iter()
        .all(|e| e.category != EventCategory::MessageReceived));

    alice.shutdown().await;
    bob.shutdown().await;
}

/// A failed send is reported, and the engine keeps serving afterwards.
#[tokio::test]
async fn test_send_failure_is_reported_and_not_fatal() {
    let (mut alice, mut bob) = connected_pair().await;

    // bob is known but his file is missing.
    alice
        .exchange_tx
        .send(ExchangeCommand::ImgSend {
            recipient: "bob".into(),
            filename: "ghost.png".into(),
            size: 10,
            path: "/nonexistent/lanchat/ghost.png".into(),
        })
        .unwrap();
    let error = alice.expect_event(EventCategory::Error).await;
    assert!(error.text.starts_with("failed to send to bob"), "{}", error.text);

    alice
        .exchange_tx
        .send(ExchangeCommand::Msg {
            recipient: "bob".into(),
            text: "still here".into(),
        })
        .unwrap();
    let received = bob.expect_event(EventCategory::MessageReceived).await;
    assert_eq!(received.text, "alice: still here");

    alice.shutdown().await;
    bob.shutdown().await;
}
