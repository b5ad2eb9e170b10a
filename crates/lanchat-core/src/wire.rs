//! lanchat wire formats — the discovery datagrams and the exchange
//! transfer header.
//!
//! Both protocols are plain UTF-8 text. Discovery sends exactly one message
//! per UDP datagram:
//!
//! ```text
//! JOIN <name> <port>
//! LEAVE <name>
//! WHO
//! SEEN <name> <ip> <port>, <name> <ip> <port>, ...
//! ```
//!
//! The exchange protocol opens one TCP connection per transfer. The first
//! bytes are either a free text line `<sender>: <text>` (nothing follows) or
//! `IMG <filename> <size>\n`, answered by [`IMAGE_ACK`] and followed by exactly
//! `size` raw bytes.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

// ── Constants ────────────────────────────────────────────────────────────────

/// Receive buffer for discovery datagrams: the largest UDP payload over IPv4,
/// so a SEEN listing is never cut short by the buffer.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Upper bound on the transfer header. Text messages longer than this are
/// cut off at the limit.
pub const MAX_HEADER_LEN: usize = 4096;

/// Acknowledgement sent by the receiver after a valid `IMG` header.
pub const IMAGE_ACK: &[u8] = b"OK";

const JOIN: &str = "JOIN";
const LEAVE: &str = "LEAVE";
const WHO: &str = "WHO";
const SEEN: &str = "SEEN";
const IMG: &str = "IMG";

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("empty message")]
    Empty,
    #[error("unknown message keyword {0:?}")]
    UnknownKeyword(String),
    #[error("malformed {keyword} message: {reason}")]
    Malformed {
        keyword: &'static str,
        reason: String,
    },
    #[error("invalid handle {0:?}: must be non-empty without whitespace or commas")]
    InvalidHandle(String),
}

fn malformed(keyword: &'static str, reason: impl Into<String>) -> WireError {
    WireError::Malformed {
        keyword,
        reason: reason.into(),
    }
}

/// Check that a peer name can travel inside JOIN/LEAVE/SEEN unambiguously.
pub fn validate_handle(name: &str) -> Result<(), WireError> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == ',') {
        return Err(WireError::InvalidHandle(name.to_string()));
    }
    Ok(())
}

// ── Peer record ──────────────────────────────────────────────────────────────

/// One reachable participant: its handle and the TCP endpoint it accepts
/// transfers on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerRecord {
    pub name: String,
    pub addr: IpAddr,
    pub port: u16,
}

impl PeerRecord {
    pub fn new(name: impl Into<String>, addr: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            addr,
            port,
        }
    }

    /// The exchange endpoint of this peer.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}:{}", self.name, self.addr, self.port)
    }
}

// ── Discovery messages ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    /// Presence announce. The receiver takes the address from the datagram
    /// source, not from the payload.
    Join { name: String, port: u16 },
    Leave { name: String },
    Who,
    /// Reply to WHO. `skipped` counts malformed entries dropped while
    /// decoding; it is never encoded.
    Seen { entries: Vec<PeerRecord>, skipped: usize },
}

impl DiscoveryMessage {
    pub fn join(name: impl Into<String>, port: u16) -> Self {
        Self::Join {
            name: name.into(),
            port,
        }
    }

    pub fn leave(name: impl Into<String>) -> Self {
        Self::Leave { name: name.into() }
    }

    pub fn seen(entries: Vec<PeerRecord>) -> Self {
        Self::Seen {
            entries,
            skipped: 0,
        }
    }

    /// Decode one datagram.
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(datagram).map_err(|_| WireError::NotUtf8)?;
        text.parse()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Join { .. } => JOIN,
            Self::Leave { .. } => LEAVE,
            Self::Who => WHO,
            Self::Seen { .. } => SEEN,
        }
    }
}

impl std::str::FromStr for DiscoveryMessage {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (keyword, rest) = match s.split_once(char::is_whitespace) {
            Some((k, r)) => (k, r.trim()),
            None => (s, ""),
        };

        match keyword {
            "" => Err(WireError::Empty),
            JOIN => {
                let tokens: Vec<&str> = rest.split_whitespace().collect();
                let [name, port] = tokens[..] else {
                    return Err(malformed(JOIN, format!("expected 2 fields, got {}", tokens.len())));
                };
                let port = port
                    .parse::<u16>()
                    .map_err(|_| malformed(JOIN, format!("bad port {port:?}")))?;
                Ok(Self::join(name, port))
            }
            LEAVE => {
                let tokens: Vec<&str> = rest.split_whitespace().collect();
                let [name] = tokens[..] else {
                    return Err(malformed(LEAVE, format!("expected 1 field, got {}", tokens.len())));
                };
                Ok(Self::leave(name))
            }
            WHO => {
                if !rest.is_empty() {
                    return Err(malformed(WHO, "unexpected trailing data"));
                }
                Ok(Self::Who)
            }
            SEEN => Ok(parse_seen(rest)),
            other => Err(WireError::UnknownKeyword(other.to_string())),
        }
    }
}

/// Parse the comma-separated triples of a SEEN body. A bad entry never
/// poisons the others.
fn parse_seen(body: &str) -> DiscoveryMessage {
    let mut entries = Vec::new();
    let mut skipped = 0;

    for entry in body.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match parse_seen_entry(entry) {
            Some(record) => entries.push(record),
            None => skipped += 1,
        }
    }

    DiscoveryMessage::Seen { entries, skipped }
}

fn parse_seen_entry(entry: &str) -> Option<PeerRecord> {
    let tokens: Vec<&str> = entry.split_whitespace().collect();
    let [name, ip, port] = tokens[..] else {
        return None;
    };
    let addr = ip.parse::<IpAddr>().ok()?;
    let port = port.parse::<u16>().ok()?;
    Some(PeerRecord::new(name, addr, port))
}

impl fmt::Display for DiscoveryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join { name, port } => write!(f, "{JOIN} {name} {port}"),
            Self::Leave { name } => write!(f, "{LEAVE} {name}"),
            Self::Who => f.write_str(WHO),
            Self::Seen { entries, .. } => {
                f.write_str(SEEN)?;
                for (i, e) in entries.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{sep}{} {} {}", e.name, e.addr, e.port)?;
                }
                Ok(())
            }
        }
    }
}

// ── Transfer header ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferHeader {
    /// A complete chat line, conventionally `<sender>: <text>`.
    Text(String),
    /// An image announcement; `size` raw bytes follow the receiver's ack.
    Image { filename: String, size: u64 },
}

impl TransferHeader {
    pub fn text(sender: &str, text: &str) -> Self {
        Self::Text(format!("{sender}: {text}"))
    }

    pub fn image(filename: impl Into<String>, size: u64) -> Self {
        Self::Image {
            filename: filename.into(),
            size,
        }
    }

    /// Decode the header bytes read from a fresh connection.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(raw).map_err(|_| WireError::NotUtf8)?;
        text.parse()
    }

    /// Bytes to write at the start of the connection. Image headers are
    /// newline-terminated so the receiver knows where the header stops.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Text(line) => line.clone().into_bytes(),
            Self::Image { filename, size } => format!("{IMG} {filename} {size}\n").into_bytes(),
        }
    }
}

impl std::str::FromStr for TransferHeader {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(WireError::Empty);
        }

        let mut tokens = s.split_whitespace();
        if tokens.next() != Some(IMG) {
            return Ok(Self::Text(s.to_string()));
        }

        let rest: Vec<&str> = tokens.collect();
        let [filename, size] = rest[..] else {
            return Err(malformed(IMG, format!("expected 2 fields, got {}", rest.len())));
        };
        let size = size
            .parse::<u64>()
            .map_err(|_| malformed(IMG, format!("bad size {size:?}")))?;
        Ok(Self::image(filename, size))
    }
}
