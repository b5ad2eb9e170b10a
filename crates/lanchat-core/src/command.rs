//! Commands accepted from the control surface.
//!
//! The presentation layer pushes these onto the discovery and exchange
//! command channels. Both types also parse from their textual forms so a
//! line-based front end can forward input unchanged.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("malformed {command} command: {reason}")]
    Malformed {
        command: &'static str,
        reason: String,
    },
}

fn malformed(command: &'static str, reason: impl Into<String>) -> CommandError {
    CommandError::Malformed {
        command,
        reason: reason.into(),
    }
}

// ── Discovery ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryCommand {
    /// Redundant WHO broadcast followed by a reconciliation window.
    Who,
    /// Broadcast a JOIN, then the WHO burst.
    Join { name: String, port: u16 },
    /// Broadcast a LEAVE.
    Leave { name: String },
    /// Report the contact table as status events.
    Peers,
}

impl FromStr for DiscoveryCommand {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        match tokens.as_slice() {
            ["WHO"] => Ok(Self::Who),
            ["PEERS"] => Ok(Self::Peers),
            ["JOIN", name, port] => {
                let port = port
                    .parse()
                    .map_err(|_| malformed("JOIN", format!("bad port {port:?}")))?;
                Ok(Self::Join {
                    name: name.to_string(),
                    port,
                })
            }
            ["JOIN", ..] => Err(malformed("JOIN", "expected JOIN <name> <port>")),
            ["LEAVE", name] => Ok(Self::Leave {
                name: name.to_string(),
            }),
            ["LEAVE", ..] => Err(malformed("LEAVE", "expected LEAVE <name>")),
            _ => Err(CommandError::Unknown(s.trim().to_string())),
        }
    }
}

impl fmt::Display for DiscoveryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Who => f.write_str("WHO"),
            Self::Peers => f.write_str("PEERS"),
            Self::Join { name, port } => write!(f, "JOIN {name} {port}"),
            Self::Leave { name } => write!(f, "LEAVE {name}"),
        }
    }
}

// ── Exchange ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeCommand {
    Msg {
        recipient: String,
        text: String,
    },
    /// `size` is the byte count announced in the `IMG` header; the file at
    /// `path` must be exactly that long when the send starts.
    ImgSend {
        recipient: String,
        filename: String,
        size: u64,
        path: PathBuf,
    },
}

impl ExchangeCommand {
    pub fn recipient(&self) -> &str {
        match self {
            Self::Msg { recipient, .. } | Self::ImgSend { recipient, .. } => recipient,
        }
    }
}

impl FromStr for ExchangeCommand {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start();
        let (keyword, rest) = s.split_once(' ').unwrap_or((s, ""));

        match keyword {
            "MSG" => {
                let (recipient, text) = rest
                    .split_once(' ')
                    .ok_or_else(|| malformed("MSG", "expected MSG <recipient> <text>"))?;
                if recipient.is_empty() || text.trim().is_empty() {
                    return Err(malformed("MSG", "expected MSG <recipient> <text>"));
                }
                Ok(Self::Msg {
                    recipient: recipient.to_string(),
                    text: text.to_string(),
                })
            }
            "IMG_SEND" => {
                let (header, path) = rest.split_once("::").ok_or_else(|| {
                    malformed("IMG_SEND", "missing '::' before the local path")
                })?;
                let tokens: Vec<&str> = header.split_whitespace().collect();
                let [recipient, filename, size] = tokens[..] else {
                    return Err(malformed(
                        "IMG_SEND",
                        "expected IMG_SEND <recipient> <filename> <size>::<path>",
                    ));
                };
                let size = size
                    .parse()
                    .map_err(|_| malformed("IMG_SEND", format!("bad size {size:?}")))?;
                let path = path.trim();
                if path.is_empty() {
                    return Err(malformed("IMG_SEND", "empty path"));
                }
                Ok(Self::ImgSend {
                    recipient: recipient.to_string(),
                    filename: filename.to_string(),
                    size,
                    path: PathBuf::from(path),
                })
            }
            _ => Err(CommandError::Unknown(s.trim().to_string())),
        }
    }
}

impl fmt::Display for ExchangeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Msg { recipient, text } => write!(f, "MSG {recipient} {text}"),
            Self::ImgSend {
                recipient,
                filename,
                size,
                path,
            } => write!(
                f,
                "IMG_SEND {recipient} {filename} {size}::{}",
                path.display()
            ),
        }
    }
}
