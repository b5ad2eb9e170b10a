//! Line-oriented control surface on stdin, and the event printer.
//!
//! Friendly lowercase commands map onto the engine commands; the raw
//! protocol forms (`MSG bob hi`, `WHO`, ...) are accepted as well.

use std::path::Path;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use lanchat_core::{CommandError, DiscoveryCommand, Event, ExchangeCommand};
use lanchat_services::EventSink;

pub const HELP: &[&str] = &[
    "who                  ask every peer for its contact list",
    "peers | contacts     show known peers",
    "join [name port]     announce (defaults to yourself)",
    "leave [name]         announce departure (defaults to yourself)",
    "msg <name> <text>    send a text message",
    "img <name> <path>    send an image file",
    "help                 show this list",
    "quit                 leave the chat and exit",
];

/// Why the control surface stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlExit {
    /// `quit` was entered: the node should shut down.
    Quit,
    /// Input reached EOF. The node keeps running without a control surface.
    InputClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlInput {
    Discovery(DiscoveryCommand),
    Exchange(ExchangeCommand),
    Help,
    Quit,
}

fn malformed(command: &'static str, reason: impl Into<String>) -> CommandError {
    CommandError::Malformed {
        command,
        reason: reason.into(),
    }
}

/// Identity used to fill in `join` and `leave` without arguments.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub handle: String,
    pub port: u16,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str, me: &LocalIdentity) -> Result<Option<ControlInput>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let input = match word {
        "who" => ControlInput::Discovery(DiscoveryCommand::Who),
        "peers" | "contacts" => ControlInput::Discovery(DiscoveryCommand::Peers),
        "join" => match args[..] {
            [] => ControlInput::Discovery(DiscoveryCommand::Join {
                name: me.handle.clone(),
                port: me.port,
            }),
            _ => ControlInput::Discovery(format!("JOIN {rest}").parse()?),
        },
        "leave" => match args[..] {
            [] => ControlInput::Discovery(DiscoveryCommand::Leave {
                name: me.handle.clone(),
            }),
            [name] => ControlInput::Discovery(DiscoveryCommand::Leave {
                name: name.to_string(),
            }),
            _ => return Err(malformed("leave", "expected leave [name]")),
        },
        "msg" => {
            let (recipient, text) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| malformed("msg", "expected msg <name> <text>"))?;
            ControlInput::Exchange(ExchangeCommand::Msg {
                recipient: recipient.to_string(),
                text: text.trim().to_string(),
            })
        }
        "img" => {
            let (recipient, path) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| malformed("img", "expected img <name> <path>"))?;
            ControlInput::Exchange(image_command(recipient, Path::new(path.trim()))?)
        }
        "help" | "?" => ControlInput::Help,
        "quit" | "exit" => ControlInput::Quit,
        _ => match line.parse::<DiscoveryCommand>() {
            Ok(command) => ControlInput::Discovery(command),
            Err(_) => ControlInput::Exchange(line.parse()?),
        },
    };
    Ok(Some(input))
}

/// Build an `IMG_SEND` for a local file, taking name and size from disk.
fn image_command(recipient: &str, path: &Path) -> Result<ExchangeCommand, CommandError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.contains(char::is_whitespace))
        .ok_or_else(|| malformed("img", format!("unusable file name in {}", path.display())))?;
    let metadata = std::fs::metadata(path)
        .map_err(|e| malformed("img", format!("cannot read {}: {e}", path.display())))?;
    if !metadata.is_file() {
        return Err(malformed("img", format!("{} is not a file", path.display())));
    }
    Ok(ExchangeCommand::ImgSend {
        recipient: recipient.to_string(),
        filename: filename.to_string(),
        size: metadata.len(),
        path: path.to_path_buf(),
    })
}

/// Read commands from stdin until `quit` or EOF.
pub async fn stdin_loop(
    me: LocalIdentity,
    discovery: mpsc::UnboundedSender<DiscoveryCommand>,
    exchange: mpsc::UnboundedSender<ExchangeCommand>,
    events: EventSink,
) -> Result<ControlExit> {
    events.system("type 'help' for commands");
    control_loop(BufReader::new(tokio::io::stdin()), me, discovery, exchange, events).await
}

/// Dispatch commands read line by line from `input` until `quit` or EOF.
pub async fn control_loop<R>(
    input: R,
    me: LocalIdentity,
    discovery: mpsc::UnboundedSender<DiscoveryCommand>,
    exchange: mpsc::UnboundedSender<ExchangeCommand>,
    events: EventSink,
) -> Result<ControlExit>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line, &me) {
            Ok(None) => {}
            Ok(Some(ControlInput::Discovery(command))) => {
                if discovery.send(command).is_err() {
                    events.error("discovery engine is not running");
                }
            }
            Ok(Some(ControlInput::Exchange(command))) => {
                if exchange.send(command).is_err() {
                    events.error("exchange engine is not running");
                }
            }
            Ok(Some(ControlInput::Help)) => {
                for entry in HELP {
                    events.system(*entry);
                }
            }
            Ok(Some(ControlInput::Quit)) => {
                tracing::debug!("quit requested");
                return Ok(ControlExit::Quit);
            }
            Err(e) => events.error(e.to_string()),
        }
    }
    tracing::debug!("control input closed");
    Ok(ControlExit::InputClosed)
}

/// Print events as `[category] text` until every sender is gone.
pub async fn print_events(mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        println!("{event}");
    }
}
