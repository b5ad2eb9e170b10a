//! lanchat-core — wire formats, commands, events and configuration.
//! The other lanchat crates depend on this one.

pub mod command;
pub mod config;
pub mod event;
pub mod wire;

pub use command::{CommandError, DiscoveryCommand, ExchangeCommand};
pub use config::{ConfigError, LanchatConfig};
pub use event::{Event, EventCategory};
pub use wire::{DiscoveryMessage, PeerRecord, TransferHeader, WireError};
