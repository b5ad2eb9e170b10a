//! lanchat-services — state shared between the discovery and exchange
//! engines and the presentation layer.

pub mod contact;
pub mod events;
pub mod image_store;

pub use contact::ContactTable;
pub use events::{event_channel, EventSink};
pub use image_store::{ImageStore, ImageStoreError, ImageViewer, NoViewer, PlatformViewer};
