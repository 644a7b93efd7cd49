//! Result publication to injected output channels.

pub mod publisher;
pub mod sink;

pub use publisher::{DEFAULT_FRAME_ID, OutputChannel, PublishError, ResultPublisher, StampPolicy};
pub use sink::{CollectingSink, Disconnected, Sink};
