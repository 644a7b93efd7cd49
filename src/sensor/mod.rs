//! Sensor messages and frame decoding.

pub mod decode;
pub mod encoding;
pub mod frame;

pub use decode::{ChannelLayout, DecodeError, DecodedImage, PixelMatrix, decode};
pub use encoding::PixelEncoding;
pub use frame::{Frame, Header, StreamId};
