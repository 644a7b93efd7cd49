//! Raw image messages as delivered by the transport.
//!
//! A `Frame` has the same shape on the inbound and outbound side: the
//! publisher re-emits frames by building re-stamped copies, so the pixel
//! bytes are held behind an `Arc` and never copied.

use std::fmt;
use std::sync::Arc;

/// Which of the two synchronized input streams a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    /// Color stream (channel A). Its clock is authoritative for pairs.
    Primary,
    /// Registered depth stream (channel B).
    Secondary,
}

impl StreamId {
    /// The stream a frame on `self` must be paired against.
    pub fn other(self) -> Self {
        match self {
            StreamId::Primary => StreamId::Secondary,
            StreamId::Secondary => StreamId::Primary,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            StreamId::Primary => 0,
            StreamId::Secondary => 1,
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Primary => write!(f, "primary"),
            StreamId::Secondary => write!(f, "secondary"),
        }
    }
}

/// Message header: capture time and the coordinate frame the data lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Capture time in nanoseconds on the sensor's monotonic clock.
    pub timestamp_ns: u64,
    pub frame_id: String,
}

impl Header {
    pub fn new(timestamp_ns: u64, frame_id: impl Into<String>) -> Self {
        Self {
            timestamp_ns,
            frame_id: frame_id.into(),
        }
    }
}

/// An encoded image message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub stream_id: StreamId,
    pub header: Header,
    pub width: u32,
    pub height: u32,
    /// Row length in bytes, including any padding.
    pub step: u32,
    /// Pixel encoding tag, e.g. `rgb8` or `16UC1`.
    pub encoding: String,
    pub is_bigendian: bool,
    pub data: Arc<[u8]>,
}

impl Frame {
    pub fn timestamp_ns(&self) -> u64 {
        self.header.timestamp_ns
    }

    /// Copy of this frame carrying a new header. Pixel bytes are shared.
    pub fn restamped(&self, timestamp_ns: u64, frame_id: &str) -> Frame {
        Frame {
            header: Header::new(timestamp_ns, frame_id),
            data: Arc::clone(&self.data),
            encoding: self.encoding.clone(),
            ..*self
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Tightly packed `rgb8` frame filled with a constant byte.
    pub fn rgb_frame(timestamp_ns: u64, width: u32, height: u32) -> Frame {
        let step = width * 3;
        Frame {
            stream_id: StreamId::Primary,
            header: Header::new(timestamp_ns, "camera_rgb_optical_frame"),
            width,
            height,
            step,
            encoding: "rgb8".to_string(),
            is_bigendian: false,
            data: vec![7u8; (step * height) as usize].into(),
        }
    }

    /// Tightly packed little-endian `16UC1` depth frame (1000 mm everywhere).
    pub fn depth_frame(timestamp_ns: u64, width: u32, height: u32) -> Frame {
        let step = width * 2;
        let data: Vec<u8> = (0..width * height)
            .flat_map(|_| 1000u16.to_le_bytes())
            .collect();
        Frame {
            stream_id: StreamId::Secondary,
            header: Header::new(timestamp_ns, "camera_depth_optical_frame"),
            width,
            height,
            step,
            encoding: "16UC1".to_string(),
            is_bigendian: false,
            data: data.into(),
        }
    }
}
