//! Pixel encoding tags understood by the decoder.

use std::str::FromStr;

/// Encodings the decoder knows how to unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEncoding {
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Mono8,
    Mono16,
    /// 16-bit unsigned depth, usually millimetres.
    Depth16,
    /// 32-bit float depth, usually metres.
    Depth32F,
}

impl PixelEncoding {
    /// Bytes occupied by one pixel in the raw buffer.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelEncoding::Mono8 => 1,
            PixelEncoding::Mono16 | PixelEncoding::Depth16 => 2,
            PixelEncoding::Rgb8 | PixelEncoding::Bgr8 => 3,
            PixelEncoding::Rgba8 | PixelEncoding::Bgra8 | PixelEncoding::Depth32F => 4,
        }
    }
}

/// Unknown encoding tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEncoding(pub String);

impl FromStr for PixelEncoding {
    type Err = UnknownEncoding;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let encoding = match tag {
            "rgb8" => PixelEncoding::Rgb8,
            // OpenCV-style untyped 3-channel buffers are BGR ordered.
            "bgr8" | "8UC3" => PixelEncoding::Bgr8,
            "rgba8" => PixelEncoding::Rgba8,
            "bgra8" => PixelEncoding::Bgra8,
            "mono8" | "8UC1" => PixelEncoding::Mono8,
            "mono16" => PixelEncoding::Mono16,
            "16UC1" => PixelEncoding::Depth16,
            "32FC1" => PixelEncoding::Depth32F,
            other => return Err(UnknownEncoding(other.to_string())),
        };
        Ok(encoding)
    }
}
