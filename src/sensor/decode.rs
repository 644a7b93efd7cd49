//! Frame decoding: raw message bytes to a canonical pixel matrix.
//!
//! Canonical form means packed rows (no stride padding), native-endian
//! samples and RGB channel order. Decoding is all-or-nothing: any
//! inconsistency between the header and the buffer yields a `DecodeError`
//! before a single pixel is copied.

use image::{GrayImage, ImageBuffer, Luma, RgbImage, RgbaImage};
use thiserror::Error;

use super::encoding::PixelEncoding;
use super::frame::Frame;

pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;
pub type DepthImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Per-frame decode failure. Recoverable: the frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unsupported pixel encoding `{0}`")]
    UnsupportedEncoding(String),
    #[error("malformed image buffer: {reason}")]
    MalformedBuffer { reason: String },
}

impl DecodeError {
    fn malformed(reason: impl Into<String>) -> Self {
        DecodeError::MalformedBuffer {
            reason: reason.into(),
        }
    }
}

/// Channel layout of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Rgb8,
    Rgba8,
    Mono8,
    Mono16,
    Depth16,
    Depth32F,
}

impl ChannelLayout {
    pub fn is_color(self) -> bool {
        matches!(
            self,
            ChannelLayout::Rgb8 | ChannelLayout::Rgba8 | ChannelLayout::Mono8
        )
    }

    pub fn is_depth(self) -> bool {
        matches!(
            self,
            ChannelLayout::Mono16 | ChannelLayout::Depth16 | ChannelLayout::Depth32F
        )
    }
}

/// Pixel storage, one variant per canonical layout.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelMatrix {
    Rgb8(RgbImage),
    Rgba8(RgbaImage),
    Mono8(GrayImage),
    Mono16(Gray16Image),
    Depth16(Gray16Image),
    Depth32F(DepthImage),
}

impl PixelMatrix {
    pub fn layout(&self) -> ChannelLayout {
        match self {
            PixelMatrix::Rgb8(_) => ChannelLayout::Rgb8,
            PixelMatrix::Rgba8(_) => ChannelLayout::Rgba8,
            PixelMatrix::Mono8(_) => ChannelLayout::Mono8,
            PixelMatrix::Mono16(_) => ChannelLayout::Mono16,
            PixelMatrix::Depth16(_) => ChannelLayout::Depth16,
            PixelMatrix::Depth32F(_) => ChannelLayout::Depth32F,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            PixelMatrix::Rgb8(img) => img.dimensions(),
            PixelMatrix::Rgba8(img) => img.dimensions(),
            PixelMatrix::Mono8(img) => img.dimensions(),
            PixelMatrix::Mono16(img) | PixelMatrix::Depth16(img) => img.dimensions(),
            PixelMatrix::Depth32F(img) => img.dimensions(),
        }
    }
}

/// A fully decoded image.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    pixels: PixelMatrix,
}

impl DecodedImage {
    pub fn from_pixels(pixels: PixelMatrix) -> Self {
        let (width, height) = pixels.dimensions();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn layout(&self) -> ChannelLayout {
        self.pixels.layout()
    }

    pub fn pixels(&self) -> &PixelMatrix {
        &self.pixels
    }

    pub fn into_pixels(self) -> PixelMatrix {
        self.pixels
    }
}

/// Decode a frame into its canonical pixel matrix.
pub fn decode(frame: &Frame) -> Result<DecodedImage, DecodeError> {
    let encoding: PixelEncoding = frame
        .encoding
        .parse()
        .map_err(|_| DecodeError::UnsupportedEncoding(frame.encoding.clone()))?;

    let packed = packed_rows(frame, encoding.bytes_per_pixel())?;
    let (w, h) = (frame.width, frame.height);
    let big = frame.is_bigendian;

    let pixels = match encoding {
        PixelEncoding::Rgb8 => PixelMatrix::Rgb8(buffer(w, h, packed)?),
        PixelEncoding::Bgr8 => PixelMatrix::Rgb8(buffer(w, h, swap_red_blue(packed, 3))?),
        PixelEncoding::Rgba8 => PixelMatrix::Rgba8(buffer(w, h, packed)?),
        PixelEncoding::Bgra8 => PixelMatrix::Rgba8(buffer(w, h, swap_red_blue(packed, 4))?),
        PixelEncoding::Mono8 => PixelMatrix::Mono8(buffer(w, h, packed)?),
        PixelEncoding::Mono16 => PixelMatrix::Mono16(buffer(w, h, u16_samples(&packed, big))?),
        PixelEncoding::Depth16 => PixelMatrix::Depth16(buffer(w, h, u16_samples(&packed, big))?),
        PixelEncoding::Depth32F => PixelMatrix::Depth32F(buffer(w, h, f32_samples(&packed, big))?),
    };

    Ok(DecodedImage::from_pixels(pixels))
}

/// Validate the buffer geometry and return the rows with padding removed.
fn packed_rows(frame: &Frame, bytes_per_pixel: u32) -> Result<Vec<u8>, DecodeError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(DecodeError::malformed(format!(
            "empty image {}x{}",
            frame.width, frame.height
        )));
    }

    let row_bytes = frame.width as usize * bytes_per_pixel as usize;
    let step = frame.step as usize;
    if step < row_bytes {
        return Err(DecodeError::malformed(format!(
            "step {} shorter than row of {} bytes",
            step, row_bytes
        )));
    }

    let expected = step
        .checked_mul(frame.height as usize)
        .ok_or_else(|| DecodeError::malformed("step x height overflows"))?;
    if frame.data.len() != expected {
        return Err(DecodeError::malformed(format!(
            "buffer holds {} bytes, header implies {} (step {} x height {})",
            frame.data.len(),
            expected,
            step,
            frame.height
        )));
    }

    if step == row_bytes {
        return Ok(frame.data.to_vec());
    }

    let mut packed = Vec::with_capacity(row_bytes * frame.height as usize);
    for row in frame.data.chunks_exact(step) {
        packed.extend_from_slice(&row[..row_bytes]);
    }
    Ok(packed)
}

fn buffer<P: image::Pixel>(
    width: u32,
    height: u32,
    samples: Vec<P::Subpixel>,
) -> Result<ImageBuffer<P, Vec<P::Subpixel>>, DecodeError> {
    ImageBuffer::from_raw(width, height, samples)
        .ok_or_else(|| DecodeError::malformed("sample count does not match dimensions"))
}

fn swap_red_blue(mut bytes: Vec<u8>, channels: usize) -> Vec<u8> {
    for px in bytes.chunks_exact_mut(channels) {
        px.swap(0, 2);
    }
    bytes
}

fn u16_samples(bytes: &[u8], big_endian: bool) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|b| {
            let raw = [b[0], b[1]];
            if big_endian {
                u16::from_be_bytes(raw)
            } else {
                u16::from_le_bytes(raw)
            }
        })
        .collect()
}

fn f32_samples(bytes: &[u8], big_endian: bool) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| {
            let raw = [b[0], b[1], b[2], b[3]];
            if big_endian {
                f32::from_be_bytes(raw)
            } else {
                f32::from_le_bytes(raw)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::frame::fixtures::{depth_frame, rgb_frame};
    use crate::sensor::frame::{Header, StreamId};

    fn frame_with(encoding: &str, width: u32, height: u32, step: u32, data: Vec<u8>) -> Frame {
        Frame {
            stream_id: StreamId::Primary,
            header: Header::new(0, "cam"),
            width,
            height,
            step,
            encoding: encoding.to_string(),
            is_bigendian: false,
            data: data.into(),
        }
    }

    #[test]
    fn decodes_packed_rgb() {
        let img = decode(&rgb_frame(0, 4, 3)).unwrap();
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(img.layout(), ChannelLayout::Rgb8);
        match img.pixels() {
            PixelMatrix::Rgb8(rgb) => assert_eq!(rgb.get_pixel(3, 2).0, [7, 7, 7]),
            other => panic!("unexpected layout {:?}", other.layout()),
        }
    }

    #[test]
    fn bgr_is_reordered_to_rgb() {
        let frame = frame_with("bgr8", 1, 1, 3, vec![10, 20, 30]);
        let img = decode(&frame).unwrap();
        match img.pixels() {
            PixelMatrix::Rgb8(rgb) => assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]),
            other => panic!("unexpected layout {:?}", other.layout()),
        }
    }

    #[test]
    fn strips_row_padding() {
        // 2x2 mono8 with two bytes of padding per row
        let frame = frame_with("mono8", 2, 2, 4, vec![1, 2, 0xAA, 0xAA, 3, 4, 0xBB, 0xBB]);
        let img = decode(&frame).unwrap();
        match img.into_pixels() {
            PixelMatrix::Mono8(gray) => assert_eq!(gray.into_raw(), vec![1, 2, 3, 4]),
            other => panic!("unexpected layout {:?}", other.layout()),
        }
    }

    #[test]
    fn honors_big_endian_depth() {
        let mut frame = frame_with("16UC1", 2, 1, 4, vec![0x03, 0xE8, 0x00, 0x01]);
        frame.is_bigendian = true;
        let img = decode(&frame).unwrap();
        match img.into_pixels() {
            PixelMatrix::Depth16(depth) => assert_eq!(depth.into_raw(), vec![1000, 1]),
            other => panic!("unexpected layout {:?}", other.layout()),
        }
    }

    #[test]
    fn decodes_float_depth() {
        let data: Vec<u8> = [1.5f32, -0.25].iter().flat_map(|v| v.to_le_bytes()).collect();
        let img = decode(&frame_with("32FC1", 2, 1, 8, data)).unwrap();
        assert_eq!(img.layout(), ChannelLayout::Depth32F);
        match img.into_pixels() {
            PixelMatrix::Depth32F(depth) => assert_eq!(depth.into_raw(), vec![1.5, -0.25]),
            other => panic!("unexpected layout {:?}", other.layout()),
        }
    }

    #[test]
    fn decodes_fixture_depth() {
        let img = decode(&depth_frame(0, 3, 2)).unwrap();
        assert_eq!(img.layout(), ChannelLayout::Depth16);
        assert!(img.layout().is_depth());
    }

    #[test]
    fn unsupported_encoding_is_reported() {
        let frame = frame_with("yuv422", 2, 1, 4, vec![0; 4]);
        assert_eq!(
            decode(&frame),
            Err(DecodeError::UnsupportedEncoding("yuv422".to_string()))
        );
    }

    #[test]
    fn short_buffer_is_malformed() {
        let frame = frame_with("rgb8", 4, 3, 12, vec![0; 35]);
        assert!(matches!(
            decode(&frame),
            Err(DecodeError::MalformedBuffer { .. })
        ));
    }

    #[test]
    fn step_shorter_than_row_is_malformed() {
        let frame = frame_with("rgb8", 4, 1, 8, vec![0; 8]);
        assert!(matches!(
            decode(&frame),
            Err(DecodeError::MalformedBuffer { .. })
        ));
    }

    #[test]
    fn empty_image_is_malformed() {
        let frame = frame_with("mono8", 0, 4, 0, Vec::new());
        assert!(matches!(
            decode(&frame),
            Err(DecodeError::MalformedBuffer { .. })
        ));
    }

    #[test]
    fn bad_frame_does_not_affect_next_one() {
        let bad = frame_with("rgb8", 4, 3, 12, vec![0; 5]);
        assert!(decode(&bad).is_err());
        assert!(decode(&rgb_frame(1, 4, 3)).is_ok());
    }
}
