//! Boundary to the external pose-estimation engine.

use anyhow::Result;
use nalgebra::Matrix4;

use crate::sensor::DecodedImage;

/// An RGB-D tracking engine.
///
/// The engine owns its map and any internal threads; from here it is a
/// blocking call per pair. `Ok(None)` means the engine ran but produced no
/// pose for this pair.
pub trait TrackingEngine: Send {
    /// Track one registered color/depth pair captured at `timestamp_s`.
    /// Returns the 4x4 homogeneous camera transform on success.
    fn track_rgbd(
        &mut self,
        color: &DecodedImage,
        depth: &DecodedImage,
        timestamp_s: f64,
    ) -> Result<Option<Matrix4<f64>>>;
}

impl<F> TrackingEngine for F
where
    F: FnMut(&DecodedImage, &DecodedImage, f64) -> Result<Option<Matrix4<f64>>> + Send,
{
    fn track_rgbd(
        &mut self,
        color: &DecodedImage,
        depth: &DecodedImage,
        timestamp_s: f64,
    ) -> Result<Option<Matrix4<f64>>> {
        self(color, depth, timestamp_s)
    }
}
