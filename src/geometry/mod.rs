//! Geometry: rotation conversions and stamped poses.

pub mod pose;
pub mod quaternion;

pub use pose::{PoseConvention, PoseTransformer, StampedPose};
pub use quaternion::{DominantTerm, dominant_term, rotation_to_quaternion};
