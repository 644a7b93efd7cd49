//! Per-pair tracking outcome.
//!
//! A `PoseEstimate` lives for exactly one synchronized pair. Nothing here is
//! carried over to the next pair.

use nalgebra::{Matrix3, Matrix4, Vector3};
use thiserror::Error;

/// Largest accepted deviation of RᵀR from identity, per element.
pub const ORTHONORMAL_TOLERANCE: f64 = 1e-3;

/// Rotation and translation extracted from a homogeneous transform.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidTransform {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

impl RigidTransform {
    /// Split a 4x4 `[R | t; 0 | 1]` matrix into its blocks.
    ///
    /// Fails if any entry is non-finite or the rotation block is not a
    /// proper rotation within [`ORTHONORMAL_TOLERANCE`].
    pub fn from_homogeneous(m: &Matrix4<f64>) -> Result<Self, TrackingFailure> {
        if m.iter().any(|v| !v.is_finite()) {
            return Err(TrackingFailure::InvalidTransform(
                "non-finite entries".to_string(),
            ));
        }

        let rotation: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let translation: Vector3<f64> = m.fixed_view::<3, 1>(0, 3).into_owned();

        let deviation = (rotation.transpose() * rotation - Matrix3::identity()).amax();
        if deviation > ORTHONORMAL_TOLERANCE {
            return Err(TrackingFailure::InvalidTransform(format!(
                "rotation block not orthonormal (max deviation {:.2e})",
                deviation
            )));
        }
        if rotation.determinant() <= 0.0 {
            return Err(TrackingFailure::InvalidTransform(
                "rotation block is a reflection".to_string(),
            ));
        }

        Ok(Self {
            rotation,
            translation,
        })
    }

    /// Inverse transform: `[Rᵀ | -Rᵀt]`.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.transpose();
        Self {
            translation: -(rotation * self.translation),
            rotation,
        }
    }

    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }
}

/// Why no pose was produced for a pair. Recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackingFailure {
    /// The engine answered but has no pose (lost, or still initializing).
    #[error("engine returned no pose")]
    Lost,
    #[error("engine error: {0}")]
    Engine(String),
    #[error("images incompatible with engine: {0}")]
    IncompatibleImages(String),
    #[error("engine returned an invalid transform: {0}")]
    InvalidTransform(String),
}

/// Result of tracking one synchronized pair.
#[derive(Debug, Clone, PartialEq)]
pub enum PoseEstimate {
    Tracked(RigidTransform),
    TrackingFailed(TrackingFailure),
}

impl PoseEstimate {
    pub fn is_tracked(&self) -> bool {
        matches!(self, PoseEstimate::Tracked(_))
    }

    pub fn into_failure(self) -> Option<TrackingFailure> {
        match self {
            PoseEstimate::Tracked(_) => None,
            PoseEstimate::TrackingFailed(failure) => Some(failure),
        }
    }
}
