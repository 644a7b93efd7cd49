//! Stamped poses and the conversion from tracking output.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::sensor::Header;
use crate::tracking::{PoseEstimate, RigidTransform};

use super::quaternion::rotation_to_quaternion;

/// A pose ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedPose {
    pub header: Header,
    pub position: Vector3<f64>,
    /// Unit quaternion (w, x, y, z). Sign is not canonicalized.
    pub orientation: UnitQuaternion<f64>,
}

impl StampedPose {
    /// Orientation as `[w, x, y, z]`.
    pub fn orientation_wxyz(&self) -> [f64; 4] {
        let q = self.orientation.quaternion();
        [q.w, q.i, q.j, q.k]
    }

    /// Copy carrying a new header.
    pub fn restamped(&self, timestamp_ns: u64, frame_id: &str) -> StampedPose {
        StampedPose {
            header: Header::new(timestamp_ns, frame_id),
            ..self.clone()
        }
    }
}

/// Which transform is published for a tracked pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseConvention {
    /// The engine's transform as returned.
    #[default]
    EngineFrame,
    /// The inverse of the engine's transform (camera pose in the world
    /// frame for an engine returning world-to-camera).
    Inverted,
}

/// Turns pose estimates into stamped poses.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoseTransformer {
    convention: PoseConvention,
}

impl PoseTransformer {
    pub fn new(convention: PoseConvention) -> Self {
        Self { convention }
    }

    /// `None` when tracking failed: no pose is emitted for that pair.
    pub fn to_stamped_pose(
        &self,
        estimate: &PoseEstimate,
        reference_frame_id: &str,
        timestamp_ns: u64,
    ) -> Option<StampedPose> {
        match estimate {
            PoseEstimate::Tracked(transform) => {
                Some(self.to_stamped(transform, reference_frame_id, timestamp_ns))
            }
            PoseEstimate::TrackingFailed(_) => None,
        }
    }

    /// Stamp a tracked transform under the configured convention.
    fn to_stamped(
        &self,
        transform: &RigidTransform,
        reference_frame_id: &str,
        timestamp_ns: u64,
    ) -> StampedPose {
        let published = match self.convention {
            PoseConvention::EngineFrame => transform.clone(),
            PoseConvention::Inverted => transform.inverse(),
        };

        StampedPose {
            header: Header::new(timestamp_ns, reference_frame_id),
            position: published.translation,
            orientation: rotation_to_quaternion(&published.rotation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::TrackingFailure;
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3};

    fn tracked(rotation: Matrix3<f64>, translation: Vector3<f64>) -> PoseEstimate {
        PoseEstimate::Tracked(RigidTransform {
            rotation,
            translation,
        })
    }

    #[test]
    fn identity_pose() {
        let pose = PoseTransformer::default()
            .to_stamped_pose(&tracked(Matrix3::identity(), Vector3::zeros()), "odom", 7)
            .unwrap();

        assert_eq!(pose.orientation_wxyz(), [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(pose.position, Vector3::zeros());
        assert_eq!(pose.header, Header::new(7, "odom"));
    }

    #[test]
    fn failed_tracking_yields_nothing() {
        let estimate = PoseEstimate::TrackingFailed(TrackingFailure::Lost);
        assert!(
            PoseTransformer::default()
                .to_stamped_pose(&estimate, "odom", 0)
                .is_none()
        );
    }

    #[test]
    fn translation_is_copied_verbatim() {
        let rotation = *Rotation3::from_euler_angles(0.5, -0.2, 2.0).matrix();
        let translation = Vector3::new(0.25, -1.5, 3.0);
        let pose = PoseTransformer::default()
            .to_stamped_pose(&tracked(rotation, translation), "odom", 0)
            .unwrap();

        assert_eq!(pose.position, translation);
        assert_relative_eq!(pose.orientation.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(
            *pose.orientation.to_rotation_matrix().matrix(),
            rotation,
            epsilon = 1e-12
        );
    }

    #[test]
    fn inverted_convention_publishes_inverse() {
        let iso = Isometry3::from_parts(
            Translation3::new(1.0, 2.0, 3.0),
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
        );
        let estimate = tracked(
            *iso.rotation.to_rotation_matrix().matrix(),
            iso.translation.vector,
        );
        let pose = PoseTransformer::new(PoseConvention::Inverted)
            .to_stamped_pose(&estimate, "map", 0)
            .unwrap();

        let published = Isometry3::from_parts(pose.position.into(), pose.orientation);
        assert_relative_eq!(
            (published * iso).to_homogeneous(),
            Isometry3::identity().to_homogeneous(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn restamp_keeps_geometry() {
        let pose = PoseTransformer::default()
            .to_stamped_pose(
                &tracked(Matrix3::identity(), Vector3::new(1.0, 0.0, 0.0)),
                "cam",
                1,
            )
            .unwrap();
        let copy = pose.restamped(99, "odom");
        assert_eq!(copy.header, Header::new(99, "odom"));
        assert_eq!(copy.position, pose.position);
        assert_eq!(pose.header.frame_id, "cam");
    }
}
