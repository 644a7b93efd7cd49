//! Result publication: one pose plus the two source frames, re-stamped.
//!
//! All three outputs of a pair carry the same stamp and the same downstream
//! frame id. Source frames are never modified; the outputs are copies that
//! share the pixel bytes.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::StampedPose;
use crate::sensor::Frame;

use super::sink::Sink;

/// Default frame id stamped on every output.
pub const DEFAULT_FRAME_ID: &str = "odom";

/// Where the shared output stamp comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StampPolicy {
    /// The pair's match timestamp (primary capture time).
    #[default]
    Capture,
    /// Wall-clock time when the pair is published.
    Receipt,
}

/// Output channel identifier, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    Pose,
    Color,
    Depth,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("{0:?} output channel disconnected")]
    Disconnected(OutputChannel),
}

/// Publishes pose, color and depth for each tracked pair.
pub struct ResultPublisher {
    pose_sink: Box<dyn Sink<StampedPose>>,
    color_sink: Box<dyn Sink<Frame>>,
    depth_sink: Box<dyn Sink<Frame>>,
    frame_id: String,
    stamp_policy: StampPolicy,
}

impl ResultPublisher {
    pub fn new(
        pose_sink: Box<dyn Sink<StampedPose>>,
        color_sink: Box<dyn Sink<Frame>>,
        depth_sink: Box<dyn Sink<Frame>>,
    ) -> Self {
        Self {
            pose_sink,
            color_sink,
            depth_sink,
            frame_id: DEFAULT_FRAME_ID.to_string(),
            stamp_policy: StampPolicy::default(),
        }
    }

    pub fn with_frame_id(mut self, frame_id: impl Into<String>) -> Self {
        self.frame_id = frame_id.into();
        self
    }

    pub fn with_stamp_policy(mut self, policy: StampPolicy) -> Self {
        self.stamp_policy = policy;
        self
    }

    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    /// Emit the three outputs for one pair and return the shared stamp.
    ///
    /// The pose's own timestamp is the match timestamp; under
    /// `StampPolicy::Receipt` it is replaced by the current time.
    ///
    /// Outputs are sent in the order pose, color, depth, and sending stops at
    /// the first disconnected sink. The error names that sink; the outputs
    /// sent before it have already been delivered and are not withdrawn, so a
    /// `PublishError` does not mean nothing was published for the pair.
    pub fn publish(
        &self,
        pose: &StampedPose,
        color: &Frame,
        depth: &Frame,
    ) -> Result<u64, PublishError> {
        let stamp = match self.stamp_policy {
            StampPolicy::Capture => pose.header.timestamp_ns,
            StampPolicy::Receipt => wall_clock_ns(),
        };

        self.pose_sink
            .send(pose.restamped(stamp, &self.frame_id))
            .map_err(|_| PublishError::Disconnected(OutputChannel::Pose))?;
        self.color_sink
            .send(color.restamped(stamp, &self.frame_id))
            .map_err(|_| PublishError::Disconnected(OutputChannel::Color))?;
        self.depth_sink
            .send(depth.restamped(stamp, &self.frame_id))
            .map_err(|_| PublishError::Disconnected(OutputChannel::Depth))?;

        Ok(stamp)
    }
}

fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::CollectingSink;
    use crate::sensor::Header;
    use crate::sensor::frame::fixtures::{depth_frame, rgb_frame};
    use crossbeam_channel::unbounded;
    use nalgebra::{UnitQuaternion, Vector3};
    use std::sync::Arc;

    fn pose_at(timestamp_ns: u64) -> StampedPose {
        StampedPose {
            header: Header::new(timestamp_ns, "odom"),
            position: Vector3::new(1.0, 2.0, 3.0),
            orientation: UnitQuaternion::identity(),
        }
    }

    struct Outputs {
        poses: Arc<CollectingSink<StampedPose>>,
        colors: Arc<CollectingSink<Frame>>,
        depths: Arc<CollectingSink<Frame>>,
    }

    fn collecting_publisher() -> (ResultPublisher, Outputs) {
        let outputs = Outputs {
            poses: Arc::new(CollectingSink::new()),
            colors: Arc::new(CollectingSink::new()),
            depths: Arc::new(CollectingSink::new()),
        };
        let publisher = ResultPublisher::new(
            Box::new(Arc::clone(&outputs.poses)),
            Box::new(Arc::clone(&outputs.colors)),
            Box::new(Arc::clone(&outputs.depths)),
        );
        (publisher, outputs)
    }

    #[test]
    fn outputs_share_match_stamp_and_frame_id() {
        let (publisher, out) = collecting_publisher();
        let publisher = publisher.with_frame_id("world");
        let color = rgb_frame(1_000_000_000, 4, 3);
        let depth = depth_frame(1_004_000_000, 4, 3);

        let stamp = publisher
            .publish(&pose_at(1_000_000_000), &color, &depth)
            .unwrap();
        assert_eq!(stamp, 1_000_000_000);

        let poses = out.poses.take();
        let colors = out.colors.take();
        let depths = out.depths.take();
        assert_eq!(poses.len(), 1);
        assert_eq!(colors.len(), 1);
        assert_eq!(depths.len(), 1);

        for header in [&poses[0].header, &colors[0].header, &depths[0].header] {
            assert_eq!(header, &Header::new(1_000_000_000, "world"));
        }
        // Depth carries the color clock, not its own capture time
        assert_ne!(depths[0].header.timestamp_ns, depth.header.timestamp_ns);
        assert_eq!(depth.header.timestamp_ns, 1_004_000_000);
        assert_eq!(depth.header.frame_id, "camera_depth_optical_frame");
        assert_eq!(colors[0].data, color.data);
        assert_eq!(depths[0].encoding, "16UC1");
    }

    #[test]
    fn receipt_policy_uses_one_wall_clock_stamp() {
        let (publisher, out) = collecting_publisher();
        let publisher = publisher.with_stamp_policy(StampPolicy::Receipt);

        let before = wall_clock_ns();
        let stamp = publisher
            .publish(&pose_at(5), &rgb_frame(5, 2, 2), &depth_frame(6, 2, 2))
            .unwrap();
        assert!(stamp >= before);

        assert_eq!(out.poses.take()[0].header.timestamp_ns, stamp);
        assert_eq!(out.colors.take()[0].header.timestamp_ns, stamp);
        assert_eq!(out.depths.take()[0].header.timestamp_ns, stamp);
    }

    #[test]
    fn disconnect_stops_at_the_failed_sink() {
        let (pose_tx, pose_rx) = unbounded::<StampedPose>();
        let (color_tx, color_rx) = unbounded::<Frame>();
        let (depth_tx, depth_rx) = unbounded::<Frame>();
        drop(depth_rx);

        let publisher =
            ResultPublisher::new(Box::new(pose_tx), Box::new(color_tx), Box::new(depth_tx));
        let err = publisher
            .publish(&pose_at(1), &rgb_frame(1, 2, 2), &depth_frame(1, 2, 2))
            .unwrap_err();
        assert_eq!(err, PublishError::Disconnected(OutputChannel::Depth));
        // Sent before the depth sink failed, and kept
        assert_eq!(pose_rx.len(), 1);
        assert_eq!(color_rx.len(), 1);
    }

    #[test]
    fn disconnect_of_first_sink_sends_nothing() {
        let (pose_tx, pose_rx) = unbounded::<StampedPose>();
        let (color_tx, color_rx) = unbounded::<Frame>();
        let (depth_tx, depth_rx) = unbounded::<Frame>();
        drop(pose_rx);

        let publisher =
            ResultPublisher::new(Box::new(pose_tx), Box::new(color_tx), Box::new(depth_tx));
        let err = publisher
            .publish(&pose_at(1), &rgb_frame(1, 2, 2), &depth_frame(1, 2, 2))
            .unwrap_err();
        assert_eq!(err, PublishError::Disconnected(OutputChannel::Pose));
        assert!(color_rx.is_empty());
        assert!(depth_rx.is_empty());
    }
}
