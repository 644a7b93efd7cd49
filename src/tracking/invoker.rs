//! Validation and failure translation around the tracking engine call.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::sensor::DecodedImage;

use super::engine::TrackingEngine;
use super::result::{PoseEstimate, RigidTransform, TrackingFailure};
use super::state::TrackingState;

/// Counters for engine calls.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackingStats {
    pub calls: u64,
    pub tracked: u64,
    pub failed: u64,
    /// Failures since the last tracked pair.
    pub consecutive_failures: u64,
}

/// Calls the engine for each decoded pair and never lets it fail the pipeline.
pub struct TrackingInvoker {
    engine: Box<dyn TrackingEngine>,
    /// Image size the engine was configured for, if it cares.
    expected_dimensions: Option<(u32, u32)>,
    state: TrackingState,
    stats: TrackingStats,
}

impl TrackingInvoker {
    pub fn new(engine: Box<dyn TrackingEngine>) -> Self {
        Self {
            engine,
            expected_dimensions: None,
            state: TrackingState::NotInitialized,
            stats: TrackingStats::default(),
        }
    }

    pub fn with_expected_dimensions(mut self, width: u32, height: u32) -> Self {
        self.expected_dimensions = Some((width, height));
        self
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn stats(&self) -> &TrackingStats {
        &self.stats
    }

    /// Track one decoded pair captured at `timestamp_ns`.
    pub fn track(
        &mut self,
        primary: &DecodedImage,
        secondary: &DecodedImage,
        timestamp_ns: u64,
    ) -> PoseEstimate {
        let estimate = match self.check_compatible(primary, secondary) {
            Ok(()) => self.call_engine(primary, secondary, timestamp_ns),
            Err(failure) => PoseEstimate::TrackingFailed(failure),
        };
        self.record(&estimate, timestamp_ns);
        estimate
    }

    fn check_compatible(
        &self,
        primary: &DecodedImage,
        secondary: &DecodedImage,
    ) -> Result<(), TrackingFailure> {
        if !primary.layout().is_color() {
            return Err(TrackingFailure::IncompatibleImages(format!(
                "primary image has non-color layout {:?}",
                primary.layout()
            )));
        }
        if !secondary.layout().is_depth() {
            return Err(TrackingFailure::IncompatibleImages(format!(
                "secondary image has non-depth layout {:?}",
                secondary.layout()
            )));
        }
        if primary.dimensions() != secondary.dimensions() {
            return Err(TrackingFailure::IncompatibleImages(format!(
                "color {}x{} and depth {}x{} are not registered",
                primary.width(),
                primary.height(),
                secondary.width(),
                secondary.height()
            )));
        }
        if let Some((w, h)) = self.expected_dimensions {
            if primary.dimensions() != (w, h) {
                return Err(TrackingFailure::IncompatibleImages(format!(
                    "engine expects {}x{}, got {}x{}",
                    w,
                    h,
                    primary.width(),
                    primary.height()
                )));
            }
        }
        Ok(())
    }

    fn call_engine(
        &mut self,
        primary: &DecodedImage,
        secondary: &DecodedImage,
        timestamp_ns: u64,
    ) -> PoseEstimate {
        self.stats.calls += 1;
        let t_start = Instant::now();
        let result = self
            .engine
            .track_rgbd(primary, secondary, timestamp_ns as f64 * 1e-9);
        debug!(
            "Engine call at {} ns took {:.1} ms",
            timestamp_ns,
            t_start.elapsed().as_secs_f64() * 1e3
        );

        match result {
            Ok(Some(matrix)) => match RigidTransform::from_homogeneous(&matrix) {
                Ok(transform) => PoseEstimate::Tracked(transform),
                Err(failure) => PoseEstimate::TrackingFailed(failure),
            },
            Ok(None) => PoseEstimate::TrackingFailed(TrackingFailure::Lost),
            Err(e) => PoseEstimate::TrackingFailed(TrackingFailure::Engine(format!("{:#}", e))),
        }
    }

    fn record(&mut self, estimate: &PoseEstimate, timestamp_ns: u64) {
        let tracked = estimate.is_tracked();
        if tracked {
            self.stats.tracked += 1;
            self.stats.consecutive_failures = 0;
        } else {
            self.stats.failed += 1;
            self.stats.consecutive_failures += 1;
        }
        if let PoseEstimate::TrackingFailed(failure) = estimate {
            warn!("Tracking failed at {} ns: {}", timestamp_ns, failure);
        }

        let next = self.state.advance(tracked);
        if next != self.state {
            info!(
                "Tracking state {:?} -> {:?} at {} ns",
                self.state, next, timestamp_ns
            );
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use image::{ImageBuffer, RgbImage};
    use nalgebra::Matrix4;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::sensor::PixelMatrix;

    fn color(w: u32, h: u32) -> DecodedImage {
        DecodedImage::from_pixels(PixelMatrix::Rgb8(RgbImage::new(w, h)))
    }

    fn depth(w: u32, h: u32) -> DecodedImage {
        DecodedImage::from_pixels(PixelMatrix::Depth16(ImageBuffer::new(w, h)))
    }

    type EngineResult = anyhow::Result<Option<Matrix4<f64>>>;

    fn invoker_returning(result: fn() -> EngineResult) -> TrackingInvoker {
        TrackingInvoker::new(Box::new(
            move |_: &DecodedImage, _: &DecodedImage, _: f64| result(),
        ))
    }

    #[test]
    fn passes_engine_pose_through() {
        let mut invoker = invoker_returning(|| {
            let mut m = Matrix4::identity();
            m[(0, 3)] = 1.5;
            Ok(Some(m))
        });
        match invoker.track(&color(4, 3), &depth(4, 3), 1_000_000_000) {
            PoseEstimate::Tracked(t) => assert_eq!(t.translation.x, 1.5),
            other => panic!("expected a pose, got {:?}", other),
        }
        assert_eq!(invoker.state(), TrackingState::Ok);
        assert_eq!(invoker.stats().tracked, 1);
    }

    #[test]
    fn engine_receives_seconds() {
        let mut invoker = TrackingInvoker::new(Box::new(
            |_: &DecodedImage, _: &DecodedImage, t: f64| -> EngineResult {
                assert!((t - 1.25).abs() < 1e-9);
                Ok(Some(Matrix4::identity()))
            },
        ));
        assert!(invoker.track(&color(2, 2), &depth(2, 2), 1_250_000_000).is_tracked());
    }

    #[test]
    fn empty_result_is_lost() {
        let mut invoker = invoker_returning(|| Ok(None));
        assert_eq!(
            invoker.track(&color(4, 3), &depth(4, 3), 0),
            PoseEstimate::TrackingFailed(TrackingFailure::Lost)
        );
        assert_eq!(invoker.state(), TrackingState::NotInitialized);
        assert_eq!(invoker.stats().consecutive_failures, 1);
    }

    #[test]
    fn engine_error_is_not_fatal() {
        let mut invoker = invoker_returning(|| Err(anyhow!("map not ready")));
        match invoker.track(&color(4, 3), &depth(4, 3), 0) {
            PoseEstimate::TrackingFailed(TrackingFailure::Engine(msg)) => {
                assert!(msg.contains("map not ready"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn non_orthonormal_output_is_rejected() {
        let mut invoker = invoker_returning(|| Ok(Some(Matrix4::identity() * 3.0)));
        assert!(matches!(
            invoker.track(&color(4, 3), &depth(4, 3), 0),
            PoseEstimate::TrackingFailed(TrackingFailure::InvalidTransform(_))
        ));
    }

    #[test]
    fn mismatched_dimensions_skip_the_engine() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut invoker = TrackingInvoker::new(Box::new(
            move |_: &DecodedImage, _: &DecodedImage, _: f64| -> EngineResult {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Matrix4::identity()))
            },
        ));

        let estimate = invoker.track(&color(4, 3), &depth(8, 6), 0);
        assert!(matches!(
            estimate,
            PoseEstimate::TrackingFailed(TrackingFailure::IncompatibleImages(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(invoker.stats().calls, 0);
    }

    #[test]
    fn enforces_expected_dimensions() {
        let mut invoker =
            invoker_returning(|| Ok(Some(Matrix4::identity()))).with_expected_dimensions(640, 480);
        assert!(!invoker.track(&color(4, 3), &depth(4, 3), 0).is_tracked());
        assert!(invoker.track(&color(640, 480), &depth(640, 480), 1).is_tracked());
    }

    #[test]
    fn swapped_streams_are_incompatible() {
        let mut invoker = invoker_returning(|| Ok(Some(Matrix4::identity())));
        assert!(!invoker.track(&depth(4, 3), &color(4, 3), 0).is_tracked());
    }

    #[test]
    fn lost_after_tracking_then_recovers() {
        let mut invoker = TrackingInvoker::new(Box::new({
            let mut n = 0;
            move |_: &DecodedImage, _: &DecodedImage, _: f64| -> EngineResult {
                n += 1;
                Ok((n != 2).then(Matrix4::identity))
            }
        }));
        let (c, d) = (color(2, 2), depth(2, 2));
        invoker.track(&c, &d, 0);
        invoker.track(&c, &d, 1);
        assert_eq!(invoker.state(), TrackingState::Lost);
        invoker.track(&c, &d, 2);
        assert_eq!(invoker.state(), TrackingState::Ok);
        assert_eq!(invoker.stats().consecutive_failures, 0);
        assert_eq!(invoker.stats().failed, 1);
    }
}
