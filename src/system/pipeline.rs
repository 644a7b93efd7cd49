//! The per-frame pipeline: match, decode, track, transform, publish.
//!
//! `Pipeline::offer` is the single entry point for inbound frames. Every stage
//! runs synchronously on the caller's thread, and a failure at any stage drops
//! only the pair it belongs to. A pair is processed when the synchronizer
//! releases it, which may be on a later offer or at `flush`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::geometry::PoseTransformer;
use crate::publish::{PublishError, ResultPublisher};
use crate::sensor::{DecodeError, DecodedImage, Frame, StreamId, decode};
use crate::sync::{OfferOutcome, SyncStats, SynchronizedPair, Synchronizer};
use crate::tracking::{
    TrackingEngine, TrackingFailure, TrackingInvoker, TrackingState, TrackingStats,
};

/// What happened to one synchronized pair.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Pose, color and depth were published with this shared stamp.
    Published { timestamp_ns: u64 },
    /// One frame of the pair could not be decoded.
    DecodeFailed { stream: StreamId, error: DecodeError },
    TrackingFailed(TrackingFailure),
    PublishFailed(PublishError),
}

/// Live counters, readable from any thread while the pipeline runs.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    frames_offered: AtomicU64,
    frames_evicted: AtomicU64,
    pairs_matched: AtomicU64,
    decode_failures: AtomicU64,
    tracking_failures: AtomicU64,
    publish_failures: AtomicU64,
    published: AtomicU64,
}

impl PipelineCounters {
    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_offered: self.frames_offered.load(Ordering::Relaxed),
            frames_evicted: self.frames_evicted.load(Ordering::Relaxed),
            pairs_matched: self.pairs_matched.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            tracking_failures: self.tracking_failures.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_offered: u64,
    pub frames_evicted: u64,
    pub pairs_matched: u64,
    pub decode_failures: u64,
    pub tracking_failures: u64,
    pub publish_failures: u64,
    pub published: u64,
}

impl PipelineStats {
    /// Pairs that were matched but produced no output.
    pub fn pairs_dropped(&self) -> u64 {
        self.decode_failures + self.tracking_failures + self.publish_failures
    }
}

pub struct Pipeline {
    synchronizer: Synchronizer,
    invoker: TrackingInvoker,
    transformer: PoseTransformer,
    publisher: ResultPublisher,
    counters: Arc<PipelineCounters>,
}

impl Pipeline {
    pub fn new(
        synchronizer: Synchronizer,
        invoker: TrackingInvoker,
        transformer: PoseTransformer,
        publisher: ResultPublisher,
    ) -> Self {
        Self {
            synchronizer,
            invoker,
            transformer,
            publisher,
            counters: Arc::new(PipelineCounters::default()),
        }
    }

    /// Assemble every stage from configuration. The publisher's frame id and
    /// stamp policy are overridden by `config.publish`.
    pub fn from_config(
        config: &BridgeConfig,
        engine: Box<dyn TrackingEngine>,
        publisher: ResultPublisher,
    ) -> Self {
        let mut invoker = TrackingInvoker::new(engine);
        if let Some((w, h)) = config.expected_dimensions() {
            invoker = invoker.with_expected_dimensions(w, h);
        }
        let publisher = publisher
            .with_frame_id(config.publish.frame_id.clone())
            .with_stamp_policy(config.publish.stamp);

        Self::new(
            Synchronizer::new(config.synchronizer_config()),
            invoker,
            PoseTransformer::new(config.publish.convention),
            publisher,
        )
    }

    pub fn counters(&self) -> Arc<PipelineCounters> {
        Arc::clone(&self.counters)
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    pub fn sync_stats(&self) -> &SyncStats {
        self.synchronizer.stats()
    }

    pub fn tracking_stats(&self) -> &TrackingStats {
        self.invoker.stats()
    }

    pub fn tracking_state(&self) -> TrackingState {
        self.invoker.state()
    }

    /// Feed one inbound frame through the pipeline.
    ///
    /// Returns one outcome per pair the frame released, in match timestamp
    /// order. Empty while the frame, or its partner, is still buffered.
    pub fn offer(&mut self, stream: StreamId, frame: Arc<Frame>) -> Vec<PipelineOutcome> {
        PipelineCounters::bump(&self.counters.frames_offered);
        let outcome = self.synchronizer.offer(stream, frame);
        self.count_evicted(&outcome);

        outcome
            .pairs
            .iter()
            .map(|pair| self.process_pair(pair))
            .collect()
    }

    /// End of stream: process the pairs still waiting in the synchronizer,
    /// then drop the rest. Returns the number of frames dropped.
    pub fn flush(&mut self) -> usize {
        let outcome = self.synchronizer.flush();
        self.count_evicted(&outcome);
        for pair in &outcome.pairs {
            self.process_pair(pair);
        }
        outcome.evicted.len()
    }

    fn count_evicted(&self, outcome: &OfferOutcome) {
        for event in &outcome.evicted {
            debug!(
                "Evicted unmatched {} frame at {} ns: {}",
                event.stream, event.timestamp_ns, event.reason
            );
        }
        self.counters
            .frames_evicted
            .fetch_add(outcome.evicted.len() as u64, Ordering::Relaxed);
    }

    fn process_pair(&mut self, pair: &SynchronizedPair) -> PipelineOutcome {
        PipelineCounters::bump(&self.counters.pairs_matched);
        let timestamp_ns = pair.match_timestamp_ns;

        let (color, depth) = match decode_pair(pair) {
            Ok(images) => images,
            Err((stream, error)) => {
                warn!(
                    "Dropping pair at {} ns: {} frame failed to decode: {}",
                    timestamp_ns, stream, error
                );
                PipelineCounters::bump(&self.counters.decode_failures);
                return PipelineOutcome::DecodeFailed { stream, error };
            }
        };

        let estimate = self.invoker.track(&color, &depth, timestamp_ns);
        let stamped = self
            .transformer
            .to_stamped_pose(&estimate, self.publisher.frame_id(), timestamp_ns);
        let Some(pose) = stamped else {
            PipelineCounters::bump(&self.counters.tracking_failures);
            let failure = estimate.into_failure().unwrap_or(TrackingFailure::Lost);
            return PipelineOutcome::TrackingFailed(failure);
        };

        match self.publisher.publish(&pose, &pair.primary, &pair.secondary) {
            Ok(stamp) => {
                PipelineCounters::bump(&self.counters.published);
                debug!("Published pose for pair at {} ns", timestamp_ns);
                PipelineOutcome::Published { timestamp_ns: stamp }
            }
            Err(error) => {
                warn!("Failed to publish pair at {} ns: {}", timestamp_ns, error);
                PipelineCounters::bump(&self.counters.publish_failures);
                PipelineOutcome::PublishFailed(error)
            }
        }
    }
}

fn decode_pair(
    pair: &SynchronizedPair,
) -> Result<(DecodedImage, DecodedImage), (StreamId, DecodeError)> {
    let color = decode(&pair.primary).map_err(|e| (StreamId::Primary, e))?;
    let depth = decode(&pair.secondary).map_err(|e| (StreamId::Secondary, e))?;
    Ok((color, depth))
}
