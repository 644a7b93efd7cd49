//! Approximate-time pairing of two independently clocked streams.
//!
//! A primary frame and a secondary frame are paired when each is the other's
//! closest buffered candidate (ties go to the earliest arrival) and their
//! difference is within tolerance. The pair is only emitted once both streams
//! have delivered a frame at or after the later of the two timestamps, so no
//! frame still in flight could be a closer match. With per-stream ordered
//! delivery this makes the emitted pairs independent of how offers on the two
//! streams interleave. Buffer overflow and `flush` force a decision early.
//!
//! Once a pair is emitted, everything on either stream that is not newer
//! than its side of the pair is gone for good. This keeps each frame in at
//! most one pair and keeps match timestamps increasing.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::sensor::{Frame, StreamId};

use super::pair::{
    EvictionReason, OfferOutcome, SynchronizedPair, SyncStats, UnmatchedFrameEvicted,
};

/// Default buffer depth per stream.
pub const DEFAULT_QUEUE_SIZE: usize = 10;

/// Default pairing tolerance (20 ms).
pub const DEFAULT_TOLERANCE_NS: u64 = 20_000_000;

/// Pairing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchronizerConfig {
    /// Largest accepted |t_primary - t_secondary|, inclusive.
    pub tolerance_ns: u64,
    /// Frames kept per stream while waiting for a partner. At least 1.
    pub queue_size: usize,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            tolerance_ns: DEFAULT_TOLERANCE_NS,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

struct Pending {
    /// Global arrival order, used to break timestamp-difference ties.
    seq: u64,
    frame: Arc<Frame>,
}

impl Pending {
    fn timestamp_ns(&self) -> u64 {
        self.frame.timestamp_ns()
    }
}

/// Two-stream approximate-time synchronizer.
pub struct Synchronizer {
    config: SynchronizerConfig,
    buffers: [VecDeque<Pending>; 2],
    /// Timestamp of the most recent paired frame on each stream.
    last_paired_ns: [Option<u64>; 2],
    /// Newest timestamp accepted on each stream.
    latest_ns: [Option<u64>; 2],
    next_seq: u64,
    stats: SyncStats,
}

impl Synchronizer {
    pub fn new(config: SynchronizerConfig) -> Self {
        let queue_size = config.queue_size.max(1);
        Self {
            config: SynchronizerConfig {
                queue_size,
                ..config
            },
            buffers: [
                VecDeque::with_capacity(queue_size + 1),
                VecDeque::with_capacity(queue_size + 1),
            ],
            last_paired_ns: [None, None],
            latest_ns: [None, None],
            next_seq: 0,
            stats: SyncStats::default(),
        }
    }

    pub fn config(&self) -> &SynchronizerConfig {
        &self.config
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Number of frames waiting on `stream`.
    pub fn pending(&self, stream: StreamId) -> usize {
        self.buffer(stream).len()
    }

    /// Offer a newly received frame on `stream`.
    ///
    /// The outcome holds every pair that became final because of this frame,
    /// oldest first. That is usually zero or one, but an overflow can force
    /// one pair and release another.
    pub fn offer(&mut self, stream: StreamId, frame: Arc<Frame>) -> OfferOutcome {
        self.stats.offered[stream.index()] += 1;
        let mut outcome = OfferOutcome::default();
        let timestamp_ns = frame.timestamp_ns();

        if frame.stream_id != stream {
            warn!(
                "Frame tagged {} offered on {} stream, dropping (ts={})",
                frame.stream_id, stream, timestamp_ns
            );
            self.evict(&mut outcome, stream, timestamp_ns, EvictionReason::WrongStream);
            return outcome;
        }

        if self.last_paired_ns[stream.index()].is_some_and(|last| timestamp_ns <= last) {
            self.evict(&mut outcome, stream, timestamp_ns, EvictionReason::Stale);
            return outcome;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let latest = self.latest_ns[stream.index()].map_or(timestamp_ns, |t| t.max(timestamp_ns));
        self.latest_ns[stream.index()] = Some(latest);

        self.insert(stream, Pending { seq, frame });
        self.settle(&mut outcome, false);

        if self.buffers[stream.index()].len() > self.config.queue_size {
            self.resolve_overflow(stream, &mut outcome);
            self.settle(&mut outcome, false);
        }

        outcome
    }

    /// End of stream: emit the pairs still waiting for their streams to catch
    /// up, then drop what is left on both streams.
    pub fn flush(&mut self) -> OfferOutcome {
        let mut outcome = OfferOutcome::default();
        self.settle(&mut outcome, true);
        for stream in [StreamId::Primary, StreamId::Secondary] {
            let drained: Vec<Pending> = self.buffers[stream.index()].drain(..).collect();
            for pending in drained {
                self.evict(
                    &mut outcome,
                    stream,
                    pending.timestamp_ns(),
                    EvictionReason::Flushed,
                );
            }
        }
        outcome
    }

    /// Emit mutual-closest pairs, earliest primary first. Without `force`,
    /// stop at the first one that a frame still in flight could change.
    fn settle(&mut self, outcome: &mut OfferOutcome, force: bool) {
        while let Some((primary_idx, secondary_idx)) = self.next_mutual_pair() {
            if !force && !self.is_final(primary_idx, secondary_idx) {
                break;
            }
            self.emit(primary_idx, secondary_idx, outcome);
        }
    }

    /// First buffered primary frame whose closest secondary candidate has
    /// that primary frame as its own closest candidate.
    fn next_mutual_pair(&self) -> Option<(usize, usize)> {
        self.buffer(StreamId::Primary)
            .iter()
            .enumerate()
            .find_map(|(primary_idx, primary)| {
                let secondary_idx =
                    self.best_candidate(StreamId::Secondary, primary.timestamp_ns())?;
                let secondary = &self.buffer(StreamId::Secondary)[secondary_idx];
                let back = self.best_candidate(StreamId::Primary, secondary.timestamp_ns())?;
                (back == primary_idx).then_some((primary_idx, secondary_idx))
            })
    }

    /// Both streams have reached the later side of the pair. Anything either
    /// stream delivers from now on is no closer to either frame.
    fn is_final(&self, primary_idx: usize, secondary_idx: usize) -> bool {
        let newest = self.buffer(StreamId::Primary)[primary_idx]
            .timestamp_ns()
            .max(self.buffer(StreamId::Secondary)[secondary_idx].timestamp_ns());
        self.latest_ns
            .iter()
            .all(|latest| latest.is_some_and(|t| t >= newest))
    }

    /// The buffer on `stream` is one over its depth. Its oldest frame pairs
    /// with its closest candidate if it has one, and is evicted otherwise.
    fn resolve_overflow(&mut self, stream: StreamId, outcome: &mut OfferOutcome) {
        let Some(oldest_ns) = self.buffer(stream).front().map(Pending::timestamp_ns) else {
            return;
        };
        match self.best_candidate(stream.other(), oldest_ns) {
            Some(idx) => match stream {
                StreamId::Primary => self.emit(0, idx, outcome),
                StreamId::Secondary => self.emit(idx, 0, outcome),
            },
            None => {
                if let Some(oldest) = self.buffers[stream.index()].pop_front() {
                    self.evict(
                        outcome,
                        stream,
                        oldest.timestamp_ns(),
                        EvictionReason::QueueOverflow,
                    );
                }
            }
        }
    }

    fn buffer(&self, stream: StreamId) -> &VecDeque<Pending> {
        &self.buffers[stream.index()]
    }

    /// Index of the closest in-tolerance frame on `stream`, if any.
    fn best_candidate(&self, stream: StreamId, timestamp_ns: u64) -> Option<usize> {
        self.buffer(stream)
            .iter()
            .enumerate()
            .map(|(idx, p)| (idx, p.timestamp_ns().abs_diff(timestamp_ns), p.seq))
            .filter(|&(_, diff, _)| diff <= self.config.tolerance_ns)
            .min_by_key(|&(_, diff, seq)| (diff, seq))
            .map(|(idx, _, _)| idx)
    }

    fn emit(&mut self, primary_idx: usize, secondary_idx: usize, outcome: &mut OfferOutcome) {
        let primary = self.buffers[StreamId::Primary.index()].remove(primary_idx);
        let secondary = self.buffers[StreamId::Secondary.index()].remove(secondary_idx);
        let (Some(primary), Some(secondary)) = (primary, secondary) else {
            return;
        };

        let primary_ns = primary.timestamp_ns();
        let secondary_ns = secondary.timestamp_ns();
        self.last_paired_ns = [Some(primary_ns), Some(secondary_ns)];
        self.drop_older(StreamId::Primary, primary_ns, outcome);
        self.drop_older(StreamId::Secondary, secondary_ns, outcome);

        let pair = SynchronizedPair::new(primary.frame, secondary.frame);
        self.stats.pairs += 1;
        debug!(
            "Paired frames at {} ns (skew {} ns)",
            pair.match_timestamp_ns,
            pair.skew_ns()
        );
        outcome.pairs.push(pair);
    }

    /// Evict frames on `stream` that are not newer than `timestamp_ns`.
    fn drop_older(&mut self, stream: StreamId, timestamp_ns: u64, outcome: &mut OfferOutcome) {
        while self.buffers[stream.index()]
            .front()
            .is_some_and(|p| p.timestamp_ns() <= timestamp_ns)
        {
            if let Some(pending) = self.buffers[stream.index()].pop_front() {
                self.evict(outcome, stream, pending.timestamp_ns(), EvictionReason::Superseded);
            }
        }
    }

    /// Insert keeping (timestamp, arrival) order.
    fn insert(&mut self, stream: StreamId, pending: Pending) {
        let buffer = &mut self.buffers[stream.index()];
        let ts = pending.timestamp_ns();
        let pos = buffer.partition_point(|p| p.timestamp_ns() <= ts);
        buffer.insert(pos, pending);
    }

    fn evict(
        &mut self,
        outcome: &mut OfferOutcome,
        stream: StreamId,
        timestamp_ns: u64,
        reason: EvictionReason,
    ) {
        let event = UnmatchedFrameEvicted {
            stream,
            timestamp_ns,
            reason,
        };
        debug!(
            "Dropping unmatched {} frame at {} ns ({})",
            stream, timestamp_ns, reason
        );
        self.stats.record(&event);
        outcome.evicted.push(event);
    }
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new(SynchronizerConfig::default())
    }
}
