//! Synchronizer output and diagnostic event types.

use std::fmt;
use std::sync::Arc;

use crate::sensor::{Frame, StreamId};

/// One frame from each stream, consumed together as a unit of work.
#[derive(Debug, Clone)]
pub struct SynchronizedPair {
    pub primary: Arc<Frame>,
    pub secondary: Arc<Frame>,
    /// Timestamp used for every downstream output of this pair. Always the
    /// primary frame's capture time.
    pub match_timestamp_ns: u64,
}

impl SynchronizedPair {
    pub(crate) fn new(primary: Arc<Frame>, secondary: Arc<Frame>) -> Self {
        let match_timestamp_ns = primary.timestamp_ns();
        Self {
            primary,
            secondary,
            match_timestamp_ns,
        }
    }

    /// Absolute capture time difference between the two frames.
    pub fn skew_ns(&self) -> u64 {
        self.primary
            .timestamp_ns()
            .abs_diff(self.secondary.timestamp_ns())
    }
}

/// Why a buffered or offered frame left the synchronizer without a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Buffer depth exceeded; the oldest frame was pushed out.
    QueueOverflow,
    /// Not newer than a frame on the same stream that was just paired.
    Superseded,
    /// Arrived with a timestamp at or before the last pair on its stream.
    Stale,
    /// Offered on a stream other than the one recorded in the frame.
    WrongStream,
    /// Dropped by an explicit flush.
    Flushed,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvictionReason::QueueOverflow => "queue overflow",
            EvictionReason::Superseded => "superseded",
            EvictionReason::Stale => "stale",
            EvictionReason::WrongStream => "wrong stream",
            EvictionReason::Flushed => "flushed",
        };
        f.write_str(s)
    }
}

/// Diagnostic event: a frame was dropped without ever being paired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedFrameEvicted {
    pub stream: StreamId,
    pub timestamp_ns: u64,
    pub reason: EvictionReason,
}

/// Result of a single `offer` or `flush`.
#[derive(Debug, Default)]
pub struct OfferOutcome {
    /// Pairs that became final, in match timestamp order.
    pub pairs: Vec<SynchronizedPair>,
    pub evicted: Vec<UnmatchedFrameEvicted>,
}

/// Running counters kept by the synchronizer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Frames offered, indexed by stream (primary, secondary).
    pub offered: [u64; 2],
    pub pairs: u64,
    pub evicted_overflow: u64,
    pub evicted_superseded: u64,
    pub dropped_stale: u64,
    pub rejected: u64,
    pub flushed: u64,
}

impl SyncStats {
    pub(crate) fn record(&mut self, event: &UnmatchedFrameEvicted) {
        match event.reason {
            EvictionReason::QueueOverflow => self.evicted_overflow += 1,
            EvictionReason::Superseded => self.evicted_superseded += 1,
            EvictionReason::Stale => self.dropped_stale += 1,
            EvictionReason::WrongStream => self.rejected += 1,
            EvictionReason::Flushed => self.flushed += 1,
        }
    }

    /// Frames dropped for any reason.
    pub fn total_dropped(&self) -> u64 {
        self.evicted_overflow
            + self.evicted_superseded
            + self.dropped_stale
            + self.rejected
            + self.flushed
    }
}
