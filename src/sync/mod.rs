//! Stream synchronization: pairing color and depth frames by capture time.

pub mod pair;
pub mod synchronizer;

pub use pair::{
    EvictionReason, OfferOutcome, SyncStats, SynchronizedPair, UnmatchedFrameEvicted,
};
pub use synchronizer::{
    DEFAULT_QUEUE_SIZE, DEFAULT_TOLERANCE_NS, Synchronizer, SynchronizerConfig,
};
