//! Dataset readers for offline replay.

pub mod tum;

pub use tum::{GroundTruthEngine, GroundTruthEntry, ImageEntry, TumSequence};
