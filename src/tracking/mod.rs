//! Tracking: the engine boundary and the per-pair invocation around it.
//!
//! - `engine`: the trait an external RGB-D tracker implements
//! - `invoker`: input validation, the blocking call, failure translation
//! - `result`: per-pair pose estimates and failure reasons
//! - `state`: tracking state inferred from the engine's answers

pub mod engine;
pub mod invoker;
pub mod result;
pub mod state;

pub use engine::TrackingEngine;
pub use invoker::{TrackingInvoker, TrackingStats};
pub use result::{PoseEstimate, RigidTransform, TrackingFailure};
pub use state::TrackingState;
