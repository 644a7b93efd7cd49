//! Pipeline assembly and the worker thread that runs it.
//!
//! `Pipeline` chains the synchronizer, decoder, tracking invoker, pose
//! transformer and publisher for each inbound frame. `PipelineNode` moves a
//! pipeline onto its own thread behind a bounded inbound channel.

pub mod node;
pub mod pipeline;

pub use node::{FrameSender, NodeClosed, NodeReport, PipelineNode};
pub use pipeline::{Pipeline, PipelineCounters, PipelineOutcome, PipelineStats};
