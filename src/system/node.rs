//! Worker thread that owns the pipeline.
//!
//! Transport threads hold `FrameSender` handles and push into one bounded
//! channel; the worker drains it in arrival order, so the synchronizer only
//! ever has one writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use thiserror::Error;
use tracing::info;

use crate::sensor::{Frame, StreamId};
use crate::sync::SyncStats;
use crate::tracking::{TrackingState, TrackingStats};

use super::pipeline::{Pipeline, PipelineCounters, PipelineStats};

/// Timeout for receiving frames. Allows periodic shutdown checks.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

struct InboundFrame {
    stream: StreamId,
    frame: Arc<Frame>,
}

/// The node's worker has exited and no longer accepts frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("pipeline node is no longer running")]
pub struct NodeClosed;

/// Cloneable handle for pushing frames into a running node.
#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<InboundFrame>,
}

impl FrameSender {
    /// Queue a frame for the worker. Blocks while the inbound channel is full.
    pub fn offer(&self, stream: StreamId, frame: Arc<Frame>) -> Result<(), NodeClosed> {
        self.tx
            .send(InboundFrame { stream, frame })
            .map_err(|_| NodeClosed)
    }
}

/// Final statistics returned when the worker exits.
#[derive(Debug, Default, Clone)]
pub struct NodeReport {
    pub pipeline: PipelineStats,
    pub sync: SyncStats,
    pub tracking: TrackingStats,
    pub tracking_state: TrackingState,
    /// Frames still unpaired at exit, dropped by the final flush.
    pub flushed: usize,
}

pub struct PipelineNode {
    sender: Option<FrameSender>,
    shutdown: Arc<AtomicBool>,
    counters: Arc<PipelineCounters>,
    handle: Option<JoinHandle<NodeReport>>,
}

impl PipelineNode {
    /// Move `pipeline` onto a new worker thread.
    pub fn spawn(pipeline: Pipeline, inbound_capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded::<InboundFrame>(inbound_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let counters = pipeline.counters();

        let worker_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || run(pipeline, rx, worker_shutdown))?;
        info!("Pipeline node started (inbound capacity {})", inbound_capacity);

        Ok(Self {
            sender: Some(FrameSender { tx }),
            shutdown,
            counters,
            handle: Some(handle),
        })
    }

    /// A new handle for a producer thread.
    pub fn sender(&self) -> Option<FrameSender> {
        self.sender.clone()
    }

    /// Counters of the running pipeline.
    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Wait until every `FrameSender` is dropped and all queued frames are
    /// processed, then return the final statistics.
    pub fn join(mut self) -> Result<NodeReport> {
        self.sender = None;
        self.wait()
    }

    /// Stop the worker after the frame it is currently processing. Queued
    /// frames are discarded.
    pub fn shutdown(mut self) -> Result<NodeReport> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.sender = None;
        self.wait()
    }

    fn wait(&mut self) -> Result<NodeReport> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("pipeline worker already joined"))?;
        handle
            .join()
            .map_err(|_| anyhow!("pipeline worker panicked"))
    }
}

impl Drop for PipelineNode {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown.store(true, Ordering::SeqCst);
            self.sender = None;
            let _ = self.wait();
        }
    }
}

fn run(
    mut pipeline: Pipeline,
    rx: Receiver<InboundFrame>,
    shutdown: Arc<AtomicBool>,
) -> NodeReport {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!("Pipeline node shutdown requested");
            break;
        }
        match rx.recv_timeout(RECV_TIMEOUT) {
            Ok(inbound) => {
                pipeline.offer(inbound.stream, inbound.frame);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                info!("All frame senders closed, pipeline node exiting");
                break;
            }
        }
    }

    let flushed = pipeline.flush();
    let report = NodeReport {
        pipeline: pipeline.stats(),
        sync: pipeline.sync_stats().clone(),
        tracking: pipeline.tracking_stats().clone(),
        tracking_state: pipeline.tracking_state(),
        flushed,
    };
    info!(
        "Pipeline node stopped: {} published, {} pairs dropped, {} frames evicted",
        report.pipeline.published,
        report.pipeline.pairs_dropped(),
        report.pipeline.frames_evicted
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::geometry::StampedPose;
    use crate::publish::{CollectingSink, ResultPublisher};
    use crate::sensor::DecodedImage;
    use crate::sensor::frame::fixtures::{depth_frame, rgb_frame};
    use crate::tracking::TrackingEngine;
    use nalgebra::Matrix4;

    const MS: u64 = 1_000_000;

    fn identity_engine() -> Box<dyn TrackingEngine> {
        Box::new(
            |_: &DecodedImage, _: &DecodedImage, _: f64| -> anyhow::Result<Option<Matrix4<f64>>> {
                Ok(Some(Matrix4::identity()))
            },
        )
    }

    fn node_with_collector(
        capacity: usize,
    ) -> (PipelineNode, Arc<CollectingSink<StampedPose>>) {
        let poses = Arc::new(CollectingSink::new());
        let publisher = ResultPublisher::new(
            Box::new(Arc::clone(&poses)),
            Box::new(CollectingSink::<Frame>::new()),
            Box::new(CollectingSink::<Frame>::new()),
        );
        let pipeline =
            Pipeline::from_config(&BridgeConfig::default(), identity_engine(), publisher);
        (PipelineNode::spawn(pipeline, capacity).unwrap(), poses)
    }

    #[test]
    fn processes_frames_in_channel_order() {
        let (node, poses) = node_with_collector(4);
        let sender = node.sender().unwrap();
        for k in 0..5 {
            let t = 1000 + k * 33;
            sender
                .offer(StreamId::Primary, Arc::new(rgb_frame(t * MS, 4, 3)))
                .unwrap();
            sender
                .offer(StreamId::Secondary, Arc::new(depth_frame((t + 3) * MS, 4, 3)))
                .unwrap();
        }
        drop(sender);

        // The last pair is only released by the flush at exit
        let report = node.join().unwrap();
        assert_eq!(report.pipeline.frames_offered, 10);
        assert_eq!(report.pipeline.published, 5);
        assert_eq!(report.flushed, 0);
        assert_eq!(poses.len(), 5);
    }

    #[test]
    fn two_producers_every_frame_accounted_for() {
        let (node, poses) = node_with_collector(8);

        let producers: Vec<_> = [StreamId::Primary, StreamId::Secondary]
            .into_iter()
            .map(|stream| {
                let sender = node.sender().unwrap();
                thread::spawn(move || {
                    for k in 0..50u64 {
                        let t = (k * 33) * MS;
                        let frame = match stream {
                            StreamId::Primary => rgb_frame(t, 4, 3),
                            StreamId::Secondary => depth_frame(t + 2 * MS, 4, 3),
                        };
                        sender.offer(stream, Arc::new(frame)).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let report = node.join().unwrap();
        let stats = &report.pipeline;
        assert_eq!(stats.frames_offered, 100);
        // Each frame is either part of exactly one pair or evicted once
        assert_eq!(2 * stats.pairs_matched + stats.frames_evicted, 100);
        assert!(stats.published > 0);
        assert_eq!(stats.published, stats.pairs_matched);

        let stamps: Vec<u64> = poses.take().iter().map(|p| p.header.timestamp_ns).collect();
        assert_eq!(stamps.len() as u64, stats.published);
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn shutdown_stops_an_idle_worker() {
        let (node, _poses) = node_with_collector(2);
        let sender = node.sender().unwrap();
        sender
            .offer(StreamId::Primary, Arc::new(rgb_frame(0, 4, 3)))
            .unwrap();

        // The producer still holds a sender; only the flag can stop the worker
        let report = node.shutdown().unwrap();
        assert_eq!(report.pipeline.published, 0);
        assert_eq!(
            sender.offer(StreamId::Primary, Arc::new(rgb_frame(1, 4, 3))),
            Err(NodeClosed)
        );
    }
}
