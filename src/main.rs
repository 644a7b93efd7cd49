use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use crossbeam_channel::{Receiver, unbounded};
use tracing::{debug, info, warn};

use rgbd_pose_bridge::config::BridgeConfig;
use rgbd_pose_bridge::geometry::StampedPose;
use rgbd_pose_bridge::io::{GroundTruthEngine, TumSequence};
use rgbd_pose_bridge::publish::ResultPublisher;
use rgbd_pose_bridge::sensor::{Frame, StreamId};
use rgbd_pose_bridge::system::{FrameSender, Pipeline, PipelineNode};

/// Replay a TUM RGB-D sequence through the synchronizer and tracker.
#[derive(Parser, Debug)]
#[command(name = "rgbd-pose-bridge", version, about)]
struct Args {
    /// Sequence directory containing rgb.txt and depth.txt.
    #[arg(value_name = "SEQUENCE_DIR")]
    sequence: PathBuf,
    /// YAML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Pairing tolerance in seconds.
    #[arg(long, value_name = "SECS")]
    tolerance: Option<f64>,
    /// Frames buffered per stream.
    #[arg(long, value_name = "N")]
    queue_size: Option<usize>,
    /// Frame id stamped on every output.
    #[arg(long, value_name = "ID")]
    frame_id: Option<String>,
    /// Playback speed relative to capture time; 0 replays as fast as possible.
    #[arg(long, default_value_t = 1.0)]
    rate: f64,
    /// Largest gap between a frame and the ground-truth sample used for it.
    #[arg(long, value_name = "SECS", default_value_t = 0.02)]
    gt_max_gap: f64,
    /// Write published poses here in TUM trajectory format.
    #[arg(long, value_name = "FILE")]
    trajectory: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("Loading TUM sequence from {}", args.sequence.display());
    let sequence = Arc::new(TumSequence::open(&args.sequence)?);
    info!(
        "Loaded {} color frames, {} depth frames, {} ground truth entries",
        sequence.rgb_entries.len(),
        sequence.depth_entries.len(),
        sequence.groundtruth.len()
    );
    if sequence.groundtruth.is_empty() {
        bail!("Replay needs groundtruth.txt to drive the tracker");
    }

    let (pose_tx, pose_rx) = unbounded::<StampedPose>();
    let (color_tx, color_rx) = unbounded::<Frame>();
    let (depth_tx, depth_rx) = unbounded::<Frame>();
    let publisher =
        ResultPublisher::new(Box::new(pose_tx), Box::new(color_tx), Box::new(depth_tx));

    let engine = GroundTruthEngine::new(
        sequence.groundtruth.clone(),
        (args.gt_max_gap.max(0.0) * 1e9) as u64,
    );
    let pipeline = Pipeline::from_config(&config, Box::new(engine), publisher);
    let node = PipelineNode::spawn(pipeline, config.node.inbound_capacity)?;

    let pose_consumer = spawn_pose_consumer(pose_rx, args.trajectory.clone())?;
    let color_consumer = thread::spawn(move || color_rx.iter().count());
    let depth_consumer = thread::spawn(move || depth_rx.iter().count());

    let sender = node
        .sender()
        .ok_or_else(|| anyhow!("Pipeline node is not accepting frames"))?;
    let clock = ReplayClock::for_sequence(&sequence, args.rate)?;
    let producers = [StreamId::Primary, StreamId::Secondary].map(|stream| {
        spawn_producer(Arc::clone(&sequence), stream, sender.clone(), clock)
    });
    drop(sender);

    for producer in producers {
        producer
            .join()
            .map_err(|_| anyhow!("Producer thread panicked"))??;
    }
    let report = node.join()?;

    let poses_written = pose_consumer
        .join()
        .map_err(|_| anyhow!("Pose consumer panicked"))??;
    let colors = color_consumer
        .join()
        .map_err(|_| anyhow!("Color consumer panicked"))?;
    let depths = depth_consumer
        .join()
        .map_err(|_| anyhow!("Depth consumer panicked"))?;

    let stats = &report.pipeline;
    info!(
        "Done: {} frames offered, {} pairs, {} published ({} poses, {} color, {} depth)",
        stats.frames_offered, stats.pairs_matched, stats.published, poses_written, colors, depths
    );
    info!(
        "Dropped: {} evicted frames, {} decode failures, {} tracking failures, {} publish failures",
        stats.frames_evicted,
        stats.decode_failures,
        stats.tracking_failures,
        stats.publish_failures
    );
    info!(
        "Synchronizer: {} frames dropped ({} superseded, {} overflow, {} stale, {} at flush)",
        report.sync.total_dropped(),
        report.sync.evicted_superseded,
        report.sync.evicted_overflow,
        report.sync.dropped_stale,
        report.sync.flushed
    );
    info!(
        "Final tracking state {:?} after {} engine calls",
        report.tracking_state, report.tracking.calls
    );

    Ok(())
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_path(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(tolerance) = args.tolerance {
        config.sync.tolerance_s = tolerance;
    }
    if let Some(queue_size) = args.queue_size {
        config.sync.queue_size = queue_size;
    }
    if let Some(frame_id) = &args.frame_id {
        config.publish.frame_id = frame_id.clone();
    }
    config.validate().context("Invalid configuration")?;
    debug!("Effective configuration: {:?}", config);
    Ok(config)
}

/// Maps capture timestamps to wall-clock release times.
#[derive(Debug, Clone, Copy)]
struct ReplayClock {
    start: Instant,
    first_timestamp_ns: u64,
    rate: f64,
}

impl ReplayClock {
    /// Starts now. Fails if `rate` is negative or not finite, or so small
    /// that the release time of the last capture cannot be represented.
    fn new(first_timestamp_ns: u64, last_timestamp_ns: u64, rate: f64) -> Result<Self> {
        if !rate.is_finite() || rate < 0.0 {
            bail!("--rate must be a non-negative number, got {}", rate);
        }
        let clock = Self {
            start: Instant::now(),
            first_timestamp_ns,
            rate,
        };
        if clock.due(last_timestamp_ns).is_none() {
            bail!(
                "--rate {} is too slow to replay {:.3} s of capture time",
                rate,
                last_timestamp_ns.saturating_sub(first_timestamp_ns) as f64 * 1e-9
            );
        }
        Ok(clock)
    }

    fn for_sequence(sequence: &TumSequence, rate: f64) -> Result<Self> {
        let timestamps = || {
            sequence
                .rgb_entries
                .iter()
                .chain(&sequence.depth_entries)
                .map(|e| e.timestamp_ns)
        };
        let first = timestamps().min().unwrap_or(0);
        let last = timestamps().max().unwrap_or(first);
        Self::new(first, last, rate)
    }

    /// Release time of a frame captured at `timestamp_ns`. `None` when it
    /// lies beyond what `Instant` can hold.
    fn due(&self, timestamp_ns: u64) -> Option<Instant> {
        if self.rate == 0.0 {
            return Some(self.start);
        }
        let offset_s = timestamp_ns.saturating_sub(self.first_timestamp_ns) as f64 * 1e-9;
        let delay = Duration::try_from_secs_f64(offset_s / self.rate).ok()?;
        self.start.checked_add(delay)
    }

    fn wait_for(&self, timestamp_ns: u64) {
        let Some(due) = self.due(timestamp_ns) else {
            return;
        };
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
    }
}

fn spawn_producer(
    sequence: Arc<TumSequence>,
    stream: StreamId,
    sender: FrameSender,
    clock: ReplayClock,
) -> JoinHandle<Result<()>> {
    thread::spawn(move || {
        let entries = match stream {
            StreamId::Primary => &sequence.rgb_entries,
            StreamId::Secondary => &sequence.depth_entries,
        };
        for (idx, entry) in entries.iter().enumerate() {
            clock.wait_for(entry.timestamp_ns);
            let frame = match stream {
                StreamId::Primary => sequence.color_frame(idx),
                StreamId::Secondary => sequence.depth_frame(idx),
            };
            match frame {
                Ok(frame) => sender.offer(stream, Arc::new(frame))?,
                Err(e) => warn!("Skipping {} frame {}: {:#}", stream, idx, e),
            }
        }
        debug!("{} producer finished after {} frames", stream, entries.len());
        Ok(())
    })
}

fn spawn_pose_consumer(
    poses: Receiver<StampedPose>,
    trajectory: Option<PathBuf>,
) -> Result<JoinHandle<Result<usize>>> {
    let mut writer = trajectory
        .as_deref()
        .map(trajectory_writer)
        .transpose()?;

    Ok(thread::spawn(move || {
        let mut count = 0;
        for pose in poses.iter() {
            debug!(
                "Pose at {} ns in {}: position [{:.3}, {:.3}, {:.3}]",
                pose.header.timestamp_ns,
                pose.header.frame_id,
                pose.position.x,
                pose.position.y,
                pose.position.z
            );
            if let Some(writer) = writer.as_mut() {
                let [w, x, y, z] = pose.orientation_wxyz();
                writer.write_record([
                    format!(
                        "{}.{:09}",
                        pose.header.timestamp_ns / 1_000_000_000,
                        pose.header.timestamp_ns % 1_000_000_000
                    ),
                    format!("{:.6}", pose.position.x),
                    format!("{:.6}", pose.position.y),
                    format!("{:.6}", pose.position.z),
                    format!("{:.6}", x),
                    format!("{:.6}", y),
                    format!("{:.6}", z),
                    format!("{:.6}", w),
                ])?;
            }
            count += 1;
        }
        if let Some(mut writer) = writer {
            writer.flush()?;
        }
        Ok(count)
    }))
}

fn trajectory_writer(path: &Path) -> Result<csv::Writer<File>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create trajectory file {}", path.display()))?;
    Ok(csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b' ')
        .from_writer(file))
}
