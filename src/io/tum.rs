//! TUM RGB-D sequence reader.
//!
//! A sequence directory holds `rgb.txt` and `depth.txt` (one
//! `timestamp filename` line per image) and optionally `groundtruth.txt`
//! (`timestamp tx ty tz qx qy qz qw`). Images are loaded into `Frame`s with
//! the same layout a live camera driver would publish: `rgb8` color and
//! little-endian `16UC1` depth.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, StringRecord};
use nalgebra::{Isometry3, Matrix4, Quaternion, Translation3, UnitQuaternion};
use tracing::{debug, warn};

use crate::sensor::{DecodedImage, Frame, Header, StreamId};
use crate::tracking::TrackingEngine;

pub const COLOR_FRAME_ID: &str = "camera_rgb_optical_frame";
pub const DEPTH_FRAME_ID: &str = "camera_depth_optical_frame";

#[derive(Debug, Clone, PartialEq)]
pub struct ImageEntry {
    pub timestamp_ns: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruthEntry {
    pub timestamp_ns: u64,
    /// Camera pose in the world frame (T_wc).
    pub pose: Isometry3<f64>,
}

#[derive(Debug)]
pub struct TumSequence {
    pub rgb_entries: Vec<ImageEntry>,
    pub depth_entries: Vec<ImageEntry>,
    pub groundtruth: Vec<GroundTruthEntry>,
}

impl TumSequence {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let rgb_entries = load_image_list(root, "rgb.txt")?;
        let depth_entries = load_image_list(root, "depth.txt")?;
        if rgb_entries.is_empty() || depth_entries.is_empty() {
            bail!("Sequence {} has no color or no depth images", root.display());
        }

        // Ground truth is optional
        let groundtruth =
            load_groundtruth_list(&root.join("groundtruth.txt")).unwrap_or_else(|e| {
                warn!("Could not load ground truth: {:#}. Continuing without it.", e);
                Vec::new()
            });

        Ok(Self {
            rgb_entries,
            depth_entries,
            groundtruth,
        })
    }

    pub fn color_frame(&self, idx: usize) -> Result<Frame> {
        let entry = self
            .rgb_entries
            .get(idx)
            .with_context(|| format!("No color frame at index {}", idx))?;
        load_color_frame(&entry.path, entry.timestamp_ns)
    }

    pub fn depth_frame(&self, idx: usize) -> Result<Frame> {
        let entry = self
            .depth_entries
            .get(idx)
            .with_context(|| format!("No depth frame at index {}", idx))?;
        load_depth_frame(&entry.path, entry.timestamp_ns)
    }
}

/// Parse a decimal seconds stamp such as `1305031102.175304` into
/// nanoseconds without going through floating point.
pub fn parse_timestamp_ns(text: &str) -> Result<u64> {
    let text = text.trim();
    let (secs, frac) = text.split_once('.').unwrap_or((text, ""));
    if secs.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        bail!("Invalid timestamp `{}`", text);
    }
    let secs: u64 = secs
        .parse()
        .with_context(|| format!("Invalid timestamp `{}`", text))?;
    let nanos: u64 = if frac.is_empty() {
        0
    } else {
        frac.parse::<u64>()? * 10u64.pow(9 - frac.len() as u32)
    };
    secs.checked_mul(1_000_000_000)
        .and_then(|ns| ns.checked_add(nanos))
        .with_context(|| format!("Timestamp `{}` out of range", text))
}

/// Fields of a whitespace-separated record; repeated spaces are collapsed.
fn fields(rec: &StringRecord) -> Vec<&str> {
    rec.iter().map(str::trim).filter(|f| !f.is_empty()).collect()
}

fn list_reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b' ')
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

fn load_image_list(root: &Path, list_name: &str) -> Result<Vec<ImageEntry>> {
    let list_path = root.join(list_name);
    let mut rdr = list_reader(&list_path)?;

    let mut entries = Vec::new();
    for rec in rdr.records() {
        let rec = rec.with_context(|| format!("Failed to read {}", list_path.display()))?;
        let fields = fields(&rec);
        if fields.len() < 2 {
            continue;
        }
        entries.push(ImageEntry {
            timestamp_ns: parse_timestamp_ns(fields[0])?,
            path: root.join(fields[1]),
        });
    }
    entries.sort_by_key(|e| e.timestamp_ns);
    debug!("Loaded {} entries from {}", entries.len(), list_path.display());
    Ok(entries)
}

fn load_groundtruth_list(path: &Path) -> Result<Vec<GroundTruthEntry>> {
    let mut rdr = list_reader(path)?;

    let mut entries = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        let fields = fields(&rec);
        if fields.len() < 8 {
            continue;
        }
        let v: Vec<f64> = fields[1..8]
            .iter()
            .map(|f| f.parse::<f64>())
            .collect::<Result<_, _>>()
            .with_context(|| format!("Invalid ground truth line in {}", path.display()))?;

        // File order is qx qy qz qw
        let rotation = UnitQuaternion::from_quaternion(Quaternion::new(v[6], v[3], v[4], v[5]));
        entries.push(GroundTruthEntry {
            timestamp_ns: parse_timestamp_ns(fields[0])?,
            pose: Isometry3::from_parts(Translation3::new(v[0], v[1], v[2]), rotation),
        });
    }
    entries.sort_by_key(|e| e.timestamp_ns);
    Ok(entries)
}

/// Load a color PNG as a packed `rgb8` primary frame.
pub fn load_color_frame(path: &Path, timestamp_ns: u64) -> Result<Frame> {
    let img = image::open(path)
        .with_context(|| format!("Failed to read color image {}", path.display()))?
        .into_rgb8();
    let (width, height) = img.dimensions();
    Ok(Frame {
        stream_id: StreamId::Primary,
        header: Header::new(timestamp_ns, COLOR_FRAME_ID),
        width,
        height,
        step: width * 3,
        encoding: "rgb8".to_string(),
        is_bigendian: false,
        data: Arc::from(img.into_raw()),
    })
}

/// Load a 16-bit depth PNG as a little-endian `16UC1` secondary frame.
pub fn load_depth_frame(path: &Path, timestamp_ns: u64) -> Result<Frame> {
    let img = image::open(path)
        .with_context(|| format!("Failed to read depth image {}", path.display()))?
        .into_luma16();
    let (width, height) = img.dimensions();
    let data: Vec<u8> = img
        .into_raw()
        .into_iter()
        .flat_map(u16::to_le_bytes)
        .collect();
    Ok(Frame {
        stream_id: StreamId::Secondary,
        header: Header::new(timestamp_ns, DEPTH_FRAME_ID),
        width,
        height,
        step: width * 2,
        encoding: "16UC1".to_string(),
        is_bigendian: false,
        data: data.into(),
    })
}

/// Replays recorded ground truth as if it were a tracker.
///
/// Returns the world-to-camera transform (T_cw) of the ground-truth sample
/// nearest to the requested time, or "lost" when the nearest sample is more
/// than `max_gap_ns` away.
pub struct GroundTruthEngine {
    groundtruth: Vec<GroundTruthEntry>,
    max_gap_ns: u64,
}

impl GroundTruthEngine {
    pub fn new(mut groundtruth: Vec<GroundTruthEntry>, max_gap_ns: u64) -> Self {
        groundtruth.sort_by_key(|e| e.timestamp_ns);
        Self {
            groundtruth,
            max_gap_ns,
        }
    }

    pub fn nearest(&self, timestamp_ns: u64) -> Option<&GroundTruthEntry> {
        let idx = self
            .groundtruth
            .partition_point(|gt| gt.timestamp_ns < timestamp_ns);
        let before = idx.checked_sub(1).and_then(|i| self.groundtruth.get(i));
        let after = self.groundtruth.get(idx);
        let best = match (before, after) {
            (Some(b), Some(a)) => {
                if timestamp_ns - b.timestamp_ns <= a.timestamp_ns - timestamp_ns {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
        (best.timestamp_ns.abs_diff(timestamp_ns) <= self.max_gap_ns).then_some(best)
    }
}

impl TrackingEngine for GroundTruthEngine {
    fn track_rgbd(
        &mut self,
        _color: &DecodedImage,
        _depth: &DecodedImage,
        timestamp_s: f64,
    ) -> Result<Option<Matrix4<f64>>> {
        if !timestamp_s.is_finite() || timestamp_s < 0.0 {
            bail!("Invalid timestamp {}", timestamp_s);
        }
        let timestamp_ns = (timestamp_s * 1e9).round() as u64;
        Ok(self
            .nearest(timestamp_ns)
            .map(|gt| gt.pose.inverse().to_homogeneous()))
    }
}
