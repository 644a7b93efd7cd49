//! Bridge configuration.
//!
//! Loaded from YAML; every field has a default so an empty file (or no file)
//! is a valid configuration. Downstream stages receive their typed parts via
//! the `*_config` accessors instead of re-reading raw values.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::geometry::PoseConvention;
use crate::publish::{DEFAULT_FRAME_ID, StampPolicy};
use crate::sync::{DEFAULT_QUEUE_SIZE, DEFAULT_TOLERANCE_NS, SynchronizerConfig};

/// Stream pairing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSection {
    /// Largest accepted capture time difference, seconds.
    pub tolerance_s: f64,
    /// Frames buffered per stream while waiting for a partner.
    pub queue_size: usize,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            tolerance_s: DEFAULT_TOLERANCE_NS as f64 / 1e9,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

/// What the tracking engine expects as input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackingSection {
    pub expected_width: Option<u32>,
    pub expected_height: Option<u32>,
}

/// How results are stamped and which transform is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishSection {
    pub frame_id: String,
    pub stamp: StampPolicy,
    pub convention: PoseConvention,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            frame_id: DEFAULT_FRAME_ID.to_string(),
            stamp: StampPolicy::default(),
            convention: PoseConvention::default(),
        }
    }
}

/// Worker thread settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSection {
    /// Capacity of the inbound frame channel.
    pub inbound_capacity: usize,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            inbound_capacity: 32,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub sync: SyncSection,
    pub tracking: TrackingSection,
    pub publish: PublishSection,
    pub node: NodeSection,
}

impl BridgeConfig {
    /// Parse and validate a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open config {}", path.display()))?;
        let config: BridgeConfig = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: BridgeConfig = serde_yaml::from_str(text).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let tol = self.sync.tolerance_s;
        if !tol.is_finite() || tol < 0.0 {
            bail!("sync.tolerance_s must be a non-negative number, got {}", tol);
        }
        if self.sync.queue_size == 0 {
            bail!("sync.queue_size must be at least 1");
        }
        if self.node.inbound_capacity == 0 {
            bail!("node.inbound_capacity must be at least 1");
        }
        if self.publish.frame_id.trim().is_empty() {
            bail!("publish.frame_id must not be empty");
        }
        match (self.tracking.expected_width, self.tracking.expected_height) {
            (Some(0), _) | (_, Some(0)) => bail!("tracking expected dimensions must be non-zero"),
            (Some(_), None) | (None, Some(_)) => {
                bail!("tracking.expected_width and expected_height must be set together")
            }
            _ => {}
        }
        Ok(())
    }

    pub fn synchronizer_config(&self) -> SynchronizerConfig {
        SynchronizerConfig {
            tolerance_ns: (self.sync.tolerance_s * 1e9).round() as u64,
            queue_size: self.sync.queue_size,
        }
    }

    pub fn expected_dimensions(&self) -> Option<(u32, u32)> {
        self.tracking.expected_width.zip(self.tracking.expected_height)
    }
}
