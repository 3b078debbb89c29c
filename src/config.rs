//! JSON sweep files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::optimizer::DEFAULT_INITIAL_POINTS;
use crate::orchestrator::DEFAULT_TARGET_METRIC;
use crate::space::ParameterSpace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub experiment_name: String,
    pub gold_path: PathBuf,
    pub options: ParameterSpace,
    #[serde(default = "default_target_metric")]
    pub target_metric: String,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    #[serde(default = "default_initial_points")]
    pub n_initial_points: usize,
}

fn default_target_metric() -> String {
    DEFAULT_TARGET_METRIC.to_string()
}

fn default_use_cache() -> bool {
    true
}

fn default_initial_points() -> usize {
    DEFAULT_INITIAL_POINTS
}

impl SweepConfig {
    /// A relative `gold_path` is resolved against the sweep file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read sweep file {}", path.display()))?;
        let mut config = Self::from_json_str(&raw)
            .with_context(|| format!("invalid sweep file {}", path.display()))?;

        if config.gold_path.is_relative() {
            if let Some(parent) = path.parent() {
                config.gold_path = parent.join(&config.gold_path);
            }
        }
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("failed to parse sweep file")?;
        if config.experiment_name.trim().is_empty() {
            bail!("experiment_name must not be empty");
        }
        if config.options.options().is_empty() {
            bail!("sweep file declares no options");
        }
        Ok(config)
    }
}
