pub mod history;
pub mod optimize;
pub mod sweep;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::StoreArgs;
use crate::config::SweepConfig;
use crate::gold::GoldDataset;
use crate::pipeline::{Device, ExecutionContext, SqlitePipelineFactory};
use crate::result_log::ResultLog;
use crate::tracker::SqliteTracker;
use crate::util::ensure_directory;

/// Everything a sweep command needs, opened from the sweep file and the
/// storage flags.
pub(crate) struct Session {
    pub config: SweepConfig,
    pub gold: GoldDataset,
    pub tracker: SqliteTracker,
    pub factory: SqlitePipelineFactory,
    pub result_log: ResultLog,
    pub context: ExecutionContext,
}

impl Session {
    pub fn open(config_path: &Path, store: &StoreArgs, gpu: Option<u32>) -> Result<Self> {
        let config = SweepConfig::load(config_path)?;
        let gold = GoldDataset::load(&config.gold_path)?;

        ensure_directory(&store.cache_root)?;
        let tracker_path = store.tracker_path();
        let db_path = store.db_path();
        for path in [&tracker_path, &db_path] {
            if let Some(parent) = path.parent() {
                ensure_directory(parent)?;
            }
        }

        let tracker = SqliteTracker::open(&tracker_path)
            .with_context(|| format!("failed to open tracker {}", tracker_path.display()))?;
        let result_log = ResultLog::new(store.results_path());
        let context = ExecutionContext {
            device: gpu.map(Device::Gpu).unwrap_or(Device::Cpu),
        };

        info!(
            experiment = %config.experiment_name,
            tracker = %tracker_path.display(),
            index = %db_path.display(),
            results = %result_log.path().display(),
            "session opened"
        );

        Ok(Self {
            config,
            gold,
            tracker,
            factory: SqlitePipelineFactory::new(db_path),
            result_log,
            context,
        })
    }
}
