use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::HistoryArgs;
use crate::model::RunStatus;
use crate::result_log::ResultLog;
use crate::tracker::{ExperimentTracker, SqliteTracker};

pub fn run(args: HistoryArgs) -> Result<()> {
    let tracker_path = args
        .tracker_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("qatune_tracker.sqlite"));
    let results_path = args
        .results_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("results").join("results.csv"));

    info!(cache_root = %args.cache_root.display(), "history requested");

    if tracker_path.exists() {
        let tracker = SqliteTracker::open(&tracker_path)
            .with_context(|| format!("failed to open tracker {}", tracker_path.display()))?;
        let experiments = match &args.experiment {
            Some(name) => vec![name.clone()],
            None => tracker.experiments()?,
        };

        for experiment in experiments {
            let runs = tracker.list_past_runs(&experiment)?;
            let count = |status: RunStatus| {
                runs.values()
                    .filter(|run| run.status == Some(status))
                    .count()
            };
            info!(
                experiment = %experiment,
                runs = runs.len(),
                done = count(RunStatus::Done),
                failed = count(RunStatus::Failed),
                "experiment history"
            );

            for run in runs.values() {
                let metrics = run
                    .metrics
                    .iter()
                    .map(|(name, value)| format!("{name}={value:.4}"))
                    .collect::<Vec<String>>()
                    .join(" ");
                info!(
                    run_id = %run.run_id,
                    status = %run.status.map(RunStatus::as_str).unwrap_or("running"),
                    started_at = %run.started_at,
                    finished_at = %run.finished_at.clone().unwrap_or_default(),
                    error = %run.error.clone().unwrap_or_default(),
                    metrics = %metrics,
                    "past run"
                );
            }
        }
    } else {
        warn!(path = %tracker_path.display(), "tracker database missing");
    }

    if results_path.exists() {
        let table = ResultLog::new(results_path.clone()).read_all()?;
        info!(
            path = %results_path.display(),
            rows = table.rows.len(),
            columns = table.columns.len(),
            "result log status"
        );
    } else {
        warn!(path = %results_path.display(), "result log missing");
    }

    Ok(())
}
