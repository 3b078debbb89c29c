use serde::Serialize;

use crate::model::{MetricBundle, ParameterSet, RunRecord, RunStatus};
use crate::util::now_utc_string;

pub const DEFAULT_TARGET_METRIC: &str = "reader_topk_accuracy";

/// Result of executing one configuration against the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(MetricBundle),
    Failed(String),
}

impl RunOutcome {
    pub fn into_record(self, run_id: &str, params: &ParameterSet) -> RunRecord {
        let (status, metrics, error) = match self {
            Self::Completed(metrics) => (RunStatus::Done, metrics, None),
            Self::Failed(message) => (RunStatus::Failed, MetricBundle::new(), Some(message)),
        };
        RunRecord {
            run_id: run_id.to_string(),
            params: params.clone(),
            metrics,
            status,
            error,
            recorded_at: now_utc_string(),
        }
    }
}

/// Loss told to the optimizer: `1 - target` for scored runs; failed runs and
/// missing or non-finite targets are the worst loss.
pub fn objective_loss(record: &RunRecord, target_metric: &str) -> f64 {
    match record.status {
        RunStatus::Failed => 1.0,
        RunStatus::Done | RunStatus::Cached => record
            .metrics
            .get(target_metric)
            .filter(|value| value.is_finite())
            .map(|value| 1.0 - value)
            .unwrap_or(1.0),
    }
}

/// Counts and best run of a finished sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepSummary {
    pub records: Vec<RunRecord>,
    pub done: usize,
    pub cached: usize,
    pub failed: usize,
    pub best_run_id: Option<String>,
    pub best_value: Option<f64>,
}

impl SweepSummary {
    pub fn from_records(records: Vec<RunRecord>, target_metric: &str) -> Self {
        let count = |status: RunStatus| {
            records
                .iter()
                .filter(|record| record.status == status)
                .count()
        };
        let (done, cached, failed) = (
            count(RunStatus::Done),
            count(RunStatus::Cached),
            count(RunStatus::Failed),
        );

        let best = records
            .iter()
            .filter(|record| record.status != RunStatus::Failed)
            .filter_map(|record| {
                record
                    .metrics
                    .get(target_metric)
                    .filter(|value| value.is_finite())
                    .map(|value| (record.run_id.clone(), value))
            })
            .fold(None::<(String, f64)>, |best, candidate| match best {
                Some(current) if current.1 >= candidate.1 => Some(current),
                _ => Some(candidate),
            });

        Self {
            records,
            done,
            cached,
            failed,
            best_run_id: best.as_ref().map(|(run_id, _)| run_id.clone()),
            best_value: best.map(|(_, value)| value),
        }
    }
}
