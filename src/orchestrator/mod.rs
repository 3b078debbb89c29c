//! The sweep loop: cache lookup, serialized pipeline execution, scoring,
//! tracking and result logging for every configuration.

mod outcome;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::error::{TuneError, TuneResult};
use crate::gold::{GoldDataset, gold_answers};
use crate::identity::run_identity;
use crate::model::{MetricBundle, ParameterSet, RetrievedResult, RunRecord, RunStatus};
use crate::optimizer::{OptimizerTrace, SurrogateOptimizer, TracePoint};
use crate::params::PipelineParams;
use crate::pipeline::{ExecutionContext, PipelineFactory};
use crate::result_log::ResultLog;
use crate::scoring::{PrecisionDetail, score_reader, score_retrieval, score_retriever_precision};
use crate::space::ParameterSpace;
use crate::tracker::ExperimentTracker;
use crate::util::{now_utc_string, write_json_pretty};

pub use self::outcome::{DEFAULT_TARGET_METRIC, RunOutcome, SweepSummary, objective_loss};

struct Evaluation {
    metrics: MetricBundle,
    precision_detail: Option<PrecisionDetail>,
}

pub struct TuningOrchestrator<'a> {
    experiment: String,
    tracker: &'a dyn ExperimentTracker,
    factory: &'a dyn PipelineFactory,
    gold: &'a GoldDataset,
    result_log: &'a ResultLog,
    use_cache: bool,
    context: ExecutionContext,
    details_dir: Option<PathBuf>,
    run_lock: Mutex<()>,
}

impl<'a> TuningOrchestrator<'a> {
    pub fn new(
        experiment: &str,
        tracker: &'a dyn ExperimentTracker,
        factory: &'a dyn PipelineFactory,
        gold: &'a GoldDataset,
        result_log: &'a ResultLog,
    ) -> Self {
        Self {
            experiment: experiment.to_string(),
            tracker,
            factory,
            gold,
            result_log,
            use_cache: true,
            context: ExecutionContext::default(),
            details_dir: None,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Write per-question precision successes and errors under `dir`.
    pub fn with_details_dir(mut self, dir: PathBuf) -> Self {
        self.details_dir = Some(dir);
        self
    }

    /// Every grid configuration, in grid order. All configurations are
    /// validated before the first one touches the index.
    pub fn run_grid(&self, space: &ParameterSpace, target_metric: &str) -> Result<SweepSummary> {
        let configurations = space.grid().context("failed to expand parameter grid")?;
        for params in &configurations {
            PipelineParams::from_parameter_set(params).with_context(|| {
                format!("invalid configuration {}", run_identity(params))
            })?;
        }

        info!(
            experiment = %self.experiment,
            configurations = configurations.len(),
            use_cache = self.use_cache,
            "grid sweep started"
        );

        let mut records = Vec::with_capacity(configurations.len());
        for (index, params) in configurations.iter().enumerate() {
            info!(
                position = index + 1,
                total = configurations.len(),
                "evaluating configuration"
            );
            records.push(self.run_configuration(params)?);
        }

        let summary = SweepSummary::from_records(records, target_metric);
        log_summary(&self.experiment, target_metric, &summary);
        Ok(summary)
    }

    /// `budget` sequential evaluations proposed by `optimizer`. The trace is
    /// rewritten after each evaluation when `trace_path` is set.
    pub fn run_optimization(
        &self,
        space: &ParameterSpace,
        optimizer: &mut dyn SurrogateOptimizer,
        trace: &mut OptimizerTrace,
        budget: usize,
        target_metric: &str,
        trace_path: Option<&Path>,
    ) -> Result<SweepSummary> {
        let search = space
            .search_space()
            .context("failed to build optimization space")?;
        let lower_corner = search
            .dimensions()
            .iter()
            .map(|dimension| dimension.bounds().0)
            .collect::<Vec<f64>>();
        let probe = search.decode(&lower_corner)?;
        PipelineParams::from_parameter_set(&probe).context("invalid fixed options")?;

        info!(
            experiment = %self.experiment,
            dimensions = search.ndim(),
            budget,
            resumed_points = trace.points.len(),
            target_metric,
            "optimization sweep started"
        );

        let mut records = Vec::with_capacity(budget);
        for _ in 0..budget {
            let vector = optimizer.ask();
            let params = search.decode(&vector)?;
            let vector = search.encode(&params)?;
            let record = self.run_configuration(&params)?;
            let loss = objective_loss(&record, target_metric);
            optimizer.tell(vector.clone(), loss);

            trace.record(TracePoint {
                iteration: trace.next_iteration(),
                vector,
                params,
                run_id: record.run_id.clone(),
                status: record.status,
                loss,
            });
            if let Some(path) = trace_path {
                trace.write(path)?;
            }
            info!(run_id = %record.run_id, loss, "objective evaluated");
            records.push(record);
        }

        let summary = SweepSummary::from_records(records, target_metric);
        log_summary(&self.experiment, target_metric, &summary);
        Ok(summary)
    }

    /// Evaluate one configuration, or reuse a finished run with the same id.
    ///
    /// Pipeline and scoring failures become a FAILED record; only tracker and
    /// result-log failures are returned as errors.
    pub fn run_configuration(&self, params: &ParameterSet) -> Result<RunRecord> {
        let run_id = run_identity(params);

        let cached = if self.use_cache {
            self.tracker
                .get_run(&self.experiment, &run_id)?
                .filter(|past| past.status == Some(RunStatus::Done))
        } else {
            None
        };
        if let Some(past) = cached {
            let record = RunRecord {
                run_id: run_id.clone(),
                params: params.clone(),
                metrics: past.metrics,
                status: RunStatus::Cached,
                error: None,
                recorded_at: now_utc_string(),
            };
            info!(run_id = %run_id, "configuration already run; reusing metrics");
            self.result_log.append(&record)?;
            return Ok(record);
        }

        let handle = self.tracker.start_run(&self.experiment, &run_id)?;
        self.tracker.log_params(&handle, params)?;

        let (outcome, precision_detail) = match self.evaluate(params) {
            Ok(evaluation) => (
                RunOutcome::Completed(evaluation.metrics),
                evaluation.precision_detail,
            ),
            Err(error) => (RunOutcome::Failed(error.to_string()), None),
        };

        let record = outcome.into_record(&run_id, params);
        match &record.error {
            None => {
                self.tracker.log_metrics(&handle, &record.metrics)?;
                self.tracker.finish_run(&handle, RunStatus::Done, None)?;
                info!(
                    run_id = %run_id,
                    metrics = record.metrics.iter().count(),
                    "configuration finished"
                );
            }
            Some(message) => {
                self.tracker
                    .finish_run(&handle, RunStatus::Failed, Some(message))?;
                warn!(
                    run_id = %run_id,
                    params = %describe_params(params),
                    error = %message,
                    "configuration failed"
                );
            }
        }

        if let (Some(dir), Some(detail)) = (&self.details_dir, &precision_detail) {
            let path = dir.join(format!("{run_id}.json"));
            if let Err(error) = write_json_pretty(&path, detail) {
                warn!(
                    run_id = %run_id,
                    path = %path.display(),
                    error = %error,
                    "precision details not written"
                );
            }
        }

        self.result_log.append(&record)?;
        Ok(record)
    }

    /// Clear and rewrite the index, then score retrieval and reading. The run
    /// lock is held for the whole evaluation since the index is shared.
    fn evaluate(&self, params: &ParameterSet) -> TuneResult<Evaluation> {
        let typed = PipelineParams::from_parameter_set(params)?;
        let _guard = self
            .run_lock
            .lock()
            .map_err(|_| TuneError::RunExecution("run lock poisoned".to_string()))?;

        let mut pipeline = self.factory.build(&typed, &self.context)?;
        pipeline.index(&self.gold.documents)?;

        let labels = self.gold.aggregated_labels(&typed.label_origin);
        let mut retrieved = BTreeMap::<String, RetrievedResult>::new();
        let retrieval = score_retrieval(
            &labels,
            |question| {
                let result = pipeline.retrieve(question, typed.k_retriever, None)?;
                retrieved.insert(question.to_string(), result.clone());
                Ok(result)
            },
            typed.k_retriever,
            typed.open_domain,
        )?;

        let mut predictions = BTreeMap::<String, Vec<String>>::new();
        for (question, candidates) in &retrieved {
            predictions.insert(question.clone(), pipeline.read(question, candidates)?);
        }
        let reader = score_reader(
            &gold_answers(&labels),
            &predictions,
            typed.k_reader_total,
        )?;

        let mut metrics = retrieval.to_bundle().merged(reader.to_bundle());
        let precision = score_retriever_precision(
            &labels,
            |question, filter| pipeline.retrieve(question, typed.k_retriever, filter),
            typed.weighted_precision,
            typed.filter_level.as_deref(),
        );
        let precision_detail = match precision {
            Ok(precision) => {
                metrics = metrics.merged(precision.to_bundle());
                Some(precision.detail)
            }
            Err(TuneError::MetricUndefined(reason)) => {
                warn!(reason = %reason, "retriever precision skipped");
                None
            }
            Err(error) => return Err(error),
        };

        Ok(Evaluation {
            metrics,
            precision_detail,
        })
    }
}

fn describe_params(params: &ParameterSet) -> String {
    params
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<String>>()
        .join(" ")
}

fn log_summary(experiment: &str, target_metric: &str, summary: &SweepSummary) {
    info!(
        experiment = %experiment,
        done = summary.done,
        cached = summary.cached,
        failed = summary.failed,
        target_metric,
        best_run_id = %summary.best_run_id.clone().unwrap_or_default(),
        best_value = summary.best_value.unwrap_or(f64::NAN),
        "sweep finished"
    );
}

#[cfg(test)]
mod tests;
