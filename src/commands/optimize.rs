use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::OptimizeArgs;
use crate::commands::Session;
use crate::optimizer::{GaussianProcessOptimizer, OptimizerTrace};
use crate::orchestrator::TuningOrchestrator;
use crate::util::utc_compact_string;

pub fn run(args: OptimizeArgs) -> Result<()> {
    let session = Session::open(&args.config, &args.store, args.gpu)?;
    let config = &session.config;
    let search = config
        .options
        .search_space()
        .context("failed to build optimization space")?;
    let n_initial_points = args.n_initial_points.unwrap_or(config.n_initial_points);
    let trace_path = args
        .trace_path
        .clone()
        .unwrap_or_else(|| args.store.trace_path(&config.experiment_name));

    let (mut optimizer, mut trace) = match &args.resume_trace {
        Some(path) => {
            let trace = OptimizerTrace::load(path)?;
            if trace.experiment != config.experiment_name {
                bail!(
                    "trace {} belongs to experiment {}, not {}",
                    path.display(),
                    trace.experiment,
                    config.experiment_name
                );
            }
            if trace.target_metric != config.target_metric {
                warn!(
                    traced = %trace.target_metric,
                    configured = %config.target_metric,
                    "resumed trace was optimizing a different metric"
                );
            }
            let optimizer =
                GaussianProcessOptimizer::from_trace(&search, &trace, n_initial_points, args.seed)?;
            info!(
                path = %path.display(),
                observations = optimizer.observations(),
                "optimizer resumed from trace"
            );
            (optimizer, trace)
        }
        None => {
            archive_existing_trace(&trace_path)?;
            (
                GaussianProcessOptimizer::new(&search, n_initial_points, args.seed),
                OptimizerTrace::new(
                    &config.experiment_name,
                    &config.target_metric,
                    args.seed,
                    &search,
                ),
            )
        }
    };

    let orchestrator = TuningOrchestrator::new(
        &config.experiment_name,
        &session.tracker,
        &session.factory,
        &session.gold,
        &session.result_log,
    )
    .with_cache(config.use_cache && !args.no_cache)
    .with_context(session.context)
    .with_details_dir(args.store.details_dir());

    let summary = orchestrator.run_optimization(
        &config.options,
        &mut optimizer,
        &mut trace,
        args.budget,
        &config.target_metric,
        Some(&trace_path),
    )?;

    let best = trace.best.as_ref();
    info!(
        evaluations = summary.records.len(),
        trace = %trace_path.display(),
        best_run_id = %best.map(|point| point.run_id.clone()).unwrap_or_default(),
        best_loss = best.map(|point| point.loss).unwrap_or(f64::NAN),
        "optimization complete"
    );
    Ok(())
}

/// A fresh search keeps the previous trace next to the new one.
fn archive_existing_trace(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "trace".to_string());
    let archived = path.with_file_name(format!("{stem}-{}.json", utc_compact_string(Utc::now())));
    fs::rename(path, &archived).with_context(|| {
        format!(
            "failed to archive optimizer trace {} to {}",
            path.display(),
            archived.display()
        )
    })?;
    info!(path = %archived.display(), "previous optimizer trace archived");
    Ok(())
}
