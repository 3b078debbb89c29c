use anyhow::Result;
use tracing::info;

use crate::cli::SweepArgs;
use crate::commands::Session;
use crate::orchestrator::TuningOrchestrator;

pub fn run(args: SweepArgs) -> Result<()> {
    let session = Session::open(&args.config, &args.store, args.gpu)?;
    let config = &session.config;

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

    let summary = orchestrator.run_grid(&config.options, &config.target_metric)?;

    info!(
        configurations = summary.records.len(),
        results = %session.result_log.path().display(),
        "grid sweep complete"
    );
    Ok(())
}
