use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "qatune",
    version,
    about = "Evaluate and tune question-answering pipelines against gold data"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate every configuration of the sweep file's grid.
    Sweep(SweepArgs),
    /// Search the sweep file's space with a Gaussian-process surrogate.
    Optimize(OptimizeArgs),
    /// Show past runs recorded by the tracker.
    History(HistoryArgs),
}

/// Storage locations shared by the sweep commands.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = ".cache/qatune")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub tracker_path: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub results_path: Option<PathBuf>,

    /// Directory for per-run precision successes and errors.
    #[arg(long)]
    pub details_dir: Option<PathBuf>,
}

impl StoreArgs {
    pub fn tracker_path(&self) -> PathBuf {
        self.tracker_path
            .clone()
            .unwrap_or_else(|| self.cache_root.join("qatune_tracker.sqlite"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.cache_root.join("passages.sqlite"))
    }

    pub fn results_path(&self) -> PathBuf {
        self.results_path
            .clone()
            .unwrap_or_else(|| self.cache_root.join("results").join("results.csv"))
    }

    pub fn details_dir(&self) -> PathBuf {
        self.details_dir
            .clone()
            .unwrap_or_else(|| self.cache_root.join("details"))
    }

    pub fn trace_path(&self, experiment: &str) -> PathBuf {
        self.cache_root
            .join("traces")
            .join(format!("{experiment}.json"))
    }
}

#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    #[arg(long)]
    pub config: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Re-run configurations even when a finished run exists.
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    /// Ask the pipeline factory for this GPU instead of the CPU.
    #[arg(long)]
    pub gpu: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct OptimizeArgs {
    #[arg(long)]
    pub config: PathBuf,

    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, default_value_t = 30)]
    pub budget: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Overrides `n_initial_points` from the sweep file.
    #[arg(long)]
    pub n_initial_points: Option<usize>,

    /// Continue from a trace written by an earlier optimization.
    #[arg(long)]
    pub resume_trace: Option<PathBuf>,

    #[arg(long)]
    pub trace_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    #[arg(long)]
    pub gpu: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    #[arg(long, default_value = ".cache/qatune")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub tracker_path: Option<PathBuf>,

    #[arg(long)]
    pub results_path: Option<PathBuf>,

    /// Limit the listing to one experiment.
    #[arg(long)]
    pub experiment: Option<String>,
}
