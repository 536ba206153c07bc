use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::{AblationVariant, Cancer, RestartProbability, RunType, WeightPair};
use crate::resolver::DEFAULT_LOOKUP_URL;

#[derive(Parser, Debug)]
#[command(
    name = "brw-sweep",
    version,
    about = "Batch runner for biased random-walk drug-target prioritization experiments"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Sweep(SweepArgs),
    Check(CheckArgs),
    Summary(SummaryArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum SweepPreset {
    /// Five ablation variants at (0.5, 0.5), then FULL over the tuning grid.
    Standard,
    /// Every ablation variant over the preset weight pairs.
    Ablation,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RunTypeArg {
    Ablation,
    Tuning,
}

impl From<RunTypeArg> for RunType {
    fn from(value: RunTypeArg) -> Self {
        match value {
            RunTypeArg::Ablation => RunType::Ablation,
            RunTypeArg::Tuning => RunType::Tuning,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    #[arg(long, default_value = "python")]
    pub engine_program: PathBuf,

    /// Arguments placed before the engine flags; repeat for several.
    #[arg(long = "engine-arg", default_value = "main.py")]
    pub engine_args: Vec<String>,

    #[arg(long)]
    pub engine_dir: Option<PathBuf>,

    #[arg(long)]
    pub engine_timeout_secs: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct LookupArgs {
    #[arg(long, default_value = DEFAULT_LOOKUP_URL)]
    pub lookup_url: String,

    #[arg(long)]
    pub lookup_timeout_secs: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    #[arg(long, default_value = "data_set")]
    pub data_root: PathBuf,

    #[arg(long, default_value = "outputs")]
    pub output_root: PathBuf,

    #[arg(long, default_value = "Dataset OncoKB.xlsx")]
    pub reference: PathBuf,

    /// Summary table; `.sqlite` or `.db` selects the SQLite backend.
    #[arg(long)]
    pub summary_path: Option<PathBuf>,

    #[arg(long, value_enum, conflicts_with = "plan")]
    pub preset: Option<SweepPreset>,

    /// JSON sweep plan replacing the command-line grid.
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Defaults to every cancer.
    #[arg(long = "cancer")]
    pub cancers: Vec<Cancer>,

    /// Defaults to every ablation variant.
    #[arg(long = "variant")]
    pub variants: Vec<AblationVariant>,

    /// `alpha,beta`; defaults to the built-in pairs.
    #[arg(long = "pair")]
    pub pairs: Vec<WeightPair>,

    #[arg(long, default_value_t = RestartProbability::DEFAULT)]
    pub restart_probability: RestartProbability,

    #[arg(long, value_enum, default_value_t = RunTypeArg::Ablation)]
    pub run_type: RunTypeArg,

    #[arg(long, default_value_t = 1)]
    pub jobs: usize,

    /// Stop starting new configurations once this many seconds have passed.
    #[arg(long)]
    pub time_budget_secs: Option<u64>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[command(flatten)]
    pub engine: EngineArgs,

    #[command(flatten)]
    pub lookup: LookupArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Engine output with `GeneNames` and `Score` columns.
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, default_value = "Dataset OncoKB.xlsx")]
    pub reference: PathBuf,

    /// Defaults to `top100_<input stem>.tsv` next to the input.
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long, default_value_t = 10)]
    pub show: usize,

    #[command(flatten)]
    pub lookup: LookupArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SummaryArgs {
    #[arg(long, default_value = "outputs/summary.csv")]
    pub summary_path: PathBuf,

    #[arg(long = "cancer")]
    pub cancers: Vec<Cancer>,

    /// Case-insensitive tag substring, e.g. `noDE`.
    #[arg(long = "variant")]
    pub variants: Vec<String>,

    #[arg(long = "pair")]
    pub pairs: Vec<WeightPair>,

    /// Keep only the last row per (Cancer, Tag).
    #[arg(long, default_value_t = false)]
    pub latest: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Write the filtered rows to this CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,
}
