//! Command Line Interface (CLI) arguments.

use crate::error::RechunkError;
use crate::models::{parse_dim_sizes, ChunkScheme, DType, DimSizes};
use crate::planner::{PlannerConfig, DEFAULT_MAX_STAGES};

use byte_unit::Byte;
use clap::{Args, Parser, Subcommand};
use validator::Validate;

/// Chunkbeam command line interface
#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct CommandLineArgs {
    #[command(subcommand)]
    pub command: Command,
    /// Print the Prometheus metrics gathered during the command on exit.
    #[arg(long, global = true, default_value_t = false, env = "CHUNKBEAM_PRINT_METRICS")]
    pub print_metrics: bool,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Print the stages needed to rechunk a dataset as JSON.
    Plan(RechunkArgs),
    /// Rechunk a synthetic dataset end to end and verify the result.
    Run(RunArgs),
}

/// Dataset shape, chunk schemes and planner settings.
#[derive(Clone, Debug, Args)]
pub struct RechunkArgs {
    /// Extent of each dimension, e.g. `time=600,x=100,y=100`
    #[arg(long, value_parser = parse_dim_sizes, env = "CHUNKBEAM_SIZES")]
    pub sizes: DimSizes,
    /// Current chunk lengths, e.g. `time=1`. `-1` means the entire extent.
    #[arg(long, env = "CHUNKBEAM_SOURCE")]
    pub source: ChunkScheme,
    /// Desired chunk lengths, e.g. `time=-1,x=10,y=10`
    #[arg(long, env = "CHUNKBEAM_TARGET")]
    pub target: ChunkScheme,
    /// Element data type
    #[arg(long, value_enum, default_value_t = DType::Float32, env = "CHUNKBEAM_DTYPE")]
    pub dtype: DType,
    /// Memory budget per task, e.g. `64 MiB`
    #[arg(long, default_value = "64 MiB", value_parser = parse_bytes, env = "CHUNKBEAM_MAX_MEM")]
    pub max_mem: u64,
    /// Smallest preferred intermediate chunk. Defaults to 1% of the memory budget.
    #[arg(long, value_parser = parse_bytes, env = "CHUNKBEAM_MIN_MEM")]
    pub min_mem: Option<u64>,
    /// Maximum number of split/consolidate steps to search
    #[arg(long, default_value_t = DEFAULT_MAX_STAGES, env = "CHUNKBEAM_MAX_STAGES")]
    pub max_stages: usize,
    /// Fail rather than warn when source or target chunks exceed the memory budget.
    #[arg(long, default_value_t = false, env = "CHUNKBEAM_STRICT")]
    pub strict: bool,
}

impl RechunkArgs {
    /// Returns the validated planner configuration.
    pub fn planner_config(&self) -> Result<PlannerConfig, RechunkError> {
        let config = PlannerConfig {
            max_mem: self.max_mem,
            min_mem: self.min_mem,
            max_stages: self.max_stages,
            strict: self.strict,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Clone, Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub rechunk: RechunkArgs,
    /// Whether to use Rayon for execution rather than the calling thread.
    #[arg(long, default_value_t = false, env = "CHUNKBEAM_USE_RAYON")]
    pub use_rayon: bool,
    /// Number of Rayon worker threads. Defaults to the number of CPUs.
    #[arg(long, env = "CHUNKBEAM_THREADS")]
    pub threads: Option<usize>,
    /// Give each variable its own chunks.
    #[arg(long, default_value_t = false, env = "CHUNKBEAM_SPLIT_VARS")]
    pub split_vars: bool,
}

/// Parse a byte size such as `64 MiB` or `1000000`.
fn parse_bytes(s: &str) -> Result<u64, String> {
    Byte::parse_str(s, /* ignore case */ true)
        .map(|bytes| bytes.as_u64())
        .map_err(|err| err.to_string())
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
