use clap::Parser;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use specbp::config::PredictorConfig;
use specbp::sim::{self, DEFAULT_SEED, Mode, SimOptions, TraceReader};
use specbp::stats::SimStats;

#[derive(Parser, Debug)]
#[command(name = "specbp", version)]
#[command(about = "Run a branch trace through the speculative TAGE-SC-L style predictor")]
struct Args {
    /// Branch trace: one `<pc> <target> <T|N> <kind>` record per line
    trace: PathBuf,

    /// Pipeline model driving the predictor
    #[arg(short, long, value_enum, default_value_t = Mode::Immediate)]
    mode: Mode,

    /// JSON predictor configuration; unset fields keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wrong-path branches per misprediction (upper bound in wrong-path mode)
    #[arg(long, default_value_t = 8)]
    max_wrong_path: u32,

    /// Correct-path branches held before commit in late-commit mode
    #[arg(long, default_value_t = 32)]
    commit_window: usize,

    /// Leading branches excluded from the statistics
    #[arg(long, default_value_t = 0)]
    warmup: u64,

    /// Seed of the wrong-path generator
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// In-flight branch capacity, overriding the config (rounded up to a power of two)
    #[arg(long, value_name = "N")]
    max_in_flight: Option<usize>,

    /// Disable the loop predictor
    #[arg(long)]
    no_loop: bool,

    /// Disable the statistical corrector
    #[arg(long)]
    no_sc: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    /// Command-line switches win over the config file.
    fn apply_overrides(&self, config: &mut PredictorConfig) -> specbp::Result<()> {
        if let Some(n) = self.max_in_flight {
            config.max_in_flight_branches = n;
        }
        if self.no_loop {
            config.use_loop_predictor = false;
        }
        if self.no_sc {
            config.use_sc = false;
        }
        config.validate()
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> specbp::Result<SimStats> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config {}", path.display());
            PredictorConfig::from_json_file(path)?
        }
        None => PredictorConfig::default(),
    };
    args.apply_overrides(&mut config)?;
    let opts = SimOptions {
        warmup: args.warmup,
        max_wrong_path: args.max_wrong_path,
        commit_window: args.commit_window,
        seed: args.seed,
    };
    let trace = TraceReader::open(&args.trace)?;
    sim::run(args.mode, &config, trace, &opts)
}

fn main() {
    init_logging();

    let args = Args::parse();
    info!("Simulating {}", args.trace.display());

    let stats = match run(&args) {
        Ok(stats) => stats,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&stats.report()) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                error!("Failed to encode report: {e}");
                process::exit(1);
            }
        }
    } else {
        stats.print();
    }

    if !stats.errors.is_empty() {
        process::exit(2);
    }
}
