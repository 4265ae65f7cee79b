//! nbflip command line: run a scene and write per-frame stats.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::LevelFilter;

use nbflip::{FileSink, Mode, ScenePreset, SimConfig, SimResult, Solver};

#[derive(Parser)]
#[command(name = "nbflip")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Narrow-band FLIP liquid solver", long_about = None)]
struct Cli {
    /// Log level (off, error, warn, info, debug, trace); RUST_LOG overrides
    #[arg(short, long, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulation
    Run(RunArgs),
    /// Print a preset configuration as JSON
    Preset(PresetArgs),
}

#[derive(Args)]
struct RunArgs {
    /// JSON configuration file
    #[arg(short, long, conflicts_with = "preset")]
    config: Option<PathBuf>,

    /// Built-in scene (used when no config file is given)
    #[arg(short, long, value_enum, default_value = "drop-into-pool")]
    preset: ScenePreset,

    /// Override the configured mode
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Override the configured resolution
    #[arg(short, long)]
    resolution: Option<usize>,

    /// Number of frames to simulate
    #[arg(short, long, default_value_t = 500)]
    frames: u32,

    /// Write one JSON record per frame to this file
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Directory for particle snapshots
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Write a snapshot every N frames (0 disables)
    #[arg(long, default_value_t = 0)]
    snapshot_every: u32,
}

#[derive(Args)]
struct PresetArgs {
    #[arg(value_enum)]
    preset: ScenePreset,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn run(args: RunArgs) -> SimResult<()> {
    let mut config = match &args.config {
        Some(path) => SimConfig::load_json(path)?,
        None => SimConfig::preset(args.preset),
    };
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(resolution) = args.resolution {
        config.resolution = resolution;
    }

    let mut solver = Solver::new(config);
    let mut sink = FileSink::new(
        args.stats.as_deref(),
        args.snapshot_dir.as_deref(),
        args.snapshot_every,
    )?;
    log::info!(
        "running {} frames in {} mode at resolution {}",
        args.frames,
        solver.mode(),
        solver.config().resolution
    );
    let result = solver.run(args.frames, &mut sink);
    sink.finish()?;
    result
}

fn print_preset(args: PresetArgs) -> SimResult<()> {
    let config = SimConfig::preset(args.preset);
    match &args.output {
        Some(path) => config.save_json(path),
        None => {
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level)
        .parse_default_env()
        .init();

    let result = match cli.command {
        Commands::Run(args) => run(args),
        Commands::Preset(args) => print_preset(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
