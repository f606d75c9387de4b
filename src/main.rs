//! blendrun CLI - Resumable batch video blending.

use anyhow::{Context, Result};
use blendrun::models::{EXAMPLE_CONFIG, Preset};
use blendrun::{
    BatchDriver, BlendRunners, CheckpointInspector, CheckpointStore, Config, FfmpegEncoder,
    FfprobeSource, StageExecutor,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "blendrun")]
#[command(version)]
#[command(about = "Resumable batch video blending with per-job checkpoints")]
struct Cli {
    /// Show checkpoint status and exit
    #[arg(long)]
    status: bool,

    /// Clear all checkpoints and exit
    #[arg(long, conflicts_with = "status")]
    clear: bool,

    /// Override source directory
    #[arg(long)]
    source: Option<PathBuf>,

    /// Override output directory (with --video, the job's own directory)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Process a single video file instead of the source directory
    #[arg(long, conflicts_with = "source")]
    video: Option<PathBuf>,

    /// Override checkpoint directory
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Parameter preset (fast or quality)
    #[arg(long)]
    preset: Option<Preset>,

    /// Path to configuration file (defaults to blendrun.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print an example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: logging already initialized");
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    if cli.print_config {
        println!("{EXAMPLE_CONFIG}");
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;

    // CLI overrides, applied once; the config is read-only from here on
    if let Some(preset) = cli.preset {
        config.preset = preset;
    }
    if let Some(source) = cli.source {
        config.paths.source_dir = source;
    }
    if let Some(output) = cli.output {
        config.paths.output_dir = output;
    }
    if let Some(dir) = cli.checkpoint_dir {
        config.paths.checkpoint_dir = dir;
    }
    let config = config;

    let store = CheckpointStore::new(&config.paths.checkpoint_dir);

    if cli.status {
        let inspector = CheckpointInspector::new(&store);
        print!("{}", inspector.render_status()?);
        return Ok(ExitCode::SUCCESS);
    }

    if cli.clear {
        let inspector = CheckpointInspector::new(&store);
        let count = inspector.clear_all()?;
        if count == 0 {
            println!("No checkpoints to clear.");
        } else {
            println!("Cleared {count} checkpoint(s).");
        }
        return Ok(ExitCode::SUCCESS);
    }

    config.validate().context("Invalid settings")?;
    let settings = config.resolve_settings();

    info!(
        source = %cli.video.as_deref().unwrap_or(config.paths.source_dir.as_path()).display(),
        output = %config.paths.output_dir.display(),
        checkpoints = %config.paths.checkpoint_dir.display(),
        mode = %settings.mode,
        window = settings.window_size,
        iterations = settings.num_iter,
        "Configuration loaded"
    );

    let frame_source = FfprobeSource::new(&config.engine.ffprobe);
    let encoder = FfmpegEncoder::new(&config.engine.ffmpeg);
    let blenders = BlendRunners::external(&config.engine);

    let executor = StageExecutor::new(
        &store,
        &frame_source,
        &blenders,
        &encoder,
        settings,
        config.engine.clone(),
    );
    let driver = BatchDriver::new(executor);

    let summary = match &cli.video {
        Some(video) => driver
            .run_single(video, &config.paths.output_dir)
            .context("Video run failed")?,
        None => driver
            .run(&config.paths.source_dir, &config.paths.output_dir)
            .context("Batch run failed")?,
    };

    print!("{}", summary.report());

    Ok(if summary.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
