//! PlateScanner - license plate recognition from camera frames
//!
//! Reads a camera, a still image or an image folder as the capture device,
//! runs the recognition pipeline and prints results as JSON on stdout.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use plate_scanner::config::{self, ScannerConfig};
use plate_scanner::storage;
use plate_scanner::vision::ModelManager;
use plate_scanner::{
    BufferedCapture, FrameSource, ImageFolderSource, PaddleOcrEngine, PlateScanner, PlateValidator,
    StillImageSource, TextNormalizer,
};

/// PlateScanner - license plate recognition
#[derive(Parser, Debug)]
#[command(name = "plate-scanner")]
#[command(about = "Reads license plates from images with multi-variant OCR and consistency voting")]
struct Cli {
    /// Config file (defaults to the per-user config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the OCR models
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Never download models
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scan session and print the accepted plate
    Scan {
        #[command(flatten)]
        source: SourceArgs,

        /// Give up after this many seconds
        #[arg(long, default_value = "10")]
        timeout: f64,
    },
    /// Run a single observation cycle and print its candidates
    Observe {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Normalize and validate literal strings
    Check {
        #[arg(required = true)]
        texts: Vec<String>,
    },
    /// Print the scanner status snapshot
    Status {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Download any missing OCR models
    Models,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Serve a single image file as the device
    #[arg(long, conflicts_with_all = ["images", "camera"], required_unless_present_any = ["images", "camera"])]
    image: Option<PathBuf>,

    /// Replay every image in a directory as the device
    #[arg(long, conflicts_with = "camera")]
    images: Option<PathBuf>,

    /// Capture from a local camera by index (needs the `camera` feature)
    #[arg(long)]
    camera: Option<i32>,

    /// Restart the image folder when it runs out
    #[arg(long = "loop")]
    looping: bool,

    /// Capture on a background thread through a bounded queue
    #[arg(long)]
    buffered: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_or_default_config(cli.config.as_deref())?;

    match &cli.command {
        Command::Scan { source, timeout } => {
            let timeout = Duration::try_from_secs_f64(*timeout)
                .with_context(|| format!("Invalid timeout {}", timeout))?;
            let manager = model_manager(&cli, &config)?;
            let mut scanner = build_scanner(&manager, config, source)?;
            scanner.start()?;

            let result = scanner.scan_for_plate(timeout);
            scanner.stop();
            match result {
                Some(outcome) => print_json(&outcome)?,
                None => {
                    let status = scanner.status();
                    print_json(&json!({ "plate": null, "last_error": status.last_error }))?;
                }
            }
        }
        Command::Observe { source } => {
            let manager = model_manager(&cli, &config)?;
            let mut scanner = build_scanner(&manager, config, source)?;
            scanner.start()?;
            let output = scanner.observe_one_cycle();
            scanner.stop();
            print_json(&json!({
                "frame": output.frame.as_ref().map(|f| f.sequence),
                "candidates": output.candidates,
            }))?;
        }
        Command::Check { texts } => {
            let normalizer = TextNormalizer::new(&config.text);
            let validator = PlateValidator::new(config.validation.policy)?
                .with_length_bounds(config.text.min_len, config.text.max_len);

            let results: Vec<_> = texts
                .iter()
                .map(|raw| {
                    let normalized = normalizer.normalize(raw);
                    let validation = normalized.as_deref().and_then(|t| validator.validate_detailed(t));
                    json!({
                        "input": raw,
                        "normalized": normalized,
                        "validation": validation,
                    })
                })
                .collect();
            print_json(&results)?;
        }
        Command::Status { source } => {
            // Reports only: never downloads models or opens the device
            let mut manager = model_manager(&cli, &config)?;
            let models = manager.model_status();
            let scanner = if manager.are_models_ready() {
                manager.set_offline(true);
                match build_scanner(&manager, config, source) {
                    Ok(scanner) => Some(scanner.status()),
                    Err(e) => {
                        warn!("Scanner unavailable: {:#}", e);
                        None
                    }
                }
            } else {
                info!("OCR models missing, run `plate-scanner models` to fetch them");
                None
            };
            print_json(&json!({ "scanner": scanner, "models": models }))?;
        }
        Command::Models => {
            let manager = model_manager(&cli, &config)?;
            manager.ensure_all_models()?;
            print_json(&manager.model_status())?;
        }
    }

    Ok(())
}

/// Explicit config must load; the per-user file is optional
fn load_or_default_config(explicit: Option<&Path>) -> Result<ScannerConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(path) = storage::default_config_path() {
        if path.exists() {
            let config = config::load_config(&path)?;
            info!("Loaded configuration from {:?}", path);
            return Ok(config);
        }
    }

    info!("Using default configuration");
    Ok(ScannerConfig::default())
}

fn model_manager(cli: &Cli, config: &ScannerConfig) -> Result<ModelManager> {
    let mut manager = match cli.model_dir.as_ref().or(config.recognition.model_dir.as_ref()) {
        Some(dir) => ModelManager::with_dir(dir.clone())?,
        None => ModelManager::new()?,
    };
    if cli.offline {
        manager.set_offline(true);
    }
    Ok(manager)
}

fn build_scanner(manager: &ModelManager, config: ScannerConfig, source: &SourceArgs) -> Result<PlateScanner> {
    let engine = PaddleOcrEngine::load(manager, config.recognition.clone())
        .context("Failed to load the OCR engine")?;
    let device = frame_source(source, &config)?;

    Ok(PlateScanner::new(config, device, Box::new(engine))?)
}

fn frame_source(args: &SourceArgs, config: &ScannerConfig) -> Result<Box<dyn FrameSource>> {
    if let Some(index) = args.camera {
        return camera_source(index, args, config);
    }
    match (&args.image, &args.images) {
        (Some(path), _) => Ok(wrap(StillImageSource::from_path(path), args.buffered, config)),
        (None, Some(dir)) => Ok(wrap(ImageFolderSource::new(dir, args.looping), args.buffered, config)),
        (None, None) => anyhow::bail!("one of --image, --images or --camera is required"),
    }
}

#[cfg(feature = "camera")]
fn camera_source(index: i32, args: &SourceArgs, config: &ScannerConfig) -> Result<Box<dyn FrameSource>> {
    Ok(wrap(plate_scanner::CameraSource::new(index), args.buffered, config))
}

#[cfg(not(feature = "camera"))]
fn camera_source(index: i32, _args: &SourceArgs, _config: &ScannerConfig) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("camera {} requested, but plate-scanner was built without the `camera` feature", index)
}

fn wrap<S: FrameSource + 'static>(source: S, buffered: bool, config: &ScannerConfig) -> Box<dyn FrameSource> {
    if buffered {
        Box::new(BufferedCapture::new(
            source,
            config.capture.buffer_frames,
            Duration::from_millis(config.capture.read_timeout_ms),
        ))
    } else {
        Box::new(source)
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
