//! tflite_detect - Run configured detection entities over image files.
//!
//! Stands in for the home automation host:
//! 1. Loads the platform configuration (file + environment overrides)
//! 2. Sets up one detection entity per configured camera
//! 3. Pushes each image to every entity (or to one camera with --camera)
//! 4. Prints every entity's state as one JSON line per image

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use tflite_detect::{DetectionPlatform, FrameOutcome, PlatformConfig};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Count target objects in images via a tensorflow-lite REST server"
)]
struct Args {
    /// Path to the TOML platform configuration.
    /// Without it, TFLITE_DETECT_CONFIG and the TFLITE_DETECT_* overrides are used.
    #[arg(long, env = "TFLITE_DETECT_CONFIG")]
    config: Option<PathBuf>,

    /// Only feed images to the entity bound to this camera entity id.
    #[arg(long)]
    camera: Option<String>,

    /// Encoded images (JPEG/PNG) to process, in order.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config.as_deref() {
        Some(path) => PlatformConfig::from_path(path)?,
        None => PlatformConfig::load()?,
    };
    let platform = DetectionPlatform::setup(&config)?;

    let stdout = std::io::stdout();
    for path in &args.images {
        let image =
            std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;

        let outcomes = match args.camera.as_deref() {
            Some(camera) => vec![(camera.to_string(), platform.process_camera(camera, &image)?)],
            None => platform.process_all(&image)?,
        };
        for (camera, outcome) in &outcomes {
            match outcome {
                FrameOutcome::Counted(count) => {
                    log::info!("{}: {} -> {} match(es)", path.display(), camera, count)
                }
                other => log::warn!("{}: {} -> {:?}", path.display(), camera, other),
            }
        }

        let mut out = stdout.lock();
        for snapshot in platform.snapshots()? {
            serde_json::to_writer(&mut out, &snapshot).context("write entity state")?;
            writeln!(out).context("write entity state")?;
        }
    }

    Ok(())
}
