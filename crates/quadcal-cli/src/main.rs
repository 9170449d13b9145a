//! quadcal CLI: calibrate a four-camera rig from saved correspondences.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use image::GrayImage;
use quadcal_core::synthetic::noise::UniformPixelNoise;
use quadcal_core::synthetic::rig::SyntheticRig;
use quadcal_core::NUM_CAMERAS;
use quadcal_imaging::synthetic::{render_wall, ViewRays};
use quadcal_pipeline::artifacts::{write_artifacts, write_json, VALIDATION_FILE};
use quadcal_pipeline::quad_rig::{
    run_calibration, step_validate, QuadRigConfig, QuadRigInput, QuadRigProblem, ValidateOptions,
};
use quadcal_pipeline::session::CalibrationSession;
use tracing::info;

/// Four-camera 2×2 rig calibration.
#[derive(Debug, Parser)]
#[command(name = "quadcal", author, version, about = "Four-camera rig calibration pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the full calibration on a saved input and write artifacts.
    Calibrate {
        /// JSON file containing a QuadRigInput.
        #[arg(long)]
        input: PathBuf,

        /// Optional JSON QuadRigConfig. Missing fields take defaults.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for calibration artifacts.
        #[arg(long, default_value = "calibration_maps")]
        out: PathBuf,

        /// Also save the whole session as JSON.
        #[arg(long)]
        session: Option<PathBuf>,
    },

    /// Re-run rectification validation of a saved session on new images.
    Validate {
        /// Session JSON written by `calibrate --session`.
        #[arg(long)]
        session: PathBuf,

        /// One raw image per camera, in camera order.
        #[arg(long, num_args = 4, required = true)]
        images: Vec<PathBuf>,

        /// Directory for the validation report.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print the calibration summary of a saved session.
    Summary {
        #[arg(long)]
        session: PathBuf,
    },

    /// Write a synthetic input (and validation images) for a known rig.
    Simulate {
        /// Output directory.
        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value_t = 20)]
        frames: usize,

        /// Maximum absolute pixel noise per axis.
        #[arg(long, default_value_t = 0.1)]
        noise: f64,

        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn load_images(paths: &[PathBuf]) -> Result<[GrayImage; NUM_CAMERAS]> {
    ensure!(paths.len() == NUM_CAMERAS, "expected {NUM_CAMERAS} images, got {}", paths.len());
    let mut images = Vec::with_capacity(NUM_CAMERAS);
    for path in paths {
        let img = image::open(path)
            .with_context(|| format!("loading {}", path.display()))?
            .to_luma8();
        images.push(img);
    }
    images
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected {NUM_CAMERAS} images"))
}

fn calibrate_from_files(
    input_path: &Path,
    config_path: Option<&Path>,
    out: &Path,
) -> Result<CalibrationSession<QuadRigProblem>> {
    let input: QuadRigInput = load_json_file(input_path)?;
    let config = match config_path {
        Some(path) => load_json_file::<QuadRigConfig>(path)?,
        None => QuadRigConfig::default(),
    };
    let images = match &input.validation_frames {
        Some(paths) => Some(load_images(paths)?),
        None => None,
    };

    let mut session = CalibrationSession::<QuadRigProblem>::with_description(input_path.display().to_string());
    session.set_config(config)?;
    session.set_input(input)?;
    run_calibration(&mut session)?;
    write_artifacts(&mut session, out, images.as_ref())?;
    Ok(session)
}

fn validate_session(session_path: &Path, images: &[PathBuf], out: Option<&Path>) -> Result<String> {
    let json = fs::read_to_string(session_path).with_context(|| format!("reading {}", session_path.display()))?;
    let mut session = CalibrationSession::<QuadRigProblem>::from_json(&json)?;
    let images = load_images(images)?;
    step_validate(&mut session, Some(ValidateOptions { images: Some(images) }))?;
    let report = session
        .state
        .validation
        .as_ref()
        .context("validation produced no report")?;
    if let Some(dir) = out {
        fs::create_dir_all(dir)?;
        write_json(dir, VALIDATION_FILE, report)?;
    }
    Ok(serde_json::to_string_pretty(report)?)
}

fn summarize_session(session_path: &Path) -> Result<String> {
    let json = fs::read_to_string(session_path).with_context(|| format!("reading {}", session_path.display()))?;
    let session = CalibrationSession::<QuadRigProblem>::from_json(&json)?;
    Ok(serde_json::to_string_pretty(&session.export_peek()?)?)
}

/// Write `input.json` plus one wall image per camera into `out`.
fn simulate(out: &Path, frames: usize, noise: f64, seed: u64) -> Result<PathBuf> {
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let rig = SyntheticRig::default();
    let store = rig.generate_store(
        frames,
        UniformPixelNoise {
            seed,
            max_abs_px: noise,
        },
    )?;

    let mut paths = Vec::with_capacity(NUM_CAMERAS);
    for cam in 0..NUM_CAMERAS {
        let rays = ViewRays::new(&rig.intrinsics[cam]);
        let img = render_wall(&rays, &rig.poses[cam].cam_se3_rig(), 1000.0, seed);
        let path = out.join(format!("validation_cam{cam}.png"));
        img.save(&path).with_context(|| format!("writing {}", path.display()))?;
        paths.push(path);
    }

    let mut input = QuadRigInput::new(store, rig.intrinsics[0].image_size);
    input.validation_frames = paths.try_into().ok();
    let path = write_json(out, "input.json", &input)?;
    info!(path = %path.display(), frames, "synthetic input written");
    Ok(path)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Calibrate {
            input,
            config,
            out,
            session,
        } => {
            let calibrated = calibrate_from_files(&input, config.as_deref(), &out)?;
            if let Some(path) = session {
                fs::write(&path, calibrated.to_json()?).with_context(|| format!("writing {}", path.display()))?;
            }
            let output = calibrated.require_output()?;
            if !output.quality_certified() {
                tracing::warn!("calibration is not quality-certified; consider recalibrating");
            }
            println!("{}", serde_json::to_string_pretty(&calibrated.export_peek()?)?);
        }
        Commands::Validate { session, images, out } => {
            println!("{}", validate_session(&session, &images, out.as_deref())?);
        }
        Commands::Summary { session } => {
            println!("{}", summarize_session(&session)?);
        }
        Commands::Simulate {
            out,
            frames,
            noise,
            seed,
        } => {
            let path = simulate(&out, frames, noise, seed)?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
