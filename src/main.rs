use std::path::PathBuf;

use clap::Parser;
use dicom_mpr::{
    Axis, Interpolation, Navigator, NavigatorConfig, PickOutcome, ScreenPos, SnapshotSurface,
    config::ConfigError, navigator::NavigatorError,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Open a DICOM series, optionally overlay a mask and click into a view, then
/// write the three orthogonal views as PNG files.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory holding the .dcm files of the series
    dicom_dir: PathBuf,

    /// Label mask (.nii, .nii.gz or a DICOM directory)
    #[arg(short, long)]
    mask: Option<PathBuf>,

    /// YAML navigator configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Window width and level, e.g. `--window-level 400,40`
    #[arg(long, value_delimiter = ',', num_args = 2)]
    window_level: Option<Vec<f64>>,

    /// Click into the axial view at pixel x,y before saving
    #[arg(long, value_delimiter = ',', num_args = 2)]
    pick: Option<Vec<f64>>,

    /// Resample views to their physical aspect ratio (overrides the config)
    #[arg(long)]
    bilinear: bool,

    /// Output directory for the PNG files
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Navigator(#[from] NavigatorError),

    #[error("Failed to write {0}: {1}")]
    Image(PathBuf, image::ImageError),
}

fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => NavigatorConfig::load(path)?,
        None => NavigatorConfig::default(),
    };

    let interpolation = if args.bilinear {
        Interpolation::Bilinear
    } else {
        config.interpolation
    };
    let mut navigator = Navigator::new(config);
    let surfaces = Axis::ALL.map(|axis| SnapshotSurface::with_interpolation(axis, interpolation));
    for surface in &surfaces {
        navigator
            .controller()
            .bind_surface(surface.axis(), Box::new(surface.clone()));
    }

    navigator.on_open_volume(&args.dicom_dir)?;
    if let Some(mask) = &args.mask {
        navigator.on_load_mask(mask)?;
    }
    if let Some([window, level]) = args.window_level.as_deref() {
        navigator.controller().request_window_level_change(*window, *level);
    }
    if let Some([x, y]) = args.pick.as_deref() {
        match navigator.on_pick_event(Axis::Axial, ScreenPos::new(*x, *y)) {
            PickOutcome::Crosshair(targets) => info!(?targets, "Moved cross-hair"),
            outcome => warn!(?outcome, "Pick did not move the cross-hair"),
        }
    }

    for surface in &surfaces {
        let path = args
            .output
            .join(format!("{}.png", surface.axis().label().to_lowercase()));
        if let Some(annotations) = surface.annotations() {
            info!(
                axis = %surface.axis(),
                slice = %annotations.slice,
                window_level = %annotations.window_level,
                "Saving view"
            );
        }
        surface
            .save(&path)
            .map_err(|err| CliError::Image(path.clone(), err))?;
    }
    Ok(())
}
