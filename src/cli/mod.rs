//! Command-line parsing for the image morphology fitter.
//!
//! Argument parsing stays here; the command sequence lives in `app::pipeline`.

use std::path::PathBuf;

use clap::Parser;

/// Top-level CLI.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "image-like",
    version,
    about = "Fit source morphology in a counts image (Cash statistic, PSF-convolved Gaussians)"
)]
pub struct Cli {
    /// Counts image (FITS).
    #[arg(long, value_name = "FITS", default_value = "counts.fits")]
    pub counts: PathBuf,

    /// Exposure image (FITS), used as a table model.
    #[arg(long, value_name = "FITS", default_value = "exposure.fits")]
    pub exposure: PathBuf,

    /// Background image (FITS), used as a table model.
    #[arg(long, value_name = "FITS", default_value = "background.fits")]
    pub background: PathBuf,

    /// PSF descriptor (JSON).
    #[arg(long, value_name = "JSON", default_value = "psf.json")]
    pub psf: PathBuf,

    /// Initial source parameters (JSON).
    #[arg(long, value_name = "JSON", default_value = "sources.json")]
    pub sources: PathBuf,

    /// Region of interest (ds9 region file). Omit to fit the full image.
    #[arg(long, value_name = "REG")]
    pub roi: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "debug")]
    pub log_level: String,

    /// Output results file (JSON).
    #[arg(value_name = "OUTFILE")]
    pub outfile: PathBuf,
}
