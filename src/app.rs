//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env`
//! - parses CLI arguments
//! - sets up logging
//! - runs the fit sequence on a fresh session

use std::io::Write;

use clap::Parser;
use flexi_logger::{DeferredNow, Logger, LoggerHandle};
use log::Record;

use crate::cli::Cli;
use crate::domain::ImageLikeConfig;
use crate::error::AppError;
use crate::session::Session;

pub mod pipeline;

/// Entry point for the `image-like` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _logger = init_logging(&cli.log_level)?;

    let config = config_from_args(&cli);
    let mut session = Session::new();
    pipeline::image_like(&mut session, &config)
}

/// Log to stderr as `LEVEL - message`; `RUST_LOG` takes precedence over `level`.
fn init_logging(level: &str) -> Result<LoggerHandle, AppError> {
    Logger::try_with_env_or_str(level)
        .and_then(|logger| logger.log_to_stderr().format(level_message_format).start())
        .map_err(|e| AppError::input(format!("Logger initialization failed: {e}")))
}

fn level_message_format(w: &mut dyn Write, _now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
    write!(w, "{} - {}", record.level(), record.args())
}

pub fn config_from_args(cli: &Cli) -> ImageLikeConfig {
    ImageLikeConfig {
        counts: cli.counts.clone(),
        exposure: cli.exposure.clone(),
        background: cli.background.clone(),
        psf: cli.psf.clone(),
        sources: cli.sources.clone(),
        // `--roi ""` means no region, same as omitting the flag.
        roi: cli.roi.clone().filter(|p| !p.as_os_str().is_empty()),
        outfile: cli.outfile.clone(),
    }
}
