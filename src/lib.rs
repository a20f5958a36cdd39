//! `image-like` library crate.
//!
//! Fits the morphology of sources (2D Gaussians) in counts images, given
//! exposure, background and PSF, using the Cash statistic.
//!
//! The binary (`image-like`) is a thin wrapper around this library so that:
//!
//! - the command sequence is testable without spawning processes
//! - the fitting session can be driven from other front-ends

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod session;
