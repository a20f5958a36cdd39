//! Input/output helpers.
//!
//! - FITS images (`fits`)
//! - PSF descriptor JSON (`psf`)
//! - source start-value JSON (`sources`)
//! - ds9 region files (`region`)
//! - results JSON (`results`)

pub mod fits;
pub mod psf;
pub mod region;
pub mod results;
pub mod sources;

pub use fits::*;
pub use psf::*;
pub use region::*;
pub use results::*;
pub use sources::*;
