//! Mathematical utilities: PSF convolution and small SPD linear solves.

pub mod convolve;
pub mod linalg;

pub use convolve::*;
pub use linalg::*;
