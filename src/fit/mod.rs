//! Fitting engine.
//!
//! Responsibilities:
//!
//! - Poisson fit statistics (`stat`)
//! - the reduced problem handed over by the session (`problem`)
//! - Levenberg-Marquardt minimisation (`levmar`)
//! - covariance-based symmetric errors (`covar`)

pub mod covar;
pub mod levmar;
pub mod problem;
pub mod stat;

pub use covar::*;
pub use levmar::*;
pub use problem::*;
pub use stat::*;
