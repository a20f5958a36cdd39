//! Model components and model expressions.
//!
//! - `parameter`: bounded parameters with a frozen flag
//! - `gauss`: 2D Gaussian source shapes
//! - `component`: named components (sources, table models, PSFs)
//! - `expr`: parsing and evaluating expressions over components

pub mod component;
pub mod expr;
pub mod gauss;
pub mod parameter;

pub use component::*;
pub use expr::*;
pub use gauss::{GaussKind, eval_gauss};
pub use parameter::*;
