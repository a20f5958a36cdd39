//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - session configuration enums (`CoordSystem`, `StatKind`, `MethodKind`, `MethodOpt`)
//! - images and their logical/physical coordinate mapping (`Image`)
//! - run inputs (`ImageLikeConfig`) and fit outputs (`FitResults`, `CovarResults`)
//! - the results JSON schema (`ResultsFile`)

pub mod results;
pub mod types;

pub use results::*;
pub use types::*;
