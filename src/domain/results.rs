//! Results JSON schema.
//!
//! The results file is the portable record of one fit:
//! - which data were fitted and over how many pixels
//! - the full model expression
//! - the fit and covariance outcomes
//! - a per-component parameter table (values, bounds, errors)

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CoordSystem, CovarResults, FitResults};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSummary {
    pub counts: PathBuf,
    pub nx: usize,
    pub ny: usize,
    pub n_pixels: usize,
    pub n_noticed: usize,
    pub coord: CoordSystem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSummary {
    pub name: String,
    pub val: f64,
    pub min: f64,
    pub max: f64,
    pub frozen: bool,
    /// Symmetric covariance error; absent for frozen parameters or when unavailable.
    pub error: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub params: Vec<ParamSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsFile {
    pub tool: String,
    pub created: DateTime<Utc>,
    pub data: DataSummary,
    pub model: String,
    pub fit: Option<FitResults>,
    pub covar: Option<CovarResults>,
    pub components: Vec<ComponentSummary>,
}
