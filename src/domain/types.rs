//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed between the session, the optimizer and the writers
//! - exported to the results JSON

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Coordinate system used to evaluate source positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordSystem {
    /// 1-based image pixel coordinates (ds9 "image").
    Logical,
    /// Pixel coordinates before blocking/cropping, from the LTV/LTM keywords.
    Physical,
}

impl CoordSystem {
    pub fn name(self) -> &'static str {
        match self {
            CoordSystem::Logical => "logical",
            CoordSystem::Physical => "physical",
        }
    }
}

/// Fit statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    /// Cash (1979) Poisson likelihood: `2 Σ (m - d ln m)`.
    Cash,
    /// Cash with the data-only term added, so it approaches chi² for large counts.
    Cstat,
}

impl StatKind {
    pub fn name(self) -> &'static str {
        match self {
            StatKind::Cash => "cash",
            StatKind::Cstat => "cstat",
        }
    }
}

/// Optimization method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    /// Levenberg-Marquardt.
    Levmar,
}

impl MethodKind {
    pub fn name(self) -> &'static str {
        match self {
            MethodKind::Levmar => "levmar",
        }
    }
}

/// A single optimizer option, set via `set_method_opt`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MethodOpt {
    /// Maximum number of statistic evaluations.
    Maxfev(usize),
    /// Log every n-th iteration at debug level (0 = silent).
    Verbose(u32),
    /// Relative tolerance on the statistic.
    Ftol(f64),
    /// Relative tolerance on the parameter step.
    Xtol(f64),
    /// Tolerance on the gradient.
    Gtol(f64),
    /// Relative step used for forward-difference derivatives.
    Epsfcn(f64),
    /// Multiplier applied to the damping term after a rejected step.
    Factor(f64),
}

/// Levenberg-Marquardt options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevMarOptions {
    pub maxfev: usize,
    pub verbose: u32,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    pub epsfcn: f64,
    pub factor: f64,
}

impl Default for LevMarOptions {
    fn default() -> Self {
        let eps = f32::EPSILON as f64;
        Self {
            maxfev: 10_000,
            verbose: 0,
            ftol: eps,
            xtol: eps,
            gtol: eps,
            epsfcn: f64::EPSILON,
            factor: 100.0,
        }
    }
}

impl LevMarOptions {
    pub fn apply(&mut self, opt: MethodOpt) {
        match opt {
            MethodOpt::Maxfev(v) => self.maxfev = v,
            MethodOpt::Verbose(v) => self.verbose = v,
            MethodOpt::Ftol(v) => self.ftol = v,
            MethodOpt::Xtol(v) => self.xtol = v,
            MethodOpt::Gtol(v) => self.gtol = v,
            MethodOpt::Epsfcn(v) => self.epsfcn = v,
            MethodOpt::Factor(v) => self.factor = v,
        }
    }
}

/// Affine mapping between logical (image) and physical pixel coordinates.
///
/// `physical = (logical - ltv) / ltm`, per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalTransform {
    pub ltv1: f64,
    pub ltv2: f64,
    pub ltm1_1: f64,
    pub ltm2_2: f64,
}

impl Default for PhysicalTransform {
    fn default() -> Self {
        Self {
            ltv1: 0.0,
            ltv2: 0.0,
            ltm1_1: 1.0,
            ltm2_2: 1.0,
        }
    }
}

impl PhysicalTransform {
    pub fn to_physical(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.ltv1) / self.ltm1_1, (y - self.ltv2) / self.ltm2_2)
    }
}

/// A 2D image, row-major with `y` as the outer index.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub nx: usize,
    pub ny: usize,
    pub data: Vec<f64>,
    pub transform: PhysicalTransform,
}

impl Image {
    pub fn new(nx: usize, ny: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(nx * ny, data.len());
        Self {
            nx,
            ny,
            data,
            transform: PhysicalTransform::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn same_shape(&self, other: &Image) -> bool {
        self.nx == other.nx && self.ny == other.ny
    }

    /// Logical (1-based) coordinates of the centre of pixel `idx`.
    pub fn logical_coords(&self, idx: usize) -> (f64, f64) {
        let ix = idx % self.nx;
        let iy = idx / self.nx;
        ((ix + 1) as f64, (iy + 1) as f64)
    }

    /// Pixel-centre coordinates for every pixel in the requested system.
    pub fn grid(&self, coord: CoordSystem) -> Vec<(f64, f64)> {
        (0..self.len())
            .map(|idx| {
                let (x, y) = self.logical_coords(idx);
                match coord {
                    CoordSystem::Logical => (x, y),
                    CoordSystem::Physical => self.transform.to_physical(x, y),
                }
            })
            .collect()
    }
}

/// Resolved inputs for one image fit run.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLikeConfig {
    pub counts: PathBuf,
    pub exposure: PathBuf,
    pub background: PathBuf,
    pub psf: PathBuf,
    pub sources: PathBuf,
    /// Region of interest; `None` fits the full image.
    pub roi: Option<PathBuf>,
    pub outfile: PathBuf,
}

/// Outcome of `fit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResults {
    pub succeeded: bool,
    pub method: String,
    pub stat: String,
    pub statval: f64,
    pub numpoints: usize,
    pub dof: i64,
    /// Reduced statistic; only meaningful for `cstat`.
    pub rstat: Option<f64>,
    pub nfev: usize,
    pub iterations: usize,
    pub message: String,
    pub parnames: Vec<String>,
    pub parvals: Vec<f64>,
}

/// Outcome of `covar`.
///
/// Errors are `None` when the curvature matrix could not be inverted or a
/// variance came out non-positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarResults {
    pub sigma: f64,
    pub parnames: Vec<String>,
    pub parvals: Vec<f64>,
    pub parmins: Vec<Option<f64>>,
    pub parmaxes: Vec<Option<f64>>,
}

impl CovarResults {
    /// Symmetric error for the named parameter, if available.
    pub fn error_of(&self, parname: &str) -> Option<f64> {
        let idx = self.parnames.iter().position(|n| n == parname)?;
        self.parmaxes[idx]
    }
}
