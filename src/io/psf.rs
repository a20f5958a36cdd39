//! PSF JSON descriptor.
//!
//! The PSF is a sum of circular Gaussians, all in pixel units:
//!
//! ```json
//! {
//!   "psf1": { "ampl": 0.7, "fwhm": 2.1 },
//!   "psf2": { "ampl": 0.2, "fwhm": 5.0 },
//!   "psf3": { "ampl": 0.1, "fwhm": 12.0, "xpos": 0.3, "ypos": -0.2 },
//!   "size": 75
//! }
//! ```
//!
//! `xpos`/`ypos` offset a component from the kernel centre. `size` (odd) fixes
//! the kernel width; by default it covers three times the widest FWHM on each
//! side. The sampled kernel is normalised to unit sum.

use std::collections::BTreeMap;
use std::f64::consts::LN_2;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::math::PsfKernel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsfGaussian {
    pub ampl: f64,
    pub fwhm: f64,
    #[serde(default)]
    pub xpos: f64,
    #[serde(default)]
    pub ypos: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsfFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(flatten)]
    pub components: BTreeMap<String, PsfGaussian>,
}

pub fn read_psf_json(path: &Path) -> Result<PsfFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open PSF JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(file)
        .map_err(|e| AppError::input(format!("Invalid PSF JSON '{}': {e}", path.display())))
}

impl PsfFile {
    /// Sample the components on a square grid and normalise.
    pub fn kernel(&self) -> Result<PsfKernel, AppError> {
        if self.components.is_empty() {
            return Err(AppError::input("PSF JSON defines no components."));
        }
        for (name, c) in &self.components {
            if !(c.fwhm.is_finite() && c.fwhm > 0.0 && c.ampl.is_finite()) {
                return Err(AppError::input(format!(
                    "PSF component '{name}' needs a finite ampl and a positive fwhm."
                )));
            }
        }

        let size = match self.size {
            Some(size) => size,
            None => {
                let widest = self.components.values().map(|c| c.fwhm).fold(0.0, f64::max);
                let half = (3.0 * widest).ceil().max(1.0) as usize;
                2 * half + 1
            }
        };
        if size % 2 == 0 {
            return Err(AppError::input(format!("PSF size must be odd (got {size}).")));
        }

        let half = (size / 2) as f64;
        let mut data = vec![0.0; size * size];
        for (idx, v) in data.iter_mut().enumerate() {
            let dx = (idx % size) as f64 - half;
            let dy = (idx / size) as f64 - half;
            *v = self
                .components
                .values()
                .map(|c| {
                    let rx = dx - c.xpos;
                    let ry = dy - c.ypos;
                    c.ampl * (-4.0 * LN_2 * (rx * rx + ry * ry) / (c.fwhm * c.fwhm)).exp()
                })
                .sum();
        }

        PsfKernel::new(size, data)
    }
}
