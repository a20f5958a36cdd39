//! Named model components registered in a fitting session.
//!
//! A component is addressed either by its short name (`g0`, `exposure`, `psf`)
//! or its full name (`normgauss2d.g0`, `tablemodel.exposure`, `psfmodel.psf`).

use crate::domain::Image;
use crate::error::AppError;
use crate::math::PsfKernel;
use crate::models::gauss::{self, GaussKind};
use crate::models::parameter::{HUGE_VAL, Parameter};

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentKind {
    Gauss(GaussKind),
    /// Image values scaled by the single `ampl` parameter.
    Table(Image),
    /// Convolution kernel; only usable as `psf(<expr>)`.
    Psf(PsfKernel),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub kind: ComponentKind,
    pub params: Vec<Parameter>,
}

impl Component {
    pub fn gauss(kind: GaussKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::Gauss(kind),
            params: gauss::default_params(),
        }
    }

    pub fn table(name: impl Into<String>, image: Image) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::Table(image),
            params: vec![Parameter::new("ampl", 1.0, -HUGE_VAL, HUGE_VAL)],
        }
    }

    pub fn psf(name: impl Into<String>, kernel: PsfKernel) -> Self {
        Self {
            name: name.into(),
            kind: ComponentKind::Psf(kernel),
            params: Vec::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ComponentKind::Gauss(kind) => kind.type_name(),
            ComponentKind::Table(_) => "tablemodel",
            ComponentKind::Psf(_) => "psfmodel",
        }
    }

    /// `<type>.<name>`, e.g. `normgauss2d.g0`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.type_name(), self.name)
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.full_name() == name
    }

    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn param_mut(&mut self, name: &str) -> Result<&mut Parameter, AppError> {
        let full = self.full_name();
        self.params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| AppError::input(format!("Model '{full}' has no parameter '{name}'.")))
    }

    /// `<full name>.<param>`, e.g. `normgauss2d.g0.xpos`.
    pub fn param_full_name(&self, idx: usize) -> String {
        format!("{}.{}", self.full_name(), self.params[idx].name)
    }

    pub fn freeze(&mut self) {
        self.params.iter_mut().for_each(|p| p.frozen = true);
    }

    /// Evaluate the component on the grid.
    ///
    /// PSF components cannot be evaluated on their own.
    pub fn eval(&self, grid: &[(f64, f64)]) -> Result<Vec<f64>, AppError> {
        match &self.kind {
            ComponentKind::Gauss(kind) => Ok(gauss::eval_gauss(*kind, &self.params, grid)),
            ComponentKind::Table(image) => {
                if image.len() != grid.len() {
                    return Err(AppError::fit(format!(
                        "Table model '{}' has {} pixels but the data has {}.",
                        self.full_name(),
                        image.len(),
                        grid.len()
                    )));
                }
                let ampl = self.params[0].val;
                Ok(image.data.iter().map(|v| v * ampl).collect())
            }
            ComponentKind::Psf(_) => Err(AppError::input(format!(
                "PSF model '{}' must be applied to a model, e.g. {}(src).",
                self.full_name(),
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_matching() {
        let c = Component::gauss(GaussKind::NormGauss2D, "g0");
        assert_eq!(c.full_name(), "normgauss2d.g0");
        assert!(c.matches("g0"));
        assert!(c.matches("normgauss2d.g0"));
        assert!(!c.matches("gauss2d.g0"));
        assert_eq!(c.param_full_name(1), "normgauss2d.g0.xpos");
    }

    #[test]
    fn table_scales_by_ampl() {
        let mut c = Component::table("exposure", Image::new(2, 1, vec![2.0, 4.0]));
        c.param_mut("ampl").unwrap().set(0.5);
        let grid = vec![(1.0, 1.0), (2.0, 1.0)];
        assert_eq!(c.eval(&grid).unwrap(), vec![1.0, 2.0]);
        assert!(c.param_mut("fwhm").is_err());
    }

    #[test]
    fn freeze_marks_every_parameter() {
        let mut c = Component::gauss(GaussKind::Gauss2D, "g");
        c.freeze();
        assert!(c.params.iter().all(|p| p.frozen));
    }

    #[test]
    fn psf_cannot_be_evaluated_alone() {
        let c = Component::psf("psf", PsfKernel::delta());
        assert!(c.eval(&[(1.0, 1.0)]).is_err());
    }
}
