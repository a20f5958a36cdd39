//! The fitting session.
//!
//! A `Session` owns everything a fit needs: the counts image and its noticed
//! mask, the registered components (sources, table models, PSFs), the source
//! and full model expressions, the statistic, the optimizer options and the
//! latest fit/covariance results. Callers only issue commands against it.
//!
//! The `FitSession` trait is the command surface used by the pipeline; it lets
//! the command sequence be tested without touching files.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::domain::{
    ComponentSummary, CoordSystem, CovarResults, DataSummary, FitResults, Image, LevMarOptions, MethodKind, MethodOpt,
    ParamSummary, ResultsFile, StatKind,
};
use crate::error::AppError;
use crate::fit::{Problem, covariance, levmar};
use crate::io::{self, Region};
use crate::math::PsfKernel;
use crate::models::{Component, ComponentKind, EvalGrid, ModelExpr};

/// Commands the image-fit pipeline issues.
pub trait FitSession {
    fn clean(&mut self);
    fn load_data(&mut self, path: &Path) -> Result<(), AppError>;
    fn load_table_model(&mut self, name: &str, path: &Path) -> Result<(), AppError>;
    fn load_psf(&mut self, path: &Path) -> Result<(), AppError>;
    fn notice2d(&mut self, path: &Path) -> Result<(), AppError>;
    /// Register the sources in the file as the source model and return its name.
    fn load_sources(&mut self, path: &Path) -> Result<String, AppError>;
    fn set_full_model(&mut self, expression: &str) -> Result<(), AppError>;
    fn freeze(&mut self, names: &[&str]) -> Result<(), AppError>;
    fn set_coord(&mut self, coord: CoordSystem);
    fn set_stat(&mut self, stat: StatKind);
    fn set_method(&mut self, method: MethodKind);
    fn set_method_opt(&mut self, opt: MethodOpt);
    fn fit(&mut self) -> Result<(), AppError>;
    fn covar(&mut self) -> Result<(), AppError>;
    fn write_results(&self, path: &Path) -> Result<(), AppError>;
}

/// Name of the PSF component registered by `load_psf`.
pub const PSF_NAME: &str = "psf";

/// Confidence level of the covariance errors, in sigma.
pub const COVAR_SIGMA: f64 = 1.0;

#[derive(Debug, Clone)]
struct Dataset {
    path: PathBuf,
    image: Image,
    mask: Vec<bool>,
    /// True until the first region is noticed.
    all_noticed: bool,
}

#[derive(Debug, Clone)]
struct FullModel {
    text: String,
    expr: ModelExpr,
}

#[derive(Debug, Clone)]
pub struct Session {
    data: Option<Dataset>,
    components: Vec<Component>,
    source: Option<String>,
    full_model: Option<FullModel>,
    coord: CoordSystem,
    stat: StatKind,
    method: MethodKind,
    method_opts: LevMarOptions,
    fit_results: Option<FitResults>,
    covar_results: Option<CovarResults>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            data: None,
            components: Vec::new(),
            source: None,
            full_model: None,
            coord: CoordSystem::Logical,
            stat: StatKind::Cash,
            method: MethodKind::Levmar,
            method_opts: LevMarOptions::default(),
            fit_results: None,
            covar_results: None,
        }
    }
}

/// Everything needed to evaluate the model for a free-parameter vector.
struct FitSetup {
    noticed: Vec<usize>,
    data: Vec<f64>,
    free: Vec<(usize, usize)>,
    names: Vec<String>,
    start: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    grid: Vec<(f64, f64)>,
    nx: usize,
    ny: usize,
    expr: ModelExpr,
    work: RefCell<Vec<Component>>,
}

impl FitSetup {
    fn eval(&self, params: &[f64]) -> Result<Vec<f64>, AppError> {
        let mut work = self.work.borrow_mut();
        for (k, &(ci, pj)) in self.free.iter().enumerate() {
            work[ci].params[pj].set(params[k]);
        }
        let grid = EvalGrid {
            coords: &self.grid,
            nx: self.nx,
            ny: self.ny,
        };
        let full = self.expr.eval(&work, &grid)?;
        Ok(self.noticed.iter().map(|&i| full[i]).collect())
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Data and components
    // ---------------------------------------------------------------------

    /// Use an in-memory counts image; every pixel starts noticed.
    pub fn set_data(&mut self, path: impl Into<PathBuf>, image: Image) -> Result<(), AppError> {
        let path = path.into();
        if image.data.iter().any(|v| !v.is_finite()) {
            return Err(AppError::input(format!(
                "Counts image '{}' contains non-finite values.",
                path.display()
            )));
        }
        if let Some(bad) = self.components.iter().find(|c| match &c.kind {
            ComponentKind::Table(t) => !t.same_shape(&image),
            _ => false,
        }) {
            return Err(AppError::input(format!(
                "Counts image does not match the shape of table model '{}'.",
                bad.full_name()
            )));
        }

        log::debug!("Counts image '{}': {} x {} pixels", path.display(), image.nx, image.ny);
        self.data = Some(Dataset {
            path,
            mask: vec![true; image.len()],
            image,
            all_noticed: true,
        });
        Ok(())
    }

    /// Register an image as a table model; it must match the counts shape.
    pub fn add_table_model(&mut self, name: &str, image: Image) -> Result<(), AppError> {
        let data = self.require_data()?;
        if !data.image.same_shape(&image) {
            return Err(AppError::input(format!(
                "Table model '{name}' is {} x {} but the counts image is {} x {}.",
                image.nx, image.ny, data.image.nx, data.image.ny
            )));
        }
        self.register(Component::table(name, image));
        Ok(())
    }

    pub fn set_psf(&mut self, name: &str, kernel: PsfKernel) {
        log::debug!("PSF '{name}': {0} x {0} kernel", kernel.size());
        self.register(Component::psf(name, kernel));
    }

    /// Register the given components and make their sum the source model.
    pub fn set_source(&mut self, sources: Vec<Component>) -> Result<String, AppError> {
        if sources.is_empty() {
            return Err(AppError::input("No source components given."));
        }
        // Sources may replace earlier sources but never the instrument terms.
        for c in &sources {
            let clash = self
                .components
                .iter()
                .find(|e| e.name == c.name && !matches!(e.kind, ComponentKind::Gauss(_)));
            if let Some(existing) = clash {
                return Err(AppError::input(format!(
                    "Source '{}' would replace '{}'; choose another name.",
                    c.full_name(),
                    existing.full_name()
                )));
            }
        }
        let name = io::source_model_name(&sources);
        for c in sources {
            self.register(c);
        }
        // Validate that the name parses against the registry.
        ModelExpr::parse(&name, &self.components)?;
        self.source = Some(name.clone());
        Ok(name)
    }

    /// Add a component, replacing one with the same short name in place.
    fn register(&mut self, component: Component) {
        match self.components.iter_mut().find(|c| c.name == component.name) {
            Some(existing) => *existing = component,
            None => self.components.push(component),
        }
    }

    /// Restrict the fit to the region. The first region replaces the
    /// all-noticed default; later regions are added to the mask.
    pub fn notice_region(&mut self, region: &Region) -> Result<(), AppError> {
        let data = self
            .data
            .as_mut()
            .ok_or_else(|| AppError::input("No data loaded; load counts before noticing a region."))?;
        let region_mask = region.mask(&data.image);
        if data.all_noticed {
            data.mask = region_mask;
            data.all_noticed = false;
        } else {
            data.mask.iter_mut().zip(region_mask).for_each(|(m, r)| *m |= r);
        }
        let n = data.mask.iter().filter(|m| **m).count();
        log::debug!("Noticed {n} of {} pixels", data.mask.len());
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.matches(name))
    }

    pub fn component_mut(&mut self, name: &str) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.matches(name))
    }

    pub fn mask(&self) -> Option<&[bool]> {
        self.data.as_ref().map(|d| d.mask.as_slice())
    }

    pub fn coord(&self) -> CoordSystem {
        self.coord
    }

    pub fn method_opts(&self) -> &LevMarOptions {
        &self.method_opts
    }

    pub fn fit_results(&self) -> Option<&FitResults> {
        self.fit_results.as_ref()
    }

    pub fn covar_results(&self) -> Option<&CovarResults> {
        self.covar_results.as_ref()
    }

    /// Evaluate the full model on every pixel at the current parameter values.
    pub fn eval_full_model(&self) -> Result<Vec<f64>, AppError> {
        let data = self.require_data()?;
        let model = self.require_full_model()?;
        let coords = data.image.grid(self.coord);
        let grid = EvalGrid {
            coords: &coords,
            nx: data.image.nx,
            ny: data.image.ny,
        };
        model.expr.eval(&self.components, &grid)
    }

    /// Snapshot of everything the results file records.
    pub fn results(&self) -> Result<ResultsFile, AppError> {
        let data = self.require_data()?;
        let model = self.require_full_model()?;

        let error_of = |parname: &str| self.covar_results.as_ref().and_then(|c| c.error_of(parname));
        let components = self
            .source_components()
            .into_iter()
            .map(|c| ComponentSummary {
                name: c.full_name(),
                type_name: c.type_name().to_string(),
                params: c
                    .params
                    .iter()
                    .enumerate()
                    .map(|(j, p)| ParamSummary {
                        name: p.name.clone(),
                        val: p.val,
                        min: p.min,
                        max: p.max,
                        frozen: p.frozen,
                        error: error_of(&c.param_full_name(j)),
                    })
                    .collect(),
            })
            .collect();

        Ok(ResultsFile {
            tool: env!("CARGO_PKG_NAME").to_string(),
            created: Utc::now(),
            data: DataSummary {
                counts: data.path.clone(),
                nx: data.image.nx,
                ny: data.image.ny,
                n_pixels: data.image.len(),
                n_noticed: data.mask.iter().filter(|m| **m).count(),
                coord: self.coord,
            },
            model: model.text.clone(),
            fit: self.fit_results.clone(),
            covar: self.covar_results.clone(),
            components,
        })
    }

    fn source_components(&self) -> Vec<&Component> {
        let Some(name) = &self.source else {
            return Vec::new();
        };
        match ModelExpr::parse(name, &self.components) {
            Ok(expr) => expr
                .component_indices()
                .into_iter()
                .map(|i| &self.components[i])
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn require_data(&self) -> Result<&Dataset, AppError> {
        self.data
            .as_ref()
            .ok_or_else(|| AppError::input("No data loaded; load counts first."))
    }

    fn require_full_model(&self) -> Result<&FullModel, AppError> {
        self.full_model
            .as_ref()
            .ok_or_else(|| AppError::input("No full model set."))
    }

    fn fit_setup(&self) -> Result<FitSetup, AppError> {
        let data = self.require_data()?;
        let model = self.require_full_model()?;

        let noticed: Vec<usize> = data
            .mask
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.then_some(i))
            .collect();
        if noticed.is_empty() {
            return Err(AppError::fit("No pixels are noticed; check the region of interest."));
        }

        let mut free = Vec::new();
        for ci in model.expr.component_indices() {
            for (pj, p) in self.components[ci].params.iter().enumerate() {
                if p.is_thawed() {
                    free.push((ci, pj));
                }
            }
        }
        if free.is_empty() {
            return Err(AppError::fit("The model has no thawed parameters."));
        }

        let param = |&(ci, pj): &(usize, usize)| &self.components[ci].params[pj];
        Ok(FitSetup {
            data: noticed.iter().map(|&i| data.image.data[i]).collect(),
            names: free.iter().map(|&(ci, pj)| self.components[ci].param_full_name(pj)).collect(),
            start: free.iter().map(|f| param(f).val).collect(),
            lower: free.iter().map(|f| param(f).min).collect(),
            upper: free.iter().map(|f| param(f).max).collect(),
            grid: data.image.grid(self.coord),
            nx: data.image.nx,
            ny: data.image.ny,
            expr: model.expr.clone(),
            work: RefCell::new(self.components.clone()),
            noticed,
            free,
        })
    }
}

impl FitSession for Session {
    fn clean(&mut self) {
        *self = Session::default();
    }

    fn load_data(&mut self, path: &Path) -> Result<(), AppError> {
        let image = io::read_image(path)?;
        self.set_data(path, image)
    }

    fn load_table_model(&mut self, name: &str, path: &Path) -> Result<(), AppError> {
        let image = io::read_image(path)?;
        self.add_table_model(name, image)
    }

    fn load_psf(&mut self, path: &Path) -> Result<(), AppError> {
        let kernel = io::read_psf_json(path)?.kernel()?;
        self.set_psf(PSF_NAME, kernel);
        Ok(())
    }

    fn notice2d(&mut self, path: &Path) -> Result<(), AppError> {
        let region = io::read_region(path)?;
        self.notice_region(&region)
    }

    fn load_sources(&mut self, path: &Path) -> Result<String, AppError> {
        let sources = io::read_sources_json(path)?
            .iter()
            .map(|s| s.to_component())
            .collect::<Result<Vec<_>, _>>()?;
        self.set_source(sources)
    }

    fn set_full_model(&mut self, expression: &str) -> Result<(), AppError> {
        let expr = ModelExpr::parse(expression, &self.components)?;
        self.full_model = Some(FullModel {
            text: expression.to_string(),
            expr,
        });
        Ok(())
    }

    fn freeze(&mut self, names: &[&str]) -> Result<(), AppError> {
        for name in names {
            let component = self
                .component_mut(name)
                .ok_or_else(|| AppError::input(format!("Cannot freeze unknown model component '{name}'.")))?;
            component.freeze();
        }
        Ok(())
    }

    fn set_coord(&mut self, coord: CoordSystem) {
        self.coord = coord;
    }

    fn set_stat(&mut self, stat: StatKind) {
        self.stat = stat;
    }

    fn set_method(&mut self, method: MethodKind) {
        if method != self.method {
            self.method_opts = LevMarOptions::default();
        }
        self.method = method;
    }

    fn set_method_opt(&mut self, opt: MethodOpt) {
        self.method_opts.apply(opt);
    }

    fn fit(&mut self) -> Result<(), AppError> {
        let setup = self.fit_setup()?;
        let problem = Problem {
            data: &setup.data,
            model: |p: &[f64]| setup.eval(p),
            lower: setup.lower.clone(),
            upper: setup.upper.clone(),
            stat: self.stat,
        };
        let outcome = levmar(&problem, &setup.start, &self.method_opts)?;

        for (k, &(ci, pj)) in setup.free.iter().enumerate() {
            self.components[ci].params[pj].set(outcome.params[k]);
        }

        let numpoints = setup.noticed.len();
        let dof = numpoints as i64 - setup.free.len() as i64;
        let rstat = match self.stat {
            StatKind::Cstat if dof > 0 => Some(outcome.stat / dof as f64),
            _ => None,
        };
        let results = FitResults {
            succeeded: outcome.converged,
            method: self.method.name().to_string(),
            stat: self.stat.name().to_string(),
            statval: outcome.stat,
            numpoints,
            dof,
            rstat,
            nfev: outcome.nfev,
            iterations: outcome.iterations,
            message: outcome.message,
            parnames: setup.names.clone(),
            parvals: outcome.params,
        };

        if results.succeeded {
            log::info!("{}", crate::report::format_fit(&results));
        } else {
            log::warn!("{}", crate::report::format_fit(&results));
        }
        self.fit_results = Some(results);
        self.covar_results = None;
        Ok(())
    }

    fn covar(&mut self) -> Result<(), AppError> {
        let setup = self.fit_setup()?;
        let problem = Problem {
            data: &setup.data,
            model: |p: &[f64]| setup.eval(p),
            lower: setup.lower.clone(),
            upper: setup.upper.clone(),
            stat: self.stat,
        };
        let outcome = covariance(&problem, &setup.start, COVAR_SIGMA, self.method_opts.epsfcn)?;

        let results = CovarResults {
            sigma: COVAR_SIGMA,
            parnames: setup.names.clone(),
            parvals: setup.start.clone(),
            parmins: outcome.errors.iter().map(|e| e.map(|v| -v)).collect(),
            parmaxes: outcome.errors,
        };
        log::info!("{}", crate::report::format_covar(&results));
        self.covar_results = Some(results);
        Ok(())
    }

    fn write_results(&self, path: &Path) -> Result<(), AppError> {
        let results = self.results()?;
        io::write_results_json(path, &results)
    }
}
