//! The image-fit command sequence.
//!
//! `image_like` issues a fixed series of commands against a `FitSession`:
//! reset -> load counts/exposure/background -> PSF -> optional ROI -> sources
//! -> full model -> freeze instrument terms -> configure -> fit -> covar -> write.
//!
//! It never inspects session state, so it is tested here against a session
//! that only records the commands it receives.

use crate::domain::{CoordSystem, ImageLikeConfig, MethodKind, MethodOpt, StatKind};
use crate::error::AppError;
use crate::session::{FitSession, PSF_NAME};

/// Scale applied to `exposure * psf(source)` so source amplitudes stay O(1).
pub const EXPOSURE_SCALE: f64 = 1e-10;
pub const MAX_FEV: usize = 1000;
pub const VERBOSE: u32 = 10;

/// Table model names used in the full model expression.
pub const EXPOSURE_NAME: &str = "exposure";
pub const BACKGROUND_NAME: &str = "background";

/// `background + 1e-10 * exposure * psf(<source>)`.
pub fn full_model_expression(source_name: &str) -> String {
    format!("{BACKGROUND_NAME} + {EXPOSURE_SCALE:e} * {EXPOSURE_NAME} * {PSF_NAME}({source_name})")
}

/// Fit the sources in `config.sources` to the counts image and write the results.
pub fn image_like<S: FitSession>(session: &mut S, config: &ImageLikeConfig) -> Result<(), AppError> {
    log::info!("Clearing the session");
    session.clean();

    log::info!("Reading counts: {}", config.counts.display());
    session.load_data(&config.counts)?;
    log::info!("Reading exposure: {}", config.exposure.display());
    session.load_table_model(EXPOSURE_NAME, &config.exposure)?;
    log::info!("Reading background: {}", config.background.display());
    session.load_table_model(BACKGROUND_NAME, &config.background)?;

    log::info!("Reading PSF: {}", config.psf.display());
    session.load_psf(&config.psf)?;

    match &config.roi {
        Some(roi) => {
            log::info!("Reading region: {}", roi.display());
            session.notice2d(roi)?;
        }
        None => log::info!("No ROI selected."),
    }

    log::info!("Reading sources: {}", config.sources.display());
    let source_name = session.load_sources(&config.sources)?;

    let expression = full_model_expression(&source_name);
    log::info!("Setting full model: {expression}");
    session.set_full_model(&expression)?;
    session.freeze(&[BACKGROUND_NAME, EXPOSURE_NAME, PSF_NAME])?;

    session.set_coord(CoordSystem::Physical);
    session.set_stat(StatKind::Cash);
    session.set_method(MethodKind::Levmar);
    session.set_method_opt(MethodOpt::Maxfev(MAX_FEV));
    session.set_method_opt(MethodOpt::Verbose(VERBOSE));

    log::info!("Fitting");
    session.fit()?;
    log::info!("Estimating errors (covariance)");
    session.covar()?;

    log::info!("Writing {}", config.outfile.display());
    session.write_results(&config.outfile)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};

    /// Records every command as a string.
    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn record(&self, call: String) -> Result<(), AppError> {
            let failing = self.fail_on.is_some_and(|f| call.starts_with(f));
            self.calls.borrow_mut().push(call);
            if failing {
                Err(AppError::input("boom"))
            } else {
                Ok(())
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl FitSession for Recorder {
        fn clean(&mut self) {
            self.calls.borrow_mut().push("clean".into());
        }
        fn load_data(&mut self, path: &Path) -> Result<(), AppError> {
            self.record(format!("load_data {}", path.display()))
        }
        fn load_table_model(&mut self, name: &str, path: &Path) -> Result<(), AppError> {
            self.record(format!("load_table_model {name} {}", path.display()))
        }
        fn load_psf(&mut self, path: &Path) -> Result<(), AppError> {
            self.record(format!("load_psf {}", path.display()))
        }
        fn notice2d(&mut self, path: &Path) -> Result<(), AppError> {
            self.record(format!("notice2d {}", path.display()))
        }
        fn load_sources(&mut self, path: &Path) -> Result<String, AppError> {
            self.record(format!("load_sources {}", path.display()))?;
            Ok("(normgauss2d.g0 + normgauss2d.g1)".into())
        }
        fn set_full_model(&mut self, expression: &str) -> Result<(), AppError> {
            self.record(format!("set_full_model {expression}"))
        }
        fn freeze(&mut self, names: &[&str]) -> Result<(), AppError> {
            self.record(format!("freeze {}", names.join(",")))
        }
        fn set_coord(&mut self, coord: CoordSystem) {
            self.calls.borrow_mut().push(format!("set_coord {}", coord.name()));
        }
        fn set_stat(&mut self, stat: StatKind) {
            self.calls.borrow_mut().push(format!("set_stat {}", stat.name()));
        }
        fn set_method(&mut self, method: MethodKind) {
            self.calls.borrow_mut().push(format!("set_method {}", method.name()));
        }
        fn set_method_opt(&mut self, opt: MethodOpt) {
            self.calls.borrow_mut().push(format!("set_method_opt {opt:?}"));
        }
        fn fit(&mut self) -> Result<(), AppError> {
            self.record("fit".into())
        }
        fn covar(&mut self) -> Result<(), AppError> {
            self.record("covar".into())
        }
        fn write_results(&self, path: &Path) -> Result<(), AppError> {
            self.record(format!("write_results {}", path.display()))
        }
    }

    fn config(roi: Option<&str>) -> ImageLikeConfig {
        ImageLikeConfig {
            counts: PathBuf::from("c.fits"),
            exposure: PathBuf::from("e.fits"),
            background: PathBuf::from("b.fits"),
            psf: PathBuf::from("p.json"),
            sources: PathBuf::from("s.json"),
            roi: roi.map(PathBuf::from),
            outfile: PathBuf::from("out/result.json"),
        }
    }

    #[test]
    fn issues_the_fixed_sequence() {
        let mut rec = Recorder::default();
        image_like(&mut rec, &config(Some("roi.reg"))).unwrap();
        assert_eq!(
            rec.calls(),
            vec![
                "clean",
                "load_data c.fits",
                "load_table_model exposure e.fits",
                "load_table_model background b.fits",
                "load_psf p.json",
                "notice2d roi.reg",
                "load_sources s.json",
                "set_full_model background + 1e-10 * exposure * psf((normgauss2d.g0 + normgauss2d.g1))",
                "freeze background,exposure,psf",
                "set_coord physical",
                "set_stat cash",
                "set_method levmar",
                "set_method_opt Maxfev(1000)",
                "set_method_opt Verbose(10)",
                "fit",
                "covar",
                "write_results out/result.json",
            ]
        );
    }

    #[test]
    fn no_roi_skips_notice() {
        let mut rec = Recorder::default();
        image_like(&mut rec, &config(None)).unwrap();
        let calls = rec.calls();
        assert!(!calls.iter().any(|c| c.starts_with("notice2d")));
        assert_eq!(calls.len(), 16);
    }

    #[test]
    fn errors_stop_the_sequence() {
        let mut rec = Recorder {
            fail_on: Some("load_psf"),
            ..Recorder::default()
        };
        let err = image_like(&mut rec, &config(None)).unwrap_err();
        assert_eq!(err.message(), "boom");
        assert_eq!(rec.calls().last().map(String::as_str), Some("load_psf p.json"));
    }

    #[test]
    fn expression_uses_source_name() {
        assert_eq!(
            full_model_expression("normgauss2d.g0"),
            "background + 1e-10 * exposure * psf(normgauss2d.g0)"
        );
    }

    mod end_to_end {
        use super::*;
        use crate::domain::{Image, PhysicalTransform};
        use crate::io::{PsfFile, read_results_json, write_image};
        use crate::models::{Component, GaussKind};
        use crate::session::Session;
        use rand::SeedableRng;
        use rand::rngs::StdRng;
        use rand_distr::{Distribution, Poisson};

        const NX: usize = 40;
        const NY: usize = 40;
        const PSF_JSON: &str = r#"{"psf1": {"ampl": 1.0, "fwhm": 2.0}}"#;

        /// Images are offset by 10 pixels, so physical = logical + 10.
        fn image(data: Vec<f64>) -> Image {
            let mut image = Image::new(NX, NY, data);
            image.transform = PhysicalTransform {
                ltv1: -10.0,
                ltv2: -10.0,
                ltm1_1: 1.0,
                ltm2_2: 1.0,
            };
            image
        }

        fn source(name: &str, x: f64, y: f64, ampl: f64, fwhm: f64) -> Component {
            let mut c = Component::gauss(GaussKind::NormGauss2D, name);
            c.param_mut("xpos").unwrap().set(x);
            c.param_mut("ypos").unwrap().set(y);
            c.param_mut("ampl").unwrap().set(ampl);
            c.param_mut("fwhm").unwrap().set(fwhm);
            c
        }

        /// Poisson counts for two sources on a flat background.
        fn simulated_counts(exposure: &Image, background: &Image) -> Image {
            let psf: PsfFile = serde_json::from_str(PSF_JSON).unwrap();
            let mut truth = Session::new();
            truth.set_data("truth", image(vec![0.0; NX * NY])).unwrap();
            truth.add_table_model(EXPOSURE_NAME, exposure.clone()).unwrap();
            truth.add_table_model(BACKGROUND_NAME, background.clone()).unwrap();
            truth.set_psf(PSF_NAME, psf.kernel().unwrap());
            let name = truth
                .set_source(vec![
                    source("g0", 30.3, 28.7, 400.0, 3.0),
                    source("g1", 22.0, 35.0, 200.0, 2.5),
                ])
                .unwrap();
            truth.set_full_model(&full_model_expression(&name)).unwrap();
            truth.set_coord(CoordSystem::Physical);
            let expected = truth.eval_full_model().unwrap();

            let mut rng = StdRng::seed_from_u64(11);
            image(
                expected
                    .iter()
                    .map(|&m| Poisson::new(m).unwrap().sample(&mut rng))
                    .collect(),
            )
        }

        #[test]
        fn fits_files_on_disk_and_writes_results() {
            let dir = tempfile::tempdir().unwrap();
            let path = |name: &str| dir.path().join(name);

            let exposure = image(vec![1e10; NX * NY]);
            let background = image(vec![0.5; NX * NY]);
            let counts = simulated_counts(&exposure, &background);
            write_image(&path("counts.fits"), &counts).unwrap();
            write_image(&path("exposure.fits"), &exposure).unwrap();
            write_image(&path("background.fits"), &background).unwrap();

            std::fs::write(path("psf.json"), PSF_JSON).unwrap();
            std::fs::write(
                path("sources.json"),
                r#"{
                    "normgauss2d.g0": {"xpos": 31.0, "ypos": 28.0, "ampl": 250.0, "fwhm": 4.0},
                    "normgauss2d.g1": {"xpos": 22.5, "ypos": 34.5, "ampl": 100.0, "fwhm": 3.0}
                }"#,
            )
            .unwrap();
            std::fs::write(path("roi.reg"), "# Region file format: DS9\nphysical\ncircle(29,30,13)\n").unwrap();

            let config = ImageLikeConfig {
                counts: path("counts.fits"),
                exposure: path("exposure.fits"),
                background: path("background.fits"),
                psf: path("psf.json"),
                sources: path("sources.json"),
                roi: Some(path("roi.reg")),
                outfile: path("fit_result.json"),
            };
            image_like(&mut Session::new(), &config).unwrap();

            let results = read_results_json(&config.outfile).unwrap();
            assert_eq!(
                results.model,
                "background + 1e-10 * exposure * psf((normgauss2d.g0 + normgauss2d.g1))"
            );
            assert_eq!(results.data.coord, CoordSystem::Physical);
            assert_eq!(results.data.n_pixels, NX * NY);
            assert!(results.data.n_noticed > 0 && results.data.n_noticed < results.data.n_pixels);

            let fit = results.fit.as_ref().unwrap();
            assert!(fit.succeeded, "{}", fit.message);
            assert_eq!(fit.numpoints, results.data.n_noticed);
            assert_eq!(fit.parnames.len(), 8);

            let covar = results.covar.as_ref().unwrap();
            assert_eq!(covar.parnames, fit.parnames);
            for (name, err) in covar.parnames.iter().zip(&covar.parmaxes) {
                let err = err.unwrap_or_else(|| panic!("no error for {name}"));
                assert!(err.is_finite() && err > 0.0, "{name}: {err}");
            }

            let g0 = &results.components[0];
            assert_eq!(g0.name, "normgauss2d.g0");
            let val = |n: &str| g0.params.iter().find(|p| p.name == n).unwrap().val;
            assert!((val("xpos") - 30.3).abs() < 0.4, "xpos = {}", val("xpos"));
            assert!((val("ypos") - 28.7).abs() < 0.4, "ypos = {}", val("ypos"));
            assert!(g0.params.iter().find(|p| p.name == "xpos").unwrap().error.is_some());
        }

        #[test]
        fn missing_input_file_is_an_input_error() {
            let dir = tempfile::tempdir().unwrap();
            let config = ImageLikeConfig {
                counts: dir.path().join("missing.fits"),
                exposure: dir.path().join("exposure.fits"),
                background: dir.path().join("background.fits"),
                psf: dir.path().join("psf.json"),
                sources: dir.path().join("sources.json"),
                roi: None,
                outfile: dir.path().join("out.json"),
            };
            let err = image_like(&mut Session::new(), &config).unwrap_err();
            assert_eq!(err.exit_code(), crate::error::EXIT_INPUT);
            assert!(!config.outfile.exists());
        }
    }
}
