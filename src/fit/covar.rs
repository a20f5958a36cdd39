//! Symmetric parameter errors from the curvature at the best fit.
//!
//! For a Poisson likelihood `stat = -2 ln L` the covariance is the inverse of
//! half the Hessian of the statistic. We use the expected Hessian (the Fisher
//! matrix `F`, which `problem::normal_equations` already returns halved):
//!
//! ```text
//! cov = F⁻¹
//! err_j = sigma * sqrt(cov_jj)
//! ```

use crate::error::AppError;
use crate::fit::problem::Problem;
use crate::math::invert_spd;

#[derive(Debug, Clone, PartialEq)]
pub struct CovarOutcome {
    /// One entry per parameter; `None` where the variance is unavailable
    /// (all `None` when the Fisher matrix is singular).
    pub errors: Vec<Option<f64>>,
}

pub fn covariance<F>(problem: &Problem<'_, F>, best: &[f64], sigma: f64, epsfcn: f64) -> Result<CovarOutcome, AppError>
where
    F: Fn(&[f64]) -> Result<Vec<f64>, AppError>,
{
    let n = problem.n_params();
    if n == 0 {
        return Err(AppError::fit("No thawed parameters for the covariance estimate."));
    }

    let model = problem.eval(best)?;
    let (jac, _) = problem.jacobian(best, &model, epsfcn)?;
    let (fisher, _) = problem.normal_equations(&model, &jac);

    let Some(cov) = invert_spd(&fisher) else {
        log::warn!("Covariance matrix is singular; parameter errors are unavailable.");
        return Ok(CovarOutcome { errors: vec![None; n] });
    };

    let errors = (0..n)
        .map(|j| {
            let var = cov[(j, j)];
            (var.is_finite() && var > 0.0).then(|| sigma * var.sqrt())
        })
        .collect();

    Ok(CovarOutcome { errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StatKind;

    #[test]
    fn constant_rate_error_is_poisson() {
        // A flat model m = a over N pixels: var(a) = a / N.
        let n = 400;
        let a = 9.0;
        let data = vec![a; n];
        let problem = Problem {
            data: &data,
            model: move |p: &[f64]| -> Result<Vec<f64>, AppError> { Ok(vec![p[0]; n]) },
            lower: vec![0.0],
            upper: vec![1e6],
            stat: StatKind::Cash,
        };
        let out = covariance(&problem, &[a], 1.0, f64::EPSILON).unwrap();
        let err = out.errors[0].unwrap();
        let expected = (a / n as f64).sqrt();
        assert!((err - expected).abs() / expected < 1e-4, "err = {err}, expected = {expected}");

        let two_sigma = covariance(&problem, &[a], 2.0, f64::EPSILON).unwrap();
        assert!((two_sigma.errors[0].unwrap() - 2.0 * err).abs() < 1e-9);
    }

    #[test]
    fn unconstrained_parameter_has_no_error() {
        let data = vec![4.0; 10];
        // The second parameter does not affect the model.
        let problem = Problem {
            data: &data,
            model: |p: &[f64]| -> Result<Vec<f64>, AppError> { Ok(vec![p[0]; 10]) },
            lower: vec![0.0, -1.0],
            upper: vec![100.0, 1.0],
            stat: StatKind::Cash,
        };
        let out = covariance(&problem, &[4.0, 0.2], 1.0, f64::EPSILON).unwrap();
        assert!(out.errors.iter().all(Option::is_none));
    }
}
