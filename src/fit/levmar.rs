//! Levenberg-Marquardt for Poisson statistics.
//!
//! Each iteration:
//! - builds the forward-difference Jacobian at the current parameters
//! - forms the Fisher matrix `F` and the gradient `g` (see `problem`)
//! - solves `(F + λ diag F) δ = -g`, clamps `p + δ` to the bounds
//! - accepts the step if the statistic decreased (`λ /= factor`),
//!   otherwise retries with more damping (`λ *= factor`)
//!
//! For Gaussian data this reduces to the textbook chi² Levenberg-Marquardt;
//! here the weights `1/m` follow the model, as the Cash statistic requires.

use nalgebra::DVector;

use crate::domain::LevMarOptions;
use crate::error::AppError;
use crate::fit::problem::Problem;
use crate::math::solve_spd;

const LAMBDA_START: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

#[derive(Debug, Clone, PartialEq)]
pub struct LevMarOutcome {
    pub params: Vec<f64>,
    pub stat: f64,
    pub nfev: usize,
    pub iterations: usize,
    pub converged: bool,
    pub message: String,
}

/// Minimise the problem's statistic starting from `start`.
///
/// Running out of function evaluations is reported through
/// `converged = false`, not as an error; errors are reserved for problems
/// that cannot be evaluated at all.
pub fn levmar<F>(problem: &Problem<'_, F>, start: &[f64], opts: &LevMarOptions) -> Result<LevMarOutcome, AppError>
where
    F: Fn(&[f64]) -> Result<Vec<f64>, AppError>,
{
    let n = problem.n_params();
    if n == 0 {
        return Err(AppError::fit("No thawed parameters to fit."));
    }
    if start.len() != n {
        return Err(AppError::fit(format!(
            "Expected {n} starting values, got {}.",
            start.len()
        )));
    }

    let mut p = start.to_vec();
    problem.clamp(&mut p);

    let mut m = problem.eval(&p)?;
    let mut nfev = 1;
    let mut s = problem.stat_of(&m);
    if !s.is_finite() {
        return Err(AppError::fit("Statistic is not finite at the starting parameter values."));
    }

    let factor = if opts.factor > 1.0 { opts.factor } else { 10.0 };
    let mut lambda = LAMBDA_START;
    let mut iterations = 0;

    let finish = |p: Vec<f64>, s: f64, nfev: usize, iterations: usize, converged: bool, message: &str| {
        Ok(LevMarOutcome {
            params: p,
            stat: s,
            nfev,
            iterations,
            converged,
            message: message.to_string(),
        })
    };

    loop {
        if nfev + n > opts.maxfev {
            return finish(p, s, nfev, iterations, false, "number of function evaluations > maxfev");
        }
        iterations += 1;

        let (jac, used) = problem.jacobian(&p, &m, opts.epsfcn)?;
        nfev += used;
        let (fisher, grad) = problem.normal_equations(&m, &jac);

        if grad.amax() <= opts.gtol {
            return finish(p, s, nfev, iterations, true, "gradient is below gtol");
        }

        let neg_grad = -&grad;
        loop {
            let mut damped = fisher.clone();
            for j in 0..n {
                damped[(j, j)] += lambda * fisher[(j, j)].max(f64::MIN_POSITIVE);
            }

            let Some(delta) = solve_spd(&damped, &neg_grad) else {
                lambda *= factor;
                if lambda > LAMBDA_MAX {
                    return finish(p, s, nfev, iterations, true, "damped system is singular; no further improvement");
                }
                continue;
            };

            let mut trial: Vec<f64> = p.iter().zip(delta.iter()).map(|(a, b)| a + b).collect();
            problem.clamp(&mut trial);
            let mt = problem.eval(&trial)?;
            nfev += 1;
            let st = problem.stat_of(&mt);

            if st.is_finite() && st < s {
                let step = DVector::from_iterator(n, trial.iter().zip(p.iter()).map(|(a, b)| a - b)).norm();
                let scale = DVector::from_column_slice(&p).norm();
                let rel_change = (s - st) / s.abs().max(f64::MIN_POSITIVE);

                p = trial;
                m = mt;
                s = st;
                lambda = (lambda / factor).max(LAMBDA_MIN);

                if opts.verbose > 0 && iterations % opts.verbose as usize == 0 {
                    log::debug!(
                        "levmar: iter={iterations} nfev={nfev} stat={s:.6} lambda={lambda:.3e} params={p:?}"
                    );
                }

                if rel_change <= opts.ftol {
                    return finish(p, s, nfev, iterations, true, "relative change in statistic is below ftol");
                }
                if step <= opts.xtol * (scale + opts.xtol) {
                    return finish(p, s, nfev, iterations, true, "relative parameter step is below xtol");
                }
                break;
            }

            lambda *= factor;
            if lambda > LAMBDA_MAX {
                return finish(p, s, nfev, iterations, true, "no step reduces the statistic");
            }
            if nfev >= opts.maxfev {
                return finish(p, s, nfev, iterations, false, "number of function evaluations > maxfev");
            }
        }
    }
}
