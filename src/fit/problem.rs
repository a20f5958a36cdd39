//! The fit problem seen by the optimizer and the covariance estimate.
//!
//! The session reduces everything to:
//! - the counts in the noticed pixels
//! - a function mapping the free-parameter vector to model values in those pixels
//! - bounds for each free parameter
//!
//! Derivatives are forward differences; all curvature information comes from
//! the Poisson Fisher matrix `F = Σ J Jᵀ / m`.

use nalgebra::{DMatrix, DVector};

use crate::domain::StatKind;
use crate::error::AppError;
use crate::fit::stat::{TRUNCATION_VALUE, calc_stat};

pub struct Problem<'a, F>
where
    F: Fn(&[f64]) -> Result<Vec<f64>, AppError>,
{
    /// Counts in the noticed pixels.
    pub data: &'a [f64],
    /// Model values in the noticed pixels for a free-parameter vector.
    pub model: F,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub stat: StatKind,
}

impl<F> Problem<'_, F>
where
    F: Fn(&[f64]) -> Result<Vec<f64>, AppError>,
{
    pub fn n_params(&self) -> usize {
        self.lower.len()
    }

    pub fn clamp(&self, params: &mut [f64]) {
        for (i, p) in params.iter_mut().enumerate() {
            *p = p.clamp(self.lower[i], self.upper[i]);
        }
    }

    /// Evaluate the model, checking its length against the data.
    pub fn eval(&self, params: &[f64]) -> Result<Vec<f64>, AppError> {
        let m = (self.model)(params)?;
        if m.len() != self.data.len() {
            return Err(AppError::fit(format!(
                "Model returned {} values for {} data points.",
                m.len(),
                self.data.len()
            )));
        }
        Ok(m)
    }

    pub fn stat_of(&self, model: &[f64]) -> f64 {
        calc_stat(self.stat, self.data.iter().zip(model.iter()))
    }

    /// Forward-difference Jacobian (`n_points` x `n_params`) at `params`,
    /// reusing the model values already computed there.
    ///
    /// Steps flip to backward differences when the forward step would leave
    /// the parameter bounds. Returns the number of model evaluations used.
    pub fn jacobian(&self, params: &[f64], model: &[f64], epsfcn: f64) -> Result<(DMatrix<f64>, usize), AppError> {
        let n = self.n_params();
        let rel = epsfcn.max(f64::EPSILON).sqrt();
        let mut jac = DMatrix::<f64>::zeros(self.data.len(), n);
        let mut work = params.to_vec();

        for j in 0..n {
            let mut h = rel * params[j].abs();
            if h == 0.0 {
                h = rel;
            }
            if params[j] + h > self.upper[j] {
                h = -h;
            }
            work[j] = params[j] + h;
            let shifted = self.eval(&work)?;
            work[j] = params[j];

            let step = (params[j] + h) - params[j];
            for (i, (ms, m0)) in shifted.iter().zip(model.iter()).enumerate() {
                jac[(i, j)] = (ms - m0) / step;
            }
        }

        Ok((jac, n))
    }

    /// Half the Fisher matrix and half the gradient of the statistic:
    ///
    /// ```text
    /// F_jk = Σ J_ij J_ik / m_i
    /// g_j  = Σ (1 - d_i / m_i) J_ij
    /// ```
    pub fn normal_equations(&self, model: &[f64], jac: &DMatrix<f64>) -> (DMatrix<f64>, DVector<f64>) {
        let n = jac.ncols();
        let mut fisher = DMatrix::<f64>::zeros(n, n);
        let mut grad = DVector::<f64>::zeros(n);

        for (i, (&d, &m)) in self.data.iter().zip(model.iter()).enumerate() {
            let m = m.max(TRUNCATION_VALUE);
            let w = 1.0 / m;
            let r = 1.0 - d / m;
            for j in 0..n {
                let jij = jac[(i, j)];
                if jij == 0.0 {
                    continue;
                }
                grad[j] += r * jij;
                for k in j..n {
                    fisher[(j, k)] += w * jij * jac[(i, k)];
                }
            }
        }
        for j in 0..n {
            for k in 0..j {
                fisher[(j, k)] = fisher[(k, j)];
            }
        }

        (fisher, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_problem(data: &[f64]) -> Problem<'_, impl Fn(&[f64]) -> Result<Vec<f64>, AppError>> {
        // m_i = a + b * i
        let n = data.len();
        Problem {
            data,
            model: move |p: &[f64]| -> Result<Vec<f64>, AppError> {
                Ok((0..n).map(|i| p[0] + p[1] * i as f64).collect())
            },
            lower: vec![0.0, -10.0],
            upper: vec![100.0, 10.0],
            stat: StatKind::Cash,
        }
    }

    #[test]
    fn jacobian_matches_analytic_derivatives() {
        let data = [1.0, 2.0, 3.0];
        let prob = linear_problem(&data);
        let p = [2.0, 0.5];
        let m = prob.eval(&p).unwrap();
        let (jac, nfev) = prob.jacobian(&p, &m, f64::EPSILON).unwrap();
        assert_eq!(nfev, 2);
        for i in 0..3 {
            assert!((jac[(i, 0)] - 1.0).abs() < 1e-6);
            assert!((jac[(i, 1)] - i as f64).abs() < 1e-6);
        }
    }

    #[test]
    fn jacobian_steps_backward_at_upper_bound() {
        let data = [1.0, 2.0];
        let prob = linear_problem(&data);
        let p = [100.0, 0.0];
        let m = prob.eval(&p).unwrap();
        let (jac, _) = prob.jacobian(&p, &m, f64::EPSILON).unwrap();
        assert!((jac[(0, 0)] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn gradient_vanishes_when_model_matches_data() {
        let data = [2.0, 2.5, 3.0];
        let prob = linear_problem(&data);
        let p = [2.0, 0.5];
        let m = prob.eval(&p).unwrap();
        let (jac, _) = prob.jacobian(&p, &m, f64::EPSILON).unwrap();
        let (fisher, grad) = prob.normal_equations(&m, &jac);
        assert!(grad.amax() < 1e-9);
        assert!((fisher[(0, 1)] - fisher[(1, 0)]).abs() < 1e-12);
        assert!(fisher[(0, 0)] > 0.0);
    }
}
