//! Small dense linear solves for the optimizer and the covariance estimate.
//!
//! The systems we solve are tiny (one row/column per free parameter) and
//! symmetric positive (semi-)definite:
//!
//! ```text
//! (F + λ diag F) δ = -g      (Levenberg-Marquardt step)
//! cov = F⁻¹                 (covariance)
//! ```
//!
//! Implementation choices:
//! - Cholesky first (fast, and fails cleanly when the matrix is not positive definite).
//! - SVD fallback with progressively looser tolerances for near-singular systems.

use nalgebra::{DMatrix, DVector};

/// Solve `a x = b` for a symmetric positive (semi-)definite `a`.
///
/// Returns `None` if no finite solution could be found.
pub fn solve_spd(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(chol) = a.clone().cholesky() {
        let x = chol.solve(b);
        if x.iter().all(|v| v.is_finite()) {
            return Some(x);
        }
    }

    let svd = a.clone().svd(true, true);
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(x) = svd.solve(b, tol) {
            if x.iter().all(|v| v.is_finite()) {
                return Some(x);
            }
        }
    }

    None
}

/// Invert a symmetric positive definite matrix.
///
/// Unlike [`solve_spd`] there is no pseudo-inverse fallback: a singular
/// curvature matrix means some parameter is unconstrained, and the caller
/// reports that rather than inventing an error bar.
pub fn invert_spd(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let inv = a.clone().cholesky()?.inverse();
    inv.iter().all(|v| v.is_finite()).then_some(inv)
}
