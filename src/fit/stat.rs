//! Poisson fit statistics.
//!
//! ```text
//! cash  = 2 Σ (m - d ln m)
//! cstat = 2 Σ (m - d + d ln(d / m))      (d = 0 terms reduce to m)
//! ```
//!
//! Both share the same gradient with respect to the model, so the optimizer
//! does not need to know which one is in use.

use crate::domain::StatKind;

/// Model values below this are truncated before taking the logarithm.
pub const TRUNCATION_VALUE: f64 = 1e-25;

fn truncate(m: f64) -> f64 {
    if m > TRUNCATION_VALUE { m } else { TRUNCATION_VALUE }
}

/// Evaluate the statistic over the paired data/model values.
pub fn calc_stat<'a>(kind: StatKind, pairs: impl Iterator<Item = (&'a f64, &'a f64)>) -> f64 {
    let sum: f64 = match kind {
        StatKind::Cash => pairs
            .map(|(&d, &m)| {
                let m = truncate(m);
                m - d * m.ln()
            })
            .sum(),
        StatKind::Cstat => pairs
            .map(|(&d, &m)| {
                let m = truncate(m);
                if d > 0.0 { m - d + d * (d / m).ln() } else { m }
            })
            .sum(),
    };
    2.0 * sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cash_matches_closed_form() {
        let d = [3.0, 0.0];
        let m = [2.0, 0.5];
        let expected = 2.0 * ((2.0 - 3.0 * 2.0f64.ln()) + 0.5);
        let got = calc_stat(StatKind::Cash, d.iter().zip(m.iter()));
        assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn cstat_is_zero_for_perfect_model() {
        let d = [4.0, 0.0, 10.0];
        let got = calc_stat(StatKind::Cstat, d.iter().zip(d.iter()));
        // The d = 0 pixel contributes m = 0.
        assert!(got.abs() < 1e-12);
    }

    #[test]
    fn cash_and_cstat_differ_by_data_only_term() {
        let d = [5.0, 1.0, 2.0];
        let m1 = [4.0, 2.0, 2.5];
        let m2 = [6.0, 1.5, 1.0];
        let cash = |m: &[f64; 3]| calc_stat(StatKind::Cash, d.iter().zip(m.iter()));
        let cstat = |m: &[f64; 3]| calc_stat(StatKind::Cstat, d.iter().zip(m.iter()));
        let diff1 = cstat(&m1) - cash(&m1);
        let diff2 = cstat(&m2) - cash(&m2);
        assert!((diff1 - diff2).abs() < 1e-12);
    }

    #[test]
    fn non_positive_model_is_truncated() {
        let d = [1.0];
        let m = [-3.0];
        let got = calc_stat(StatKind::Cash, d.iter().zip(m.iter()));
        assert!(got.is_finite());
        assert!((got - 2.0 * (TRUNCATION_VALUE - TRUNCATION_VALUE.ln())).abs() < 1e-9);
    }
}
