//! Text summaries of fit and covariance results.
//!
//! Formatting lives here so the session only decides *when* to log and the
//! layout can change without touching the fitting code.

use crate::domain::{CovarResults, FitResults};

/// Multi-line fit summary, one parameter per line.
pub fn format_fit(fit: &FitResults) -> String {
    let mut out = String::new();
    out.push_str(&format!("Method                = {}\n", fit.method));
    out.push_str(&format!("Statistic             = {}\n", fit.stat));
    out.push_str(&format!("Final fit statistic   = {:.6e} at iteration {}\n", fit.statval, fit.iterations));
    out.push_str(&format!("Data points           = {}\n", fit.numpoints));
    out.push_str(&format!("Degrees of freedom    = {}\n", fit.dof));
    if let Some(rstat) = fit.rstat {
        out.push_str(&format!("Reduced statistic     = {rstat:.6}\n"));
    }
    out.push_str(&format!("Function evaluations  = {}\n", fit.nfev));
    out.push_str(&format!("Status                = {}", fit.message));

    let width = name_width(&fit.parnames);
    for (name, val) in fit.parnames.iter().zip(&fit.parvals) {
        out.push_str(&format!("\n   {name:<width$}   {val:>14.6e}"));
    }
    out
}

/// Covariance table: value and symmetric error per parameter.
pub fn format_covar(covar: &CovarResults) -> String {
    let width = name_width(&covar.parnames);
    let mut out = format!("Confidence method     = covariance ({} sigma)\n", covar.sigma);
    out.push_str(&format!("   {:<width$}   {:>14}   {:>14}", "Param", "Best-fit", "Error"));
    for (i, name) in covar.parnames.iter().enumerate() {
        let err = match covar.parmaxes[i] {
            Some(e) => format!("{e:>14.6e}"),
            None => format!("{:>14}", "-----"),
        };
        out.push_str(&format!("\n   {name:<width$}   {:>14.6e}   {err}", covar.parvals[i]));
    }
    out
}

fn name_width(names: &[String]) -> usize {
    names.iter().map(String::len).max().unwrap_or(0).max(5)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fit() -> FitResults {
        FitResults {
            succeeded: true,
            method: "levmar".into(),
            stat: "cash".into(),
            statval: -1234.5,
            numpoints: 100,
            dof: 98,
            rstat: None,
            nfev: 42,
            iterations: 7,
            message: "converged".into(),
            parnames: vec!["normgauss2d.g0.xpos".into(), "normgauss2d.g0.ampl".into()],
            parvals: vec![10.5, 300.0],
        }
    }

    #[test]
    fn fit_summary_lists_every_parameter() {
        let text = format_fit(&fit());
        assert!(text.contains("Degrees of freedom    = 98"));
        assert!(text.contains("normgauss2d.g0.xpos"));
        assert!(text.contains("normgauss2d.g0.ampl"));
        assert!(!text.contains("Reduced statistic"));
    }

    #[test]
    fn covar_marks_missing_errors() {
        let covar = CovarResults {
            sigma: 1.0,
            parnames: vec!["a".into(), "b".into()],
            parvals: vec![1.0, 2.0],
            parmins: vec![Some(-0.1), None],
            parmaxes: vec![Some(0.1), None],
        };
        let text = format_covar(&covar);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[2].contains("1.000000e-1"));
        assert!(lines[3].ends_with("-----"));
    }
}
