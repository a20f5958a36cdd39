//! Model parameters with bounds and a frozen flag.

use serde::{Deserialize, Serialize};

/// Largest magnitude allowed for unbounded parameters (single precision max).
pub const HUGE_VAL: f64 = f32::MAX as f64;
/// Smallest positive value for strictly-positive parameters (single precision min).
pub const TINY_VAL: f64 = f32::MIN_POSITIVE as f64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub val: f64,
    pub min: f64,
    pub max: f64,
    pub frozen: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, val: f64, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            val: val.clamp(min, max),
            min,
            max,
            frozen: false,
        }
    }

    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    /// Set the value, clamped to `[min, max]`.
    pub fn set(&mut self, val: f64) {
        self.val = val.clamp(self.min, self.max);
    }

    /// Replace the bounds and re-clamp the current value.
    pub fn set_bounds(&mut self, min: f64, max: f64) {
        self.min = min;
        self.max = max;
        self.val = self.val.clamp(min, max);
    }

    pub fn is_thawed(&self) -> bool {
        !self.frozen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clamps_to_bounds() {
        let mut p = Parameter::new("fwhm", 3.0, TINY_VAL, HUGE_VAL);
        p.set(-1.0);
        assert_eq!(p.val, TINY_VAL);
        p.set_bounds(1.0, 2.0);
        assert_eq!(p.val, 1.0);
        p.set(5.0);
        assert_eq!(p.val, 2.0);
    }
}
