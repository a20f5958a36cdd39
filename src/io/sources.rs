//! Sources JSON: initial parameter values for the source components.
//!
//! The file maps `"<type>.<name>"` to that component's parameters. A parameter
//! is either a plain number (the starting value) or an object with optional
//! bounds and frozen flag:
//!
//! ```json
//! {
//!   "normgauss2d.g0": { "xpos": 100.5, "ypos": 98.0, "ampl": 12.0, "fwhm": 3.0 },
//!   "normgauss2d.g1": { "xpos": 120.0, "ypos": 90.0, "ampl": 4.0,
//!                       "fwhm": { "val": 8.0, "min": 1.0, "max": 30.0 } }
//! }
//! ```
//!
//! Components keep the order in which they appear in the file.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{Component, GaussKind};

/// One parameter entry in the sources file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSpec {
    Value(f64),
    Full {
        val: f64,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        frozen: Option<bool>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub kind: GaussKind,
    pub name: String,
    pub params: BTreeMap<String, ParamSpec>,
}

impl SourceSpec {
    /// Build the component, applying bounds first and then values.
    pub fn to_component(&self) -> Result<Component, AppError> {
        let mut comp = Component::gauss(self.kind, self.name.clone());
        for (pname, spec) in &self.params {
            let param = comp.param_mut(pname)?;
            match spec {
                ParamSpec::Value(v) => param.set(*v),
                ParamSpec::Full { val, min, max, frozen } => {
                    let lo = min.unwrap_or(param.min);
                    let hi = max.unwrap_or(param.max);
                    if !(lo <= hi) {
                        return Err(AppError::input(format!(
                            "Parameter '{}.{pname}' has min {lo} > max {hi}.",
                            self.name
                        )));
                    }
                    param.set_bounds(lo, hi);
                    param.set(*val);
                    if let Some(frozen) = frozen {
                        param.frozen = *frozen;
                    }
                }
            }
        }
        Ok(comp)
    }
}

pub fn read_sources_json(path: &Path) -> Result<Vec<SourceSpec>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open sources JSON '{}': {e}", path.display())))?;
    let raw: serde_json::Value = serde_json::from_reader(file)
        .map_err(|e| AppError::input(format!("Invalid sources JSON '{}': {e}", path.display())))?;
    parse_sources(raw).map_err(|e| AppError::input(format!("Invalid sources JSON '{}': {e}", path.display())))
}

/// Parse an already-decoded sources document.
pub fn parse_sources(raw: serde_json::Value) -> Result<Vec<SourceSpec>, AppError> {
    let serde_json::Value::Object(entries) = raw else {
        return Err(AppError::input("top level must be an object"));
    };
    if entries.is_empty() {
        return Err(AppError::input("no sources defined"));
    }

    let mut out = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let Some((type_name, name)) = key.split_once('.') else {
            return Err(AppError::input(format!("source key '{key}' must look like '<type>.<name>'")));
        };
        let kind = GaussKind::from_type_name(type_name)
            .ok_or_else(|| AppError::input(format!("unsupported source type '{type_name}' in '{key}'")))?;
        if name.is_empty() {
            return Err(AppError::input(format!("source key '{key}' has an empty name")));
        }
        if out.iter().any(|s: &SourceSpec| s.name == name) {
            return Err(AppError::input(format!("duplicate source name '{name}'")));
        }
        let params: BTreeMap<String, ParamSpec> = serde_json::from_value(value)
            .map_err(|e| AppError::input(format!("bad parameters for '{key}': {e}")))?;

        out.push(SourceSpec {
            kind,
            name: name.to_string(),
            params,
        });
    }
    Ok(out)
}

/// Name of the combined source model: the component's full name, or
/// `(a + b + ...)` for several components.
pub fn source_model_name(components: &[Component]) -> String {
    let names: Vec<String> = components.iter().map(Component::full_name).collect();
    match names.as_slice() {
        [single] => single.clone(),
        _ => format!("({})", names.join(" + ")),
    }
}
