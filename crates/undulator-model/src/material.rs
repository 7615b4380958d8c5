// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Materials
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Magnetic-material descriptors.
//!
//! A material is either linear (remanence plus anisotropic
//! susceptibilities about the easy axis) or tabulated (a strictly
//! increasing M(H) curve, both in Tesla). Named presets come from a
//! packaged resource file loaded once per process.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use undulator_solver::MaterialSpec;
use undulator_solver::{Handle, SolverContext};
use undulator_types::error::{UndulatorError, UndulatorResult};

const PRESET_JSON: &str = include_str!("../resources/material_presets.json");

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinearPreset {
    mr: f64,
    ksi_par: f64,
    ksi_per: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PresetEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    linear: Option<LinearPreset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    curve: Option<Vec<(f64, f64)>>,
}

fn preset_registry() -> &'static HashMap<String, PresetEntry> {
    static REGISTRY: OnceLock<HashMap<String, PresetEntry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        serde_json::from_str(PRESET_JSON).expect("packaged material presets must parse")
    })
}

/// Magnetic-material descriptor. Exactly one of the linear/tabulated
/// modes is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Material {
    pub name: String,
    pub linear: bool,
    pub mr: f64,
    pub ksi_par: f64,
    pub ksi_per: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<Vec<(f64, f64)>>,
}

impl Material {
    /// Linear material with remanence `mr` [T] and susceptibilities about
    /// the easy axis.
    pub fn linear(name: &str, mr: f64, ksi_par: f64, ksi_per: f64) -> UndulatorResult<Self> {
        if !mr.is_finite() || mr < 0.0 {
            return Err(UndulatorError::Validation(format!(
                "remanence must be finite and >= 0, got {mr}"
            )));
        }
        if !ksi_par.is_finite() || !ksi_per.is_finite() {
            return Err(UndulatorError::Validation(
                "susceptibilities must be finite".to_string(),
            ));
        }
        Ok(Material {
            name: name.to_string(),
            linear: true,
            mr,
            ksi_par,
            ksi_per,
            curve: None,
        })
    }

    /// Tabulated material from a strictly increasing (H, M) curve [T].
    pub fn tabulated(name: &str, curve: Vec<(f64, f64)>) -> UndulatorResult<Self> {
        if curve.is_empty() {
            return Err(UndulatorError::Validation(
                "tabulated material requires a non-empty curve".to_string(),
            ));
        }
        for pair in curve.windows(2) {
            if pair[1].0 <= pair[0].0 {
                return Err(UndulatorError::Validation(format!(
                    "tabulated H values must be strictly increasing, got {} after {}",
                    pair[1].0, pair[0].0
                )));
            }
        }
        Ok(Material {
            name: name.to_string(),
            linear: false,
            mr: 0.0,
            ksi_par: 0.0,
            ksi_per: 0.0,
            curve: Some(curve),
        })
    }

    /// Reconstruct from stored attributes, enforcing the mode invariant.
    pub fn from_attributes(
        name: &str,
        mr: f64,
        ksi_par: f64,
        ksi_per: f64,
        curve: Option<Vec<(f64, f64)>>,
    ) -> UndulatorResult<Self> {
        match curve {
            Some(curve) => {
                if mr != 0.0 || ksi_par != 0.0 || ksi_per != 0.0 {
                    return Err(UndulatorError::Validation(
                        "material cannot carry both linear parameters and a curve".to_string(),
                    ));
                }
                Self::tabulated(name, curve)
            }
            None => Self::linear(name, mr, ksi_par, ksi_per),
        }
    }

    /// Look up a named preset from the packaged registry.
    pub fn preset(name: &str) -> UndulatorResult<Self> {
        let entry = preset_registry()
            .get(name)
            .ok_or_else(|| UndulatorError::PresetNotFound(name.to_string()))?;
        match (&entry.linear, &entry.curve) {
            (Some(lin), None) => Self::linear(name, lin.mr, lin.ksi_par, lin.ksi_per),
            (None, Some(curve)) => Self::tabulated(name, curve.clone()),
            _ => Err(UndulatorError::Validation(format!(
                "preset '{name}' must define exactly one of linear/curve"
            ))),
        }
    }

    /// Names of every packaged preset, sorted.
    pub fn preset_names() -> Vec<String> {
        let mut names: Vec<String> = preset_registry().keys().cloned().collect();
        names.sort();
        names
    }

    /// Solver-side description. Regenerated on every call so edits to
    /// `mr` or the curve always reach the solver.
    pub fn solver_spec(&self) -> MaterialSpec {
        MaterialSpec {
            ksi_par: self.ksi_par,
            ksi_per: self.ksi_per,
            curve: self.curve.clone(),
        }
    }

    /// Bind this material to an existing geometry handle.
    pub fn apply_to(&self, ctx: &mut SolverContext, handle: Handle) -> UndulatorResult<Handle> {
        ctx.apply_material(handle, self.solver_spec())
    }
}
