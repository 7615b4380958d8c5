// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use crate::error::{UndulatorError, UndulatorResult};

/// Which blocks of the selected cassettes participate in shimming,
/// selected by the orientation of the ideal magnetization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockFilter {
    All,
    #[default]
    Vertical,
    Horizontal,
    Longitudinal,
}

/// Half-period partitioning strategy for trajectory segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    #[default]
    HalfPeriod,
    Period,
}

/// Shimming-engine configuration.
///
/// Lengths in mm, energy in GeV. Serialized alongside the shimming
/// artifacts so a run can be resumed from any checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimmingConfig {
    pub zmin: f64,
    pub zmax: f64,
    pub znpts: usize,
    /// RK4 step for trajectory integration [mm].
    #[serde(default = "default_rkstep")]
    pub rkstep: f64,
    /// Beam energy [GeV].
    #[serde(default = "default_energy")]
    pub energy: f64,
    /// Transverse launch position [mm].
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Field component driving segmentation: 0=Bx, 1=By, 2=Bz.
    /// When absent the dominant component is detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_comp: Option<usize>,
    /// Short names of the cassettes whose blocks receive shims.
    pub cassettes: Vec<String>,
    #[serde(default)]
    pub block_type: BlockFilter,
    #[serde(default)]
    pub segments_type: SegmentKind,
    /// Include phase-error rows in the residual vector.
    #[serde(default)]
    pub include_pe: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zmin_pe: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zmax_pe: Option<f64>,
    /// Re-solve the magnetostatics after each virtual shim.
    #[serde(default = "default_true")]
    pub solved_matrix: bool,
    /// Re-solve when evaluating the shim signature.
    #[serde(default = "default_true")]
    pub solved_shim: bool,
}

fn default_rkstep() -> f64 {
    0.5
}

fn default_energy() -> f64 {
    3.0
}

fn default_true() -> bool {
    true
}

impl ShimmingConfig {
    /// Load from a JSON file.
    pub fn from_file(path: &str) -> UndulatorResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| UndulatorError::LoadFailed(format!("{path}: {e}")))?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> UndulatorResult<()> {
        if !self.zmin.is_finite() || !self.zmax.is_finite() || self.zmax <= self.zmin {
            return Err(UndulatorError::Validation(format!(
                "shimming window requires zmin < zmax, got [{}, {}]",
                self.zmin, self.zmax
            )));
        }
        if self.znpts < 2 {
            return Err(UndulatorError::Validation(
                "znpts must be >= 2".to_string(),
            ));
        }
        if !self.rkstep.is_finite() || self.rkstep <= 0.0 {
            return Err(UndulatorError::Validation(format!(
                "rkstep must be finite and > 0, got {}",
                self.rkstep
            )));
        }
        if !self.energy.is_finite() || self.energy <= 0.0 {
            return Err(UndulatorError::Validation(format!(
                "energy must be finite and > 0, got {}",
                self.energy
            )));
        }
        if let Some(comp) = self.field_comp {
            if comp > 2 {
                return Err(UndulatorError::Validation(format!(
                    "field_comp must be 0, 1 or 2, got {comp}"
                )));
            }
        }
        if self.cassettes.is_empty() {
            return Err(UndulatorError::Validation(
                "at least one cassette must be selected".to_string(),
            ));
        }
        if let (Some(lo), Some(hi)) = (self.zmin_pe, self.zmax_pe) {
            if hi <= lo {
                return Err(UndulatorError::Validation(format!(
                    "phase-error window requires zmin_pe < zmax_pe, got [{lo}, {hi}]"
                )));
            }
        }
        Ok(())
    }
}

impl Default for ShimmingConfig {
    fn default() -> Self {
        ShimmingConfig {
            zmin: -900.0,
            zmax: 900.0,
            znpts: 3601,
            rkstep: default_rkstep(),
            energy: default_energy(),
            x: 0.0,
            y: 0.0,
            field_comp: None,
            cassettes: vec!["cse".to_string(), "csd".to_string()],
            block_type: BlockFilter::default(),
            segments_type: SegmentKind::default(),
            include_pe: false,
            zmin_pe: None,
            zmax_pe: None,
            solved_matrix: true,
            solved_shim: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        ShimmingConfig::default().validate().unwrap();
    }

    #[test]
    fn test_roundtrip_serialization() {
        let cfg = ShimmingConfig {
            include_pe: true,
            zmin_pe: Some(-400.0),
            zmax_pe: Some(400.0),
            field_comp: Some(1),
            ..Default::default()
        };
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        let cfg2: ShimmingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.znpts, cfg2.znpts);
        assert_eq!(cfg.cassettes, cfg2.cassettes);
        assert_eq!(cfg.block_type, cfg2.block_type);
        assert_eq!(cfg.field_comp, cfg2.field_comp);
        assert_eq!(cfg.zmin_pe, cfg2.zmin_pe);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{
            "zmin": -100.0,
            "zmax": 100.0,
            "znpts": 401,
            "cassettes": ["cd"]
        }"#;
        let cfg: ShimmingConfig = serde_json::from_str(json).unwrap();
        cfg.validate().unwrap();
        assert!((cfg.rkstep - 0.5).abs() < 1e-12);
        assert!(cfg.solved_matrix);
        assert_eq!(cfg.block_type, BlockFilter::Vertical);
        assert_eq!(cfg.segments_type, SegmentKind::HalfPeriod);
    }

    #[test]
    fn test_invalid_window_rejected() {
        let cfg = ShimmingConfig {
            zmin: 10.0,
            zmax: -10.0,
            ..Default::default()
        };
        match cfg.validate() {
            Err(UndulatorError::Validation(msg)) => assert!(msg.contains("zmin < zmax")),
            other => panic!("Expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_field_comp_rejected() {
        let cfg = ShimmingConfig {
            field_comp: Some(3),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_empty_cassettes_rejected() {
        let cfg = ShimmingConfig {
            cassettes: vec![],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
