//! Relativistic beam kinematics.

use undulator_types::constants::{ELECTRON_REST_ENERGY_GEV, LIGHT_SPEED};
use undulator_types::error::{UndulatorError, UndulatorResult};

/// Derived kinematic quantities for an electron beam of a given energy.
#[derive(Debug, Clone, Copy)]
pub struct BeamParameters {
    /// Total energy [GeV].
    pub energy: f64,
    /// Lorentz factor.
    pub gamma: f64,
    /// Velocity ratio v/c.
    pub beta: f64,
    /// Magnetic rigidity Bρ [T·m].
    pub brho: f64,
}

impl BeamParameters {
    pub fn new(energy_gev: f64) -> UndulatorResult<Self> {
        if !energy_gev.is_finite() || energy_gev <= ELECTRON_REST_ENERGY_GEV {
            return Err(UndulatorError::Validation(format!(
                "beam energy must exceed the electron rest energy, got {energy_gev} GeV"
            )));
        }
        let gamma = energy_gev / ELECTRON_REST_ENERGY_GEV;
        let beta = (1.0 - 1.0 / (gamma * gamma)).sqrt();
        let p_gev = (energy_gev * energy_gev - ELECTRON_REST_ENERGY_GEV * ELECTRON_REST_ENERGY_GEV)
            .sqrt();
        let brho = 1.0e9 * p_gev / LIGHT_SPEED;
        Ok(BeamParameters {
            energy: energy_gev,
            gamma,
            beta,
            brho,
        })
    }
}
