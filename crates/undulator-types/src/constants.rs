// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Speed of light in vacuum (m/s)
pub const LIGHT_SPEED: f64 = 2.99792458e8;

/// Electron rest energy (GeV)
pub const ELECTRON_REST_ENERGY_GEV: f64 = 0.51099895e-3;

/// Elementary charge (C)
pub const ELECTRON_CHARGE: f64 = 1.602176634e-19;

/// Vacuum permeability (H/m)
pub const VACUUM_PERMEABILITY: f64 = 4.0e-7 * std::f64::consts::PI;

/// Deflection-parameter coefficient: K = 0.934 · B[T] · λ[cm].
/// Equals e/(2π m_e c) scaled to the cm/Tesla unit convention.
pub const DEFLECTION_COEF: f64 = 0.934;

/// Tesla·meter → Gauss·centimeter for first field integrals.
pub const TM_TO_GCM: f64 = 1.0e6;

/// Tesla·meter² → kiloGauss·centimeter² for second field integrals.
pub const TM2_TO_KGCM2: f64 = 1.0e5;
