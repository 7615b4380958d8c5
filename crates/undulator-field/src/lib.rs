// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Field Sources & Analysis
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Common analysis surface over computed and measured magnetic fields:
//! trajectories, field integrals, amplitudes, phase errors, radiation
//! quantities, and the field-map text formats.

pub mod analysis;
pub mod data;
pub mod fieldmap;
pub mod kickmap;
pub mod source;
