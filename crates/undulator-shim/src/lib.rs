// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Shimming
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Magnetic shimming engine: segmented-trajectory fitting, per-block
//! response matrices, weighted truncated-SVD inversion, and the
//! shim-signature round trip between model and measurement.

pub mod artifacts;
pub mod engine;
