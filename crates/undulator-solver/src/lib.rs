// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Magnetostatics Solver Service
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Opaque magnetostatics solver behind a handle registry.
//!
//! The rest of the workspace talks to this crate through [`SolverContext`]
//! only: geometry handles are created, grouped, transformed, solved and
//! destroyed here, and every handle has exactly one owner.

pub mod context;
pub mod element;

pub use context::{Handle, SolverContext, Transform};
pub use element::MaterialSpec;
