// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Insertion Device Variants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Insertion-device models built from 1–4 cassettes with device-specific
//! arrangement and degrees of freedom.
//!
//! Delta recomputes absolute cassette shifts from the current DOF record
//! on every call; AppleX/AppleII apply the difference between new and old
//! DOFs so successive relative calls compose on the solver handles.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use undulator_math::rotation;
use undulator_solver::{Handle, SolverContext, Transform};
use undulator_types::error::{UndulatorError, UndulatorResult};
use undulator_types::state::SolveReport;

use crate::cassette::{Cassette, CassetteParams};

const Z_AXIS: [f64; 3] = [0.0, 0.0, 1.0];

/// Device family with its degrees of freedom [mm].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceKind {
    Delta { dp: f64, dcp: f64, dgv: f64, dgh: f64 },
    AppleX { dp: f64, dcp: f64, dg: f64 },
    AppleIi { dp: f64, dcp: f64, dg: f64 },
    Apu { dg: f64 },
    Planar { dg: f64 },
}

impl DeviceKind {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::Delta { .. } => "delta",
            DeviceKind::AppleX { .. } => "apple_x",
            DeviceKind::AppleIi { .. } => "apple_ii",
            DeviceKind::Apu { .. } => "apu",
            DeviceKind::Planar { .. } => "planar",
        }
    }

    /// DOF names and current values, in header order.
    pub fn dof_list(&self) -> Vec<(&'static str, f64)> {
        match *self {
            DeviceKind::Delta { dp, dcp, dgv, dgh } => {
                vec![("dP", dp), ("dCP", dcp), ("dGV", dgv), ("dGH", dgh)]
            }
            DeviceKind::AppleX { dp, dcp, dg } | DeviceKind::AppleIi { dp, dcp, dg } => {
                vec![("dP", dp), ("dCP", dcp), ("dG", dg)]
            }
            DeviceKind::Apu { dg } | DeviceKind::Planar { dg } => vec![("dG", dg)],
        }
    }
}

/// Partial DOF update; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct DofUpdate {
    pub dp: Option<f64>,
    pub dcp: Option<f64>,
    pub dgv: Option<f64>,
    pub dgh: Option<f64>,
    pub dg: Option<f64>,
}

/// Per-cassette construction overrides applied at build time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceOverrides {
    #[serde(default)]
    pub block_names: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub magnetizations: HashMap<String, Vec<[f64; 3]>>,
    #[serde(default)]
    pub position_err: HashMap<String, Vec<[f64; 3]>>,
}

/// Shared construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceParams {
    pub nr_periods: usize,
    pub period_length: f64,
    /// Transverse gap (pole-face separation for planar devices, twice the
    /// radial stand-off for X-shaped ones) [mm].
    pub gap: f64,
    pub name: String,
    /// Cassette template; per-cassette name/orientation overridden.
    pub cassette: CassetteParams,
    /// Horizontal separation between the side-by-side AppleII halves [mm].
    #[serde(default)]
    pub horizontal_gap: f64,
    /// Apply arrangement transforms to each block instead of the cassette
    /// composite; both modes yield the same layout.
    #[serde(default)]
    pub trf_on_blocks: bool,
}

impl Default for DeviceParams {
    fn default() -> Self {
        DeviceParams {
            nr_periods: 5,
            period_length: 50.0,
            gap: 20.0,
            name: "device".to_string(),
            cassette: CassetteParams::default(),
            horizontal_gap: 0.5,
            trf_on_blocks: false,
        }
    }
}

/// One cassette placement: rotation about the beam axis and the gap
/// translation in the rotated frame.
#[derive(Debug, Clone)]
struct Placement {
    name: &'static str,
    angle: f64,
    upper: bool,
    /// Extra in-plane offset before rotation (AppleII half separation).
    dx: f64,
}

#[derive(Debug)]
pub struct InsertionDeviceModel {
    name: String,
    nr_periods: usize,
    period_length: f64,
    gap: f64,
    kind: DeviceKind,
    horizontal_gap: f64,
    trf_on_blocks: bool,
    cassettes: BTreeMap<String, Cassette>,
    placements: Vec<Placement>,
    /// Current longitudinal shift per cassette [mm].
    shifts: BTreeMap<String, f64>,
    /// Current outward (gap-direction) offset per cassette [mm].
    radial_offsets: BTreeMap<String, f64>,
    overrides: DeviceOverrides,
    handle: Option<Handle>,
}

/// Serialized device dump: construction parameters plus per-cassette
/// block names, magnetizations and position errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceState {
    pub kind: DeviceKind,
    pub nr_periods: usize,
    pub period_length: f64,
    pub gap: f64,
    pub name: String,
    pub horizontal_gap: f64,
    pub trf_on_blocks: bool,
    pub cassettes: BTreeMap<String, CassetteState>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CassetteState {
    pub params: CassetteParams,
    pub block_names: Vec<String>,
    pub magnetizations: Vec<[f64; 3]>,
    pub position_err: Vec<[f64; 3]>,
}

impl InsertionDeviceModel {
    /// Delta: four identical cassettes on the ±45° diagonals. All DOFs
    /// are longitudinal; the parked device (all zero) cancels on axis.
    pub fn delta(params: DeviceParams) -> UndulatorResult<Self> {
        let q = std::f64::consts::FRAC_PI_4;
        let placements = vec![
            Placement { name: "csd", angle: -q, upper: false, dx: 0.0 },
            Placement { name: "cse", angle: q, upper: false, dx: 0.0 },
            Placement { name: "cid", angle: -3.0 * q, upper: false, dx: 0.0 },
            Placement { name: "cie", angle: 3.0 * q, upper: false, dx: 0.0 },
        ];
        Self::assemble(
            params,
            DeviceKind::Delta { dp: 0.0, dcp: 0.0, dgv: 0.0, dgh: 0.0 },
            placements,
        )
    }

    /// AppleX: Delta geometry with a radial gap DOF; relative updates.
    pub fn apple_x(params: DeviceParams) -> UndulatorResult<Self> {
        let q = std::f64::consts::FRAC_PI_4;
        let placements = vec![
            Placement { name: "csd", angle: -q, upper: false, dx: 0.0 },
            Placement { name: "cse", angle: q, upper: false, dx: 0.0 },
            Placement { name: "cid", angle: -3.0 * q, upper: false, dx: 0.0 },
            Placement { name: "cie", angle: 3.0 * q, upper: false, dx: 0.0 },
        ];
        Self::assemble(
            params,
            DeviceKind::AppleX { dp: 0.0, dcp: 0.0, dg: 0.0 },
            placements,
        )
    }

    /// AppleII: side-by-side upper and lower cassette pairs.
    pub fn apple_ii(params: DeviceParams) -> UndulatorResult<Self> {
        let dx = 0.5 * cassette_width(&params.cassette) + 0.5 * params.horizontal_gap;
        let placements = vec![
            Placement { name: "csd", angle: 0.0, upper: true, dx },
            Placement { name: "cse", angle: 0.0, upper: true, dx: -dx },
            // The lower pair is rotated by π, which mirrors x; the
            // pre-rotation offsets compensate so cid lands on the right.
            Placement { name: "cid", angle: std::f64::consts::PI, upper: false, dx: -dx },
            Placement { name: "cie", angle: std::f64::consts::PI, upper: false, dx },
        ];
        Self::assemble(
            params,
            DeviceKind::AppleIi { dp: 0.0, dcp: 0.0, dg: 0.0 },
            placements,
        )
    }

    /// APU: planar pair with a longitudinal phase DOF on the upper
    /// cassette.
    pub fn apu(params: DeviceParams) -> UndulatorResult<Self> {
        let placements = vec![
            Placement { name: "cs", angle: 0.0, upper: true, dx: 0.0 },
            Placement { name: "ci", angle: std::f64::consts::PI, upper: false, dx: 0.0 },
        ];
        Self::assemble(params, DeviceKind::Apu { dg: 0.0 }, placements)
    }

    /// Planar (pure permanent magnet or hybrid via the cassette flags).
    pub fn planar(params: DeviceParams) -> UndulatorResult<Self> {
        let placements = vec![
            Placement { name: "cs", angle: 0.0, upper: true, dx: 0.0 },
            Placement { name: "ci", angle: std::f64::consts::PI, upper: false, dx: 0.0 },
        ];
        Self::assemble(params, DeviceKind::Planar { dg: 0.0 }, placements)
    }

    fn assemble(
        params: DeviceParams,
        kind: DeviceKind,
        placements: Vec<Placement>,
    ) -> UndulatorResult<Self> {
        if !params.gap.is_finite() || params.gap <= 0.0 {
            return Err(UndulatorError::Validation(format!(
                "gap must be finite and > 0, got {}",
                params.gap
            )));
        }

        let mut cassettes = BTreeMap::new();
        let mut shifts = BTreeMap::new();
        let mut radial_offsets = BTreeMap::new();
        for placement in &placements {
            let mut cp = params.cassette.clone();
            cp.nr_periods = params.nr_periods;
            cp.period_length = params.period_length;
            cp.upper_cassette = placement.upper;
            cp.name = placement.name.to_string();
            cassettes.insert(placement.name.to_string(), Cassette::new(cp)?);
            shifts.insert(placement.name.to_string(), 0.0);
            radial_offsets.insert(placement.name.to_string(), 0.0);
        }

        Ok(InsertionDeviceModel {
            name: params.name,
            nr_periods: params.nr_periods,
            period_length: params.period_length,
            gap: params.gap,
            kind,
            horizontal_gap: params.horizontal_gap,
            trf_on_blocks: params.trf_on_blocks,
            cassettes,
            placements,
            shifts,
            radial_offsets,
            overrides: DeviceOverrides::default(),
            handle: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nr_periods(&self) -> usize {
        self.nr_periods
    }

    pub fn period_length(&self) -> f64 {
        self.period_length
    }

    pub fn gap(&self) -> f64 {
        self.gap
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn cassette_names(&self) -> Vec<String> {
        self.cassettes.keys().cloned().collect()
    }

    pub fn cassette(&self, name: &str) -> Option<&Cassette> {
        self.cassettes.get(name)
    }

    pub fn cassette_mut(&mut self, name: &str) -> Option<&mut Cassette> {
        self.cassettes.get_mut(name)
    }

    /// Stage construction overrides to be applied at build time.
    pub fn set_overrides(&mut self, overrides: DeviceOverrides) {
        self.overrides = overrides;
    }

    /// Build all cassettes, arrange them, and group the composite.
    pub fn build(&mut self, ctx: &mut SolverContext) -> UndulatorResult<Handle> {
        if self.handle.is_some() {
            return Err(UndulatorError::Solver(
                "device already owns a solver handle".to_string(),
            ));
        }

        let overrides = std::mem::take(&mut self.overrides);
        let mut cassette_handles = Vec::with_capacity(self.placements.len());
        for placement in &self.placements.clone() {
            let cassette = self
                .cassettes
                .get_mut(placement.name)
                .ok_or_else(|| UndulatorError::Solver("cassette map out of sync".to_string()))?;

            if let Some(names) = overrides.block_names.get(placement.name) {
                cassette.set_block_names(names.clone())?;
            }
            if let Some(mags) = overrides.magnetizations.get(placement.name) {
                cassette.set_magnetization_list(ctx, mags.clone())?;
            }
            if let Some(errs) = overrides.position_err.get(placement.name) {
                cassette.set_position_err(ctx, errs.clone())?;
            }

            let handle = cassette.build(ctx)?;
            self.arrange(ctx, placement, handle)?;
            cassette_handles.push(handle);
        }

        let device_handle = ctx.group(cassette_handles)?;
        self.handle = Some(device_handle);
        Ok(device_handle)
    }

    /// Apply the placement transform: in-plane offset, gap translation,
    /// then the rotation about the beam axis. `trf_on_blocks` re-emits
    /// the same transforms to each block handle instead.
    fn arrange(
        &self,
        ctx: &mut SolverContext,
        placement: &Placement,
        cassette_handle: Handle,
    ) -> UndulatorResult<()> {
        let translate = Transform::Translate([placement.dx, 0.5 * self.gap, 0.0]);
        let rotate = Transform::Rotate {
            point: [0.0; 3],
            axis: Z_AXIS,
            angle: placement.angle,
        };

        let targets: Vec<Handle> = if self.trf_on_blocks {
            self.cassettes[placement.name]
                .blocks()
                .iter()
                .filter_map(|b| b.handle())
                .collect()
        } else {
            vec![cassette_handle]
        };
        for target in targets {
            ctx.apply_transform(target, translate)?;
            if placement.angle != 0.0 {
                ctx.apply_transform(target, rotate)?;
            }
        }
        Ok(())
    }

    /// Release the whole composite, children before parent.
    pub fn release(&mut self, ctx: &mut SolverContext) -> UndulatorResult<()> {
        if let Some(handle) = self.handle.take() {
            ctx.destroy(handle)?;
        }
        for cassette in self.cassettes.values_mut() {
            // The composite removed the geometry; drop stale handles.
            let _ = cassette.release(ctx);
        }
        Ok(())
    }

    /// Relax magnetizations on the device composite.
    pub fn solve(
        &mut self,
        ctx: &mut SolverContext,
        prec: f64,
        max_iter: usize,
    ) -> UndulatorResult<SolveReport> {
        let handle = self.require_handle()?;
        ctx.solve(handle, prec, max_iter)
    }

    pub fn field_at(&self, ctx: &SolverContext, point: [f64; 3]) -> UndulatorResult<[f64; 3]> {
        ctx.field_at(self.require_handle()?, point)
    }

    fn require_handle(&self) -> UndulatorResult<Handle> {
        self.handle.ok_or_else(|| {
            UndulatorError::Solver("device has no solver geometry; call build() first".to_string())
        })
    }

    /// Outward unit vector of a cassette in the lab frame.
    fn outward_direction(&self, name: &str) -> [f64; 3] {
        let angle = self
            .placements
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.angle)
            .unwrap_or(0.0);
        [-angle.sin(), angle.cos(), 0.0]
    }

    /// Target longitudinal shift per cassette from a full DOF record.
    fn longitudinal_targets(kind: &DeviceKind) -> BTreeMap<&'static str, f64> {
        let mut out = BTreeMap::new();
        match *kind {
            DeviceKind::Delta { dp, dcp, dgv, dgh } => {
                out.insert("csd", dp);
                out.insert("cse", dp + dgh);
                out.insert("cid", dcp + dgv);
                out.insert("cie", dcp + dgv + dgh);
            }
            DeviceKind::AppleX { dp, dcp, .. } => {
                out.insert("csd", dp);
                out.insert("cse", dp);
                out.insert("cid", dcp);
                out.insert("cie", dcp);
            }
            DeviceKind::AppleIi { dp, dcp, .. } => {
                out.insert("cse", dp);
                out.insert("cid", dp);
                out.insert("csd", dcp);
                out.insert("cie", dcp);
            }
            DeviceKind::Apu { dg } => {
                out.insert("cs", dg);
                out.insert("ci", 0.0);
            }
            DeviceKind::Planar { .. } => {
                out.insert("cs", 0.0);
                out.insert("ci", 0.0);
            }
        }
        out
    }

    /// Target outward offset per cassette from a full DOF record.
    fn radial_targets(kind: &DeviceKind) -> BTreeMap<&'static str, f64> {
        let mut out = BTreeMap::new();
        match *kind {
            DeviceKind::AppleX { dg, .. } => {
                for name in ["csd", "cse", "cid", "cie"] {
                    out.insert(name, dg);
                }
            }
            DeviceKind::AppleIi { dg, .. } => {
                for name in ["csd", "cse", "cid", "cie"] {
                    out.insert(name, 0.5 * dg);
                }
            }
            DeviceKind::Planar { dg } => {
                out.insert("cs", 0.5 * dg);
                out.insert("ci", 0.5 * dg);
            }
            DeviceKind::Delta { .. } | DeviceKind::Apu { .. } => {}
        }
        out
    }

    fn merged_kind(&self, update: &DofUpdate) -> UndulatorResult<DeviceKind> {
        let reject = |dof: &str| {
            Err(UndulatorError::Validation(format!(
                "DOF {dof} does not apply to a {} device",
                self.kind.label()
            )))
        };
        match self.kind {
            DeviceKind::Delta { dp, dcp, dgv, dgh } => {
                if update.dg.is_some() {
                    return reject("dg");
                }
                Ok(DeviceKind::Delta {
                    dp: update.dp.unwrap_or(dp),
                    dcp: update.dcp.unwrap_or(dcp),
                    dgv: update.dgv.unwrap_or(dgv),
                    dgh: update.dgh.unwrap_or(dgh),
                })
            }
            DeviceKind::AppleX { dp, dcp, dg } => {
                if update.dgv.is_some() || update.dgh.is_some() {
                    return reject("dgv/dgh");
                }
                Ok(DeviceKind::AppleX {
                    dp: update.dp.unwrap_or(dp),
                    dcp: update.dcp.unwrap_or(dcp),
                    dg: update.dg.unwrap_or(dg),
                })
            }
            DeviceKind::AppleIi { dp, dcp, dg } => {
                if update.dgv.is_some() || update.dgh.is_some() {
                    return reject("dgv/dgh");
                }
                Ok(DeviceKind::AppleIi {
                    dp: update.dp.unwrap_or(dp),
                    dcp: update.dcp.unwrap_or(dcp),
                    dg: update.dg.unwrap_or(dg),
                })
            }
            DeviceKind::Apu { dg } => {
                if update.dp.is_some()
                    || update.dcp.is_some()
                    || update.dgv.is_some()
                    || update.dgh.is_some()
                {
                    return reject("dp/dcp/dgv/dgh");
                }
                Ok(DeviceKind::Apu {
                    dg: update.dg.unwrap_or(dg),
                })
            }
            DeviceKind::Planar { dg } => {
                if update.dp.is_some()
                    || update.dcp.is_some()
                    || update.dgv.is_some()
                    || update.dgh.is_some()
                {
                    return reject("dp/dcp/dgv/dgh");
                }
                Ok(DeviceKind::Planar {
                    dg: update.dg.unwrap_or(dg),
                })
            }
        }
    }

    /// Reposition cassettes from a DOF update.
    ///
    /// Delta recomputes every cassette's absolute target from the merged
    /// DOF record and applies the difference to the tracked shift.
    /// AppleX/AppleII translate by the difference between the new and old
    /// DOF-derived targets, so relative calls accumulate on the handles.
    /// Both paths leave the tracked state equal to the absolute targets.
    pub fn set_cassette_positions(
        &mut self,
        ctx: &mut SolverContext,
        update: DofUpdate,
    ) -> UndulatorResult<()> {
        self.require_handle()?;
        let new_kind = self.merged_kind(&update)?;

        let (long_targets, radial_targets) = match new_kind {
            DeviceKind::Delta { .. } => {
                // Absolute: targets derived from the current DOF values
                // alone, ignoring the old record.
                (
                    Self::longitudinal_targets(&new_kind),
                    Self::radial_targets(&new_kind),
                )
            }
            _ => {
                // Relative: old targets plus the DOF difference.
                let old_long = Self::longitudinal_targets(&self.kind);
                let new_long = Self::longitudinal_targets(&new_kind);
                let old_rad = Self::radial_targets(&self.kind);
                let new_rad = Self::radial_targets(&new_kind);
                let mut long = BTreeMap::new();
                for (name, new_t) in new_long {
                    let old_t = old_long.get(name).copied().unwrap_or(0.0);
                    let current = self.shifts.get(name).copied().unwrap_or(0.0);
                    long.insert(name, current + (new_t - old_t));
                }
                let mut rad = BTreeMap::new();
                for (name, new_t) in new_rad {
                    let old_t = old_rad.get(name).copied().unwrap_or(0.0);
                    let current = self.radial_offsets.get(name).copied().unwrap_or(0.0);
                    rad.insert(name, current + (new_t - old_t));
                }
                (long, rad)
            }
        };

        for (name, target) in long_targets {
            let current = self.shifts.get(name).copied().unwrap_or(0.0);
            let delta = target - current;
            if delta != 0.0 {
                let handle = self
                    .cassettes
                    .get(name)
                    .and_then(|c| c.handle())
                    .ok_or_else(|| {
                        UndulatorError::Solver(format!("cassette {name} has no geometry"))
                    })?;
                ctx.apply_transform(handle, Transform::Translate([0.0, 0.0, delta]))?;
                self.shifts.insert(name.to_string(), target);
            }
        }
        for (name, target) in radial_targets {
            let current = self.radial_offsets.get(name).copied().unwrap_or(0.0);
            let delta = target - current;
            if delta != 0.0 {
                let handle = self
                    .cassettes
                    .get(name)
                    .and_then(|c| c.handle())
                    .ok_or_else(|| {
                        UndulatorError::Solver(format!("cassette {name} has no geometry"))
                    })?;
                let dir = self.outward_direction(name);
                ctx.apply_transform(
                    handle,
                    Transform::Translate(rotation::scale(dir, delta)),
                )?;
                self.radial_offsets.insert(name.to_string(), target);
            }
        }

        self.kind = new_kind;
        Ok(())
    }

    /// Shift one block of one cassette (virtual shim application).
    pub fn shift_block(
        &mut self,
        ctx: &mut SolverContext,
        cassette: &str,
        block_idx: usize,
        v: [f64; 3],
    ) -> UndulatorResult<()> {
        let cassette = self
            .cassettes
            .get_mut(cassette)
            .ok_or_else(|| UndulatorError::Validation(format!("unknown cassette '{cassette}'")))?;
        let block = cassette.block_mut(block_idx).ok_or_else(|| {
            UndulatorError::Validation(format!("block index {block_idx} out of range"))
        })?;
        block.shift(ctx, v)
    }

    /// Coarse polarization label from the DOF record, for file headers.
    pub fn polarization_name(&self) -> &'static str {
        match self.kind {
            DeviceKind::Delta { dp, dcp, dgv, dgh } => {
                let phase = dp != 0.0 || dcp != 0.0;
                if phase {
                    "circular"
                } else if dgv != 0.0 && dgh == 0.0 {
                    "horizontal"
                } else if dgh != 0.0 && dgv == 0.0 {
                    "vertical"
                } else {
                    "undefined"
                }
            }
            DeviceKind::AppleX { dp, dcp, .. } | DeviceKind::AppleIi { dp, dcp, .. } => {
                if dp == 0.0 && dcp == 0.0 {
                    "horizontal"
                } else {
                    "circular"
                }
            }
            DeviceKind::Apu { .. } | DeviceKind::Planar { .. } => "horizontal",
        }
    }

    /// Serialize the construction state to JSON.
    pub fn save_state(&self, path: &str) -> UndulatorResult<()> {
        let mut cassettes = BTreeMap::new();
        for (name, cassette) in &self.cassettes {
            cassettes.insert(
                name.clone(),
                CassetteState {
                    params: cassette.params().clone(),
                    block_names: cassette.block_names(),
                    magnetizations: cassette.magnetization_list(),
                    position_err: cassette.position_err().to_vec(),
                },
            );
        }
        let state = DeviceState {
            kind: self.kind,
            nr_periods: self.nr_periods,
            period_length: self.period_length,
            gap: self.gap,
            name: self.name.clone(),
            horizontal_gap: self.horizontal_gap,
            trf_on_blocks: self.trf_on_blocks,
            cassettes,
        };
        let json = serde_json::to_string_pretty(&state)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reconstruct a model from a JSON dump without re-solving. The
    /// stored block names, magnetizations and position errors are staged
    /// as build-time overrides.
    pub fn load_state(path: &str) -> UndulatorResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| UndulatorError::LoadFailed(format!("{path}: {e}")))?;
        let state: DeviceState = serde_json::from_str(&contents)?;

        let params = DeviceParams {
            nr_periods: state.nr_periods,
            period_length: state.period_length,
            gap: state.gap,
            name: state.name.clone(),
            cassette: state
                .cassettes
                .values()
                .next()
                .map(|c| c.params.clone())
                .unwrap_or_default(),
            horizontal_gap: state.horizontal_gap,
            trf_on_blocks: state.trf_on_blocks,
        };
        let mut model = match state.kind {
            DeviceKind::Delta { .. } => Self::delta(params)?,
            DeviceKind::AppleX { .. } => Self::apple_x(params)?,
            DeviceKind::AppleIi { .. } => Self::apple_ii(params)?,
            DeviceKind::Apu { .. } => Self::apu(params)?,
            DeviceKind::Planar { .. } => Self::planar(params)?,
        };

        let mut overrides = DeviceOverrides::default();
        for (name, cs) in &state.cassettes {
            overrides
                .block_names
                .insert(name.clone(), cs.block_names.clone());
            overrides
                .magnetizations
                .insert(name.clone(), cs.magnetizations.clone());
            overrides
                .position_err
                .insert(name.clone(), cs.position_err.clone());
        }
        model.set_overrides(overrides);
        Ok(model)
    }
}

/// Horizontal extent of the cassette cross-section [mm].
fn cassette_width(params: &CassetteParams) -> f64 {
    let mut xmin = f64::INFINITY;
    let mut xmax = f64::NEG_INFINITY;
    for poly in &params.block_shape {
        for p in poly {
            xmin = xmin.min(p[0]);
            xmax = xmax.max(p[0]);
        }
    }
    if xmin.is_finite() && xmax.is_finite() {
        xmax - xmin
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_delta() -> InsertionDeviceModel {
        InsertionDeviceModel::delta(DeviceParams {
            nr_periods: 3,
            period_length: 52.5,
            gap: 13.6,
            name: "delta_test".to_string(),
            cassette: CassetteParams {
                mr: 1.39,
                block_shape: vec![vec![
                    [-10.0, 0.0],
                    [10.0, 0.0],
                    [10.0, 20.0],
                    [-10.0, 20.0],
                ]],
                ..CassetteParams::default()
            },
            ..DeviceParams::default()
        })
        .unwrap()
    }

    fn small_planar() -> InsertionDeviceModel {
        InsertionDeviceModel::planar(DeviceParams {
            nr_periods: 3,
            period_length: 50.0,
            gap: 20.0,
            name: "planar_test".to_string(),
            ..DeviceParams::default()
        })
        .unwrap()
    }

    #[test]
    fn test_delta_has_four_cassettes() {
        let model = small_delta();
        let names = model.cassette_names();
        assert_eq!(names, vec!["csd", "cse", "cid", "cie"]);
    }

    #[test]
    fn test_planar_builds_and_produces_vertical_field() {
        let mut ctx = SolverContext::new();
        let mut model = small_planar();
        model.build(&mut ctx).unwrap();
        model.solve(&mut ctx, 1e-4, 10).unwrap();
        let b = model.field_at(&ctx, [0.0, 0.0, 0.0]).unwrap();
        assert!(
            b[1].abs() > 10.0 * b[0].abs(),
            "expected dominant By on axis, got {b:?}"
        );
    }

    #[test]
    fn test_parked_delta_cancels_on_axis() {
        let mut ctx = SolverContext::new();
        let mut model = small_delta();
        model.build(&mut ctx).unwrap();
        let b = model.field_at(&ctx, [0.0, 0.0, 6.0]).unwrap();
        assert!(b[0].abs() < 1e-8 && b[1].abs() < 1e-8, "parked field {b:?}");
    }

    #[test]
    fn test_delta_dgv_turns_on_vertical_field() {
        let mut ctx = SolverContext::new();
        let mut model = small_delta();
        model.build(&mut ctx).unwrap();
        model
            .set_cassette_positions(
                &mut ctx,
                DofUpdate {
                    dgv: Some(52.5 / 2.0),
                    ..Default::default()
                },
            )
            .unwrap();
        // Sample at a quarter period where |cos| is near 1 for one of the
        // components; just require a clearly dominant vertical field.
        let mut max_by = 0.0f64;
        let mut max_bx = 0.0f64;
        for i in 0..40 {
            let z = -52.5 + i as f64 * 2.6;
            let b = model.field_at(&ctx, [0.0, 0.0, z]).unwrap();
            max_by = max_by.max(b[1].abs());
            max_bx = max_bx.max(b[0].abs());
        }
        assert!(
            max_by > 5.0 * max_bx,
            "expected By >> Bx, got by={max_by}, bx={max_bx}"
        );
    }

    #[test]
    fn test_delta_absolute_dof_semantics_idempotent() {
        let mut ctx = SolverContext::new();
        let mut model = small_delta();
        model.build(&mut ctx).unwrap();
        let update = DofUpdate {
            dgv: Some(10.0),
            ..Default::default()
        };
        model.set_cassette_positions(&mut ctx, update).unwrap();
        let b1 = model.field_at(&ctx, [0.0, 0.0, 7.0]).unwrap();
        // Same absolute DOF again: no further motion.
        model.set_cassette_positions(&mut ctx, update).unwrap();
        let b2 = model.field_at(&ctx, [0.0, 0.0, 7.0]).unwrap();
        for i in 0..3 {
            assert!((b1[i] - b2[i]).abs() < 1e-12);
        }
        assert_eq!(model.shifts["cid"], 10.0);
        assert_eq!(model.shifts["cie"], 10.0);
        assert_eq!(model.shifts["csd"], 0.0);
    }

    #[test]
    fn test_delta_rejects_dg() {
        let mut ctx = SolverContext::new();
        let mut model = small_delta();
        model.build(&mut ctx).unwrap();
        let err = model
            .set_cassette_positions(
                &mut ctx,
                DofUpdate {
                    dg: Some(1.0),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, UndulatorError::Validation(_)));
    }

    #[test]
    fn test_apple_ii_accumulated_dof_semantics() {
        let mut ctx = SolverContext::new();
        let mut model = InsertionDeviceModel::apple_ii(DeviceParams {
            nr_periods: 2,
            name: "apple_test".to_string(),
            ..DeviceParams::default()
        })
        .unwrap();
        model.build(&mut ctx).unwrap();
        model
            .set_cassette_positions(
                &mut ctx,
                DofUpdate {
                    dp: Some(5.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(model.shifts["cse"], 5.0);
        model
            .set_cassette_positions(
                &mut ctx,
                DofUpdate {
                    dp: Some(8.0),
                    ..Default::default()
                },
            )
            .unwrap();
        // Relative application lands on the same absolute target.
        assert_eq!(model.shifts["cse"], 8.0);
        assert_eq!(model.shifts["cid"], 8.0);
        assert_eq!(model.shifts["csd"], 0.0);
    }

    #[test]
    fn test_trf_on_blocks_matches_cassette_transforms() {
        let mut ctx_a = SolverContext::new();
        let mut a = small_planar();
        a.build(&mut ctx_a).unwrap();

        let mut ctx_b = SolverContext::new();
        let mut b = InsertionDeviceModel::planar(DeviceParams {
            nr_periods: 3,
            period_length: 50.0,
            gap: 20.0,
            name: "planar_test".to_string(),
            trf_on_blocks: true,
            ..DeviceParams::default()
        })
        .unwrap();
        b.build(&mut ctx_b).unwrap();

        for i in 0..10 {
            let p = [1.0, 2.0, -40.0 + i as f64 * 8.0];
            let ba = a.field_at(&ctx_a, p).unwrap();
            let bb = b.field_at(&ctx_b, p).unwrap();
            for c in 0..3 {
                assert!((ba[c] - bb[c]).abs() < 1e-10, "mismatch at {p:?}[{c}]");
            }
        }
    }

    #[test]
    fn test_save_and_load_state_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.json");
        let path = path.to_str().unwrap();

        let model = small_delta();
        model.save_state(path).unwrap();
        let loaded = InsertionDeviceModel::load_state(path).unwrap();

        assert_eq!(loaded.name(), model.name());
        assert_eq!(loaded.nr_periods(), model.nr_periods());
        assert_eq!(loaded.cassette_names(), model.cassette_names());
        assert_eq!(loaded.kind(), model.kind());

        // Loaded overrides reproduce the original magnetizations.
        let mut ctx = SolverContext::new();
        let mut loaded = loaded;
        loaded.build(&mut ctx).unwrap();
        let orig = model.cassette("csd").unwrap().magnetization_list();
        let back = loaded.cassette("csd").unwrap().magnetization_list();
        assert_eq!(orig.len(), back.len());
        for (a, b) in orig.iter().zip(back.iter()) {
            for i in 0..3 {
                assert!((a[i] - b[i]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_release_frees_all_handles() {
        let mut ctx = SolverContext::new();
        let mut model = small_planar();
        model.build(&mut ctx).unwrap();
        assert!(!ctx.is_empty());
        model.release(&mut ctx).unwrap();
        assert!(ctx.is_empty());
    }
}
