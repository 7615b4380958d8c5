// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Cassettes
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! An ordered linear array of blocks forming one cassette of an insertion
//! device: periodic core, optional termination blocks at both ends, and
//! the ideal cyclic magnetization pattern.

use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};
use undulator_math::rotation;
use undulator_solver::{Handle, SolverContext};
use undulator_types::error::{UndulatorError, UndulatorResult};

use crate::block::Block;
use crate::material::Material;

/// Ideal magnetization direction cycle: +y, -z, -y, +z.
const DIRECTION_CYCLE: [[f64; 3]; 4] = [
    [0.0, 1.0, 0.0],
    [0.0, 0.0, -1.0],
    [0.0, -1.0, 0.0],
    [0.0, 0.0, 1.0],
];

/// Which blocks an error generator perturbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    Core,
    Termination,
    Both,
}

/// Construction parameters of a cassette. Serialized verbatim into the
/// device state dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CassetteParams {
    pub nr_periods: usize,
    pub period_length: f64,
    /// Remanence magnitude [T] of the ideal magnetization pattern.
    pub mr: f64,
    pub block_shape: Vec<Vec<[f64; 2]>>,
    pub upper_cassette: bool,
    /// Gap between consecutive core blocks [mm].
    pub longitudinal_distance: f64,
    pub ksi_par: f64,
    pub ksi_per: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_subdivision: Option<Vec<[usize; 3]>>,
    #[serde(default)]
    pub hybrid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pole_shape: Option<Vec<Vec<[f64; 2]>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pole_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pole_material: Option<Material>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pole_subdivision: Option<Vec<[usize; 3]>>,
    #[serde(default)]
    pub start_blocks_length: Vec<f64>,
    #[serde(default)]
    pub start_blocks_distance: Vec<f64>,
    #[serde(default)]
    pub end_blocks_length: Vec<f64>,
    #[serde(default)]
    pub end_blocks_distance: Vec<f64>,
    pub name: String,
}

impl Default for CassetteParams {
    fn default() -> Self {
        CassetteParams {
            nr_periods: 5,
            period_length: 50.0,
            mr: 1.37,
            block_shape: vec![vec![
                [-20.0, 0.0],
                [20.0, 0.0],
                [20.0, 40.0],
                [-20.0, 40.0],
            ]],
            upper_cassette: false,
            longitudinal_distance: 0.125,
            ksi_par: 0.06,
            ksi_per: 0.17,
            block_subdivision: None,
            hybrid: false,
            pole_shape: None,
            pole_length: None,
            pole_material: None,
            pole_subdivision: None,
            start_blocks_length: Vec::new(),
            start_blocks_distance: Vec::new(),
            end_blocks_length: Vec::new(),
            end_blocks_distance: Vec::new(),
            name: "cassette".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cassette {
    params: CassetteParams,
    blocks: Vec<Block>,
    /// True for entries that are hybrid poles.
    pole_flags: Vec<bool>,
    position_err: Vec<[f64; 3]>,
    handle: Option<Handle>,
}

impl Cassette {
    pub fn new(params: CassetteParams) -> UndulatorResult<Self> {
        validate_params(&params)?;

        let lengths = length_list(&params);
        let gaps = gap_list(&params);
        let positions = centered_positions(&lengths, &gaps);
        let pole_flags = pole_flag_list(&params);
        let magnetizations = ideal_magnetization_list(&params, &pole_flags);

        let block_material = Material::linear(
            &format!("{}_block", params.name),
            params.mr,
            params.ksi_par,
            params.ksi_per,
        )?;
        let pole_material = match &params.pole_material {
            Some(mat) => mat.clone(),
            None => Material::preset("vanadium_permendur")?,
        };

        let mut blocks = Vec::with_capacity(lengths.len());
        let mut block_counter = 0usize;
        let mut pole_counter = 0usize;
        for (idx, (&len, &pos)) in lengths.iter().zip(positions.iter()).enumerate() {
            let is_pole = pole_flags[idx];
            let (shape, subdivision, material) = if is_pole {
                (
                    params
                        .pole_shape
                        .clone()
                        .unwrap_or_else(|| params.block_shape.clone()),
                    params.pole_subdivision.clone(),
                    pole_material.clone(),
                )
            } else {
                (
                    params.block_shape.clone(),
                    params.block_subdivision.clone(),
                    block_material.clone(),
                )
            };
            let mut block = Block::new(
                shape,
                len,
                pos,
                magnetizations[idx],
                subdivision,
                true,
                material,
            )?;
            block.name = if is_pole {
                pole_counter += 1;
                format!("{}_P{:03}", params.name, pole_counter)
            } else {
                block_counter += 1;
                format!("{}_B{:03}", params.name, block_counter)
            };
            blocks.push(block);
        }

        let n = blocks.len();
        Ok(Cassette {
            params,
            blocks,
            pole_flags,
            position_err: vec![[0.0; 3]; n],
            handle: None,
        })
    }

    pub fn params(&self) -> &CassetteParams {
        &self.params
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }

    pub fn nr_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn nr_start_blocks(&self) -> usize {
        self.params.start_blocks_length.len()
    }

    pub fn nr_end_blocks(&self) -> usize {
        self.params.end_blocks_length.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_pole(&self, idx: usize) -> bool {
        self.pole_flags.get(idx).copied().unwrap_or(false)
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn length_list(&self) -> Vec<f64> {
        self.blocks.iter().map(|b| b.length()).collect()
    }

    pub fn longitudinal_position_list(&self) -> Vec<f64> {
        self.blocks
            .iter()
            .map(|b| b.longitudinal_position())
            .collect()
    }

    pub fn magnetization_list(&self) -> Vec<[f64; 3]> {
        self.blocks.iter().map(|b| b.magnetization()).collect()
    }

    pub fn block_names(&self) -> Vec<String> {
        self.blocks.iter().map(|b| b.name.clone()).collect()
    }

    pub fn position_err(&self) -> &[[f64; 3]] {
        &self.position_err
    }

    /// Replace block names; one entry per block.
    pub fn set_block_names(&mut self, names: Vec<String>) -> UndulatorResult<()> {
        if names.len() != self.blocks.len() {
            return Err(UndulatorError::Shape(format!(
                "expected {} block names, got {}",
                self.blocks.len(),
                names.len()
            )));
        }
        for (block, name) in self.blocks.iter_mut().zip(names) {
            block.name = name;
        }
        Ok(())
    }

    /// Replace block magnetizations; rebuilds solver geometry in place
    /// for blocks that already own a handle.
    pub fn set_magnetization_list(
        &mut self,
        ctx: &mut SolverContext,
        magnetizations: Vec<[f64; 3]>,
    ) -> UndulatorResult<()> {
        if magnetizations.len() != self.blocks.len() {
            return Err(UndulatorError::Shape(format!(
                "expected {} magnetizations, got {}",
                self.blocks.len(),
                magnetizations.len()
            )));
        }
        for (block, m) in self.blocks.iter_mut().zip(magnetizations) {
            block.rebuild_with_magnetization(ctx, m)?;
        }
        Ok(())
    }

    /// Apply per-block position offsets [mm]; one triple per block.
    pub fn set_position_err(
        &mut self,
        ctx: &mut SolverContext,
        position_err: Vec<[f64; 3]>,
    ) -> UndulatorResult<()> {
        if position_err.len() != self.blocks.len() {
            return Err(UndulatorError::Shape(format!(
                "expected {} position errors, got {}",
                self.blocks.len(),
                position_err.len()
            )));
        }
        for (idx, (block, err)) in self.blocks.iter_mut().zip(&position_err).enumerate() {
            // Undo the previous offset before applying the new one.
            let prev = self.position_err[idx];
            let delta = [err[0] - prev[0], err[1] - prev[1], err[2] - prev[2]];
            if delta != [0.0; 3] {
                block.shift(ctx, delta)?;
            }
        }
        self.position_err = position_err;
        Ok(())
    }

    /// Create solver geometry for every block and group the nonempty
    /// handles into one composite.
    pub fn build(&mut self, ctx: &mut SolverContext) -> UndulatorResult<Handle> {
        if self.handle.is_some() {
            return Err(UndulatorError::Solver(
                "cassette already owns a solver handle".to_string(),
            ));
        }
        let mut handles = Vec::with_capacity(self.blocks.len());
        for block in &mut self.blocks {
            if let Some(h) = block.build(ctx)? {
                handles.push(h);
            }
        }
        let handle = ctx.group(handles)?;
        self.handle = Some(handle);
        Ok(handle)
    }

    /// Release all solver geometry, children before the composite. A
    /// handle already freed by a parent composite is skipped.
    pub fn release(&mut self, ctx: &mut SolverContext) -> UndulatorResult<()> {
        if let Some(handle) = self.handle.take() {
            if ctx.contains(handle) {
                ctx.destroy(handle)?;
            }
        }
        for block in &mut self.blocks {
            block.forget_handle();
        }
        Ok(())
    }

    pub fn block_mut(&mut self, idx: usize) -> Option<&mut Block> {
        self.blocks.get_mut(idx)
    }

    fn in_scope(&self, idx: usize, scope: ErrorScope) -> bool {
        let nr_start = self.nr_start_blocks();
        let nr_end = self.nr_end_blocks();
        let core = idx >= nr_start && idx < self.blocks.len() - nr_end;
        match scope {
            ErrorScope::Core => core,
            ErrorScope::Termination => !core,
            ErrorScope::Both => true,
        }
    }

    /// Perturbed magnetization list: amplitude factors within
    /// `±max_amplitude` and rotations about a uniformly sampled random
    /// axis by an angle within `±max_angle` [rad]. Poles are untouched.
    pub fn random_magnetization_errors<R: Rng>(
        &self,
        max_amplitude: f64,
        max_angle: f64,
        scope: ErrorScope,
        rng: &mut R,
    ) -> UndulatorResult<Vec<[f64; 3]>> {
        let amp_dist = Uniform::new_inclusive(-max_amplitude.abs(), max_amplitude.abs());
        let ang_dist = Uniform::new_inclusive(-max_angle.abs(), max_angle.abs());
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| UndulatorError::Validation(format!("normal distribution: {e}")))?;

        let mut out = Vec::with_capacity(self.blocks.len());
        for (idx, block) in self.blocks.iter().enumerate() {
            let base = block.magnetization();
            if self.is_pole(idx) || !self.in_scope(idx, scope) || rotation::norm(base) == 0.0 {
                out.push(base);
                continue;
            }
            let factor = 1.0 + amp_dist.sample(rng);
            let angle = ang_dist.sample(rng);
            let axis = loop {
                let v = [
                    normal.sample(rng),
                    normal.sample(rng),
                    normal.sample(rng),
                ];
                if rotation::norm(v) > 1e-9 {
                    break v;
                }
            };
            let rot = rotation::rotation_matrix(axis, angle)?;
            out.push(rotation::scale(rotation::mat_vec(&rot, base), factor));
        }
        Ok(out)
    }

    /// Per-block position offsets [mm], each component uniform within its
    /// own bound.
    pub fn random_position_errors<R: Rng>(
        &self,
        max_horizontal: f64,
        max_vertical: f64,
        max_longitudinal: f64,
        scope: ErrorScope,
        rng: &mut R,
    ) -> Vec<[f64; 3]> {
        let dx = Uniform::new_inclusive(-max_horizontal.abs(), max_horizontal.abs());
        let dy = Uniform::new_inclusive(-max_vertical.abs(), max_vertical.abs());
        let dz = Uniform::new_inclusive(-max_longitudinal.abs(), max_longitudinal.abs());

        (0..self.blocks.len())
            .map(|idx| {
                if self.in_scope(idx, scope) {
                    [dx.sample(rng), dy.sample(rng), dz.sample(rng)]
                } else {
                    [0.0; 3]
                }
            })
            .collect()
    }
}

fn validate_params(params: &CassetteParams) -> UndulatorResult<()> {
    if params.nr_periods < 1 {
        return Err(UndulatorError::Validation(format!(
            "nr_periods must be >= 1, got {}",
            params.nr_periods
        )));
    }
    if !params.period_length.is_finite() || params.period_length <= 0.0 {
        return Err(UndulatorError::Validation(format!(
            "period_length must be finite and > 0, got {}",
            params.period_length
        )));
    }
    if !params.mr.is_finite() || params.mr < 0.0 {
        return Err(UndulatorError::Validation(format!(
            "mr must be finite and >= 0, got {}",
            params.mr
        )));
    }
    if params.longitudinal_distance < 0.0 {
        return Err(UndulatorError::Validation(format!(
            "longitudinal_distance must be >= 0, got {}",
            params.longitudinal_distance
        )));
    }
    if params.start_blocks_length.len() != params.start_blocks_distance.len() {
        return Err(UndulatorError::Validation(format!(
            "start termination arrays differ in length: {} vs {}",
            params.start_blocks_length.len(),
            params.start_blocks_distance.len()
        )));
    }
    if params.end_blocks_length.len() != params.end_blocks_distance.len() {
        return Err(UndulatorError::Validation(format!(
            "end termination arrays differ in length: {} vs {}",
            params.end_blocks_length.len(),
            params.end_blocks_distance.len()
        )));
    }
    if params.hybrid {
        let pole_len = params.pole_length.unwrap_or(0.0);
        if pole_len <= 0.0 {
            return Err(UndulatorError::Validation(
                "hybrid cassette requires pole_length > 0".to_string(),
            ));
        }
        let block_len =
            0.5 * params.period_length - pole_len - params.longitudinal_distance;
        if block_len <= 0.0 {
            return Err(UndulatorError::Validation(format!(
                "hybrid block length came out non-positive ({block_len})"
            )));
        }
    } else {
        let block_len = 0.25 * params.period_length - params.longitudinal_distance;
        if block_len <= 0.0 {
            return Err(UndulatorError::Validation(format!(
                "core block length came out non-positive ({block_len})"
            )));
        }
    }
    Ok(())
}

fn core_slot_count(params: &CassetteParams) -> usize {
    4 * params.nr_periods
}

fn length_list(params: &CassetteParams) -> Vec<f64> {
    let mut lengths = params.start_blocks_length.clone();
    if params.hybrid {
        let pole_len = params.pole_length.unwrap_or(0.0);
        let block_len = 0.5 * params.period_length - pole_len - params.longitudinal_distance;
        for slot in 0..core_slot_count(params) {
            lengths.push(if slot % 2 == 1 { pole_len } else { block_len });
        }
    } else {
        let block_len = 0.25 * params.period_length - params.longitudinal_distance;
        lengths.extend(std::iter::repeat(block_len).take(core_slot_count(params)));
    }
    lengths.extend_from_slice(&params.end_blocks_length);
    lengths
}

fn gap_list(params: &CassetteParams) -> Vec<f64> {
    let nr_start = params.start_blocks_length.len();
    let nr_end = params.end_blocks_length.len();
    let n = nr_start + core_slot_count(params) + nr_end;

    let mut gaps = Vec::with_capacity(n - 1);
    // Gap after each start block.
    gaps.extend_from_slice(&params.start_blocks_distance);
    // Gaps inside the core.
    for _ in 0..core_slot_count(params) - 1 {
        gaps.push(params.longitudinal_distance);
    }
    // Gap before each end block.
    gaps.extend_from_slice(&params.end_blocks_distance);
    gaps
}

/// Cumulative positions `(len[i] + len[i-1])/2 + gap[i-1]`, recentered so
/// the mean of the first and last equals zero.
fn centered_positions(lengths: &[f64], gaps: &[f64]) -> Vec<f64> {
    let n = lengths.len();
    let mut pos = Vec::with_capacity(n);
    pos.push(0.0);
    for i in 1..n {
        let step = 0.5 * (lengths[i] + lengths[i - 1]) + gaps[i - 1];
        pos.push(pos[i - 1] + step);
    }
    let center = 0.5 * (pos[0] + pos[n - 1]);
    for p in &mut pos {
        *p -= center;
    }
    pos
}

fn pole_flag_list(params: &CassetteParams) -> Vec<bool> {
    let nr_start = params.start_blocks_length.len();
    let nr_end = params.end_blocks_length.len();
    let mut flags = vec![false; nr_start];
    for slot in 0..core_slot_count(params) {
        flags.push(params.hybrid && slot % 2 == 1);
    }
    flags.extend(std::iter::repeat(false).take(nr_end));
    flags
}

/// Ideal magnetization per block. Non-hybrid cassettes follow the cyclic
/// direction list with an offset from `upper_cassette` and the number of
/// start blocks; hybrid magnet blocks alternate along ±z with poles left
/// unmagnetized.
fn ideal_magnetization_list(params: &CassetteParams, pole_flags: &[bool]) -> Vec<[f64; 3]> {
    let nr_start = params.start_blocks_length.len();
    let mut out = Vec::with_capacity(pole_flags.len());

    if params.hybrid {
        let mut magnet_counter = 0usize;
        let phase = usize::from(params.upper_cassette);
        for &is_pole in pole_flags {
            if is_pole {
                out.push([0.0; 3]);
            } else {
                let sign = if (magnet_counter + phase) % 2 == 0 {
                    1.0
                } else {
                    -1.0
                };
                out.push([0.0, 0.0, sign * params.mr]);
                magnet_counter += 1;
            }
        }
    } else {
        let mut offset = (4 - nr_start % 4) % 4;
        if params.upper_cassette {
            offset = (offset + 2) % 4;
        }
        for k in 0..pole_flags.len() {
            let dir = DIRECTION_CYCLE[(k + offset) % 4];
            out.push(rotation::scale(dir, params.mr));
        }
    }
    out
}
