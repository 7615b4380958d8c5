// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Shimming Engine
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! The shimming solver: segment the trajectory at the field poles, build
//! a per-block response matrix by virtual vertical shims, invert it with
//! a weighted truncated SVD, and compose the predicted shimmed
//! measurement from the shim signature.

use std::path::Path;

use ndarray::{Array1, Array2};
use undulator_field::analysis::{calc_field_amplitude, calc_phase_error, calc_trajectory};
use undulator_field::data::FieldMapData;
use undulator_field::source::{Coordinate, FieldSource, ModelFieldSource};
use undulator_math::linalg::{polyfit_line, suggest_truncation, svd, tsvd_solve};
use undulator_math::signal::{find_peaks, find_valleys};
use undulator_model::device::InsertionDeviceModel;
use undulator_solver::SolverContext;
use undulator_types::config::{BlockFilter, SegmentKind, ShimmingConfig};
use undulator_types::error::{UndulatorError, UndulatorResult};
use undulator_types::state::{PhaseError, SegmentSlopes};

use crate::artifacts;

/// Virtual shim amplitude for response-matrix columns [mm].
pub const DEFAULT_SHIM: f64 = 0.1;

/// Poles trimmed from both ends of the phase-error evaluation.
const SKIP_POLES: usize = 2;

/// Peak detection threshold relative to the global extreme.
const PEAK_THRESHOLD: f64 = 0.5;

/// Solver settings used when the engine re-solves a perturbed model.
const SOLVE_PREC: f64 = 1e-6;
const SOLVE_MAX_ITER: usize = 50;

/// Residual state of one source: per-segment slopes plus the optional
/// phase-error block.
#[derive(Debug, Clone)]
pub struct ResidualState {
    pub slopes: SegmentSlopes,
    pub phase_error: Option<PhaseError>,
}

impl ResidualState {
    /// Flatten to `[slope_x.., slope_y.., pe..]`.
    pub fn to_vector(&self) -> Array1<f64> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.slopes.slope_x);
        out.extend_from_slice(&self.slopes.slope_y);
        if let Some(pe) = &self.phase_error {
            out.extend_from_slice(&pe.phase);
        }
        Array1::from_vec(out)
    }
}

pub struct ShimmingEngine {
    config: ShimmingConfig,
}

impl ShimmingEngine {
    pub fn new(config: ShimmingConfig) -> UndulatorResult<Self> {
        config.validate()?;
        Ok(ShimmingEngine { config })
    }

    pub fn config(&self) -> &ShimmingConfig {
        &self.config
    }

    fn z_samples(&self) -> Vec<f64> {
        let n = self.config.znpts;
        (0..n)
            .map(|i| {
                self.config.zmin
                    + (self.config.zmax - self.config.zmin) * i as f64 / (n as f64 - 1.0)
            })
            .collect()
    }

    /// Field component driving segmentation: configured, or the one with
    /// the largest excursion over the window.
    fn dominant_component(&self, field: &[[f64; 3]]) -> usize {
        if let Some(comp) = self.config.field_comp {
            return comp;
        }
        let mut best = 1;
        let mut best_max = 0.0f64;
        for comp in 0..3 {
            let m = field.iter().map(|f| f[comp].abs()).fold(0.0f64, f64::max);
            if m > best_max {
                best_max = m;
                best = comp;
            }
        }
        best
    }

    /// Half-period (or full-period) intervals straddling each field pole,
    /// extended by one interval at both ends so the first and last poles
    /// lie strictly inside.
    pub fn calc_segments(
        &self,
        src: &dyn FieldSource,
        period_length: f64,
    ) -> UndulatorResult<Vec<(f64, f64)>> {
        let z = self.z_samples();
        let field = src.get_field(
            self.config.x.into(),
            self.config.y.into(),
            Coordinate::Sweep(z.clone()),
        )?;
        let comp = self.dominant_component(&field);
        let b: Vec<f64> = field.iter().map(|f| f[comp]).collect();

        let mut pole_idx = find_peaks(&b, PEAK_THRESHOLD);
        pole_idx.extend(find_valleys(&b, PEAK_THRESHOLD));
        pole_idx.sort_unstable();
        if pole_idx.len() < 2 {
            return Err(UndulatorError::Validation(format!(
                "segmentation found {} poles, need at least 2",
                pole_idx.len()
            )));
        }
        let first_pole = z[pole_idx[0]];
        let last_pole = z[pole_idx[pole_idx.len() - 1]];

        let spacing = match self.config.segments_type {
            SegmentKind::HalfPeriod => 0.5 * period_length,
            SegmentKind::Period => period_length,
        };

        let mut bounds = Vec::new();
        let mut edge = first_pole - 0.5 * spacing - spacing;
        let stop = last_pole + 0.5 * spacing + spacing;
        while edge <= stop + 1e-9 {
            bounds.push(edge);
            edge += spacing;
        }
        tracing::info!(
            poles = pole_idx.len(),
            segments = bounds.len().saturating_sub(1),
            "trajectory segmentation complete"
        );
        Ok(bounds.windows(2).map(|w| (w[0], w[1])).collect())
    }

    fn trajectory(&self, src: &dyn FieldSource) -> UndulatorResult<undulator_types::state::Trajectory> {
        calc_trajectory(
            src,
            self.config.energy,
            [
                self.config.x,
                self.config.y,
                self.config.zmin,
                0.0,
                0.0,
                1.0,
            ],
            self.config.zmax,
            self.config.rkstep,
            0.0,
            false,
        )
    }

    /// Per-segment first-order slopes of the period-averaged trajectory.
    pub fn calc_slope(
        &self,
        src: &dyn FieldSource,
        segments: &[(f64, f64)],
        period_length: f64,
    ) -> UndulatorResult<SegmentSlopes> {
        let traj = self.trajectory(src)?;
        self.slopes_from_trajectory(&traj, segments, period_length)
    }

    fn slopes_from_trajectory(
        &self,
        traj: &undulator_types::state::Trajectory,
        segments: &[(f64, f64)],
        period_length: f64,
    ) -> UndulatorResult<SegmentSlopes> {
        let n = traj.len();
        if n < 2 {
            return Err(UndulatorError::Validation(
                "trajectory too short for slope extraction".to_string(),
            ));
        }

        // Centered running mean over one period.
        let half_window = 0.5 * period_length * 1e-3;
        let mut px = vec![0.0; n + 1];
        let mut py = vec![0.0; n + 1];
        for i in 0..n {
            px[i + 1] = px[i] + traj.x[i];
            py[i + 1] = py[i] + traj.y[i];
        }
        let mut avg_x = vec![0.0; n];
        let mut avg_y = vec![0.0; n];
        let mut lo = 0usize;
        let mut hi = 0usize;
        for i in 0..n {
            while lo < n && traj.z[lo] < traj.z[i] - half_window {
                lo += 1;
            }
            if hi < i {
                hi = i;
            }
            while hi + 1 < n && traj.z[hi + 1] <= traj.z[i] + half_window {
                hi += 1;
            }
            let count = (hi + 1 - lo) as f64;
            avg_x[i] = (px[hi + 1] - px[lo]) / count;
            avg_y[i] = (py[hi + 1] - py[lo]) / count;
        }

        let mut slope_x = Vec::with_capacity(segments.len());
        let mut slope_y = Vec::with_capacity(segments.len());
        for &(z_start, z_end) in segments {
            let (lo_m, hi_m) = (z_start * 1e-3, z_end * 1e-3);
            let idx: Vec<usize> = (0..n)
                .filter(|&i| traj.z[i] >= lo_m && traj.z[i] <= hi_m)
                .collect();
            if idx.len() < 2 {
                return Err(UndulatorError::Validation(format!(
                    "segment [{z_start}, {z_end}] mm contains {} trajectory points",
                    idx.len()
                )));
            }
            let zs: Vec<f64> = idx.iter().map(|&i| traj.z[i]).collect();
            let xs: Vec<f64> = idx.iter().map(|&i| avg_x[i]).collect();
            let ys: Vec<f64> = idx.iter().map(|&i| avg_y[i]).collect();
            slope_x.push(polyfit_line(&zs, &xs).1);
            slope_y.push(polyfit_line(&zs, &ys).1);
        }
        Ok(SegmentSlopes { slope_x, slope_y })
    }

    /// Slopes plus the optional phase-error block of one source.
    pub fn calc_state(
        &self,
        src: &dyn FieldSource,
        segments: &[(f64, f64)],
        period_length: f64,
        nr_periods: usize,
    ) -> UndulatorResult<ResidualState> {
        let traj = self.trajectory(src)?;
        let slopes = self.slopes_from_trajectory(&traj, segments, period_length)?;
        let phase_error = if self.config.include_pe {
            let amps = calc_field_amplitude(
                src,
                period_length,
                nr_periods,
                None,
                None,
                self.config.x,
                self.config.y,
                101,
            )?;
            Some(calc_phase_error(
                self.config.energy,
                &traj,
                amps.bx_amp,
                amps.by_amp,
                period_length,
                SKIP_POLES,
                self.config.zmin_pe,
                self.config.zmax_pe,
            )?)
        } else {
            None
        };
        Ok(ResidualState {
            slopes,
            phase_error,
        })
    }

    /// Residual vector between a reference (measured) state and the model
    /// state: `[Δslope_x, Δslope_y, (Δphase)]`.
    pub fn calc_error(
        &self,
        reference: &ResidualState,
        model: &ResidualState,
    ) -> UndulatorResult<Array1<f64>> {
        let a = reference.to_vector();
        let b = model.to_vector();
        if a.len() != b.len() {
            return Err(UndulatorError::Shape(format!(
                "residual states differ in length: {} vs {}",
                a.len(),
                b.len()
            )));
        }
        Ok(&a - &b)
    }

    /// Blocks of the selected cassettes matching the configured
    /// orientation filter: `(cassette, block index, block name)`.
    pub fn eligible_blocks(
        &self,
        model: &InsertionDeviceModel,
    ) -> UndulatorResult<Vec<(String, usize, String)>> {
        let mut out = Vec::new();
        for cassette_name in &self.config.cassettes {
            let cassette = model.cassette(cassette_name).ok_or_else(|| {
                UndulatorError::Validation(format!(
                    "device has no cassette named '{cassette_name}'"
                ))
            })?;
            for (idx, block) in cassette.blocks().iter().enumerate() {
                if cassette.is_pole(idx) {
                    continue;
                }
                let m = block.magnetization();
                let keep = match self.config.block_type {
                    BlockFilter::All => m != [0.0; 3],
                    BlockFilter::Vertical => {
                        m[1].abs() > m[0].abs() && m[1].abs() > m[2].abs()
                    }
                    BlockFilter::Horizontal => {
                        m[0].abs() > m[1].abs() && m[0].abs() > m[2].abs()
                    }
                    BlockFilter::Longitudinal => {
                        m[2].abs() > m[0].abs() && m[2].abs() > m[1].abs()
                    }
                };
                if keep {
                    out.push((cassette_name.clone(), idx, block.name.clone()));
                }
            }
        }
        if out.is_empty() {
            return Err(UndulatorError::Validation(
                "no blocks match the shimming selection".to_string(),
            ));
        }
        Ok(out)
    }

    /// Response matrix `R ∈ ℝ^(M×N)`: per-block residual sensitivity to a
    /// `+shim` vertical displacement, columns in block order. The model
    /// is perturbed, measured and restored in place; not reentrant.
    pub fn calc_response_matrix(
        &self,
        ctx: &mut SolverContext,
        model: &mut InsertionDeviceModel,
        segments: &[(f64, f64)],
        shim: f64,
    ) -> UndulatorResult<(Array2<f64>, Vec<String>)> {
        if !shim.is_finite() || shim == 0.0 {
            return Err(UndulatorError::Validation(format!(
                "shim amplitude must be finite and nonzero, got {shim}"
            )));
        }
        let blocks = self.eligible_blocks(model)?;
        let period_length = model.period_length();
        let nr_periods = model.nr_periods();

        let baseline = {
            let src = ModelFieldSource::from_device(ctx, model)?;
            self.calc_state(&src, segments, period_length, nr_periods)?
        };
        let base_vec = baseline.to_vector();

        let mut matrix = Array2::zeros((base_vec.len(), blocks.len()));
        for (j, (cassette, idx, name)) in blocks.iter().enumerate() {
            model.shift_block(ctx, cassette, *idx, [0.0, shim, 0.0])?;
            if self.config.solved_matrix {
                model.solve(ctx, SOLVE_PREC, SOLVE_MAX_ITER)?;
            }
            let state = {
                let src = ModelFieldSource::from_device(ctx, model)?;
                self.calc_state(&src, segments, period_length, nr_periods)?
            };
            model.shift_block(ctx, cassette, *idx, [0.0, -shim, 0.0])?;
            if self.config.solved_matrix {
                model.solve(ctx, SOLVE_PREC, SOLVE_MAX_ITER)?;
            }

            let vec = state.to_vector();
            if vec.len() != base_vec.len() {
                return Err(UndulatorError::Shape(format!(
                    "residual length changed from {} to {} while shimming block {name}",
                    base_vec.len(),
                    vec.len()
                )));
            }
            for i in 0..base_vec.len() {
                matrix[[i, j]] = (vec[i] - base_vec[i]) / shim;
            }
            tracing::info!(
                block = %name,
                column = j + 1,
                total = blocks.len(),
                "response matrix column complete"
            );
        }

        let names = blocks.into_iter().map(|(_, _, n)| n).collect();
        Ok((matrix, names))
    }

    /// Default residual weights: per block (slope-x, slope-y, phase
    /// error) the inverse RMS of that block, normalized to at most 1.
    pub fn default_weights(&self, err: &Array1<f64>, nseg: usize) -> UndulatorResult<Vec<f64>> {
        if err.len() < 2 * nseg {
            return Err(UndulatorError::Shape(format!(
                "residual length {} shorter than 2 x {nseg} segment slopes",
                err.len()
            )));
        }
        let bounds = [0, nseg, 2 * nseg, err.len()];
        let mut weights = vec![0.0; err.len()];
        let mut block_w = Vec::new();
        for k in 0..3 {
            let (lo, hi) = (bounds[k], bounds[k + 1]);
            if lo >= hi {
                block_w.push(0.0);
                continue;
            }
            let rms = ((lo..hi).map(|i| err[i] * err[i]).sum::<f64>() / (hi - lo) as f64).sqrt();
            block_w.push(if rms > 0.0 { 1.0 / rms } else { 1.0 });
        }
        let max_w = block_w.iter().cloned().fold(0.0f64, f64::max).max(1e-300);
        for k in 0..3 {
            let (lo, hi) = (bounds[k], bounds[k + 1]);
            for w in weights.iter_mut().take(hi).skip(lo) {
                *w = block_w[k] / max_w;
            }
        }
        Ok(weights)
    }

    /// Weighted truncated-SVD shim solve. With `nsv == None` the
    /// truncation index follows the steepest relative drop of the
    /// singular spectrum. Returns the shim vector and the retained rank.
    pub fn calc_shims(
        &self,
        r: &Array2<f64>,
        err: &Array1<f64>,
        nseg: usize,
        ws: Option<&[f64]>,
        nsv: Option<usize>,
    ) -> UndulatorResult<(Array1<f64>, usize)> {
        if r.nrows() != err.len() {
            return Err(UndulatorError::Shape(format!(
                "matrix rows {} do not match residual length {}",
                r.nrows(),
                err.len()
            )));
        }
        let weights = match ws {
            Some(w) => {
                if w.len() != err.len() {
                    return Err(UndulatorError::Shape(format!(
                        "weights length {} does not match residual length {}",
                        w.len(),
                        err.len()
                    )));
                }
                w.to_vec()
            }
            None => self.default_weights(err, nseg)?,
        };

        let mut rw = r.clone();
        let mut ew = err.clone();
        for i in 0..err.len() {
            ew[i] *= weights[i];
            for j in 0..r.ncols() {
                rw[[i, j]] *= weights[i];
            }
        }

        let (_u, sigma, _vt) = svd(&rw);
        let nsv = nsv
            .unwrap_or_else(|| suggest_truncation(&sigma))
            .clamp(1, sigma.len());
        let shims = tsvd_solve(&rw, &ew, nsv);
        tracing::info!(nsv, singular_values = sigma.len(), "shim solve complete");
        Ok((shims, nsv))
    }

    /// Snap each shim to the nearest machined thickness.
    pub fn round_shims(&self, shims: &[f64], thicknesses: &[f64]) -> UndulatorResult<Vec<f64>> {
        if thicknesses.is_empty() {
            return Err(UndulatorError::Validation(
                "rounding requires a non-empty thickness set".to_string(),
            ));
        }
        Ok(shims
            .iter()
            .map(|&s| {
                let mut best = thicknesses[0];
                for &t in thicknesses {
                    if (t - s).abs() < (best - s).abs() {
                        best = t;
                    }
                }
                best
            })
            .collect())
    }

    /// Machinable shim thicknesses: multiples of `step` within ±`max`.
    pub fn default_thicknesses(step: f64, max: f64) -> Vec<f64> {
        let n = (max / step).round() as i64;
        (-n..=n).map(|k| k as f64 * step).collect()
    }

    /// Field perturbation produced by a shim set, sampled on a grid: the
    /// model is shimmed, solved, sampled, and restored.
    #[allow(clippy::too_many_arguments)]
    pub fn calc_shim_signature(
        &self,
        ctx: &mut SolverContext,
        model: &mut InsertionDeviceModel,
        blocks: &[(String, usize, String)],
        shims: &[f64],
        xs: &[f64],
        ys: &[f64],
        zs: &[f64],
    ) -> UndulatorResult<FieldMapData> {
        if blocks.len() != shims.len() {
            return Err(UndulatorError::Shape(format!(
                "{} shims for {} blocks",
                shims.len(),
                blocks.len()
            )));
        }

        let baseline = self.sample_grid(ctx, model, xs, ys, zs)?;

        for ((cassette, idx, _), &s) in blocks.iter().zip(shims) {
            model.shift_block(ctx, cassette, *idx, [0.0, s, 0.0])?;
        }
        if self.config.solved_shim {
            model.solve(ctx, SOLVE_PREC, SOLVE_MAX_ITER)?;
        }
        let shimmed = self.sample_grid(ctx, model, xs, ys, zs)?;
        for ((cassette, idx, _), &s) in blocks.iter().zip(shims) {
            model.shift_block(ctx, cassette, *idx, [0.0, -s, 0.0])?;
        }
        if self.config.solved_shim {
            model.solve(ctx, SOLVE_PREC, SOLVE_MAX_ITER)?;
        }

        tracing::info!(blocks = blocks.len(), "shim signature computed");
        shimmed.sub(&baseline)
    }

    fn sample_grid(
        &self,
        ctx: &SolverContext,
        model: &InsertionDeviceModel,
        xs: &[f64],
        ys: &[f64],
        zs: &[f64],
    ) -> UndulatorResult<FieldMapData> {
        let src = ModelFieldSource::from_device(ctx, model)?;
        let mut rows = Vec::with_capacity(xs.len() * ys.len() * zs.len());
        for &z in zs {
            for &y in ys {
                for &x in xs {
                    let b = src.field_at([x, y, z])?;
                    rows.push([x, y, z, b[0], b[1], b[2]]);
                }
            }
        }
        FieldMapData::from_rows(&rows, None)
    }

    /// Predicted corrected measurement: `meas + signature`, with the
    /// signature interpolated onto the measurement grid.
    pub fn calc_shimmed_meas(
        &self,
        meas: &FieldMapData,
        signature: &FieldMapData,
    ) -> UndulatorResult<FieldMapData> {
        let mut sig = signature.clone();
        let mut rows = Vec::with_capacity(meas.px.len() * meas.py.len() * meas.pz.len());
        for (iy, &y) in meas.py.iter().enumerate() {
            sig.set_selected_y(y);
            for (iz, &z) in meas.pz.iter().enumerate() {
                for (ix, &x) in meas.px.iter().enumerate() {
                    let bm = meas.at_index(ix, iy, iz);
                    let bs = sig.field_at([x, y, z])?;
                    rows.push([x, y, z, bm[0] + bs[0], bm[1] + bs[1], bm[2] + bs[2]]);
                }
            }
        }
        FieldMapData::from_rows(&rows, Some(meas.selected_y()))
    }

    /// Load segments from a checkpoint, or compute and persist them.
    pub fn segments_checkpoint(
        &self,
        path: &str,
        src: &dyn FieldSource,
        period_length: f64,
    ) -> UndulatorResult<Vec<(f64, f64)>> {
        if Path::new(path).exists() {
            return artifacts::load_segments(path);
        }
        let segments = self.calc_segments(src, period_length)?;
        artifacts::save_segments(path, &segments)?;
        Ok(segments)
    }

    /// Load the response matrix from a checkpoint, or compute and persist
    /// it. A persisted matrix whose shape disagrees with the current
    /// selection is fatal.
    #[allow(clippy::too_many_arguments)]
    pub fn response_matrix_checkpoint(
        &self,
        path: &str,
        names_path: &str,
        ctx: &mut SolverContext,
        model: &mut InsertionDeviceModel,
        segments: &[(f64, f64)],
        shim: f64,
    ) -> UndulatorResult<(Array2<f64>, Vec<String>)> {
        if Path::new(path).exists() {
            let matrix = artifacts::load_response_matrix(path)?;
            let names = artifacts::load_block_names(names_path)?;
            let expected_cols = self.eligible_blocks(model)?.len();
            if matrix.ncols() != expected_cols || names.len() != expected_cols {
                return Err(UndulatorError::Shape(format!(
                    "persisted response matrix has {} columns, selection has {expected_cols}",
                    matrix.ncols()
                )));
            }
            return Ok((matrix, names));
        }
        let (matrix, names) = self.calc_response_matrix(ctx, model, segments, shim)?;
        artifacts::save_response_matrix(path, &matrix)?;
        artifacts::save_block_names(names_path, &names)?;
        Ok((matrix, names))
    }
}
