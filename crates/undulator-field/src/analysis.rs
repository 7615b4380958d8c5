// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Field Analysis
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Derived quantities over a field source: field integrals, electron
//! trajectories, sinusoidal amplitudes, deflection parameters, radiation
//! wavelength and phase error.
//!
//! Conventions: coordinates handed to sources are mm, fields are T,
//! trajectories are integrated and stored in meters.

use std::cell::RefCell;

use undulator_math::beam::BeamParameters;
use undulator_math::fit::{fit_cosine, DEFAULT_MAXFEV};
use undulator_math::integrate::{cumtrapz, rk4_step};
use undulator_math::interp::interp1;
use undulator_math::linalg::polyfit_line;
use undulator_math::signal::zero_crossings;
use undulator_types::constants::{DEFLECTION_COEF, TM2_TO_KGCM2, TM_TO_GCM};
use undulator_types::error::{UndulatorError, UndulatorResult};
use undulator_types::state::{FieldAmplitudes, PhaseError, Trajectory};

use crate::source::{Coordinate, FieldSource};

/// Hard cap on RK4 steps, far above any realistic device length.
const MAX_TRAJECTORY_STEPS: usize = 20_000_000;

/// Cumulative first and second field integrals along z at fixed (x, y).
///
/// Input z in mm; outputs in G·cm and kG·cm² respectively, one triple
/// per z sample. A precomputed field list must match the z length.
pub fn calc_field_integrals(
    src: &dyn FieldSource,
    z_mm: &[f64],
    x: f64,
    y: f64,
    field: Option<&[[f64; 3]]>,
) -> UndulatorResult<(Vec<[f64; 3]>, Vec<[f64; 3]>)> {
    if z_mm.len() < 2 {
        return Err(UndulatorError::Validation(
            "field integrals require at least 2 z samples".to_string(),
        ));
    }
    let field = match field {
        Some(f) => {
            if f.len() != z_mm.len() {
                return Err(UndulatorError::Shape(format!(
                    "field list length {} does not match z length {}",
                    f.len(),
                    z_mm.len()
                )));
            }
            f.to_vec()
        }
        None => src.get_field(x.into(), y.into(), Coordinate::Sweep(z_mm.to_vec()))?,
    };

    let z_m: Vec<f64> = z_mm.iter().map(|&z| z * 1e-3).collect();
    let mut ib = vec![[0.0; 3]; z_mm.len()];
    let mut iib = vec![[0.0; 3]; z_mm.len()];
    for comp in 0..3 {
        let b: Vec<f64> = field.iter().map(|f| f[comp]).collect();
        let first = cumtrapz(&z_m, &b);
        let second = cumtrapz(&z_m, &first);
        for i in 0..z_mm.len() {
            ib[i][comp] = first[i] * TM_TO_GCM;
            iib[i][comp] = second[i] * TM2_TO_KGCM2;
        }
    }
    Ok((ib, iib))
}

/// Integrate the Newton–Lorentz equation of motion with classical RK4.
///
/// `r0 = (x, y, z, x', y', z')` with positions in mm; `zmax` and
/// `rkstep` in mm; `dz` offsets the launch z. The loop stops once the
/// longitudinal position reaches `zmax`. `on_axis_field` samples the
/// field at x = y = 0 regardless of the transverse excursion.
pub fn calc_trajectory(
    src: &dyn FieldSource,
    energy: f64,
    r0: [f64; 6],
    zmax: f64,
    rkstep: f64,
    dz: f64,
    on_axis_field: bool,
) -> UndulatorResult<Trajectory> {
    if !rkstep.is_finite() || rkstep <= 0.0 {
        return Err(UndulatorError::Validation(format!(
            "rkstep must be finite and > 0, got {rkstep}"
        )));
    }
    let beam = BeamParameters::new(energy)?;
    let alpha = 1.0 / beam.brho;

    let ds = rkstep * 1e-3;
    let zmax_m = zmax * 1e-3;
    let mut state = [
        r0[0] * 1e-3,
        r0[1] * 1e-3,
        (r0[2] + dz) * 1e-3,
        r0[3],
        r0[4],
        r0[5],
    ];
    if state[5] <= 0.0 {
        return Err(UndulatorError::Validation(
            "trajectory launch requires a forward longitudinal velocity".to_string(),
        ));
    }

    let sample_error: RefCell<Option<UndulatorError>> = RefCell::new(None);
    let deriv = |y: &[f64; 6]| -> [f64; 6] {
        let probe = if on_axis_field {
            [0.0, 0.0, y[2] * 1e3]
        } else {
            [y[0] * 1e3, y[1] * 1e3, y[2] * 1e3]
        };
        let b = match src.field_at(probe) {
            Ok(b) => b,
            Err(e) => {
                sample_error.borrow_mut().get_or_insert(e);
                return [0.0; 6];
            }
        };
        // Electron: dv/ds = -(1/Bρ)·(v × B).
        let v = [y[3], y[4], y[5]];
        let f = [
            -alpha * (v[1] * b[2] - v[2] * b[1]),
            -alpha * (v[2] * b[0] - v[0] * b[2]),
            -alpha * (v[0] * b[1] - v[1] * b[0]),
        ];
        [y[3], y[4], y[5], f[0], f[1], f[2]]
    };

    let mut traj = Trajectory::default();
    let mut s = 0.0;
    traj.push(s, state);
    let mut steps = 0usize;
    while state[2] < zmax_m {
        state = rk4_step(&deriv, &state, ds);
        if let Some(e) = sample_error.borrow_mut().take() {
            return Err(e);
        }
        s += ds;
        traj.push(s, state);
        steps += 1;
        if steps > MAX_TRAJECTORY_STEPS {
            return Err(UndulatorError::Validation(format!(
                "trajectory did not reach zmax = {zmax} mm within {MAX_TRAJECTORY_STEPS} steps"
            )));
        }
    }
    Ok(traj)
}

/// Cosine amplitudes and the horizontal-vertical phase difference over a
/// symmetric window spanning `nr_periods - 1` complete periods (one
/// period when `nr_periods == 1`).
#[allow(clippy::too_many_arguments)]
pub fn calc_field_amplitude(
    src: &dyn FieldSource,
    period_length: f64,
    nr_periods: usize,
    z_list: Option<&[f64]>,
    field_list: Option<&[[f64; 3]]>,
    x: f64,
    y: f64,
    npts_per_period: usize,
) -> UndulatorResult<FieldAmplitudes> {
    if nr_periods == 0 {
        return Err(UndulatorError::Validation(
            "nr_periods must be >= 1".to_string(),
        ));
    }
    if !period_length.is_finite() || period_length <= 0.0 {
        return Err(UndulatorError::Validation(format!(
            "period_length must be finite and > 0, got {period_length}"
        )));
    }

    let (z, field) = match (z_list, field_list) {
        (Some(z), Some(f)) => {
            if z.len() != f.len() {
                return Err(UndulatorError::Shape(format!(
                    "z list length {} does not match field length {}",
                    z.len(),
                    f.len()
                )));
            }
            (z.to_vec(), f.to_vec())
        }
        (Some(z), None) => {
            let f = src.get_field(x.into(), y.into(), Coordinate::Sweep(z.to_vec()))?;
            (z.to_vec(), f)
        }
        (None, _) => {
            let span_periods = nr_periods.saturating_sub(1).max(1);
            let span = span_periods as f64 * period_length;
            let npts = npts_per_period.max(4) * span_periods + 1;
            let z: Vec<f64> = (0..npts)
                .map(|i| -0.5 * span + span * i as f64 / (npts as f64 - 1.0))
                .collect();
            let f = src.get_field(x.into(), y.into(), Coordinate::Sweep(z.clone()))?;
            (z, f)
        }
    };

    let mut amps = [0.0; 3];
    let mut phases = [0.0; 3];
    for comp in 0..3 {
        let b: Vec<f64> = field.iter().map(|f| f[comp]).collect();
        let (amp, phase) = fit_cosine(&z, &b, period_length, DEFAULT_MAXFEV)?;
        amps[comp] = amp;
        phases[comp] = phase;
    }

    Ok(FieldAmplitudes {
        bx_amp: amps[0],
        by_amp: amps[1],
        bz_amp: amps[2],
        phase_xy: (phases[0] - phases[1]).rem_euclid(std::f64::consts::PI),
    })
}

/// Deflection parameters `(Kh, Kv) = 0.934 · B · λ[cm]`; the horizontal
/// parameter comes from the vertical field and vice versa.
pub fn calc_deflection_parameter(bx_amp: f64, by_amp: f64, period_length: f64) -> (f64, f64) {
    let lam_cm = period_length / 10.0;
    (
        DEFLECTION_COEF * by_amp * lam_cm,
        DEFLECTION_COEF * bx_amp * lam_cm,
    )
}

/// On-axis radiation wavelength [m] of the given harmonic.
pub fn calc_radiation_wavelength(
    energy: f64,
    bx_amp: f64,
    by_amp: f64,
    period_length: f64,
    harmonic: usize,
) -> UndulatorResult<f64> {
    if harmonic == 0 {
        return Err(UndulatorError::Validation(
            "harmonic must be >= 1".to_string(),
        ));
    }
    let beam = BeamParameters::new(energy)?;
    let (kh, kv) = calc_deflection_parameter(bx_amp, by_amp, period_length);
    let k2 = kh * kh + kv * kv;
    let lam_u = period_length * 1e-3;
    Ok(lam_u / (2.0 * harmonic as f64 * beam.gamma * beam.gamma) * (1.0 + k2 / 2.0))
}

/// Radiation phase [rad] accumulated along a trajectory for a given
/// wavelength [m], one value per trajectory sample.
pub fn calc_radiation_phase(
    energy: f64,
    traj: &Trajectory,
    wavelength: f64,
) -> UndulatorResult<Vec<f64>> {
    if traj.len() < 2 {
        return Err(UndulatorError::Validation(
            "radiation phase requires at least 2 trajectory points".to_string(),
        ));
    }
    if !wavelength.is_finite() || wavelength <= 0.0 {
        return Err(UndulatorError::Validation(format!(
            "wavelength must be finite and > 0, got {wavelength}"
        )));
    }
    let beam = BeamParameters::new(energy)?;
    let inv_2g2 = 1.0 / (2.0 * beam.gamma * beam.gamma);
    let integrand: Vec<f64> = (0..traj.len())
        .map(|i| inv_2g2 + 0.5 * (traj.dxds[i] * traj.dxds[i] + traj.dyds[i] * traj.dyds[i]))
        .collect();
    let cum = cumtrapz(&traj.s, &integrand);
    let k = 2.0 * std::f64::consts::PI / wavelength;
    Ok(cum.into_iter().map(|c| k * c).collect())
}

/// RMS phase error at the trajectory poles.
///
/// The dominant plane (horizontal motion for `by >= bx`, vertical
/// otherwise) provides the slope whose zero crossings locate the poles;
/// `skip_poles` trims both ends; a linear trend is removed and the RMS
/// of the residual reported.
#[allow(clippy::too_many_arguments)]
pub fn calc_phase_error(
    energy: f64,
    traj: &Trajectory,
    bx_amp: f64,
    by_amp: f64,
    period_length: f64,
    skip_poles: usize,
    zmin: Option<f64>,
    zmax: Option<f64>,
) -> UndulatorResult<PhaseError> {
    let wavelength = calc_radiation_wavelength(energy, bx_amp, by_amp, period_length, 1)?;
    let phase = calc_radiation_phase(energy, traj, wavelength)?;

    let slope = if by_amp >= bx_amp {
        &traj.dxds
    } else {
        &traj.dyds
    };
    let mut poles_m = zero_crossings(&traj.z, slope);
    if let Some(lo) = zmin {
        let lo_m = lo * 1e-3;
        poles_m.retain(|&z| z >= lo_m);
    }
    if let Some(hi) = zmax {
        let hi_m = hi * 1e-3;
        poles_m.retain(|&z| z <= hi_m);
    }
    if poles_m.len() <= 2 * skip_poles + 2 {
        return Err(UndulatorError::Validation(format!(
            "phase error needs more than {} poles, found {}",
            2 * skip_poles + 2,
            poles_m.len()
        )));
    }
    let poles_m = &poles_m[skip_poles..poles_m.len() - skip_poles];

    let phase_at_poles: Vec<f64> = poles_m
        .iter()
        .map(|&zp| interp1(&traj.z, &phase, zp))
        .collect();
    let (a0, a1) = polyfit_line(poles_m, &phase_at_poles);
    let residual: Vec<f64> = poles_m
        .iter()
        .zip(phase_at_poles.iter())
        .map(|(&z, &p)| p - (a0 + a1 * z))
        .collect();
    let rms = (residual.iter().map(|r| r * r).sum::<f64>() / residual.len() as f64).sqrt();

    Ok(PhaseError {
        z_poles: poles_m.iter().map(|&z| z * 1e3).collect(),
        phase: residual,
        rms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ZeroField;

    impl FieldSource for ZeroField {
        fn field_at(&self, _point: [f64; 3]) -> UndulatorResult<[f64; 3]> {
            Ok([0.0; 3])
        }
    }

    /// Ideal undulator field: By = amp·cos(2π z/λ), z in mm.
    struct SineField {
        amp: f64,
        period: f64,
    }

    impl FieldSource for SineField {
        fn field_at(&self, point: [f64; 3]) -> UndulatorResult<[f64; 3]> {
            let arg = 2.0 * std::f64::consts::PI * point[2] / self.period;
            Ok([0.0, self.amp * arg.cos(), 0.0])
        }
    }

    #[test]
    fn test_zero_field_trajectory_is_straight() {
        let traj = calc_trajectory(
            &ZeroField,
            3.0,
            [0.0, 0.0, -500.0, 0.0, 0.0, 1.0],
            500.0,
            1.0,
            0.0,
            false,
        )
        .unwrap();
        let f = traj.final_point().unwrap();
        assert!(f[0].abs() < 1e-15 && f[1].abs() < 1e-15);
        assert!((f[3]).abs() < 1e-15 && (f[4]).abs() < 1e-15);
        assert!((f[5] - 1.0).abs() < 1e-15);
        // Arc-length step bookkeeping: every step advances 1 mm.
        for w in traj.z.windows(2) {
            assert!(((w[1] - w[0]) - 1e-3).abs() < 1e-9);
        }
    }

    #[test]
    fn test_trajectory_step_size_under_field() {
        let src = SineField {
            amp: 1.0,
            period: 50.0,
        };
        let traj = calc_trajectory(
            &src,
            3.0,
            [0.0, 0.0, -100.0, 0.0, 0.0, 1.0],
            100.0,
            0.5,
            0.0,
            false,
        )
        .unwrap();
        for i in 1..traj.len() {
            let dx = traj.x[i] - traj.x[i - 1];
            let dy = traj.y[i] - traj.y[i - 1];
            let dz = traj.z[i] - traj.z[i - 1];
            let step = (dx * dx + dy * dy + dz * dz).sqrt();
            assert!(
                (step - 0.5e-3).abs() < 1e-6,
                "step {i} deviates: {step}"
            );
        }
    }

    #[test]
    fn test_trajectory_rejects_backward_launch() {
        let err = calc_trajectory(
            &ZeroField,
            3.0,
            [0.0, 0.0, 0.0, 0.0, 0.0, -1.0],
            100.0,
            1.0,
            0.0,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, UndulatorError::Validation(_)));
    }

    #[test]
    fn test_field_integrals_uniform_field() {
        struct Uniform;
        impl FieldSource for Uniform {
            fn field_at(&self, _p: [f64; 3]) -> UndulatorResult<[f64; 3]> {
                Ok([0.0, 1.0, 0.0])
            }
        }
        let z: Vec<f64> = (0..101).map(|i| i as f64 * 10.0).collect(); // 0..1 m
        let (ib, iib) = calc_field_integrals(&Uniform, &z, 0.0, 0.0, None).unwrap();
        // ∫ 1 T over 1 m = 1 T·m = 1e6 G·cm.
        assert!((ib[100][1] - 1e6).abs() < 1.0);
        // ∫∫ = 0.5 T·m² = 5e4 kG·cm².
        assert!((iib[100][1] - 5e4).abs() < 1.0);
        assert_eq!(ib[0][1], 0.0);
    }

    #[test]
    fn test_field_integrals_length_mismatch() {
        let z = vec![0.0, 1.0, 2.0];
        let f = vec![[0.0; 3]; 2];
        let err = calc_field_integrals(&ZeroField, &z, 0.0, 0.0, Some(&f)).unwrap_err();
        assert!(matches!(err, UndulatorError::Shape(_)));
    }

    #[test]
    fn test_amplitude_extraction_on_ideal_field() {
        let src = SineField {
            amp: 1.2,
            period: 52.5,
        };
        let amps = calc_field_amplitude(&src, 52.5, 10, None, None, 0.0, 0.0, 101).unwrap();
        assert!((amps.by_amp - 1.2).abs() < 1e-9, "by = {}", amps.by_amp);
        assert!(amps.bx_amp.abs() < 1e-9);
        assert!(amps.bz_amp.abs() < 1e-9);
    }

    #[test]
    fn test_deflection_parameter_convention() {
        let (kh, kv) = calc_deflection_parameter(0.5, 1.2, 52.5);
        assert!((kh - 0.934 * 1.2 * 5.25).abs() < 1e-12);
        assert!((kv - 0.934 * 0.5 * 5.25).abs() < 1e-12);
    }

    #[test]
    fn test_radiation_wavelength_scales_with_harmonic() {
        let l1 = calc_radiation_wavelength(3.0, 0.0, 1.0, 50.0, 1).unwrap();
        let l3 = calc_radiation_wavelength(3.0, 0.0, 1.0, 50.0, 3).unwrap();
        assert!((l1 / l3 - 3.0).abs() < 1e-12);
        assert!(l1 > 0.0 && l1 < 1e-6, "wavelength {l1}");
    }

    #[test]
    fn test_phase_error_small_for_ideal_field() {
        let src = SineField {
            amp: 1.0,
            period: 50.0,
        };
        let nper = 10.0;
        let traj = calc_trajectory(
            &src,
            3.0,
            [0.0, 0.0, -nper * 25.0, 0.0, 0.0, 1.0],
            nper * 25.0,
            0.1,
            0.0,
            false,
        )
        .unwrap();
        let amps = calc_field_amplitude(&src, 50.0, 10, None, None, 0.0, 0.0, 101).unwrap();
        let pe = calc_phase_error(
            3.0,
            &traj,
            amps.bx_amp,
            amps.by_amp,
            50.0,
            2,
            None,
            None,
        )
        .unwrap();
        // An ideal sinusoid accumulates phase perfectly linearly in the
        // pole index; the residual RMS must be tiny.
        assert!(pe.rms < 0.05, "rms = {}", pe.rms);
        assert!(pe.z_poles.len() > 5);
    }

    #[test]
    fn test_phase_error_invariant_under_z_shift() {
        let src = SineField {
            amp: 1.0,
            period: 50.0,
        };
        let traj1 = calc_trajectory(
            &src,
            3.0,
            [0.0, 0.0, -250.0, 0.0, 0.0, 1.0],
            250.0,
            0.1,
            0.0,
            false,
        )
        .unwrap();
        let traj2 = calc_trajectory(
            &src,
            3.0,
            [0.0, 0.0, -250.0, 0.0, 0.0, 1.0],
            250.0,
            0.1,
            -50.0,
            false,
        )
        .unwrap();
        let amps = calc_field_amplitude(&src, 50.0, 10, None, None, 0.0, 0.0, 101).unwrap();
        let pe1 =
            calc_phase_error(3.0, &traj1, amps.bx_amp, amps.by_amp, 50.0, 2, None, None).unwrap();
        let pe2 =
            calc_phase_error(3.0, &traj2, amps.bx_amp, amps.by_amp, 50.0, 2, None, None).unwrap();
        assert!((pe1.rms - pe2.rms).abs() < 0.02, "{} vs {}", pe1.rms, pe2.rms);
    }
}
