//! Cosine-wave fitting for field-amplitude extraction.
//!
//! Damped Gauss-Newton on `A·cos(2π z/period + φ)` with a fixed period,
//! seeded by the linear quadrature estimate.

use undulator_types::error::{UndulatorError, UndulatorResult};

/// Model-evaluation budget matching the measurement-analysis convention.
pub const DEFAULT_MAXFEV: usize = 5000;

const STEP_TOL: f64 = 1e-12;
const MAX_HALVINGS: usize = 20;

/// Fit `b(z) ≈ A·cos(2π z/period + φ)`. Returns `(amplitude, phase)` with
/// `amplitude ≥ 0` and the phase wrapped to `(-π, π]`.
///
/// Fails with `FitFailed` when the evaluation budget is exhausted before
/// the damped Gauss-Newton iteration converges.
pub fn fit_cosine(z: &[f64], b: &[f64], period: f64, maxfev: usize) -> UndulatorResult<(f64, f64)> {
    let n = z.len();
    if n != b.len() {
        return Err(UndulatorError::Shape(format!(
            "cosine fit requires matching arrays, got {} and {}",
            n,
            b.len()
        )));
    }
    if n < 3 {
        return Err(UndulatorError::Validation(format!(
            "cosine fit requires at least 3 samples, got {n}"
        )));
    }
    if !period.is_finite() || period <= 0.0 {
        return Err(UndulatorError::Validation(format!(
            "cosine fit requires a positive period, got {period}"
        )));
    }

    let k = 2.0 * std::f64::consts::PI / period;

    // Quadrature seed: least squares on the cos/sin basis.
    let (mut scc, mut sss, mut scs, mut sbc, mut sbs) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for i in 0..n {
        let c = (k * z[i]).cos();
        let s = (k * z[i]).sin();
        scc += c * c;
        sss += s * s;
        scs += c * s;
        sbc += b[i] * c;
        sbs += b[i] * s;
    }
    let det = scc * sss - scs * scs;
    let (ca, sa) = if det.abs() > 1e-30 {
        (
            (sbc * sss - sbs * scs) / det,
            (sbs * scc - sbc * scs) / det,
        )
    } else {
        (sbc / scc.max(1e-30), 0.0)
    };
    // ca·cos + sa·sin = A·cos(kz + φ) with φ = atan2(-sa, ca).
    let mut amp = (ca * ca + sa * sa).sqrt();
    let mut phase = (-sa).atan2(ca);

    if amp == 0.0 {
        return Ok((0.0, 0.0));
    }

    let mut nfev = 0usize;
    let mut chi2 = {
        nfev += 1;
        residual_norm2(z, b, k, amp, phase)
    };

    loop {
        // Gauss-Newton normal equations on (A, φ).
        let (mut jaa, mut jap, mut jpp, mut ga, mut gp) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for i in 0..n {
            let arg = k * z[i] + phase;
            let c = arg.cos();
            let s = arg.sin();
            let r = amp * c - b[i];
            let da = c;
            let dp = -amp * s;
            jaa += da * da;
            jap += da * dp;
            jpp += dp * dp;
            ga += da * r;
            gp += dp * r;
        }
        let det = jaa * jpp - jap * jap;
        if det.abs() < 1e-30 {
            break;
        }
        let step_a = -(ga * jpp - gp * jap) / det;
        let step_p = -(gp * jaa - ga * jap) / det;

        if step_a.abs() < STEP_TOL * amp.abs().max(1.0) && step_p.abs() < STEP_TOL {
            break;
        }

        let mut lambda = 1.0;
        let mut accepted = false;
        for _ in 0..MAX_HALVINGS {
            if nfev >= maxfev {
                return Err(UndulatorError::FitFailed(format!(
                    "cosine fit exhausted {maxfev} evaluations"
                )));
            }
            let trial_amp = amp + lambda * step_a;
            let trial_phase = phase + lambda * step_p;
            nfev += 1;
            let trial = residual_norm2(z, b, k, trial_amp, trial_phase);
            if trial <= chi2 {
                amp = trial_amp;
                phase = trial_phase;
                let improved = chi2 - trial;
                chi2 = trial;
                accepted = true;
                if improved < STEP_TOL * chi2.max(1.0) {
                    // Converged.
                    return Ok(normalize(amp, phase));
                }
                break;
            }
            lambda *= 0.5;
        }
        if !accepted {
            break;
        }
        if nfev >= maxfev {
            return Err(UndulatorError::FitFailed(format!(
                "cosine fit exhausted {maxfev} evaluations"
            )));
        }
    }

    Ok(normalize(amp, phase))
}

fn residual_norm2(z: &[f64], b: &[f64], k: f64, amp: f64, phase: f64) -> f64 {
    z.iter()
        .zip(b.iter())
        .map(|(&zi, &bi)| {
            let r = amp * (k * zi + phase).cos() - bi;
            r * r
        })
        .sum()
}

fn normalize(mut amp: f64, mut phase: f64) -> (f64, f64) {
    if amp < 0.0 {
        amp = -amp;
        phase += std::f64::consts::PI;
    }
    // Wrap to (-π, π].
    while phase > std::f64::consts::PI {
        phase -= 2.0 * std::f64::consts::PI;
    }
    while phase <= -std::f64::consts::PI {
        phase += 2.0 * std::f64::consts::PI;
    }
    (amp, phase)
}
