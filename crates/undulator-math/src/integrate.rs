//! Trapezoidal quadrature and the classical RK4 stepper used for
//! trajectory integration.

/// Trapezoidal integral of `y` over `x`.
pub fn trapz(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    let mut acc = 0.0;
    for i in 1..n {
        acc += 0.5 * (y[i] + y[i - 1]) * (x[i] - x[i - 1]);
    }
    acc
}

/// Cumulative trapezoidal integral, same length as the input, starting
/// at zero.
pub fn cumtrapz(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len().min(y.len());
    let mut out = Vec::with_capacity(n);
    let mut acc = 0.0;
    for i in 0..n {
        if i > 0 {
            acc += 0.5 * (y[i] + y[i - 1]) * (x[i] - x[i - 1]);
        }
        out.push(acc);
    }
    out
}

/// One classical RK4 step of `dy/ds = f(y)` on a 6-component state.
pub fn rk4_step<F>(f: F, y: &[f64; 6], h: f64) -> [f64; 6]
where
    F: Fn(&[f64; 6]) -> [f64; 6],
{
    let k1 = f(y);
    let k2 = f(&advance(y, &k1, 0.5 * h));
    let k3 = f(&advance(y, &k2, 0.5 * h));
    let k4 = f(&advance(y, &k3, h));

    let mut out = *y;
    for i in 0..6 {
        out[i] += h * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]) / 6.0;
    }
    out
}

fn advance(y: &[f64; 6], k: &[f64; 6], h: f64) -> [f64; 6] {
    let mut out = *y;
    for i in 0..6 {
        out[i] += h * k[i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trapz_linear_exact() {
        let x: Vec<f64> = (0..11).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|&v| 2.0 * v).collect();
        // ∫ 2x dx over [0, 1] = 1
        assert!((trapz(&x, &y) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cumtrapz_starts_at_zero_and_matches_trapz() {
        let x: Vec<f64> = (0..50).map(|i| i as f64 * 0.2).collect();
        let y: Vec<f64> = x.iter().map(|&v| v.sin()).collect();
        let cum = cumtrapz(&x, &y);
        assert_eq!(cum.len(), x.len());
        assert_eq!(cum[0], 0.0);
        assert!((cum[cum.len() - 1] - trapz(&x, &y)).abs() < 1e-12);
    }

    #[test]
    fn test_rk4_free_drift() {
        // Zero force: position advances linearly with the direction cosines.
        let f = |y: &[f64; 6]| [y[3], y[4], y[5], 0.0, 0.0, 0.0];
        let mut y = [0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        for _ in 0..100 {
            y = rk4_step(f, &y, 0.01);
        }
        assert!((y[2] - 1.0).abs() < 1e-12);
        assert!(y[0].abs() < 1e-15 && y[1].abs() < 1e-15);
    }

    #[test]
    fn test_rk4_harmonic_oscillator_accuracy() {
        // x'' = -x encoded on (x, x') with the spare slots idle.
        let f = |y: &[f64; 6]| [y[3], 0.0, 0.0, -y[0], 0.0, 0.0];
        let mut y = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let h = 0.01;
        let steps = (std::f64::consts::PI / h) as usize;
        for _ in 0..steps {
            y = rk4_step(f, &y, h);
        }
        // After ~π: x ≈ -cos(residual), close to -1.
        assert!((y[0] + 1.0).abs() < 1e-3, "x = {}", y[0]);
    }
}
