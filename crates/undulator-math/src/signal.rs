//! Peak, valley, and zero-crossing detection on sampled waveforms.

/// Indices of strict local maxima with height at least `min_frac` of the
/// global maximum. Plateaus and endpoints are not peaks.
pub fn find_peaks(v: &[f64], min_frac: f64) -> Vec<usize> {
    let n = v.len();
    if n < 3 {
        return Vec::new();
    }
    let global = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let threshold = if global > 0.0 { global * min_frac } else { global };

    let mut peaks = Vec::new();
    for i in 1..n - 1 {
        if v[i] > v[i - 1] && v[i] > v[i + 1] && v[i] >= threshold {
            peaks.push(i);
        }
    }
    peaks
}

/// Indices of strict local minima, mirrored through `find_peaks`.
pub fn find_valleys(v: &[f64], min_frac: f64) -> Vec<usize> {
    let negated: Vec<f64> = v.iter().map(|&x| -x).collect();
    find_peaks(&negated, min_frac)
}

/// Linear-interpolated positions where `v` crosses zero, on the axis `z`.
/// An exact zero sample is reported once at its own position.
pub fn zero_crossings(z: &[f64], v: &[f64]) -> Vec<f64> {
    let n = z.len().min(v.len());
    let mut out = Vec::new();
    let mut i = 0;
    while i < n {
        if v[i] == 0.0 {
            out.push(z[i]);
            // Skip a run of exact zeros.
            while i + 1 < n && v[i + 1] == 0.0 {
                i += 1;
            }
        } else if i + 1 < n && v[i] * v[i + 1] < 0.0 {
            let t = v[i] / (v[i] - v[i + 1]);
            out.push(z[i] + t * (z[i + 1] - z[i]));
        }
        i += 1;
    }
    out
}
