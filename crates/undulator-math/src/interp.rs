//! Linear and bilinear interpolation on regular axes.

use ndarray::Array2;

/// Index of the cell containing `x` on a sorted axis, clamped so that
/// `idx + 1` is always valid.
fn cell_index(axis: &[f64], x: f64) -> usize {
    let n = axis.len();
    if n < 2 {
        return 0;
    }
    match axis.binary_search_by(|v| v.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Less)) {
        Ok(i) => i.min(n - 2),
        Err(i) => i.saturating_sub(1).min(n - 2),
    }
}

/// 1-D linear interpolation over a strictly increasing axis, clamped at
/// the boundaries. A single-point axis returns its only value.
pub fn interp1(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return ys[0];
    }
    let i = cell_index(&xs[..n], x);
    let x0 = xs[i];
    let x1 = xs[i + 1];
    let t = if x1 > x0 {
        ((x - x0) / (x1 - x0)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    ys[i] * (1.0 - t) + ys[i + 1] * t
}

/// Bilinear interpolation on a regular grid `field[[ix, iz]]`, clamped
/// at the boundaries.
pub fn interp2(xs: &[f64], zs: &[f64], field: &Array2<f64>, x: f64, z: f64) -> f64 {
    let nx = xs.len();
    let nz = zs.len();
    if nx == 0 || nz == 0 {
        return 0.0;
    }
    if nx == 1 {
        let col: Vec<f64> = (0..nz).map(|iz| field[[0, iz]]).collect();
        return interp1(zs, &col, z);
    }
    if nz == 1 {
        let row: Vec<f64> = (0..nx).map(|ix| field[[ix, 0]]).collect();
        return interp1(xs, &row, x);
    }

    let ix = cell_index(xs, x);
    let iz = cell_index(zs, z);
    let tx = ((x - xs[ix]) / (xs[ix + 1] - xs[ix])).clamp(0.0, 1.0);
    let tz = ((z - zs[iz]) / (zs[iz + 1] - zs[iz])).clamp(0.0, 1.0);

    let v00 = field[[ix, iz]];
    let v01 = field[[ix, iz + 1]];
    let v10 = field[[ix + 1, iz]];
    let v11 = field[[ix + 1, iz + 1]];

    (1.0 - tx) * ((1.0 - tz) * v00 + tz * v01) + tx * ((1.0 - tz) * v10 + tz * v11)
}
