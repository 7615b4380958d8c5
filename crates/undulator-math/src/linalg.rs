//! Linear algebra utilities.
//!
//! One-sided Jacobi SVD, pseudoinverse, truncated-SVD least squares,
//! first-degree polynomial fit.

use ndarray::{Array1, Array2};

/// Singular values below this fraction of the largest are treated as zero.
const SV_TINY: f64 = 1e-14;

/// Jacobi sweep limit; the rotation count per sweep is n(n-1)/2.
const MAX_SWEEPS: usize = 60;

/// Thin SVD by one-sided Jacobi orthogonalization.
///
/// Returns `(U, sigma, Vt)` with `A ≈ U · diag(sigma) · Vt`,
/// `U: m×k`, `sigma: k`, `Vt: k×n`, `k = min(m, n)`, singular values
/// sorted descending. Intended for the small dense matrices of this
/// project (response matrices up to a few hundred rows/columns).
pub fn svd(a: &Array2<f64>) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
    let (m, n) = a.dim();
    if m < n {
        // Orthogonalize the transpose and swap factors.
        let at = a.t().to_owned();
        let (u_t, sigma, vt_t) = svd_tall(&at);
        let u = vt_t.t().to_owned();
        let vt = u_t.t().to_owned();
        return (u, sigma, vt);
    }
    svd_tall(a)
}

/// One-sided Jacobi on a tall (m >= n) matrix: rotate column pairs of a
/// working copy until mutually orthogonal, accumulating the rotations
/// into V. Column norms are the singular values.
fn svd_tall(a: &Array2<f64>) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
    let (m, n) = a.dim();
    let mut b = a.clone();
    let mut v = Array2::eye(n);

    for _ in 0..MAX_SWEEPS {
        let mut rotated = false;
        for p in 0..n {
            for q in (p + 1)..n {
                let mut alpha = 0.0;
                let mut beta = 0.0;
                let mut gamma = 0.0;
                for i in 0..m {
                    let bp = b[[i, p]];
                    let bq = b[[i, q]];
                    alpha += bp * bp;
                    beta += bq * bq;
                    gamma += bp * bq;
                }
                if gamma.abs() <= SV_TINY * (alpha * beta).sqrt().max(SV_TINY) {
                    continue;
                }
                rotated = true;

                let zeta = (beta - alpha) / (2.0 * gamma);
                let t = if zeta >= 0.0 {
                    1.0 / (zeta + (1.0 + zeta * zeta).sqrt())
                } else {
                    -1.0 / (-zeta + (1.0 + zeta * zeta).sqrt())
                };
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = c * t;

                for i in 0..m {
                    let bp = b[[i, p]];
                    let bq = b[[i, q]];
                    b[[i, p]] = c * bp - s * bq;
                    b[[i, q]] = s * bp + c * bq;
                }
                for i in 0..n {
                    let vp = v[[i, p]];
                    let vq = v[[i, q]];
                    v[[i, p]] = c * vp - s * vq;
                    v[[i, q]] = s * vp + c * vq;
                }
            }
        }
        if !rotated {
            break;
        }
    }

    // Column norms are the singular values; sort descending.
    let mut order: Vec<usize> = (0..n).collect();
    let norms: Vec<f64> = (0..n)
        .map(|j| (0..m).map(|i| b[[i, j]] * b[[i, j]]).sum::<f64>().sqrt())
        .collect();
    order.sort_by(|&i, &j| {
        norms[j]
            .partial_cmp(&norms[i])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut u = Array2::zeros((m, n));
    let mut sigma = Array1::zeros(n);
    let mut vt = Array2::zeros((n, n));
    for (k, &col) in order.iter().enumerate() {
        let s = norms[col];
        sigma[k] = s;
        if s > SV_TINY {
            for i in 0..m {
                u[[i, k]] = b[[i, col]] / s;
            }
        }
        for i in 0..n {
            vt[[k, i]] = v[[i, col]];
        }
    }

    (u, sigma, vt)
}

/// Pseudoinverse with a singular-value cutoff.
pub fn pinv(a: &Array2<f64>, sv_cutoff: f64) -> Array2<f64> {
    let (u, sigma, vt) = svd(a);
    let (m, n) = a.dim();
    let k = sigma.len();

    let mut result = Array2::zeros((n, m));
    for idx in 0..k {
        if sigma[idx] > sv_cutoff {
            let inv_s = 1.0 / sigma[idx];
            for i in 0..n {
                for j in 0..m {
                    result[[i, j]] += vt[[idx, i]] * inv_s * u[[j, idx]];
                }
            }
        }
    }
    result
}

/// Truncated-SVD least squares: `x = V · Σ⁺_nsv · Uᵀ · b`.
///
/// Retains the `nsv` largest singular values; values below the
/// numerical floor are skipped regardless of `nsv`.
pub fn tsvd_solve(a: &Array2<f64>, b: &Array1<f64>, nsv: usize) -> Array1<f64> {
    let (u, sigma, vt) = svd(a);
    let n = a.ncols();
    let keep = nsv.min(sigma.len());

    let floor = sigma.first().copied().unwrap_or(0.0) * SV_TINY;
    let mut x = Array1::zeros(n);
    for k in 0..keep {
        if sigma[k] <= floor.max(SV_TINY) {
            break;
        }
        let mut ub = 0.0;
        for i in 0..u.nrows() {
            ub += u[[i, k]] * b[i];
        }
        let coef = ub / sigma[k];
        for j in 0..n {
            x[j] += vt[[k, j]] * coef;
        }
    }
    x
}

/// Number of singular values to retain: the count preceding the steepest
/// relative drop of the spectrum. A flat spectrum retains everything.
pub fn suggest_truncation(sigma: &Array1<f64>) -> usize {
    let n = sigma.len();
    if n < 2 {
        return n;
    }
    let mut best_idx = n;
    let mut best_ratio = 1.0;
    for i in 1..n {
        if sigma[i - 1] <= SV_TINY {
            best_idx = best_idx.min(i);
            break;
        }
        let ratio = sigma[i] / sigma[i - 1];
        if ratio < best_ratio {
            best_ratio = ratio;
            best_idx = i;
        }
    }
    best_idx
}

/// First-degree least-squares fit `y = a0 + a1·x`. Returns `(a0, a1)`.
///
/// Degenerate abscissas (fewer than two points or zero spread) yield the
/// mean with zero slope.
pub fn polyfit_line(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len().min(y.len());
    if n == 0 {
        return (0.0, 0.0);
    }
    let nf = n as f64;
    let mx = x[..n].iter().sum::<f64>() / nf;
    let my = y[..n].iter().sum::<f64>() / nf;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for i in 0..n {
        let dx = x[i] - mx;
        sxx += dx * dx;
        sxy += dx * (y[i] - my);
    }
    if sxx <= 0.0 {
        return (my, 0.0);
    }
    let a1 = sxy / sxx;
    (my - a1 * mx, a1)
}
