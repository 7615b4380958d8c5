//! 3-D rotation and mirror matrices plus the small vector helpers the
//! geometry layer leans on.

use undulator_types::error::{UndulatorError, UndulatorResult};

pub type Mat3 = [[f64; 3]; 3];
pub type Vec3 = [f64; 3];

pub const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn norm(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn scale(a: Vec3, k: f64) -> Vec3 {
    [a[0] * k, a[1] * k, a[2] * k]
}

pub fn normalize(a: Vec3) -> UndulatorResult<Vec3> {
    let n = norm(a);
    if !n.is_finite() || n <= 0.0 {
        return Err(UndulatorError::Validation(
            "cannot normalize a zero-length vector".to_string(),
        ));
    }
    Ok(scale(a, 1.0 / n))
}

pub fn mat_vec(m: &Mat3, v: Vec3) -> Vec3 {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

pub fn mat_mat(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                out[i][j] += a[i][k] * b[k][j];
            }
        }
    }
    out
}

pub fn transpose(m: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = m[j][i];
        }
    }
    out
}

/// Rodrigues rotation about `axis` by `angle` [rad]. The axis need not be
/// normalized; a zero axis is a validation error.
pub fn rotation_matrix(axis: Vec3, angle: f64) -> UndulatorResult<Mat3> {
    let u = normalize(axis)?;
    let c = angle.cos();
    let s = angle.sin();
    let t = 1.0 - c;
    Ok([
        [
            c + u[0] * u[0] * t,
            u[0] * u[1] * t - u[2] * s,
            u[0] * u[2] * t + u[1] * s,
        ],
        [
            u[1] * u[0] * t + u[2] * s,
            c + u[1] * u[1] * t,
            u[1] * u[2] * t - u[0] * s,
        ],
        [
            u[2] * u[0] * t - u[1] * s,
            u[2] * u[1] * t + u[0] * s,
            c + u[2] * u[2] * t,
        ],
    ])
}

/// Householder reflection through the plane with the given normal:
/// `I − 2 n nᵀ`.
pub fn mirror_matrix(normal: Vec3) -> UndulatorResult<Mat3> {
    let n = normalize(normal)?;
    let mut out = IDENTITY;
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] -= 2.0 * n[i] * n[j];
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_about_z_quarter_turn() {
        let r = rotation_matrix([0.0, 0.0, 1.0], std::f64::consts::FRAC_PI_2).unwrap();
        let v = mat_vec(&r, [1.0, 0.0, 0.0]);
        assert!((v[0]).abs() < 1e-12);
        assert!((v[1] - 1.0).abs() < 1e-12);
        assert!((v[2]).abs() < 1e-12);
    }

    #[test]
    fn test_rotation_preserves_norm() {
        let r = rotation_matrix([1.0, 2.0, -0.5], 1.234).unwrap();
        let v = [0.3, -0.7, 1.1];
        assert!((norm(mat_vec(&r, v)) - norm(v)).abs() < 1e-12);
    }

    #[test]
    fn test_rotation_inverse_is_transpose() {
        let r = rotation_matrix([1.0, 1.0, 1.0], 0.8).unwrap();
        let rt = transpose(&r);
        let id = mat_mat(&r, &rt);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((id[i][j] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_mirror_is_involution() {
        let m = mirror_matrix([0.0, 1.0, 0.0]).unwrap();
        let v = [0.5, -2.0, 3.0];
        let w = mat_vec(&m, v);
        assert!((w[1] + v[1]).abs() < 1e-12);
        let back = mat_vec(&m, w);
        for i in 0..3 {
            assert!((back[i] - v[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_axis_rejected() {
        assert!(rotation_matrix([0.0, 0.0, 0.0], 1.0).is_err());
        assert!(mirror_matrix([0.0, 0.0, 0.0]).is_err());
    }
}
