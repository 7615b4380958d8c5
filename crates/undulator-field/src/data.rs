// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Measured Field Maps
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Field-map data source: loads tab-separated (x, y, z, Bx, By, Bz)
//! grids, exposes interpolated field access on a selected y plane, and
//! supports superposition, shifts, and measurement corrections.

use ndarray::Array3;
use undulator_math::interp::{interp1, interp2};
use undulator_types::error::{UndulatorError, UndulatorResult};

use crate::source::FieldSource;

/// Coordinates closer than this are the same grid node [mm].
const AXIS_TOL: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct FieldMapData {
    pub px: Vec<f64>,
    pub py: Vec<f64>,
    pub pz: Vec<f64>,
    /// Field arrays indexed `[ix, iy, iz]`.
    bx: Array3<f64>,
    by: Array3<f64>,
    bz: Array3<f64>,
    /// Index of the selected y plane.
    y_index: usize,
}

impl FieldMapData {
    /// Parse a whitespace-delimited field map. Header lines (up to and
    /// including a dashed separator, plus any column-label line) are
    /// skipped; data rows need at least six numeric columns, of which
    /// the first six are used.
    pub fn from_file(path: &str, selected_y: Option<f64>) -> UndulatorResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| UndulatorError::LoadFailed(format!("{path}: {e}")))?;
        Self::from_str_named(&contents, path, selected_y)
    }

    fn from_str_named(
        contents: &str,
        origin: &str,
        selected_y: Option<f64>,
    ) -> UndulatorResult<Self> {
        let mut rows: Vec<[f64; 6]> = Vec::new();
        for line in contents.lines() {
            let tokens = line.split_whitespace().count();
            let values: Vec<f64> = line
                .split_whitespace()
                .filter_map(|t| t.parse::<f64>().ok())
                .collect();
            // A data row is fully numeric with at least six columns;
            // header lines, separators and column labels all fail this.
            if values.len() >= 6 && values.len() == tokens {
                rows.push([
                    values[0], values[1], values[2], values[3], values[4], values[5],
                ]);
            }
        }
        if rows.is_empty() {
            return Err(UndulatorError::LoadFailed(format!(
                "{origin}: no data rows found"
            )));
        }
        Self::from_rows(&rows, selected_y)
    }

    /// Build from parsed rows of (x, y, z, Bx, By, Bz).
    pub fn from_rows(rows: &[[f64; 6]], selected_y: Option<f64>) -> UndulatorResult<Self> {
        let px = unique_sorted(rows.iter().map(|r| r[0]));
        let py = unique_sorted(rows.iter().map(|r| r[1]));
        let pz = unique_sorted(rows.iter().map(|r| r[2]));

        let (nx, ny, nz) = (px.len(), py.len(), pz.len());
        if rows.len() != nx * ny * nz {
            return Err(UndulatorError::Shape(format!(
                "row count {} does not match grid {}x{}x{}",
                rows.len(),
                nx,
                ny,
                nz
            )));
        }

        let mut bx = Array3::zeros((nx, ny, nz));
        let mut by = Array3::zeros((nx, ny, nz));
        let mut bz = Array3::zeros((nx, ny, nz));
        for row in rows {
            let ix = axis_index(&px, row[0]);
            let iy = axis_index(&py, row[1]);
            let iz = axis_index(&pz, row[2]);
            bx[[ix, iy, iz]] = row[3];
            by[[ix, iy, iz]] = row[4];
            bz[[ix, iy, iz]] = row[5];
        }

        let y_index = match selected_y {
            Some(y) => nearest_index(&py, y),
            None => nearest_index(&py, 0.0),
        };

        Ok(FieldMapData {
            px,
            py,
            pz,
            bx,
            by,
            bz,
            y_index,
        })
    }

    pub fn selected_y(&self) -> f64 {
        self.py[self.y_index]
    }

    /// Select the y plane nearest to `y`.
    pub fn set_selected_y(&mut self, y: f64) {
        self.y_index = nearest_index(&self.py, y);
    }

    fn component(&self, comp: usize) -> &Array3<f64> {
        match comp {
            0 => &self.bx,
            1 => &self.by,
            _ => &self.bz,
        }
    }

    fn component_mut(&mut self, comp: usize) -> &mut Array3<f64> {
        match comp {
            0 => &mut self.bx,
            1 => &mut self.by,
            _ => &mut self.bz,
        }
    }

    /// Field value by direct grid indices.
    pub fn at_index(&self, ix: usize, iy: usize, iz: usize) -> [f64; 3] {
        [
            self.bx[[ix, iy, iz]],
            self.by[[ix, iy, iz]],
            self.bz[[ix, iy, iz]],
        ]
    }

    /// Translate the map axes; interpolants follow the axes directly.
    pub fn shift(&mut self, v: [f64; 3]) {
        for x in &mut self.px {
            *x += v[0];
        }
        for y in &mut self.py {
            *y += v[1];
        }
        for z in &mut self.pz {
            *z += v[2];
        }
    }

    /// Rotation is not supported for measured maps.
    pub fn rotate(&mut self, _point: [f64; 3], _axis: [f64; 3], _angle: f64) -> UndulatorResult<()> {
        Err(UndulatorError::Validation(
            "rotate is not supported for a measured field map".to_string(),
        ))
    }

    /// Mirroring is not supported for measured maps.
    pub fn mirror(&mut self, _point: [f64; 3], _normal: [f64; 3]) -> UndulatorResult<()> {
        Err(UndulatorError::Validation(
            "mirror is not supported for a measured field map".to_string(),
        ))
    }

    /// Small-angle unmixing of the three components; angles in degrees,
    /// sine-linearized, original values on the right-hand side.
    pub fn correct_angles(
        &mut self,
        angxy: f64,
        angxz: f64,
        angyx: f64,
        angyz: f64,
        angzx: f64,
        angzy: f64,
    ) {
        let s = |deg: f64| deg.to_radians().sin();
        let (sxy, sxz, syx, syz, szx, szy) =
            (s(angxy), s(angxz), s(angyx), s(angyz), s(angzx), s(angzy));
        for ix in 0..self.px.len() {
            for iy in 0..self.py.len() {
                for iz in 0..self.pz.len() {
                    let idx = [ix, iy, iz];
                    let (bx, by, bz) = (self.bx[idx], self.by[idx], self.bz[idx]);
                    self.bx[idx] = bx - sxy * by - sxz * bz;
                    self.by[idx] = by - syx * bx - syz * bz;
                    self.bz[idx] = bz - szx * bx - szy * by;
                }
            }
        }
    }

    /// Cross-talk correction: a polynomial in the orthogonal components
    /// added to Bx.
    pub fn correct_cross_talk(&mut self, k0: f64, k1: f64, k2: f64) {
        for ix in 0..self.px.len() {
            for iy in 0..self.py.len() {
                for iz in 0..self.pz.len() {
                    let idx = [ix, iy, iz];
                    let by = self.by[idx];
                    let bz = self.bz[idx];
                    self.bx[idx] +=
                        (k0 + k1 * by + k2 * by * by + k0 + k1 * bz + k2 * bz * bz) / 2.0;
                }
            }
        }
    }

    fn same_grid(&self, other: &Self) -> bool {
        axes_match(&self.px, &other.px)
            && axes_match(&self.py, &other.py)
            && axes_match(&self.pz, &other.pz)
    }

    fn combine(&self, other: &Self, sign: f64) -> UndulatorResult<Self> {
        if !self.same_grid(other) {
            return Err(UndulatorError::Shape(
                "field maps are defined on different grids".to_string(),
            ));
        }
        let mut out = self.clone();
        for comp in 0..3 {
            let rhs = other.component(comp).clone();
            let lhs = out.component_mut(comp);
            *lhs = &*lhs + &(rhs * sign);
        }
        Ok(out)
    }

    /// Pointwise sum on a common grid.
    pub fn add(&self, other: &Self) -> UndulatorResult<Self> {
        self.combine(other, 1.0)
    }

    /// Pointwise difference on a common grid.
    pub fn sub(&self, other: &Self) -> UndulatorResult<Self> {
        self.combine(other, -1.0)
    }
}

impl FieldSource for FieldMapData {
    /// Interpolated field at the selected y plane: 1-D linear in z when
    /// the x axis is degenerate, bilinear in x–z otherwise.
    fn field_at(&self, point: [f64; 3]) -> UndulatorResult<[f64; 3]> {
        let iy = self.y_index;
        let mut out = [0.0; 3];
        if self.px.len() == 1 {
            for comp in 0..3 {
                let col: Vec<f64> = (0..self.pz.len())
                    .map(|iz| self.component(comp)[[0, iy, iz]])
                    .collect();
                out[comp] = interp1(&self.pz, &col, point[2]);
            }
        } else {
            for comp in 0..3 {
                let plane = self
                    .component(comp)
                    .index_axis(ndarray::Axis(1), iy)
                    .to_owned();
                out[comp] = interp2(&self.px, &self.pz, &plane, point[0], point[2]);
            }
        }
        Ok(out)
    }
}

fn unique_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    v.dedup_by(|a, b| (*a - *b).abs() < AXIS_TOL);
    v
}

fn axis_index(axis: &[f64], value: f64) -> usize {
    nearest_index(axis, value)
}

fn nearest_index(axis: &[f64], value: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &a) in axis.iter().enumerate() {
        let d = (a - value).abs();
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

fn axes_match(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < AXIS_TOL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rows() -> Vec<[f64; 6]> {
        // 3 x-values, 1 y-value, 5 z-values.
        let mut rows = Vec::new();
        for z in 0..5 {
            for x in 0..3 {
                let xf = (x as f64 - 1.0) * 2.0;
                let zf = z as f64 * 10.0;
                rows.push([xf, 0.0, zf, 0.01 * xf, 1.0 + 0.1 * zf, 0.0]);
            }
        }
        rows
    }

    #[test]
    fn test_grid_inference() {
        let data = FieldMapData::from_rows(&sample_rows(), None).unwrap();
        assert_eq!(data.px.len(), 3);
        assert_eq!(data.py.len(), 1);
        assert_eq!(data.pz.len(), 5);
    }

    #[test]
    fn test_row_count_mismatch_rejected() {
        let mut rows = sample_rows();
        rows.pop();
        let err = FieldMapData::from_rows(&rows, None).unwrap_err();
        assert!(matches!(err, UndulatorError::Shape(_)));
    }

    #[test]
    fn test_field_at_grid_nodes() {
        let data = FieldMapData::from_rows(&sample_rows(), None).unwrap();
        let b = data.field_at([2.0, 0.0, 30.0]).unwrap();
        assert!((b[0] - 0.02).abs() < 1e-12);
        assert!((b[1] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_field_interpolates_between_nodes() {
        let data = FieldMapData::from_rows(&sample_rows(), None).unwrap();
        let b = data.field_at([0.0, 0.0, 35.0]).unwrap();
        // By is linear in z: 1 + 0.1·35.
        assert!((b[1] - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_x_axis_uses_1d_interp() {
        let rows: Vec<[f64; 6]> = (0..5)
            .map(|z| [0.0, 0.0, z as f64, 0.0, z as f64 * 2.0, 0.0])
            .collect();
        let data = FieldMapData::from_rows(&rows, None).unwrap();
        let b = data.field_at([99.0, 0.0, 1.5]).unwrap();
        assert!((b[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_loader_skips_header_and_separator() {
        let text = "\
timestamp: 2026-08-06_10-00-00
magnet_name: test_device
gap[mm]: 13.6
--------------------------------
X[mm]\tY[mm]\tZ[mm]\tBx[T]\tBy[T]\tBz[T]
0.0\t0.0\t0.0\t0.0\t1.0\t0.0
0.0\t0.0\t1.0\t0.0\t1.1\t0.0
0.0\t0.0\t2.0\t0.0\t1.2\t0.0
";
        let data = FieldMapData::from_str_named(text, "inline", None).unwrap();
        assert_eq!(data.pz.len(), 3);
        let b = data.field_at([0.0, 0.0, 0.0]).unwrap();
        assert!((b[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_loader_accepts_seven_columns() {
        let text = "\
0.0 0.0 0.0 0.0 1.0 0.0 77.0
0.0 0.0 1.0 0.0 2.0 0.0 77.0
";
        let data = FieldMapData::from_str_named(text, "inline", None).unwrap();
        assert_eq!(data.pz.len(), 2);
        let b = data.field_at([0.0, 0.0, 1.0]).unwrap();
        assert!((b[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_superposition() {
        let a = FieldMapData::from_rows(&sample_rows(), None).unwrap();
        let b = FieldMapData::from_rows(&sample_rows(), None).unwrap();
        let sum = a.add(&b).unwrap();
        let diff = a.sub(&b).unwrap();
        let p = [1.0, 0.0, 22.0];
        let fa = a.field_at(p).unwrap();
        let fs = sum.field_at(p).unwrap();
        let fd = diff.field_at(p).unwrap();
        for i in 0..3 {
            assert!((fs[i] - 2.0 * fa[i]).abs() < 1e-12);
            assert!(fd[i].abs() < 1e-12);
        }
    }

    #[test]
    fn test_add_rejects_different_grids() {
        let a = FieldMapData::from_rows(&sample_rows(), None).unwrap();
        let mut b = FieldMapData::from_rows(&sample_rows(), None).unwrap();
        b.shift([0.0, 0.0, 5.0]);
        assert!(matches!(a.add(&b), Err(UndulatorError::Shape(_))));
    }

    #[test]
    fn test_shift_moves_sampling_frame() {
        let mut data = FieldMapData::from_rows(&sample_rows(), None).unwrap();
        let before = data.field_at([0.0, 0.0, 20.0]).unwrap();
        data.shift([0.0, 0.0, 100.0]);
        let after = data.field_at([0.0, 0.0, 120.0]).unwrap();
        for i in 0..3 {
            assert!((before[i] - after[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_rotate_and_mirror_unsupported() {
        let mut data = FieldMapData::from_rows(&sample_rows(), None).unwrap();
        assert!(data.rotate([0.0; 3], [0.0, 0.0, 1.0], 0.1).is_err());
        assert!(data.mirror([0.0; 3], [0.0, 1.0, 0.0]).is_err());
    }

    #[test]
    fn test_correct_cross_talk() {
        let rows = vec![[0.0, 0.0, 0.0, 0.0, 2.0, 3.0]];
        let mut data = FieldMapData::from_rows(&rows, None).unwrap();
        data.correct_cross_talk(0.1, 0.01, 0.001);
        let expected = (0.1 + 0.01 * 2.0 + 0.001 * 4.0 + 0.1 + 0.01 * 3.0 + 0.001 * 9.0) / 2.0;
        let b = data.field_at([0.0, 0.0, 0.0]).unwrap();
        assert!((b[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_correct_angles_mixes_components() {
        let rows = vec![[0.0, 0.0, 0.0, 0.5, 1.0, 0.0]];
        let mut data = FieldMapData::from_rows(&rows, None).unwrap();
        data.correct_angles(1.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let b = data.field_at([0.0, 0.0, 0.0]).unwrap();
        let expected = 0.5 - (1.0f64).to_radians().sin() * 1.0;
        assert!((b[0] - expected).abs() < 1e-12);
        assert!((b[1] - 1.0).abs() < 1e-12);
    }
}
