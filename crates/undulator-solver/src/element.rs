//! Uniformly magnetized magnet elements built from analytic cuboid cells.
//!
//! A magnet element carries a convex cross-section in the xy-plane, a
//! longitudinal extent, and a magnetization vector expressed in Tesla.
//! Field evaluation decomposes the element into cuboid cells and sums the
//! charged-plate field of every cell face. Geometry in mm, field in T.

use undulator_math::interp::interp1;
use undulator_math::rotation::{self, Mat3, Vec3};

/// Guard against the logarithmic singularity on plate edges.
const EDGE_EPS: f64 = 1e-12;

/// Magnetic material bound to an element: linear anisotropic
/// susceptibility about the easy axis, or a tabulated M(H) curve.
/// Both H and M tabulated in Tesla.
#[derive(Debug, Clone, Default)]
pub struct MaterialSpec {
    pub ksi_par: f64,
    pub ksi_per: f64,
    pub curve: Option<Vec<(f64, f64)>>,
}

impl MaterialSpec {
    pub fn is_passive(&self) -> bool {
        self.ksi_par == 0.0 && self.ksi_per == 0.0 && self.curve.is_none()
    }
}

/// One cuboid cell in the element's local frame.
#[derive(Debug, Clone, Copy)]
pub struct Cell {
    pub center: Vec3,
    pub half: Vec3,
}

/// A magnet element: cells, magnetization, material, and the accumulated
/// orthogonal transform `global = rot · local + tr`.
#[derive(Debug, Clone)]
pub struct MagnetElement {
    pub cells: Vec<Cell>,
    /// Remanent magnetization in the local frame [T].
    pub remanence: Vec3,
    /// Working magnetization in the local frame [T]; updated by solve().
    pub magnetization: Vec3,
    pub material: MaterialSpec,
    pub rot: Mat3,
    pub tr: Vec3,
    /// +1 for proper rotations, -1 after a mirror; fields are axial.
    pub axial_sign: f64,
    cross_section: Vec<[f64; 2]>,
    z_min: f64,
    z_max: f64,
    subdivision: [usize; 3],
}

impl MagnetElement {
    /// Rectangle-optimized element: exact cell grid, no containment test.
    pub fn rectangular(center: Vec3, dims: Vec3, magnetization: Vec3, nsub: [usize; 3]) -> Self {
        let hx = 0.5 * dims[0];
        let hy = 0.5 * dims[1];
        let cross_section = vec![
            [center[0] - hx, center[1] - hy],
            [center[0] + hx, center[1] - hy],
            [center[0] + hx, center[1] + hy],
            [center[0] - hx, center[1] + hy],
        ];
        let mut elem = MagnetElement {
            cells: Vec::new(),
            remanence: magnetization,
            magnetization,
            material: MaterialSpec::default(),
            rot: rotation::IDENTITY,
            tr: [0.0; 3],
            axial_sign: 1.0,
            cross_section,
            z_min: center[2] - 0.5 * dims[2],
            z_max: center[2] + 0.5 * dims[2],
            subdivision: sanitize_subdivision(nsub),
        };
        elem.rebuild_cells_rect(center, dims);
        elem
    }

    /// Thick-polygon element: cells from the bounding-box grid whose
    /// centers lie inside the convex cross-section.
    pub fn thick_polygon(
        vertices: Vec<[f64; 2]>,
        length: f64,
        z_position: f64,
        magnetization: Vec3,
        nsub: [usize; 3],
    ) -> Self {
        let mut elem = MagnetElement {
            cells: Vec::new(),
            remanence: magnetization,
            magnetization,
            material: MaterialSpec::default(),
            rot: rotation::IDENTITY,
            tr: [0.0; 3],
            axial_sign: 1.0,
            cross_section: vertices,
            z_min: z_position - 0.5 * length,
            z_max: z_position + 0.5 * length,
            subdivision: sanitize_subdivision(nsub),
        };
        elem.rebuild_cells_polygon();
        elem
    }

    pub fn set_subdivision(&mut self, nsub: [usize; 3]) {
        self.subdivision = sanitize_subdivision(nsub);
        self.rebuild_cells_polygon();
    }

    fn rebuild_cells_rect(&mut self, center: Vec3, dims: Vec3) {
        let [nx, ny, nz] = self.subdivision;
        self.cells.clear();
        if dims[2] <= 0.0 {
            return;
        }
        let step = [
            dims[0] / nx as f64,
            dims[1] / ny as f64,
            dims[2] / nz as f64,
        ];
        for ix in 0..nx {
            for iy in 0..ny {
                for iz in 0..nz {
                    self.cells.push(Cell {
                        center: [
                            center[0] - 0.5 * dims[0] + (ix as f64 + 0.5) * step[0],
                            center[1] - 0.5 * dims[1] + (iy as f64 + 0.5) * step[1],
                            center[2] - 0.5 * dims[2] + (iz as f64 + 0.5) * step[2],
                        ],
                        half: [0.5 * step[0], 0.5 * step[1], 0.5 * step[2]],
                    });
                }
            }
        }
    }

    fn rebuild_cells_polygon(&mut self) {
        let [nx, ny, nz] = self.subdivision;
        self.cells.clear();
        let length = self.z_max - self.z_min;
        if length <= 0.0 || self.cross_section.len() < 3 {
            return;
        }

        let (mut xmin, mut xmax) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut ymin, mut ymax) = (f64::INFINITY, f64::NEG_INFINITY);
        for p in &self.cross_section {
            xmin = xmin.min(p[0]);
            xmax = xmax.max(p[0]);
            ymin = ymin.min(p[1]);
            ymax = ymax.max(p[1]);
        }
        let step = [
            (xmax - xmin) / nx as f64,
            (ymax - ymin) / ny as f64,
            length / nz as f64,
        ];
        for ix in 0..nx {
            for iy in 0..ny {
                let cx = xmin + (ix as f64 + 0.5) * step[0];
                let cy = ymin + (iy as f64 + 0.5) * step[1];
                if !point_in_convex_polygon(&self.cross_section, [cx, cy]) {
                    continue;
                }
                for iz in 0..nz {
                    self.cells.push(Cell {
                        center: [cx, cy, self.z_min + (iz as f64 + 0.5) * step[2]],
                        half: [0.5 * step[0], 0.5 * step[1], 0.5 * step[2]],
                    });
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cell-weighted centroid in global coordinates.
    pub fn centroid(&self) -> Vec3 {
        if self.cells.is_empty() {
            return self.tr;
        }
        let mut c = [0.0; 3];
        for cell in &self.cells {
            c = rotation::add(c, cell.center);
        }
        let c = rotation::scale(c, 1.0 / self.cells.len() as f64);
        rotation::add(rotation::mat_vec(&self.rot, c), self.tr)
    }

    /// Compose a further orthogonal transform `p → m·p` about `point`.
    pub fn compose(&mut self, m: &Mat3, point: Vec3, det: f64) {
        self.rot = rotation::mat_mat(m, &self.rot);
        let shifted = rotation::sub(self.tr, point);
        self.tr = rotation::add(rotation::mat_vec(m, shifted), point);
        self.axial_sign *= det;
    }

    pub fn translate(&mut self, v: Vec3) {
        self.tr = rotation::add(self.tr, v);
    }

    /// Magnetic field [T] of this element at a global point [mm].
    pub fn field_at(&self, p: Vec3) -> Vec3 {
        if self.cells.is_empty() {
            return [0.0; 3];
        }
        let rt = rotation::transpose(&self.rot);
        let p_loc = rotation::mat_vec(&rt, rotation::sub(p, self.tr));

        let mut b = [0.0; 3];
        for cell in &self.cells {
            let rel = rotation::sub(p_loc, cell.center);
            let contrib = cuboid_field(rel, cell.half, self.magnetization);
            b = rotation::add(b, contrib);
        }
        rotation::scale(rotation::mat_vec(&self.rot, b), self.axial_sign)
    }

    /// Update the working magnetization from the external field sampled at
    /// the element centroid, expressed in global coordinates. Returns the
    /// magnitude of the change.
    pub fn relax(&mut self, b_external: Vec3) -> f64 {
        if self.material.is_passive() {
            return 0.0;
        }
        let rt = rotation::transpose(&self.rot);
        let b_loc = rotation::scale(rotation::mat_vec(&rt, b_external), self.axial_sign);

        let new_m = if let Some(curve) = &self.material.curve {
            // Soft tabulated material: magnetization follows the local
            // field direction with magnitude M(|H|).
            let h_mag = rotation::norm(b_loc);
            if h_mag <= 0.0 {
                [0.0; 3]
            } else {
                let hs: Vec<f64> = curve.iter().map(|&(h, _)| h).collect();
                let ms: Vec<f64> = curve.iter().map(|&(_, m)| m).collect();
                let m_mag = interp1(&hs, &ms, h_mag);
                rotation::scale(b_loc, m_mag / h_mag)
            }
        } else {
            let easy = match rotation::normalize(self.remanence) {
                Ok(u) => u,
                Err(_) => [0.0, 1.0, 0.0],
            };
            let b_par = rotation::scale(easy, rotation::dot(b_loc, easy));
            let b_per = rotation::sub(b_loc, b_par);
            rotation::add(
                self.remanence,
                rotation::add(
                    rotation::scale(b_par, self.material.ksi_par),
                    rotation::scale(b_per, self.material.ksi_per),
                ),
            )
        };

        let delta = rotation::norm(rotation::sub(new_m, self.magnetization));
        self.magnetization = new_m;
        delta
    }
}

fn sanitize_subdivision(nsub: [usize; 3]) -> [usize; 3] {
    [nsub[0].max(1), nsub[1].max(1), nsub[2].max(1)]
}

/// Winding test specialized to convex polygons: the point must lie on the
/// same side of every edge. Boundary points count as inside.
pub fn point_in_convex_polygon(poly: &[[f64; 2]], p: [f64; 2]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0f64;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        let cross = (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0]);
        if cross.abs() < 1e-12 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if sign != cross.signum() {
            return false;
        }
    }
    true
}

/// Field [T] of a uniformly magnetized cuboid at `r` relative to its
/// center, with half-dimensions `half` and magnetization `j` [T].
///
/// Superposition of charged-plate pairs, one pair per magnetization
/// component; inside the cuboid the magnetization term is added so that
/// `B = μ0·H + J` holds across the boundary.
pub fn cuboid_field(r: Vec3, half: Vec3, j: Vec3) -> Vec3 {
    let mut b = [0.0; 3];
    for axis in 0..3 {
        if j[axis] == 0.0 {
            continue;
        }
        let contrib = plate_pair_field(r, half, axis, j[axis]);
        b = rotation::add(b, contrib);
    }

    let inside = r[0].abs() <= half[0] && r[1].abs() <= half[1] && r[2].abs() <= half[2];
    if inside {
        b = rotation::add(b, j);
    }
    b
}

/// Field of the ±σ plate pair normal to `axis` on a cuboid, σ = j [T].
fn plate_pair_field(r: Vec3, half: Vec3, axis: usize, j: f64) -> Vec3 {
    let u = (axis + 1) % 3;
    let v = (axis + 2) % 3;

    // Plate frame: (x, y, z) = (r[u], r[v], r[axis]); plates at z = ±c.
    let x = r[u];
    let y = r[v];
    let z = r[axis];
    let a = half[u];
    let b_half = half[v];
    let c = half[axis];

    let mut hx = 0.0;
    let mut hy = 0.0;
    let mut hz = 0.0;
    for (z_s, sigma) in [(c, j), (-c, -j)] {
        let zz = z - z_s;
        for (i, xi) in [(0, x + a), (1, x - a)] {
            for (k, yk) in [(0, y + b_half), (1, y - b_half)] {
                let s = if (i + k) % 2 == 0 { 1.0 } else { -1.0 };
                let rr = (xi * xi + yk * yk + zz * zz).sqrt();
                let ln_x = (yk + rr).max(EDGE_EPS).ln();
                let ln_y = (xi + rr).max(EDGE_EPS).ln();
                // Principal-value arctangent: the branch carries the
                // field jump across the charged sheet.
                let q = zz * rr;
                let at = if q == 0.0 {
                    (xi * yk).signum() * std::f64::consts::FRAC_PI_2
                } else {
                    (xi * yk / q).atan()
                };
                hx -= sigma * s * ln_x;
                hy -= sigma * s * ln_y;
                hz += sigma * s * at;
            }
        }
    }

    let scale = 1.0 / (4.0 * std::f64::consts::PI);
    let mut out = [0.0; 3];
    out[u] = hx * scale;
    out[v] = hy * scale;
    out[axis] = hz * scale;
    out
}
