// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Blocks
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! A single magnet block: one or more convex polygons in the xy-plane
//! extruded along z, with a magnetization vector and a material.
//!
//! The block owns one composite solver handle; re-magnetizing destroys
//! and re-creates it, which is the only mutation that invalidates cached
//! field values.

use serde::{Deserialize, Serialize};
use undulator_solver::{Handle, SolverContext, Transform};
use undulator_types::error::{UndulatorError, UndulatorResult};

use crate::material::Material;

/// Geometric tolerance for the axis-aligned-rectangle test [mm].
const RECT_TOL: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Convex polygons in the xy-plane [mm], one entry per subblock.
    shape: Vec<Vec<[f64; 2]>>,
    length: f64,
    longitudinal_position: f64,
    magnetization: [f64; 3],
    /// One (nx, ny, nz) triple per polygon.
    subdivision: Vec<[usize; 3]>,
    /// Allow the rectangle-optimized solver path for axis-aligned shapes.
    rectangular: bool,
    material: Material,
    pub name: String,
    /// Net translation applied after construction [mm].
    offset: [f64; 3],
    #[serde(skip)]
    handle: Option<Handle>,
}

impl Block {
    /// Multi-polygon constructor. Every polygon needs at least three
    /// vertices and must be convex; nonconvex blocks are expressed as a
    /// set of convex subblocks.
    pub fn new(
        shape: Vec<Vec<[f64; 2]>>,
        length: f64,
        longitudinal_position: f64,
        magnetization: [f64; 3],
        subdivision: Option<Vec<[usize; 3]>>,
        rectangular: bool,
        material: Material,
    ) -> UndulatorResult<Self> {
        if shape.is_empty() {
            return Err(UndulatorError::Validation(
                "block shape requires at least one polygon".to_string(),
            ));
        }
        if !length.is_finite() || length < 0.0 {
            return Err(UndulatorError::Validation(format!(
                "block length must be finite and >= 0, got {length}"
            )));
        }
        for (i, poly) in shape.iter().enumerate() {
            if poly.len() < 3 {
                return Err(UndulatorError::Validation(format!(
                    "polygon {i} has {} points, need >= 3",
                    poly.len()
                )));
            }
            if !is_convex(poly) {
                return Err(UndulatorError::Validation(format!(
                    "polygon {i} is not convex"
                )));
            }
        }
        let subdivision = match subdivision {
            Some(sub) => {
                if sub.len() != shape.len() {
                    return Err(UndulatorError::Shape(format!(
                        "subdivision entries ({}) must match polygons ({})",
                        sub.len(),
                        shape.len()
                    )));
                }
                sub
            }
            None => vec![[1, 1, 1]; shape.len()],
        };
        Ok(Block {
            shape,
            length,
            longitudinal_position,
            magnetization,
            subdivision,
            rectangular,
            material,
            name: String::new(),
            offset: [0.0; 3],
            handle: None,
        })
    }

    /// Single-polygon convenience constructor; normalizes the polygon
    /// into a one-element list.
    pub fn from_polygon(
        polygon: Vec<[f64; 2]>,
        length: f64,
        longitudinal_position: f64,
        magnetization: [f64; 3],
        subdivision: Option<[usize; 3]>,
        material: Material,
    ) -> UndulatorResult<Self> {
        Block::new(
            vec![polygon],
            length,
            longitudinal_position,
            magnetization,
            subdivision.map(|s| vec![s]),
            true,
            material,
        )
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn longitudinal_position(&self) -> f64 {
        self.longitudinal_position
    }

    pub fn magnetization(&self) -> [f64; 3] {
        self.magnetization
    }

    pub fn shape(&self) -> &[Vec<[f64; 2]>] {
        &self.shape
    }

    pub fn subdivision(&self) -> &[[usize; 3]] {
        &self.subdivision
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    /// Create the solver geometry. A zero-length block creates none.
    pub fn build(&mut self, ctx: &mut SolverContext) -> UndulatorResult<Option<Handle>> {
        if self.handle.is_some() {
            return Err(UndulatorError::Solver(
                "block already owns a solver handle".to_string(),
            ));
        }
        if self.length == 0.0 {
            return Ok(None);
        }

        let mut parts = Vec::with_capacity(self.shape.len());
        for (poly, &nsub) in self.shape.iter().zip(self.subdivision.iter()) {
            let handle = match axis_aligned_rect(poly) {
                Some((center, dims)) if self.rectangular => ctx.create_rect_magnet(
                    [center[0], center[1], self.longitudinal_position],
                    [dims[0], dims[1], self.length],
                    self.magnetization,
                    nsub,
                ),
                _ => ctx.create_thick_polygon(
                    poly.clone(),
                    self.length,
                    self.longitudinal_position,
                    self.magnetization,
                    nsub,
                ),
            };
            parts.push(handle);
        }

        let composite = if parts.len() == 1 {
            parts[0]
        } else {
            ctx.group(parts)?
        };
        let composite = self.material.apply_to(ctx, composite)?;

        if self.offset != [0.0; 3] {
            ctx.apply_transform(composite, Transform::Translate(self.offset))?;
        }
        self.handle = Some(composite);
        Ok(self.handle)
    }

    /// Drop the handle without touching the registry; used after a parent
    /// composite released the geometry transitively.
    pub(crate) fn forget_handle(&mut self) {
        self.handle = None;
    }

    /// Release the solver geometry, if any.
    pub fn release(&mut self, ctx: &mut SolverContext) -> UndulatorResult<()> {
        if let Some(handle) = self.handle.take() {
            ctx.destroy(handle)?;
        }
        Ok(())
    }

    /// Translate the block, composing onto the solver handle in place.
    pub fn shift(&mut self, ctx: &mut SolverContext, v: [f64; 3]) -> UndulatorResult<()> {
        self.offset = [
            self.offset[0] + v[0],
            self.offset[1] + v[1],
            self.offset[2] + v[2],
        ];
        if let Some(handle) = self.handle {
            ctx.apply_transform(handle, Transform::Translate(v))?;
        }
        Ok(())
    }

    /// Rotate the block about `point`.
    pub fn rotate(
        &mut self,
        ctx: &mut SolverContext,
        point: [f64; 3],
        axis: [f64; 3],
        angle: f64,
    ) -> UndulatorResult<()> {
        if let Some(handle) = self.handle {
            ctx.apply_transform(handle, Transform::Rotate { point, axis, angle })?;
        }
        Ok(())
    }

    /// Re-create the block with a new magnetization. The previous handle
    /// is destroyed; any cached field values are invalid afterwards.
    pub fn rebuild_with_magnetization(
        &mut self,
        ctx: &mut SolverContext,
        magnetization: [f64; 3],
    ) -> UndulatorResult<Option<Handle>> {
        let had_handle = self.handle.is_some();
        self.release(ctx)?;
        self.magnetization = magnetization;
        if had_handle {
            self.build(ctx)
        } else {
            Ok(None)
        }
    }

    /// `(xmin, xmax, ymin, ymax, zmin, zmax)` from the polygon points and
    /// the longitudinal extent, including accumulated translations.
    pub fn bounding_box(&self) -> (f64, f64, f64, f64, f64, f64) {
        let mut xmin = f64::INFINITY;
        let mut xmax = f64::NEG_INFINITY;
        let mut ymin = f64::INFINITY;
        let mut ymax = f64::NEG_INFINITY;
        for poly in &self.shape {
            for p in poly {
                xmin = xmin.min(p[0]);
                xmax = xmax.max(p[0]);
                ymin = ymin.min(p[1]);
                ymax = ymax.max(p[1]);
            }
        }
        (
            xmin + self.offset[0],
            xmax + self.offset[0],
            ymin + self.offset[1],
            ymax + self.offset[1],
            self.longitudinal_position - 0.5 * self.length + self.offset[2],
            self.longitudinal_position + 0.5 * self.length + self.offset[2],
        )
    }
}

/// Convexity check tolerant of collinear runs.
fn is_convex(poly: &[[f64; 2]]) -> bool {
    let n = poly.len();
    let mut sign = 0.0f64;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        let c = poly[(i + 2) % n];
        let cross = (b[0] - a[0]) * (c[1] - b[1]) - (b[1] - a[1]) * (c[0] - b[0]);
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

/// Detect an axis-aligned rectangle; returns (center, dims) in the plane.
fn axis_aligned_rect(poly: &[[f64; 2]]) -> Option<([f64; 2], [f64; 2])> {
    if poly.len() != 4 {
        return None;
    }
    let xs: Vec<f64> = poly.iter().map(|p| p[0]).collect();
    let ys: Vec<f64> = poly.iter().map(|p| p[1]).collect();
    let xmin = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let xmax = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let ymin = ys.iter().cloned().fold(f64::INFINITY, f64::min);
    let ymax = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    // Every vertex must sit on a corner.
    for p in poly {
        let on_x = (p[0] - xmin).abs() < RECT_TOL || (p[0] - xmax).abs() < RECT_TOL;
        let on_y = (p[1] - ymin).abs() < RECT_TOL || (p[1] - ymax).abs() < RECT_TOL;
        if !on_x || !on_y {
            return None;
        }
    }
    if xmax - xmin < RECT_TOL || ymax - ymin < RECT_TOL {
        return None;
    }
    Some((
        [0.5 * (xmin + xmax), 0.5 * (ymin + ymax)],
        [xmax - xmin, ymax - ymin],
    ))
}
