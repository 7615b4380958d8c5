// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Solver Context
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Handle registry and lifecycle for the magnetostatics service.
//!
//! Every geometry object lives in a process-local registry keyed by an
//! opaque [`Handle`]. Handles have exactly one owner; destroying an
//! object releases its children first. `field_at` results are stale after
//! any mutation until [`SolverContext::solve`] runs again.

use std::collections::HashMap;

use rayon::prelude::*;
use undulator_math::rotation::{self, Vec3};
use undulator_types::error::{UndulatorError, UndulatorResult};
use undulator_types::state::SolveReport;

use crate::element::{MagnetElement, MaterialSpec};

/// Opaque geometry handle issued by a [`SolverContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

/// Geometric transform applied to a handle, recursively for groups.
#[derive(Debug, Clone, Copy)]
pub enum Transform {
    Translate(Vec3),
    Rotate { point: Vec3, axis: Vec3, angle: f64 },
    Mirror { point: Vec3, normal: Vec3 },
}

enum SolverObject {
    Magnet(Box<MagnetElement>),
    Container(Vec<Handle>),
}

/// Process-local magnetostatics service.
#[derive(Default)]
pub struct SolverContext {
    objects: HashMap<u64, SolverObject>,
    next_id: u64,
}

impl SolverContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live handles, groups included.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.objects.contains_key(&handle.0)
    }

    fn insert(&mut self, obj: SolverObject) -> Handle {
        self.next_id += 1;
        let id = self.next_id;
        self.objects.insert(id, obj);
        Handle(id)
    }

    fn get(&self, handle: Handle) -> UndulatorResult<&SolverObject> {
        self.objects
            .get(&handle.0)
            .ok_or_else(|| UndulatorError::Solver(format!("unknown handle {}", handle.0)))
    }

    /// Rectangle-optimized magnet: center, dimensions, magnetization [T],
    /// subdivision counts.
    pub fn create_rect_magnet(
        &mut self,
        center: Vec3,
        dims: Vec3,
        magnetization: Vec3,
        subdivision: [usize; 3],
    ) -> Handle {
        let elem = MagnetElement::rectangular(center, dims, magnetization, subdivision);
        self.insert(SolverObject::Magnet(Box::new(elem)))
    }

    /// Thick convex polygon extruded along z, centered at `z_position`.
    pub fn create_thick_polygon(
        &mut self,
        vertices: Vec<[f64; 2]>,
        length: f64,
        z_position: f64,
        magnetization: Vec3,
        subdivision: [usize; 3],
    ) -> Handle {
        let elem =
            MagnetElement::thick_polygon(vertices, length, z_position, magnetization, subdivision);
        self.insert(SolverObject::Magnet(Box::new(elem)))
    }

    /// Bind a material to every magnet under `handle`. Returns the handle
    /// unchanged for call chaining.
    pub fn apply_material(
        &mut self,
        handle: Handle,
        material: MaterialSpec,
    ) -> UndulatorResult<Handle> {
        let ids = self.collect_magnets(handle)?;
        for id in ids {
            if let Some(SolverObject::Magnet(elem)) = self.objects.get_mut(&id) {
                elem.material = material.clone();
            }
        }
        Ok(handle)
    }

    /// Re-cell every magnet under `handle` with a new subdivision.
    pub fn subdivide(&mut self, handle: Handle, nsub: [usize; 3]) -> UndulatorResult<()> {
        let ids = self.collect_magnets(handle)?;
        for id in ids {
            if let Some(SolverObject::Magnet(elem)) = self.objects.get_mut(&id) {
                elem.set_subdivision(nsub);
            }
        }
        Ok(())
    }

    /// Group handles into a composite. The group owns its members.
    pub fn group(&mut self, members: Vec<Handle>) -> UndulatorResult<Handle> {
        for h in &members {
            self.get(*h)?;
        }
        Ok(self.insert(SolverObject::Container(members)))
    }

    /// Apply a transform to a handle, recursing into groups.
    pub fn apply_transform(&mut self, handle: Handle, trf: Transform) -> UndulatorResult<()> {
        let ids = self.collect_magnets(handle)?;
        match trf {
            Transform::Translate(v) => {
                for id in ids {
                    if let Some(SolverObject::Magnet(elem)) = self.objects.get_mut(&id) {
                        elem.translate(v);
                    }
                }
            }
            Transform::Rotate { point, axis, angle } => {
                let m = rotation::rotation_matrix(axis, angle)?;
                for id in ids {
                    if let Some(SolverObject::Magnet(elem)) = self.objects.get_mut(&id) {
                        elem.compose(&m, point, 1.0);
                    }
                }
            }
            Transform::Mirror { point, normal } => {
                let m = rotation::mirror_matrix(normal)?;
                for id in ids {
                    if let Some(SolverObject::Magnet(elem)) = self.objects.get_mut(&id) {
                        elem.compose(&m, point, -1.0);
                    }
                }
            }
        }
        Ok(())
    }

    /// Magnetic field [T] of the object at a point [mm].
    pub fn field_at(&self, handle: Handle, point: Vec3) -> UndulatorResult<Vec3> {
        let ids = self.collect_magnets(handle)?;
        let mut b = [0.0; 3];
        for id in ids {
            if let Some(SolverObject::Magnet(elem)) = self.objects.get(&id) {
                b = rotation::add(b, elem.field_at(point));
            }
        }
        Ok(b)
    }

    /// Field at many points. `nproc == None` requests the serial path;
    /// otherwise points are evaluated in parallel chunks of `chunksize`.
    pub fn field_at_many(
        &self,
        handle: Handle,
        points: &[Vec3],
        nproc: Option<usize>,
        chunksize: Option<usize>,
    ) -> UndulatorResult<Vec<Vec3>> {
        let ids = self.collect_magnets(handle)?;
        let elems: Vec<&MagnetElement> = ids
            .iter()
            .filter_map(|id| match self.objects.get(id) {
                Some(SolverObject::Magnet(elem)) => Some(elem.as_ref()),
                _ => None,
            })
            .collect();

        let eval = |p: &Vec3| -> Vec3 {
            let mut b = [0.0; 3];
            for elem in &elems {
                b = rotation::add(b, elem.field_at(*p));
            }
            b
        };

        match nproc {
            None | Some(0) | Some(1) => Ok(points.iter().map(eval).collect()),
            Some(_) => {
                let chunk = chunksize.unwrap_or(64).max(1);
                Ok(points
                    .par_chunks(chunk)
                    .flat_map_iter(|ps| ps.iter().map(eval).collect::<Vec<_>>())
                    .collect())
            }
        }
    }

    /// Relax susceptible magnetizations under mutual interaction.
    ///
    /// Fixed-point sweep over the magnets below `handle`: each element is
    /// driven by the field of all the others at its centroid. Stops when
    /// the largest magnetization update drops below `tol` [T]. A budget
    /// overrun is reported as best-effort, not as an error.
    pub fn solve(
        &mut self,
        handle: Handle,
        tol: f64,
        max_iter: usize,
    ) -> UndulatorResult<SolveReport> {
        let ids = self.collect_magnets(handle)?;
        let active: Vec<u64> = ids
            .iter()
            .copied()
            .filter(|id| match self.objects.get(id) {
                Some(SolverObject::Magnet(elem)) => {
                    !elem.material.is_passive() && !elem.is_empty()
                }
                _ => false,
            })
            .collect();

        if active.is_empty() {
            return Ok(SolveReport {
                converged: true,
                iterations: 0,
                residual: 0.0,
            });
        }

        let mut residual = f64::INFINITY;
        for iteration in 1..=max_iter.max(1) {
            residual = 0.0;
            for &id in &active {
                let centroid = match self.objects.get(&id) {
                    Some(SolverObject::Magnet(elem)) => elem.centroid(),
                    _ => continue,
                };
                let mut b_ext = [0.0; 3];
                for &other in &ids {
                    if other == id {
                        continue;
                    }
                    if let Some(SolverObject::Magnet(elem)) = self.objects.get(&other) {
                        b_ext = rotation::add(b_ext, elem.field_at(centroid));
                    }
                }
                if let Some(SolverObject::Magnet(elem)) = self.objects.get_mut(&id) {
                    residual = residual.max(elem.relax(b_ext));
                }
            }
            if residual < tol {
                return Ok(SolveReport {
                    converged: true,
                    iterations: iteration,
                    residual,
                });
            }
        }

        tracing::warn!(
            residual,
            max_iter,
            "magnetization relaxation did not converge; returning best-effort state"
        );
        Ok(SolveReport {
            converged: false,
            iterations: max_iter.max(1),
            residual,
        })
    }

    /// Destroy a handle, children before parent.
    pub fn destroy(&mut self, handle: Handle) -> UndulatorResult<()> {
        let obj = self
            .objects
            .remove(&handle.0)
            .ok_or_else(|| UndulatorError::Solver(format!("unknown handle {}", handle.0)))?;
        if let SolverObject::Container(members) = obj {
            for member in members {
                // Members may already be gone if the caller released them.
                let _ = self.destroy(member);
            }
        }
        Ok(())
    }

    /// Reset the registry, invalidating every outstanding handle.
    pub fn destroy_all(&mut self) {
        self.objects.clear();
    }

    /// Magnet element ids reachable from `handle` (groups flattened).
    fn collect_magnets(&self, handle: Handle) -> UndulatorResult<Vec<u64>> {
        let mut out = Vec::new();
        let mut stack = vec![handle];
        while let Some(h) = stack.pop() {
            match self.get(h)? {
                SolverObject::Magnet(_) => out.push(h.0),
                SolverObject::Container(members) => stack.extend(members.iter().copied()),
            }
        }
        Ok(out)
    }

    /// Shift a single magnet element; used for virtual shims.
    pub fn shift(&mut self, handle: Handle, v: Vec3) -> UndulatorResult<()> {
        self.apply_transform(handle, Transform::Translate(v))
    }
}
