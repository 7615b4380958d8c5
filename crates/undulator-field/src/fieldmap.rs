// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Field Map Files
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Deterministic field-map text layouts.
//!
//! Field maps iterate rows z-outermost, y-middle, x-innermost; the
//! spectra layout leads with the step/count line and keeps x innermost.

use std::fmt::Write as _;

use undulator_types::error::{UndulatorError, UndulatorResult};

use crate::data::FieldMapData;
use crate::source::FieldSource;

const SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

/// Header metadata written ahead of the field rows.
#[derive(Debug, Clone)]
pub struct FieldmapHeader {
    pub magnet_name: String,
    pub gap: f64,
    pub period_length: f64,
    pub nr_periods: usize,
    pub polarization: String,
    pub field_phase_deg: f64,
    pub k_horizontal: f64,
    pub k_vertical: f64,
    /// Variant-specific DOFs in display order, e.g. ("dP[mm]", 0.0).
    pub dofs: Vec<(String, f64)>,
}

impl FieldmapHeader {
    fn render(&self) -> String {
        let mut out = String::new();
        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let _ = writeln!(out, "timestamp:\t{timestamp}");
        let _ = writeln!(out, "magnet_name:\t{}", self.magnet_name);
        let _ = writeln!(out, "gap[mm]:\t{}", self.gap);
        let _ = writeln!(out, "period_length[mm]:\t{}", self.period_length);
        let _ = writeln!(out, "nr_periods:\t{}", self.nr_periods);
        let _ = writeln!(out, "polarization:\t{}", self.polarization);
        let _ = writeln!(out, "field_phase[deg]:\t{}", self.field_phase_deg);
        let _ = writeln!(out, "K_Horizontal:\t{}", self.k_horizontal);
        let _ = writeln!(out, "K_Vertical:\t{}", self.k_vertical);
        let k = (self.k_horizontal * self.k_horizontal + self.k_vertical * self.k_vertical).sqrt();
        let _ = writeln!(out, "K:\t{k}");
        for (name, value) in &self.dofs {
            let _ = writeln!(out, "{name}:\t{value}");
        }
        let _ = writeln!(out, "{SEPARATOR}");
        out
    }
}

/// Write a field map sampled on the given axes [mm]. The `(nproc,
/// chunksize)` hints pass through unchanged to the source's evaluation
/// backend; `None` requests the serial path.
#[allow(clippy::too_many_arguments)]
pub fn save_fieldmap(
    src: &dyn FieldSource,
    path: &str,
    xs: &[f64],
    ys: &[f64],
    zs: &[f64],
    header: Option<&FieldmapHeader>,
    nproc: Option<usize>,
    chunksize: Option<usize>,
) -> UndulatorResult<()> {
    if xs.is_empty() || ys.is_empty() || zs.is_empty() {
        return Err(UndulatorError::Validation(
            "field map axes must be non-empty".to_string(),
        ));
    }

    let mut points = Vec::with_capacity(xs.len() * ys.len() * zs.len());
    for &z in zs {
        for &y in ys {
            for &x in xs {
                points.push([x, y, z]);
            }
        }
    }
    let field = src.field_at_many(&points, nproc, chunksize)?;

    let mut out = String::new();
    if let Some(header) = header {
        out.push_str(&header.render());
    }
    out.push_str("X[mm]\tY[mm]\tZ[mm]\tBx[T]\tBy[T]\tBz[T]\n");
    for (p, b) in points.iter().zip(field.iter()) {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            p[0], p[1], p[2], b[0], b[1], b[2]
        );
    }
    std::fs::write(path, out)?;
    Ok(())
}

/// Load a field map produced by `save_fieldmap` (or a measurement in the
/// same layout) into a data source.
pub fn load_fieldmap(path: &str, selected_y: Option<f64>) -> UndulatorResult<FieldMapData> {
    FieldMapData::from_file(path, selected_y)
}

/// Spectra layout: `xstep ystep zstep nx ny nz` on the first line, then
/// one `bx by bz` row per point, z outermost and x innermost.
pub fn save_fieldmap_spectra(
    src: &dyn FieldSource,
    path: &str,
    xs: &[f64],
    ys: &[f64],
    zs: &[f64],
) -> UndulatorResult<()> {
    if xs.is_empty() || ys.is_empty() || zs.is_empty() {
        return Err(UndulatorError::Validation(
            "field map axes must be non-empty".to_string(),
        ));
    }
    let step = |axis: &[f64]| if axis.len() > 1 { axis[1] - axis[0] } else { 0.0 };

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} {} {} {} {}",
        step(xs),
        step(ys),
        step(zs),
        xs.len(),
        ys.len(),
        zs.len()
    );
    for &z in zs {
        for &y in ys {
            for &x in xs {
                let b = src.field_at([x, y, z])?;
                let _ = writeln!(out, "{}\t{}\t{}", b[0], b[1], b[2]);
            }
        }
    }
    std::fs::write(path, out)?;
    Ok(())
}
