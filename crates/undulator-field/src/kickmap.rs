//! Kick-map generation: second-order transverse kicks and final
//! positions over a transverse launch grid, in the conventional
//! four-block text layout.

use std::fmt::Write as _;

use undulator_math::beam::BeamParameters;
use undulator_types::error::{UndulatorError, UndulatorResult};

use crate::analysis::calc_trajectory;
use crate::source::FieldSource;

const AUTHOR_LINE: &str = "# Author: SCPN Undulator Core";

/// Compute and write a kick map. For each (x, y) [mm] a trajectory is
/// launched with unit forward velocity from `zmin` to `zmax`; the
/// second-order kicks are `(x'/z')·(Bρ)²` in T²m², final positions in m.
/// Rows iterate y descending, the header row carries x in meters.
#[allow(clippy::too_many_arguments)]
pub fn save_kickmap(
    src: &dyn FieldSource,
    path: &str,
    energy: f64,
    xs: &[f64],
    ys: &[f64],
    zmin: f64,
    zmax: f64,
    rkstep: f64,
) -> UndulatorResult<()> {
    if xs.is_empty() || ys.is_empty() {
        return Err(UndulatorError::Validation(
            "kick map axes must be non-empty".to_string(),
        ));
    }
    let beam = BeamParameters::new(energy)?;
    let brho2 = beam.brho * beam.brho;

    // y rows descending.
    let mut ys_desc: Vec<f64> = ys.to_vec();
    ys_desc.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let ny = ys_desc.len();
    let nx = xs.len();
    let mut kick_x = vec![vec![0.0; nx]; ny];
    let mut kick_y = vec![vec![0.0; nx]; ny];
    let mut final_x = vec![vec![0.0; nx]; ny];
    let mut final_y = vec![vec![0.0; nx]; ny];

    for (iy, &y) in ys_desc.iter().enumerate() {
        for (ix, &x) in xs.iter().enumerate() {
            let traj = calc_trajectory(
                src,
                energy,
                [x, y, zmin, 0.0, 0.0, 1.0],
                zmax,
                rkstep,
                0.0,
                false,
            )?;
            let f = traj.final_point().ok_or_else(|| {
                UndulatorError::Validation("kick map trajectory produced no points".to_string())
            })?;
            kick_x[iy][ix] = f[3] / f[5] * brho2;
            kick_y[iy][ix] = f[4] / f[5] * brho2;
            final_x[iy][ix] = f[0];
            final_y[iy][ix] = f[1];
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "{AUTHOR_LINE}");
    let _ = writeln!(out, "#");
    let _ = writeln!(out, "# Total Length of Longitudinal Interval [m]");
    let _ = writeln!(out, "{}", (zmax - zmin) * 1e-3);
    let _ = writeln!(out, "# Number of Horizontal Points");
    let _ = writeln!(out, "{nx}");
    let _ = writeln!(out, "# Number of Vertical Points");
    let _ = writeln!(out, "{ny}");

    let blocks = [
        ("# Horizontal 2nd Order Kick [T2m2]", &kick_x),
        ("# Vertical 2nd Order Kick [T2m2]", &kick_y),
        ("# Horizontal Final Position [m]", &final_x),
        ("# Vertical Final Position [m]", &final_y),
    ];
    for (label, grid) in blocks {
        let _ = writeln!(out, "{label}");
        let _ = writeln!(out, "START");
        // Header row: x coordinates in meters.
        let mut header = String::new();
        for &x in xs {
            let _ = write!(header, "\t{:e}", x * 1e-3);
        }
        let _ = writeln!(out, "{header}");
        for (iy, &y) in ys_desc.iter().enumerate() {
            let mut row = format!("{:e}", y * 1e-3);
            for ix in 0..nx {
                let _ = write!(row, "\t{:e}", grid[iy][ix]);
            }
            let _ = writeln!(out, "{row}");
        }
    }

    std::fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ZeroField;

    impl FieldSource for ZeroField {
        fn field_at(&self, _p: [f64; 3]) -> UndulatorResult<[f64; 3]> {
            Ok([0.0; 3])
        }
    }

    #[test]
    fn test_zero_field_kickmap_structure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.txt");
        let path = path.to_str().unwrap();
        let xs = vec![-5.0, 0.0, 5.0];
        let ys = vec![-2.0, 2.0];
        save_kickmap(&ZeroField, path, 3.0, &xs, &ys, -100.0, 100.0, 1.0).unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.matches("START").count(), 4);
        assert!(contents.contains("# Horizontal 2nd Order Kick [T2m2]"));
        assert!(contents.contains("# Vertical Final Position [m]"));
        assert!(contents.contains("# Total Length of Longitudinal Interval [m]"));

        // Zero field: kicks vanish, final positions equal the launch grid.
        let start = contents.find("START").unwrap();
        let block: Vec<&str> = contents[start..].lines().skip(2).take(2).collect();
        for line in block {
            for token in line.split_whitespace().skip(1) {
                let v: f64 = token.parse().unwrap();
                assert!(v.abs() < 1e-12, "expected zero kick, got {v}");
            }
        }
        // y rows are descending.
        let lines: Vec<&str> = contents[start..].lines().collect();
        let y0: f64 = lines[2].split_whitespace().next().unwrap().parse().unwrap();
        let y1: f64 = lines[3].split_whitespace().next().unwrap().parse().unwrap();
        assert!(y0 > y1);
    }

    #[test]
    fn test_empty_grid_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.txt");
        let path = path.to_str().unwrap();
        assert!(save_kickmap(&ZeroField, path, 3.0, &[], &[0.0], -1.0, 1.0, 0.5).is_err());
    }
}
