// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Property-Based Tests (proptest) for undulator-field
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for field-map round trips and superposition.

use proptest::prelude::*;
use undulator_field::data::FieldMapData;
use undulator_field::fieldmap::{load_fieldmap, save_fieldmap};
use undulator_field::source::FieldSource;

#[derive(Clone, Copy)]
struct PolyField {
    a: f64,
    b: f64,
    c: f64,
}

impl FieldSource for PolyField {
    fn field_at(&self, p: [f64; 3]) -> undulator_types::error::UndulatorResult<[f64; 3]> {
        Ok([
            self.a * p[0] + self.c,
            self.b * p[2] + self.a,
            self.c * p[0] * 0.1 + self.b,
        ])
    }
}

fn grid_rows(nx: usize, nz: usize, field: PolyField) -> Vec<[f64; 6]> {
    let mut rows = Vec::new();
    for iz in 0..nz {
        for ix in 0..nx {
            let x = ix as f64 * 2.0 - nx as f64;
            let z = iz as f64 * 5.0 - 2.5 * nz as f64;
            let b = field.field_at([x, 0.0, z]).unwrap();
            rows.push([x, 0.0, z, b[0], b[1], b[2]]);
        }
    }
    rows
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// save_fieldmap → load_fieldmap reproduces axes and node values.
    #[test]
    fn fieldmap_roundtrip(
        nx in 1usize..5,
        nz in 2usize..12,
        a in -0.5f64..0.5,
        b in -0.5f64..0.5,
    ) {
        let field = PolyField { a, b, c: 0.1 };
        let xs: Vec<f64> = (0..nx).map(|i| i as f64 * 2.0 - nx as f64).collect();
        let ys = vec![0.0];
        let zs: Vec<f64> = (0..nz).map(|i| i as f64 * 5.0 - 2.5 * nz as f64).collect();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.dat");
        let path = path.to_str().unwrap();
        save_fieldmap(&field, path, &xs, &ys, &zs, None, None, None).unwrap();
        let data = load_fieldmap(path, None).unwrap();

        prop_assert_eq!(data.px.len(), nx);
        prop_assert_eq!(data.pz.len(), nz);
        for &x in &xs {
            for &z in &zs {
                let expected = field.field_at([x, 0.0, z]).unwrap();
                let got = data.field_at([x, 0.0, z]).unwrap();
                for i in 0..3 {
                    prop_assert!((expected[i] - got[i]).abs() < 1e-9,
                        "mismatch at ({}, {}) comp {}", x, z, i);
                }
            }
        }
    }

    /// (A + B).field_at == A.field_at + B.field_at on the common grid.
    #[test]
    fn superposition_pointwise(
        nx in 2usize..5,
        nz in 2usize..8,
        a in -1.0f64..1.0,
        b in -1.0f64..1.0,
        px in 0.0f64..1.0,
        pz in 0.0f64..1.0,
    ) {
        let f1 = PolyField { a, b: 0.2, c: -0.3 };
        let f2 = PolyField { a: 0.1, b, c: 0.4 };
        let d1 = FieldMapData::from_rows(&grid_rows(nx, nz, f1), None).unwrap();
        let d2 = FieldMapData::from_rows(&grid_rows(nx, nz, f2), None).unwrap();
        let sum = d1.add(&d2).unwrap();

        // Probe inside the grid, off the nodes.
        let x = -(nx as f64) + px * 2.0 * (nx as f64 - 1.0);
        let z = -2.5 * nz as f64 + pz * 5.0 * (nz as f64 - 1.0);
        let b1 = d1.field_at([x, 0.0, z]).unwrap();
        let b2 = d2.field_at([x, 0.0, z]).unwrap();
        let bs = sum.field_at([x, 0.0, z]).unwrap();
        for i in 0..3 {
            prop_assert!((bs[i] - b1[i] - b2[i]).abs() < 1e-9);
        }
    }
}
