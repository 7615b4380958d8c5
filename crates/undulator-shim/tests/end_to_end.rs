// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — End-to-End Scenarios
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Whole-pipeline scenarios: device construction through field analysis
//! and the shimming inverse problem.

use undulator_field::analysis::{calc_deflection_parameter, calc_field_amplitude};
use undulator_field::fieldmap::load_fieldmap;
use undulator_field::source::{FieldSource, ModelFieldSource};
use undulator_model::cassette::CassetteParams;
use undulator_model::device::{DeviceParams, DofUpdate, InsertionDeviceModel};
use undulator_solver::SolverContext;

fn delta_sabia_like(nr_periods: usize) -> InsertionDeviceModel {
    InsertionDeviceModel::delta(DeviceParams {
        nr_periods,
        period_length: 52.5,
        gap: 13.6,
        name: "delta_sabia".to_string(),
        cassette: CassetteParams {
            mr: 1.39,
            ksi_par: 0.0,
            ksi_per: 0.0,
            block_shape: vec![vec![
                [-15.0, 0.0],
                [15.0, 0.0],
                [15.0, 30.0],
                [-15.0, 30.0],
            ]],
            ..CassetteParams::default()
        },
        ..DeviceParams::default()
    })
    .unwrap()
}

#[test]
fn delta_sabia_vertical_mode_has_positive_kh() {
    let mut ctx = SolverContext::new();
    let mut model = delta_sabia_like(21);
    model.build(&mut ctx).unwrap();
    model.solve(&mut ctx, 1e-4, 10).unwrap();
    model
        .set_cassette_positions(
            &mut ctx,
            DofUpdate {
                dgv: Some(26.25),
                dp: Some(0.0),
                ..Default::default()
            },
        )
        .unwrap();

    let src = ModelFieldSource::from_device(&ctx, &model).unwrap();
    let amps = calc_field_amplitude(&src, 52.5, 21, None, None, 0.0, 0.0, 21).unwrap();
    assert!(
        amps.by_amp > amps.bx_amp.abs(),
        "expected vertical field dominance: by={}, bx={}",
        amps.by_amp,
        amps.bx_amp
    );
    let (kh, _kv) = calc_deflection_parameter(amps.bx_amp, amps.by_amp, 52.5);
    assert!(kh > 0.0, "Kh = {kh}");
    assert!((kh - 0.934 * amps.by_amp * 5.25).abs() < 1e-12);
}

#[test]
fn hybrid_planar_alternates_poles_and_straddles_origin() {
    let gap = 20.0;
    let period = 50.0;
    let pole_length = gap / 4.0;
    let mut ctx = SolverContext::new();
    let mut model = InsertionDeviceModel::planar(DeviceParams {
        nr_periods: 4,
        period_length: period,
        gap,
        name: "hybrid_planar".to_string(),
        cassette: CassetteParams {
            hybrid: true,
            pole_length: Some(pole_length),
            mr: 1.25,
            ksi_par: 0.0,
            ksi_per: 0.0,
            ..CassetteParams::default()
        },
        ..DeviceParams::default()
    })
    .unwrap();
    model.build(&mut ctx).unwrap();

    let cassette = model.cassette("cs").unwrap();
    let lengths = cassette.length_list();
    let block_len = 0.5 * period - pole_length - cassette.params().longitudinal_distance;
    for (idx, &len) in lengths.iter().enumerate() {
        if idx % 2 == 1 {
            assert!(cassette.is_pole(idx));
            assert!((len - pole_length).abs() < 1e-12, "pole {idx}: {len}");
        } else {
            assert!(!cassette.is_pole(idx));
            assert!((len - block_len).abs() < 1e-12, "block {idx}: {len}");
        }
    }

    // Composite bounding box straddles z = 0 symmetrically.
    let mut zmin = f64::INFINITY;
    let mut zmax = f64::NEG_INFINITY;
    for block in cassette.blocks() {
        let (_, _, _, _, lo, hi) = block.bounding_box();
        zmin = zmin.min(lo);
        zmax = zmax.max(hi);
    }
    assert!(
        (zmin + zmax).abs() < 1e-9,
        "bounding box not centered: [{zmin}, {zmax}]"
    );
}

#[test]
fn fieldmap_written_by_model_reloads_through_header() {
    let mut ctx = SolverContext::new();
    let mut model = delta_sabia_like(3);
    model.build(&mut ctx).unwrap();
    model
        .set_cassette_positions(
            &mut ctx,
            DofUpdate {
                dgv: Some(26.25),
                ..Default::default()
            },
        )
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("delta.dat");
    let path = path.to_str().unwrap();

    let src = ModelFieldSource::from_device(&ctx, &model).unwrap();
    let amps = calc_field_amplitude(&src, 52.5, 3, None, None, 0.0, 0.0, 31).unwrap();
    let (kh, kv) = calc_deflection_parameter(amps.bx_amp, amps.by_amp, 52.5);
    let header = undulator_field::fieldmap::FieldmapHeader {
        magnet_name: model.name().to_string(),
        gap: model.gap(),
        period_length: model.period_length(),
        nr_periods: model.nr_periods(),
        polarization: model.polarization_name().to_string(),
        field_phase_deg: amps.phase_xy.to_degrees(),
        k_horizontal: kh,
        k_vertical: kv,
        dofs: model
            .kind()
            .dof_list()
            .into_iter()
            .map(|(n, v)| (format!("{n}[mm]"), v))
            .collect(),
    };

    let xs = vec![-1.0, 0.0, 1.0];
    let ys = vec![0.0];
    let zs: Vec<f64> = (0..41).map(|i| -100.0 + i as f64 * 5.0).collect();
    undulator_field::fieldmap::save_fieldmap(
        &src,
        path,
        &xs,
        &ys,
        &zs,
        Some(&header),
        None,
        None,
    )
    .unwrap();

    let data = load_fieldmap(path, None).unwrap();
    assert_eq!(data.px.len(), 3);
    assert_eq!(data.pz.len(), 41);
    let direct = src.field_at([0.0, 0.0, 0.0]).unwrap();
    let loaded = data.field_at([0.0, 0.0, 0.0]).unwrap();
    for i in 0..3 {
        assert!((direct[i] - loaded[i]).abs() < 1e-9, "component {i}");
    }
}
