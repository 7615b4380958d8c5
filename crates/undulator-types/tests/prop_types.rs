// ─────────────────────────────────────────────────────────────────────
// SCPN Undulator Core — Property-Based Tests (proptest) for undulator-types
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for undulator-types using proptest.
//!
//! Covers: ShimmingConfig validation/serialization, Trajectory bookkeeping.

use proptest::prelude::*;
use undulator_types::config::ShimmingConfig;
use undulator_types::state::Trajectory;

proptest! {
    /// Any config with a valid window, znpts >= 2 and positive steps passes
    /// validation and survives a JSON round trip.
    #[test]
    fn config_roundtrip(
        zmin in -2000.0f64..-1.0,
        span in 2.0f64..4000.0,
        znpts in 2usize..10_000,
        rkstep in 0.01f64..5.0,
        energy in 0.5f64..8.0,
    ) {
        let cfg = ShimmingConfig {
            zmin,
            zmax: zmin + span,
            znpts,
            rkstep,
            energy,
            ..Default::default()
        };
        prop_assert!(cfg.validate().is_ok());

        let json = serde_json::to_string(&cfg).unwrap();
        let back: ShimmingConfig = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back.znpts, cfg.znpts);
        prop_assert!((back.zmin - cfg.zmin).abs() < 1e-12);
        prop_assert!((back.zmax - cfg.zmax).abs() < 1e-12);
        prop_assert!((back.rkstep - cfg.rkstep).abs() < 1e-12);
    }

    /// An inverted window never validates.
    #[test]
    fn config_inverted_window_rejected(
        zmin in -100.0f64..100.0,
        span in 0.0f64..50.0,
    ) {
        let cfg = ShimmingConfig {
            zmin,
            zmax: zmin - span,
            ..Default::default()
        };
        prop_assert!(cfg.validate().is_err());
    }

    /// Trajectory arrays stay mutually consistent under pushes.
    #[test]
    fn trajectory_arrays_consistent(n in 0usize..200) {
        let mut traj = Trajectory::default();
        for i in 0..n {
            let t = i as f64;
            traj.push(t, [t, -t, 2.0 * t, 0.0, 0.0, 1.0]);
        }
        prop_assert_eq!(traj.len(), n);
        prop_assert_eq!(traj.s.len(), n);
        prop_assert_eq!(traj.x.len(), n);
        prop_assert_eq!(traj.dzds.len(), n);
        if n > 0 {
            let f = traj.final_point().unwrap();
            prop_assert!((f[2] - 2.0 * (n as f64 - 1.0)).abs() < 1e-12);
        }
    }
}
