use printcore_core::{KinematicsError, Position};
use printcore_kinematics::{build, DeltaKinematics, Kinematics, MeshGrid, ScaraKinematics};
use printcore_settings::{DeltaSettings, GeometryKind, MachineConfig, ScaraSettings};
use proptest::prelude::*;

const EPSILON: f64 = 1e-4;

fn assert_close(a: &Position, b: &Position) {
    assert!(
        (a.x - b.x).abs() < EPSILON && (a.y - b.y).abs() < EPSILON && (a.z - b.z).abs() < EPSILON,
        "expected {b}, got {a}"
    );
}

proptest! {
    #[test]
    fn cartesian_round_trip(x in -500.0f64..500.0, y in -500.0f64..500.0, z in -50.0f64..500.0) {
        let kin = build(&MachineConfig::default()).unwrap();
        let p = Position::new(x, y, z, 0.0);
        let back = kin.forward(&kin.inverse(&p).unwrap()).unwrap();
        assert_close(&back, &p);
    }

    #[test]
    fn delta_round_trip_inside_printable_disk(
        radius in 0.0f64..=90.0,
        angle in 0.0f64..360.0,
        z in 0.0f64..250.0,
    ) {
        let kin = DeltaKinematics::new(&DeltaSettings::default()).unwrap();
        let (sin, cos) = angle.to_radians().sin_cos();
        let p = Position::new(radius * cos, radius * sin, z, 0.0);
        let actuator = kin.inverse(&p).unwrap();
        prop_assert!(actuator.is_finite());
        let back = kin.forward(&actuator).unwrap();
        assert_close(&back, &p);
    }

    #[test]
    fn delta_round_trip_with_calibration(
        x in -60.0f64..60.0,
        y in -60.0f64..60.0,
        z in 0.0f64..200.0,
        angle_adj in -1.0f64..1.0,
        radius_adj in -2.0f64..2.0,
        rod_adj in -1.0f64..1.0,
    ) {
        let mut settings = DeltaSettings::default();
        settings.tower_adj = [angle_adj, -angle_adj, 0.0, radius_adj, 0.0, -radius_adj];
        settings.diagrod_adj = [rod_adj, 0.0, -rod_adj];
        let kin = DeltaKinematics::new(&settings).unwrap();
        let p = Position::new(x, y, z, 0.0);
        let back = kin.forward(&kin.inverse(&p).unwrap()).unwrap();
        assert_close(&back, &p);
    }

    #[test]
    fn scara_round_trip_inside_annulus(
        radius in 20.0f64..290.0,
        angle in 0.0f64..180.0,
        z in 0.0f64..100.0,
    ) {
        let settings = ScaraSettings::default();
        let kin = ScaraKinematics::new(&settings).unwrap();
        // Place the target relative to the shoulder so it is reachable.
        let (sin, cos) = angle.to_radians().sin_cos();
        let x = radius * cos + settings.offset[0];
        let y = radius * sin + settings.offset[1];
        let p = Position::new(x, y, z, 0.0);
        let back = kin.forward(&kin.inverse(&p).unwrap()).unwrap();
        assert_close(&back, &p);
    }

    #[test]
    fn mesh_interpolation_stays_within_samples(
        values in proptest::collection::vec(-1.0f64..1.0, 9),
        x in 0.0f64..=100.0,
        y in 0.0f64..=100.0,
    ) {
        let mut mesh = MeshGrid::new(3, 3, [0.0, 0.0], [100.0, 100.0]).unwrap();
        for (i, z) in values.iter().enumerate() {
            mesh.set(i % 3, i / 3, *z);
        }
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let z = mesh.interpolate(x, y);
        prop_assert!(z >= min - 1e-12 && z <= max + 1e-12);
    }
}

#[test]
fn delta_reach_boundary() {
    let config = MachineConfig::for_geometry(GeometryKind::Delta);
    let kin = build(&config).unwrap();
    let r = config.delta.printable_radius;

    for angle in [0.0f64, 45.0, 90.0, 210.0, 330.0] {
        let (sin, cos) = angle.to_radians().sin_cos();
        let edge = Position::new(r * cos, r * sin, 0.0, 0.0);
        let actuator = kin.inverse(&edge).unwrap();
        assert!(actuator.is_finite(), "edge at {angle}°");
    }

    // Beyond the reach of a rod the transform refuses instead of producing NaN.
    let rod_reach = config.delta.diagonal_rod + config.delta.radius + 1.0;
    let outside = Position::new(0.0, -rod_reach, 0.0, 0.0);
    assert!(matches!(
        kin.inverse(&outside),
        Err(KinematicsError::Unreachable { .. })
    ));
}

#[test]
fn scara_forward_of_home_angles_is_reachable() {
    let settings = ScaraSettings::default();
    let kin = ScaraKinematics::new(&settings).unwrap();
    let [a, b] = kin.home_angles();
    let home = kin
        .forward(&printcore_core::ActuatorPosition::new(a, b, 0.0))
        .unwrap();
    let again = kin.inverse(&home).unwrap();
    assert!((again[0] - a).abs() < 1e-6);
    assert!((again[1] - b).abs() < 1e-6);
}
