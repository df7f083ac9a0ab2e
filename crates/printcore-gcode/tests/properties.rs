use printcore_core::Position;
use printcore_gcode::{GcodeCommand, SimulatedPrinter};
use printcore_settings::{GeometryKind, MachineConfig};
use proptest::prelude::*;

proptest! {
    #[test]
    fn parser_never_panics(line in "[ -~]{0,64}") {
        let _ = GcodeCommand::parse(&line);
    }

    #[test]
    fn parsed_move_keeps_first_value(x in -500.0f64..500.0, y in -500.0f64..500.0) {
        let cmd = GcodeCommand::parse(&format!("G1 X{:.3} Y{:.3} X999", x, y)).unwrap();
        let got = cmd.get('X').unwrap();
        prop_assert!((got - x).abs() < 1e-3);
        prop_assert!((cmd.get('Y').unwrap() - y).abs() < 1e-3);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn cartesian_moves_stay_inside_soft_endstops(
        x in -400.0f64..400.0,
        y in -400.0f64..400.0,
        z in -400.0f64..400.0,
    ) {
        let mut printer = SimulatedPrinter::new(MachineConfig::default()).unwrap();
        let ctx = printer.context_mut();
        ctx.prepare_move(Position::new(x, y, z, 0.0), 3000.0).unwrap();
        let p = ctx.state.current_position;
        for v in [p.x, p.y, p.z] {
            prop_assert!((0.0..=200.0).contains(&v), "{}", p);
        }
    }

    #[test]
    fn delta_moves_land_where_commanded(angle in 0.0f64..360.0, radius in 0.0f64..85.0, z in 5.0f64..200.0) {
        let config = MachineConfig::for_geometry(GeometryKind::Delta);
        let mut printer = SimulatedPrinter::new(config).unwrap();
        printer.run_lines(&["G28"]);
        let (x, y) = (radius * angle.to_radians().cos(), radius * angle.to_radians().sin());
        printer.context_mut().prepare_move(Position::new(x, y, z, 0.0), 6000.0).unwrap();
        let nozzle = printer.machine.nozzle().unwrap();
        prop_assert!((nozzle.x - x).abs() < 1e-6);
        prop_assert!((nozzle.y - y).abs() < 1e-6);
        prop_assert!((nozzle.z - z).abs() < 1e-6);
    }
}
