//! End-to-end runs of the interpreter against the simulated machine

use printcore_communication::{checksum, frame_line, MemorySdCard};
use printcore_gcode::{BedPlane, SimulatedPrinter, StepOutcome};
use printcore_settings::{GeometryKind, LevelingKind, MachineConfig};

fn printer() -> SimulatedPrinter {
    SimulatedPrinter::new(MachineConfig::default()).unwrap()
}

fn position_line(lines: &[String]) -> &str {
    lines
        .iter()
        .find(|l| l.starts_with("X:"))
        .map(String::as_str)
        .expect("no position report")
}

fn oks(lines: &[String]) -> usize {
    lines.iter().filter(|l| l.as_str() == "ok").count()
}

#[test]
fn test_every_line_is_acknowledged_once() {
    let mut p = printer();
    let lines = p.run_lines(&["G90", "G21", "M82", "G92 E0", "M400"]);
    assert_eq!(lines, vec!["ok"; 5]);
}

#[test]
fn test_unknown_command_echoes_and_acks() {
    let mut p = printer();
    let lines = p.run_lines(&["M9999"]);
    assert_eq!(lines, vec!["echo:Unknown command: \"M9999\"", "ok"]);
}

#[test]
fn test_home_x_keeps_other_axes() {
    let mut p = printer();
    p.run_lines(&["G1 X50 Y20"]);
    let lines = p.run_lines(&["G28 X", "M114"]);
    assert!(position_line(&lines).starts_with("X:0.00 Y:20.00 Z:0.00 E:0.00 Count"));
    assert_eq!(oks(&lines), 2);
    assert!(p.machine.physical()[0].abs() < 1e-9);
    assert!(p.context().state.homed.get(printcore_core::Axis::X));
    assert!(!p.context().state.homed.get(printcore_core::Axis::Y));
}

#[test]
fn test_moves_clamped_to_soft_endstops() {
    let mut p = printer();
    let lines = p.run_lines(&["G1 X250 Y-5", "M114"]);
    assert!(position_line(&lines).starts_with("X:200.00 Y:0.00"));
}

#[test]
fn test_relative_moves() {
    let mut p = printer();
    let lines = p.run_lines(&["G91", "G1 X10 Y10", "G1 X5", "G90", "M114"]);
    assert!(position_line(&lines).starts_with("X:15.00 Y:10.00"));
}

#[test]
fn test_inches_convert_to_millimetres() {
    let mut p = printer();
    let lines = p.run_lines(&["G20", "G1 X2", "G21", "M114"]);
    assert!(position_line(&lines).starts_with("X:50.80"));
}

#[test]
fn test_cold_extrusion_is_frozen() {
    let mut p = printer();
    let lines = p.run_lines(&["G1 X10 E5"]);
    assert_eq!(lines, vec!["echo: cold extrusion prevented", "ok"]);
    let lines = p.run_lines(&["M114"]);
    assert!(position_line(&lines).starts_with("X:10.00 Y:0.00 Z:0.00 E:5.00"));
    assert_eq!(p.machine.extruder_position(), 5.0);
}

#[test]
fn test_full_circle_arc() {
    let mut p = printer();
    p.run_lines(&["G1 X50 Y50 F3000"]);
    p.machine.take_moves();

    let lines = p.run_lines(&["G2 X50 Y50 I10 J0", "M114"]);
    assert!(position_line(&lines).starts_with("X:50.00 Y:50.00"));

    let moves = p.machine.take_moves();
    assert!(moves.len() > 50, "{} segments", moves.len());
    let max_x = moves.iter().map(|m| m.target[0]).fold(f64::MIN, f64::max);
    assert!((max_x - 70.0).abs() < 0.1, "max x {}", max_x);
}

#[test]
fn test_closed_arc_with_uneven_offsets_is_full_circle() {
    let mut p = printer();
    p.run_lines(&["G1 X10.1 Y20.7 F3000"]);
    p.machine.take_moves();

    for (line, radius) in [("G2 I0.3 J0.2", 0.3f64.hypot(0.2)), ("G3 I0.1 J1.1", 0.1f64.hypot(1.1))] {
        let lines = p.run_lines(&[line, "M114"]);
        assert!(position_line(&lines).starts_with("X:10.10 Y:20.70"), "{}", line);

        let moves = p.machine.take_moves();
        assert!(moves.len() >= 2, "{}: {} segments", line, moves.len());
        let farthest = moves
            .iter()
            .map(|m| (m.target[0] - 10.1).hypot(m.target[1] - 20.7))
            .fold(0.0, f64::max);
        assert!((farthest - 2.0 * radius).abs() < 1e-6, "{}: farthest {}", line, farthest);
    }
}

/// Largest distance between the planned points of a clockwise R50 circle
/// and the exact circle, for the given correction interval
fn arc_drift(n_arc_correction: u32) -> f64 {
    let mut config = MachineConfig::default();
    config.motion.n_arc_correction = n_arc_correction;
    let mut p = SimulatedPrinter::new(config).unwrap();
    p.run_lines(&["G1 X50 Y100 F3000"]);
    p.machine.take_moves();

    let lines = p.run_lines(&["G2 I50 J0", "M114"]);
    assert!(position_line(&lines).starts_with("X:50.00 Y:100.00"));

    let moves = p.machine.take_moves();
    assert_eq!(moves.len(), 314);
    let theta = -std::f64::consts::TAU / 314.0;
    moves
        .iter()
        .enumerate()
        .map(|(k, m)| {
            let (sin, cos) = ((k + 1) as f64 * theta).sin_cos();
            let (x, y) = (100.0 - 50.0 * cos, 100.0 - 50.0 * sin);
            (m.target[0] - x).hypot(m.target[1] - y)
        })
        .fold(0.0, f64::max)
}

#[test]
fn test_arc_correction_bounds_drift() {
    let exact = arc_drift(1);
    let default = arc_drift(25);
    let rare = arc_drift(1000);

    assert!(exact < 1e-9, "exact {}", exact);
    assert!(default < 0.005, "default {}", default);
    assert!(rare > 0.01, "rare {}", rare);
    assert!(rare > 5.0 * default);
}

#[test]
fn test_arc_without_offsets_is_rejected() {
    let mut p = printer();
    let lines = p.run_lines(&["G2 X10 Y10"]);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("echo:Invalid parameter 'I'"));
    assert!(p.machine.moves().is_empty());
}

#[test]
fn test_delta_home_and_reach() {
    let config = MachineConfig::for_geometry(GeometryKind::Delta);
    let mut p = SimulatedPrinter::new(config).unwrap();

    let lines = p.run_lines(&["G28", "M114"]);
    assert!(position_line(&lines).starts_with("X:0.00 Y:0.00 Z:250.00"));

    p.machine.take_moves();
    let lines = p.run_lines(&["G1 X80 Y80 Z10"]);
    assert_eq!(lines, vec!["echo:Move out of reach", "ok"]);
    assert!(p.machine.take_moves().is_empty());

    p.run_lines(&["G1 X50 Y0 Z100 F6000"]);
    assert!(p.machine.take_moves().len() > 1);
    let nozzle = p.machine.nozzle().unwrap();
    assert!((nozzle.x - 50.0).abs() < 1e-6);
    assert!(nozzle.y.abs() < 1e-6);
    assert!((nozzle.z - 100.0).abs() < 1e-6);
}

#[test]
fn test_delta_reach_boundary() {
    let config = MachineConfig::for_geometry(GeometryKind::Delta);
    assert_eq!(config.delta.printable_radius, 90.0);
    let mut p = SimulatedPrinter::new(config).unwrap();
    p.run_lines(&["G28"]);
    p.machine.take_moves();

    // 54² + 72² = 90²
    let lines = p.run_lines(&["G1 X54 Y72 Z100 F6000"]);
    assert_eq!(lines, vec!["ok"]);
    assert!(!p.machine.take_moves().is_empty());
    let nozzle = p.machine.nozzle().unwrap();
    assert!((nozzle.x - 54.0).abs() < 1e-6);
    assert!((nozzle.y - 72.0).abs() < 1e-6);

    // radius 91
    let lines = p.run_lines(&["G1 X54.6 Y72.8 Z100", "M114"]);
    assert_eq!(lines[0], "echo:Move out of reach");
    assert!(position_line(&lines).starts_with("X:54.00 Y:72.00 Z:100.00"));
    assert!(p.machine.take_moves().is_empty());
}

#[test]
fn test_delta_geometry_commands_need_delta() {
    let mut p = printer();
    let lines = p.run_lines(&["M665 L250"]);
    assert_eq!(lines, vec!["echo:M665 not supported by this configuration", "ok"]);
}

#[test]
fn test_framing_errors_request_resend() {
    let mut p = printer();
    let good = frame_line(1, "G1 X5");
    let bad = format!("N1 G1 X5*{}", checksum("N1 G1 X5").wrapping_add(1));

    let lines = p.run_lines(&[&bad]);
    assert_eq!(
        lines,
        vec!["Error:checksum mismatch, Last Line: 0", "Resend: 1", "ok"]
    );
    let lines = p.run_lines(&[&good]);
    assert_eq!(lines, vec!["ok"]);
    assert_eq!(p.context().serial.last_line(), 1);
}

#[test]
fn test_temperature_report() {
    let mut p = printer();
    let lines = p.run_lines(&["M105"]);
    assert_eq!(lines, vec!["ok T:20.0 /0.0 B:20.0 /0.0 T0:20.0 /0.0 @:0 B@:0"]);
}

#[test]
fn test_heat_and_wait() {
    let mut p = printer();
    let lines = p.run_lines(&["M109 S200"]);
    assert_eq!(lines.first().map(String::as_str), Some("T:20.0 E:0 W:?"));
    assert_eq!(lines.last().map(String::as_str), Some("ok"));
    assert_eq!(oks(&lines), 1);
    assert!(lines.iter().all(|l| !l.contains("busy")));

    let lines = p.run_lines(&["M105"]);
    assert_eq!(
        lines,
        vec!["ok T:200.0 /200.0 B:20.0 /0.0 T0:200.0 /200.0 @:0 B@:0"]
    );
    assert!(p.context().print_timer.is_running());

    let lines = p.run_lines(&["G1 X10 E5"]);
    assert_eq!(lines, vec!["ok"]);
}

#[test]
fn test_heated_bed_required() {
    let mut p = SimulatedPrinter::builder(MachineConfig::default())
        .heated_bed(false)
        .build()
        .unwrap();
    let lines = p.run_lines(&["M140 S60"]);
    assert_eq!(lines, vec!["echo:Heated bed not supported by this configuration", "ok"]);
    let lines = p.run_lines(&["M105"]);
    assert_eq!(lines, vec!["ok T:20.0 /0.0 T0:20.0 /0.0 @:0"]);
}

#[test]
fn test_firmware_info() {
    let mut p = printer();
    let lines = p.run_lines(&["M115"]);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("FIRMWARE_NAME:printcore "));
    assert!(lines[0].contains("PROTOCOL_VERSION:1.0"));
    assert!(lines[0].ends_with("EXTRUDER_COUNT:1"));
}

#[test]
fn test_emergency_stop_halts() {
    let mut p = printer();
    let lines = p.run_lines(&["M112"]);
    assert_eq!(
        lines,
        vec!["echo:Killed by M112", "Error:Printer halted. kill() called!"]
    );
    assert!(p.context().is_halted());

    let lines = p.run_lines(&["G1 X10"]);
    assert!(lines.is_empty());
    assert_eq!(p.step(), StepOutcome::Halted);
}

#[test]
fn test_thermal_fault_stops_until_restart() {
    let mut p = printer();
    p.thermal.inject_fault("MAXTEMP triggered");
    p.step();
    let stopped = "Error:Printer stopped due to errors. Fix the error and use M999 to restart.";
    assert_eq!(p.output.take(), vec!["Error:MAXTEMP triggered", stopped]);

    let lines = p.run_lines(&["G1 X10", "M114"]);
    assert_eq!(lines[0], stopped);
    assert!(position_line(&lines).starts_with("X:0.00"));

    let lines = p.run_lines(&["M999"]);
    assert_eq!(lines, vec!["Resend: 1", "ok"]);
    let lines = p.run_lines(&["G1 X10", "M114"]);
    assert!(position_line(&lines).starts_with("X:10.00"));
}

#[test]
fn test_settings_store_and_restore() {
    let mut p = printer();
    let lines = p.run_lines(&["M206 X5", "M500"]);
    assert!(lines.contains(&"echo:Settings Stored".to_string()));

    let lines = p.run_lines(&["M502", "M503"]);
    assert!(lines.contains(&"echo:Hardcoded Default Settings Loaded".to_string()));
    assert!(lines.contains(&"echo:  M206 X0.00 Y0.00 Z0.00".to_string()));

    let lines = p.run_lines(&["M501", "M503"]);
    assert!(lines.contains(&"echo:Stored settings retrieved".to_string()));
    assert!(lines.contains(&"echo:  M206 X5.00 Y0.00 Z0.00".to_string()));
}

#[test]
fn test_probe_offset_range() {
    let mut p = printer();
    let lines = p.run_lines(&["M851 Z-2.5"]);
    assert_eq!(lines, vec!["echo:Z Offset : -2.50", "ok"]);
    let lines = p.run_lines(&["M851 Z-30"]);
    assert!(lines[0].starts_with("echo:Invalid parameter 'Z'"));
    assert_eq!(p.context().config.probe.z_offset, -2.5);
}

#[test]
fn test_tool_change_applies_offsets() {
    let mut config = MachineConfig::default();
    config.extruders.count = 2;
    config.extruders.offsets.push([20.0, 0.0, 0.0]);
    config.extruders.filament_diameter.push(1.75);
    let mut p = SimulatedPrinter::new(config.clone()).unwrap();

    let lines = p.run_lines(&["T1", "M114"]);
    assert_eq!(lines[0], "echo:No move on toolchange");
    assert_eq!(lines[1], "echo:Active Extruder: 1");
    assert!(position_line(&lines).starts_with("X:20.00"));

    let lines = p.run_lines(&["T2"]);
    assert_eq!(lines, vec!["echo:T2 Invalid extruder", "ok"]);

    let mut p = SimulatedPrinter::new(config).unwrap();
    p.run_lines(&["G28", "G1 X50 Y50"]);
    let lines = p.run_lines(&["T1", "M114"]);
    assert!(position_line(&lines).starts_with("X:50.00 Y:50.00"));
    assert!((p.machine.physical()[0] - 30.0).abs() < 1e-9);
    assert_eq!(p.context().state.active_tool, 1);
}

fn probing_config(kind: LevelingKind) -> MachineConfig {
    let mut config = MachineConfig::default();
    config.probe.enabled = true;
    config.leveling.kind = kind;
    config
}

#[test]
fn test_single_probe_on_flat_bed() {
    let mut p = SimulatedPrinter::new(probing_config(LevelingKind::None)).unwrap();
    let lines = p.run_lines(&["G28", "G30"]);
    let report = lines
        .iter()
        .find(|l| l.starts_with("Bed X: 0.000 Y: 0.000 Z: "))
        .expect("no probe report");
    let z: f64 = report.rsplit(' ').next().unwrap().parse().unwrap();
    assert!(z.abs() < 1e-3);
    assert!(!p.machine.probe_deployed());
}

#[test]
fn test_probe_requires_homing() {
    let mut p = SimulatedPrinter::new(probing_config(LevelingKind::Mesh)).unwrap();
    let lines = p.run_lines(&["G29"]);
    assert_eq!(lines, vec!["echo:Home X/Y/Z first", "ok"]);
}

#[test]
fn test_mesh_leveling_on_tilted_bed() {
    let mut p = SimulatedPrinter::new(probing_config(LevelingKind::Mesh)).unwrap();
    p.machine.set_bed(BedPlane {
        a: 0.01,
        b: 0.0,
        d: 0.0,
    });
    let lines = p.run_lines(&["G28", "G29"]);
    assert_eq!(lines.last().map(String::as_str), Some("ok"));
    assert!(p.context().leveling.is_active());

    let lines = p.run_lines(&["G29 S0"]);
    assert_eq!(lines[0], "echo:Bed leveling: On");
    assert_eq!(lines[1], "Num X,Y: 3,3");
    let rows = lines.iter().filter(|l| *l == "+0.150 +0.925 +1.700").count();
    assert_eq!(rows, 3);

    let lines = p.run_lines(&["M420 S0"]);
    assert_eq!(lines, vec!["echo:Bed leveling: Off", "ok"]);
}

/// Value following `key` in a whitespace separated report line
fn report_value(line: &str, key: &str) -> f64 {
    let mut words = line.split_whitespace();
    words.find(|w| *w == key).expect("missing key");
    words.next().expect("missing value").parse().unwrap()
}

#[test]
fn test_plane_leveling_reports_coefficients() {
    let mut p = SimulatedPrinter::new(probing_config(LevelingKind::PlaneGrid)).unwrap();
    p.machine.set_bed(BedPlane {
        a: 0.01,
        b: -0.005,
        d: 0.0,
    });
    let lines = p.run_lines(&["G28", "G29 V3"]);
    let eqn = lines
        .iter()
        .find(|l| l.starts_with("echo:Eqn coefficients: "))
        .expect("no plane equation");
    assert!((report_value(eqn, "a:") - 0.01).abs() < 1e-6, "{}", eqn);
    assert!((report_value(eqn, "b:") + 0.005).abs() < 1e-6, "{}", eqn);

    let samples = lines.iter().filter(|l| l.starts_with("Bed X: ")).count();
    assert_eq!(samples, 9);
    assert!(lines.iter().any(|l| l.starts_with("echo:Eqn coefficients: a: ")));
    assert!(lines.contains(&"Bed level correction matrix:".to_string()));
    assert!(p.context().leveling.is_active());
}

#[test]
fn test_sd_print() {
    let card = MemorySdCard::new();
    card.insert("part.gco", "G1 X10 ; travel\nG1 X20 Y5\n");
    let mut p = SimulatedPrinter::builder(MachineConfig::default())
        .sd_card(card)
        .build()
        .unwrap();

    let lines = p.run_lines(&["M20"]);
    assert_eq!(lines, vec!["Begin file list", "part.gco 26", "End file list", "ok"]);

    let lines = p.run_lines(&["M23 part.gco"]);
    assert_eq!(lines, vec!["File opened: part.gco Size: 26", "File selected", "ok"]);

    let lines = p.run_lines(&["M24"]);
    assert_eq!(lines[0], "ok");
    assert!(lines.contains(&"Done printing file".to_string()));
    assert_eq!(oks(&lines), 1);

    let lines = p.run_lines(&["M114", "M27"]);
    assert!(position_line(&lines).starts_with("X:20.00 Y:5.00"));
    assert!(lines.contains(&"SD printing byte 26/26".to_string()));
}

#[test]
fn test_sd_open_missing_file() {
    let mut p = SimulatedPrinter::builder(MachineConfig::default())
        .sd_card(MemorySdCard::new())
        .build()
        .unwrap();
    let lines = p.run_lines(&["M23 nothing.gco"]);
    assert_eq!(lines, vec!["echo:open failed, File: nothing.gco.", "ok"]);
}

#[test]
fn test_injected_script_runs_without_acks() {
    let mut p = printer();
    p.context_mut().injector.inject("G28 X\nM114");
    p.run_until_idle(1_000);
    let lines = p.output.take();
    assert_eq!(lines[0], "echo:enqueueing \"G28 X\"");
    assert!(position_line(&lines).starts_with("X:0.00"));
    assert_eq!(oks(&lines), 0);
}

#[test]
fn test_advanced_ok() {
    let mut config = MachineConfig::default();
    config.host.advanced_ok = true;
    let mut p = SimulatedPrinter::new(config).unwrap();
    let line = frame_line(1, "G90");
    let lines = p.run_lines(&[&line]);
    assert_eq!(lines, vec!["ok N1 P15 B3"]);
}
