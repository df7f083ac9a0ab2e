use clap::Parser;
use printcore::cli::{drive, load_config, summary, Args};
use printcore::{GeometryKind, MachineConfig, SimulatedPrinter};
use printcore_gcode::StepOutcome;

#[test]
fn test_geometry_flag_selects_defaults() {
    let args = Args::try_parse_from(["printcore", "--geometry", "delta", "--advanced-ok"]).unwrap();
    let config = load_config(&args).unwrap();
    assert_eq!(config.geometry, GeometryKind::Delta);
    assert_eq!(config.axes.z.max_pos, 250.0);
    assert!(config.host.advanced_ok);
}

#[test]
fn test_config_file_with_geometry_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("machine.toml");
    let mut config = MachineConfig::default();
    config.axes.x.max_pos = 300.0;
    config.save_to_file(&path).unwrap();

    let args = Args::try_parse_from([
        "printcore",
        "--config",
        path.to_str().unwrap(),
        "--geometry",
        "corexy",
    ])
    .unwrap();
    let loaded = load_config(&args).unwrap();
    assert_eq!(loaded.geometry, GeometryKind::CoreXY);
    assert_eq!(loaded.axes.x.max_pos, 300.0);
}

#[test]
fn test_missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let args = Args::try_parse_from(["printcore", "--config", path.to_str().unwrap()]).unwrap();
    assert!(load_config(&args).is_err());
}

#[test]
fn test_unknown_geometry_rejected_by_parser() {
    assert!(Args::try_parse_from(["printcore", "--geometry", "hexapod"]).is_err());
}

#[test]
fn test_exec_lines_accumulate() {
    let args = Args::try_parse_from(["printcore", "--exec", "G28", "--exec", "M114", "job.gcode"]).unwrap();
    assert_eq!(args.exec, vec!["G28", "M114"]);
    assert_eq!(args.input.unwrap().to_str(), Some("job.gcode"));
}

#[test]
fn test_drive_until_input_closes() {
    let mut printer = SimulatedPrinter::new(MachineConfig::default()).unwrap();
    printer.input.push_line("G28");
    printer.input.push_line("G1 X10 Y20 F3000");
    printer.input.close();

    assert_eq!(drive(&mut printer), StepOutcome::Idle);
    assert_eq!(printer.output.take(), vec!["ok", "ok"]);

    let lines = summary(&printer);
    assert_eq!(lines[0], "Commands handled: 2");
    assert!(lines.contains(&"Logical position: X:10.00 Y:20.00 Z:0.00 E:0.00".to_string()));
    assert!(lines.contains(&"Homed: XYZ".to_string()));
}

#[test]
fn test_drive_stops_on_halt() {
    let mut printer = SimulatedPrinter::new(MachineConfig::default()).unwrap();
    printer.input.push_line("M112");
    assert_eq!(drive(&mut printer), StepOutcome::Halted);
    assert!(summary(&printer).contains(&"State: halted".to_string()));
}
