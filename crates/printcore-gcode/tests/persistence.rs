use printcore_gcode::SimulatedPrinter;
use printcore_settings::{FileSettingsStore, MachineConfig};

#[test]
fn test_stored_settings_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");

    let mut first = SimulatedPrinter::builder(MachineConfig::default())
        .settings(FileSettingsStore::new(&path))
        .build()
        .unwrap();
    let lines = first.run_lines(&["M206 X5 Z-1.5", "M851 Z-0.8", "M500"]);
    assert!(lines.contains(&"echo:Settings Stored".to_string()));
    assert!(path.exists());

    let mut second = SimulatedPrinter::builder(MachineConfig::default())
        .settings(FileSettingsStore::new(&path))
        .build()
        .unwrap();
    assert_eq!(second.context().config.homing.home_offset, [5.0, 0.0, -1.5]);
    assert_eq!(second.context().config.probe.z_offset, -0.8);

    let lines = second.run_lines(&["M503"]);
    assert!(lines.contains(&"echo:  M206 X5.00 Y0.00 Z-1.50".to_string()));
}

#[test]
fn test_corrupt_settings_are_reported_and_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.toml");
    std::fs::write(&path, "this is = not [valid").unwrap();

    let mut printer = SimulatedPrinter::builder(MachineConfig::default())
        .settings(FileSettingsStore::new(&path))
        .build()
        .unwrap();
    let startup = printer.output.take();
    assert_eq!(startup.len(), 1);
    assert!(startup[0].starts_with("echo:Settings error: "));
    assert_eq!(printer.context().config.homing.home_offset, [0.0; 3]);
}
