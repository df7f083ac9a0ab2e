use criterion::{black_box, criterion_group, criterion_main, Criterion};
use printcore_gcode::{GcodeCommand, SimulatedPrinter};
use printcore_settings::{GeometryKind, MachineConfig};

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse G1", |b| {
        b.iter(|| GcodeCommand::parse(black_box("N120 G1 X12.5 Y-3.25 Z0.3 E1.234 F1800")).unwrap())
    });
}

fn bench_moves(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch moves");
    for kind in [GeometryKind::Cartesian, GeometryKind::Delta] {
        let mut printer = SimulatedPrinter::new(MachineConfig::for_geometry(kind)).unwrap();
        printer.run_lines(&["G28"]);
        let mut flip = false;
        group.bench_function(kind.to_string(), |b| {
            b.iter(|| {
                flip = !flip;
                let line = if flip { "G1 X10 Y10 Z5 F6000" } else { "G1 X-10 Y-10 Z5 F6000" };
                printer.input.push_line(line);
                printer.run_until_idle(16)
            })
        });
        printer.machine.take_moves();
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_moves);
criterion_main!(benches);
