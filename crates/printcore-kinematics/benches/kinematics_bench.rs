use criterion::{black_box, criterion_group, criterion_main, Criterion};
use printcore_core::Position;
use printcore_kinematics::{build, BedLevel, BedLeveling, Kinematics, MeshGrid};
use printcore_settings::{GeometryKind, MachineConfig};

fn bench_inverse(c: &mut Criterion) {
    let mut group = c.benchmark_group("inverse");
    for kind in [GeometryKind::Cartesian, GeometryKind::Delta, GeometryKind::Scara] {
        let kin = build(&MachineConfig::for_geometry(kind)).unwrap();
        let target = Position::new(12.0, 34.0, 5.0, 0.0);
        group.bench_function(kind.to_string(), |b| {
            b.iter(|| kin.inverse(black_box(&target)).unwrap())
        });
    }
    group.finish();
}

fn bench_delta_forward(c: &mut Criterion) {
    let kin = build(&MachineConfig::for_geometry(GeometryKind::Delta)).unwrap();
    let actuator = kin.inverse(&Position::new(12.0, 34.0, 5.0, 0.0)).unwrap();
    c.bench_function("delta forward", |b| {
        b.iter(|| kin.forward(black_box(&actuator)).unwrap())
    });
}

fn bench_leveled_delta(c: &mut Criterion) {
    let kin = build(&MachineConfig::for_geometry(GeometryKind::Delta)).unwrap();
    let mut mesh = MeshGrid::new(7, 7, [-72.0, -72.0], [72.0, 72.0]).unwrap();
    for iy in 0..7 {
        for ix in 0..7 {
            mesh.set(ix, iy, 0.01 * (ix as f64 - iy as f64));
        }
    }
    let mut leveling = BedLeveling::new();
    leveling.set(BedLevel::Mesh(mesh));
    let target = Position::new(12.0, 34.0, 5.0, 0.0);
    c.bench_function("delta inverse with mesh", |b| {
        b.iter(|| kin.inverse_leveled(black_box(&target), &leveling).unwrap())
    });
}

criterion_group!(benches, bench_inverse, bench_delta_forward, bench_leveled_delta);
criterion_main!(benches);
