//! Benchmarks for the FDTD update engine.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use gpr_fdtd::{
    compute::{CpuBackend, Model, UpdateEngine},
    schema::{
        DebyePole, Dispersion, DomainConfig, Material, Polarisation, Shape, SolverConfig,
        SourceConfig, SourceKind, TimeWindow,
    },
};

fn config(n: usize) -> SolverConfig {
    let iterations = 1000;
    SolverConfig {
        domain: DomainConfig {
            nx: n,
            ny: n,
            nz: n,
            dx: 2e-3,
            dy: 2e-3,
            dz: 2e-3,
        },
        time_window: TimeWindow::Iterations(iterations),
        sources: vec![SourceConfig {
            kind: SourceKind::HertzianDipole,
            polarisation: Polarisation::Z,
            position: [n / 2, n / 2, n / 2],
            start: 0.0,
            stop: None,
            waveform: (0..iterations)
                .map(|it| {
                    let t = (it as f32 - 30.0) / 8.0;
                    -2.0 * t * (-t * t).exp()
                })
                .collect(),
        }],
        ..Default::default()
    }
}

fn engine(config: &SolverConfig) -> UpdateEngine {
    let model = Model::build(config).expect("valid benchmark config");
    let backend = CpuBackend::new(None).expect("worker pool");
    UpdateEngine::new(model, Box::new(backend))
}

fn bench_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("iteration");

    for size in [20, 40, 60] {
        let mut engine = engine(&config(size));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}^3", size)),
            &size,
            |b, _| {
                b.iter(|| {
                    black_box(&mut engine).run_iteration();
                });
            },
        );
    }

    group.finish();
}

fn bench_dispersive(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispersive");

    for poles in [1, 2, 4] {
        let mut config = config(40);
        let pole_list = (0..poles)
            .map(|p| DebyePole {
                delta_er: 4.0,
                tau: 1e-10 * (p + 1) as f64,
            })
            .collect();
        config.materials.push(
            Material::new("soil", 4.0, 0.002, 1.0, 0.0)
                .with_dispersion(Dispersion::Debye(pole_list)),
        );
        config.geometry.push(Shape::Box {
            lower: [0, 0, 0],
            upper: [40, 40, 20],
            material: "soil".into(),
        });
        let mut engine = engine(&config);

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_poles", poles)),
            &poles,
            |b, _| {
                b.iter(|| {
                    black_box(&mut engine).run_iteration();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_iteration, bench_dispersive);
criterion_main!(benches);
