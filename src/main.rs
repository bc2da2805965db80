//! GPR FDTD CLI - Run a field solve from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use gpr_fdtd::{
    compute::{FieldStats, UpdateEngine},
    schema::{
        BackendKind, Material, OutputComponent, Polarisation, ReceiverConfig, Shape,
        SnapshotConfig, SnapshotTime, SolverConfig, SourceConfig, SourceKind, TimeWindow,
    },
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [--gpu] [--threads N]", args[0]);
        eprintln!();
        eprintln!("Run an FDTD field solve from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to solver configuration file");
        eprintln!("  --gpu        Run on the GPU backend");
        eprintln!("  --threads N  Worker threads for the CPU backend");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);

    // Load configuration
    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let mut config: SolverConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    let mut rest = args[2..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--gpu" => config.backend.kind = BackendKind::Gpu,
            "--threads" => {
                let threads = rest.next().and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--threads needs a positive integer");
                    std::process::exit(1);
                });
                config.backend.threads = Some(threads);
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    let iterations = config.iterations();
    println!("GPR FDTD Solve");
    println!("==============");
    println!(
        "Domain: {}x{}x{} cells, {:.3e} x {:.3e} x {:.3e} m",
        config.domain.nx,
        config.domain.ny,
        config.domain.nz,
        config.domain.dx,
        config.domain.dy,
        config.domain.dz
    );
    println!("dt: {:.4e} s", config.dt());
    println!("Iterations: {}", iterations);
    println!(
        "Materials: {}, sources: {}, snapshots: {}",
        config.materials.len(),
        config.sources.len(),
        config.snapshots.len()
    );
    println!();

    // Build the model and pick the backend
    let mut engine = UpdateEngine::from_config(&config).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
    println!("Backend: {}", engine.backend_name());

    // Run solve
    println!("Running solve...");
    let start = Instant::now();
    let every = (iterations / 10).max(1);
    let tsolve = engine
        .run_with(|done, total| {
            if done % every == 0 {
                let elapsed = start.elapsed().as_secs_f32();
                println!(
                    "  Iteration {}/{}: {:.1} iterations/s",
                    done,
                    total,
                    done as f32 / elapsed
                );
            }
        })
        .unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        });

    let model = engine.into_model();
    let stats = FieldStats::from_grid(model.grid());
    println!();
    println!("Final state:");
    println!("  Max |E|: {:.6e} V/m", stats.max_e);
    println!("  Max |H|: {:.6e} A/m", stats.max_h);
    println!("  Field energy: {:.6e} J", stats.energy);
    println!();
    println!(
        "Solve time: {:.2}s ({:.1} iterations/s)",
        tsolve.as_secs_f32(),
        iterations as f32 / tsolve.as_secs_f32()
    );

    let out_path = config_path.with_extension("out.json");
    if let Err(e) = model.write_outputs(&out_path) {
        eprintln!("Error writing outputs: {}", e);
        std::process::exit(1);
    }
    println!("Outputs: {}", out_path.display());
}

fn print_example_config() {
    let iterations = 300;
    let pulse = (0..iterations)
        .map(|n| {
            let t = (n as f64 - 40.0) / 12.0;
            (-2.0 * t * (-t * t).exp()) as f32
        })
        .collect();

    let config = SolverConfig {
        time_window: TimeWindow::Iterations(iterations),
        materials: vec![Material::new("half_space", 6.0, 0.005, 1.0, 0.0)],
        geometry: vec![Shape::Box {
            lower: [0, 0, 0],
            upper: [60, 60, 30],
            material: "half_space".into(),
        }],
        sources: vec![SourceConfig {
            kind: SourceKind::HertzianDipole,
            polarisation: Polarisation::Y,
            position: [26, 30, 34],
            start: 0.0,
            stop: None,
            waveform: pulse,
        }],
        receivers: vec![ReceiverConfig {
            id: Some("rx".into()),
            position: [34, 30, 34],
            outputs: vec![OutputComponent::Ey, OutputComponent::Hx],
        }],
        snapshots: vec![SnapshotConfig {
            name: "slice".into(),
            lower: [0, 30, 0],
            upper: [60, 31, 60],
            stride: [1, 1, 1],
            at: SnapshotTime::Iteration(iterations / 2),
        }],
        ..Default::default()
    };

    println!("Example configuration (config.json):");
    println!("{}", serde_json::to_string_pretty(&config).unwrap());
}
