//! GPR FDTD - Yee-grid electromagnetic field solver for ground-penetrating radar.
//!
//! This crate advances Maxwell's equations on a staggered grid with explicit leapfrog
//! updates, absorbing outgoing waves in convolutional PML slabs, modelling dispersive
//! media with Debye, Lorentz and Drude poles, and recording receiver time series and
//! snapshot volumes. The same iteration runs on a rayon host backend or on a wgpu
//! compute backend.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration types for a run (domain, materials, sources, outputs)
//! - `compute`: Grid state, update phases, model assembly and the backends
//!
//! # Example
//!
//! ```rust,no_run
//! use gpr_fdtd::{
//!     compute::UpdateEngine,
//!     schema::{
//!         OutputComponent, Polarisation, ReceiverConfig, SolverConfig, SourceConfig, SourceKind,
//!     },
//! };
//!
//! let mut config = SolverConfig::default();
//! config.sources.push(SourceConfig {
//!     kind: SourceKind::HertzianDipole,
//!     polarisation: Polarisation::Z,
//!     position: [20, 20, 20],
//!     start: 0.0,
//!     stop: None,
//!     waveform: vec![1.0; 10],
//! });
//! config.receivers.push(ReceiverConfig {
//!     id: None,
//!     position: [25, 20, 20],
//!     outputs: vec![OutputComponent::Ez],
//! });
//!
//! let mut engine = UpdateEngine::from_config(&config).unwrap();
//! let elapsed = engine.run().unwrap();
//!
//! let ez = engine.model().receivers()[0].get(OutputComponent::Ez).unwrap();
//! let peak = ez.iter().fold(0.0f32, |m, v| m.max(v.abs()));
//! println!("Solved in {:?}, peak Ez {}", elapsed, peak);
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::{Backend, CpuBackend, Model, SolverError, UpdateEngine};
pub use schema::{ConfigError, SolverConfig};
