//! Backend contract and the update engine that drives it.

use std::time::Duration;

use super::cpu::CpuBackend;
use super::gpu::{GpuBackend, GpuError};
use super::model::Model;
use crate::schema::{BackendKind, ConfigError, SolverConfig};

/// Errors on the top-level run path.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("GPU backend: {0}")]
    Gpu(#[from] GpuError),
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Primitive operations of one iteration, realised on the host or on an accelerator.
///
/// The engine calls them in a fixed order; each call completes before the next begins.
pub trait Backend {
    fn name(&self) -> &'static str;

    fn update_magnetic(&mut self, model: &mut Model);
    fn update_magnetic_pml(&mut self, model: &mut Model);
    fn update_magnetic_sources(&mut self, model: &mut Model);
    /// Standard electric update, or dispersive phase A when any material has poles.
    fn update_electric_a(&mut self, model: &mut Model);
    fn update_electric_pml(&mut self, model: &mut Model);
    fn update_electric_sources(&mut self, model: &mut Model);
    /// Dispersive phase B; nothing to do without poles.
    fn update_electric_b(&mut self, model: &mut Model);
    fn store_outputs(&mut self, model: &mut Model);
    fn store_snapshots(&mut self, model: &mut Model, iteration: usize);

    fn time_start(&mut self);
    /// Solve time since `time_start`.
    fn calculate_tsolve(&mut self) -> Duration;
    /// Copy backend-resident state into the model.
    fn finalise(&mut self, model: &mut Model) -> Result<(), SolverError>;
    /// Release backend-owned resources.
    fn cleanup(&mut self);
}

/// Drives a backend through the iteration phases.
pub struct UpdateEngine {
    model: Model,
    backend: Box<dyn Backend>,
}

impl UpdateEngine {
    pub fn new(model: Model, backend: Box<dyn Backend>) -> Self {
        log::info!("Using {} backend", backend.name());
        Self { model, backend }
    }

    /// Build the model and select the backend named in the configuration.
    pub fn from_config(config: &SolverConfig) -> Result<Self, SolverError> {
        let model = Model::build(config)?;
        let backend: Box<dyn Backend> = match config.backend.kind {
            BackendKind::Cpu => Box::new(CpuBackend::new(config.backend.threads)?),
            BackendKind::Gpu => Box::new(pollster::block_on(GpuBackend::new(&model))?),
        };
        Ok(Self::new(model, backend))
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Advance the model by one iteration.
    pub fn run_iteration(&mut self) {
        let backend = self.backend.as_mut();
        let model = &mut self.model;

        backend.update_magnetic(model);
        backend.update_magnetic_pml(model);
        backend.update_magnetic_sources(model);

        backend.update_electric_a(model);
        backend.update_electric_pml(model);
        backend.update_electric_sources(model);
        model.grid.iteration += 1;
        backend.update_electric_b(model);

        backend.store_outputs(model);
        let iteration = model.grid.iteration;
        backend.store_snapshots(model, iteration);
    }

    /// Run every remaining iteration and finalise. Returns the solve time.
    pub fn run(&mut self) -> Result<Duration, SolverError> {
        self.run_with(|_, _| {})
    }

    /// As [`run`](Self::run), calling `progress(done, total)` after each iteration.
    pub fn run_with<F>(&mut self, mut progress: F) -> Result<Duration, SolverError>
    where
        F: FnMut(usize, usize),
    {
        let total = self.model.iterations;
        self.backend.time_start();
        while self.model.grid.iteration < total {
            self.run_iteration();
            progress(self.model.grid.iteration, total);
        }
        let tsolve = self.backend.calculate_tsolve();
        self.backend.finalise(&mut self.model)?;
        log::info!("Solved {} iterations in {:.3?}", total, tsolve);
        Ok(tsolve)
    }

    /// Release the backend and hand back the model with its outputs.
    pub fn into_model(mut self) -> Model {
        self.backend.cleanup();
        self.model
    }
}
