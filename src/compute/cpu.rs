//! Host backend: every phase runs on a dedicated rayon pool.

use std::time::{Duration, Instant};

use super::backend::{Backend, SolverError};
use super::dispersive::{update_electric_dispersive_a, update_electric_dispersive_b};
use super::fields::{update_electric, update_magnetic};
use super::model::Model;
use super::outputs::{store_outputs, store_snapshots};

/// CPU backend over a bounded worker pool.
pub struct CpuBackend {
    pool: rayon::ThreadPool,
    start: Option<Instant>,
}

impl CpuBackend {
    /// Build the worker pool; `None` lets rayon pick the thread count.
    pub fn new(threads: Option<usize>) -> Result<Self, SolverError> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder.build()?;
        log::info!("CPU backend with {} threads", pool.current_num_threads());
        Ok(Self { pool, start: None })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn update_magnetic(&mut self, model: &mut Model) {
        let Model { grid, table, .. } = model;
        self.pool.install(|| update_magnetic(grid, table));
    }

    fn update_magnetic_pml(&mut self, model: &mut Model) {
        let Model {
            grid, table, pml, ..
        } = model;
        self.pool.install(|| {
            for slab in pml.iter_mut() {
                slab.update_magnetic(grid, table);
            }
        });
    }

    fn update_magnetic_sources(&mut self, model: &mut Model) {
        let Model {
            grid,
            table,
            sources,
            ..
        } = model;
        sources.update_magnetic(grid.iteration, grid, table);
    }

    fn update_electric_a(&mut self, model: &mut Model) {
        let Model { grid, table, .. } = model;
        if table.max_poles() == 0 {
            self.pool.install(|| update_electric(grid, table));
        } else {
            self.pool.install(|| update_electric_dispersive_a(grid, table));
        }
    }

    fn update_electric_pml(&mut self, model: &mut Model) {
        let Model {
            grid, table, pml, ..
        } = model;
        self.pool.install(|| {
            for slab in pml.iter_mut() {
                slab.update_electric(grid, table);
            }
        });
    }

    fn update_electric_sources(&mut self, model: &mut Model) {
        let Model {
            grid,
            table,
            sources,
            ..
        } = model;
        sources.update_electric(grid.iteration, grid, table);
    }

    fn update_electric_b(&mut self, model: &mut Model) {
        let Model { grid, table, .. } = model;
        if table.max_poles() > 0 {
            self.pool.install(|| update_electric_dispersive_b(grid, table));
        }
    }

    fn store_outputs(&mut self, model: &mut Model) {
        let Model {
            grid,
            receivers,
            sources,
            ..
        } = model;
        store_outputs(grid, receivers, &mut sources.lines);
    }

    fn store_snapshots(&mut self, model: &mut Model, iteration: usize) {
        let Model {
            grid, snapshots, ..
        } = model;
        store_snapshots(grid, snapshots, iteration);
    }

    fn time_start(&mut self) {
        self.start = Some(Instant::now());
    }

    fn calculate_tsolve(&mut self) -> Duration {
        self.start.map(|t| t.elapsed()).unwrap_or_default()
    }

    fn finalise(&mut self, _model: &mut Model) -> Result<(), SolverError> {
        Ok(())
    }

    fn cleanup(&mut self) {
        self.start = None;
    }
}
