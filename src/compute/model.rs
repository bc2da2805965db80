//! Model assembly: turns a validated configuration into the grid, coefficient table,
//! PML slabs, sources and output buffers the update engine works on.

use std::path::Path;

use serde::Serialize;

use super::backend::SolverError;
use super::coefficients::CoefficientTable;
use super::grid::{Component, GridState};
use super::outputs::{Receiver, Snapshot};
use super::pml::{PmlSlab, build_slabs};
use super::sources::{Sources, TransmissionLine};
use crate::schema::{BackendConfig, ConfigError, Material, SolverConfig, SourceKind};

/// Everything the update engine mutates or reads during a run.
#[derive(Debug, Clone)]
pub struct Model {
    pub(crate) materials: Vec<Material>,
    pub(crate) table: CoefficientTable,
    pub(crate) grid: GridState,
    pub(crate) pml: Vec<PmlSlab>,
    pub(crate) sources: Sources,
    pub(crate) receivers: Vec<Receiver>,
    pub(crate) snapshots: Vec<Snapshot>,
    pub(crate) iterations: usize,
    pub(crate) backend: BackendConfig,
}

impl Model {
    /// Validate `config` and assemble the model.
    pub fn build(config: &SolverConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let dims = config.domain.dims();
        let spacing = config.domain.spacing();
        let dt = config.dt();
        let iterations = config.iterations();
        log::info!(
            "Domain: {} x {} x {} cells, dx = {:.3e}, dy = {:.3e}, dz = {:.3e} m",
            dims[0],
            dims[1],
            dims[2],
            spacing[0],
            spacing[1],
            spacing[2]
        );
        log::info!("Time step: {:.4e} s, {} iterations", dt, iterations);

        let mut materials = vec![Material::pec(), Material::free_space()];
        materials.extend(config.materials.iter().cloned());
        for m in &materials[2..] {
            log::info!(
                "Material '{}': er = {}, se = {}, mr = {}, sm = {}, {:?} with {} pole(s)",
                m.id,
                m.er,
                m.se,
                m.mr,
                m.sm,
                m.kind(),
                m.poles()
            );
        }

        // Loaded source materials below are copies of existing ones, so the pole count is final.
        let max_poles = materials.iter().map(Material::poles).max().unwrap_or(0);
        let mut grid = GridState::new(dims, spacing, dt, max_poles);
        for shape in &config.geometry {
            let id = material_index(&materials, shape.material())?;
            let [ri, rj, rk] = shape.cell_ranges(dims);
            for i in ri {
                for j in rj.clone() {
                    for k in rk.clone() {
                        grid.set_material(i, j, k, id);
                    }
                }
            }
        }

        // Resistive voltage sources load their feed edge with the equivalent conductivity.
        for source in &config.sources {
            let SourceKind::VoltageSource { resistance } = source.kind else {
                continue;
            };
            if resistance == 0.0 {
                continue;
            }
            let axis = source.polarisation.axis();
            let c = Component::electric(axis);
            let [i, j, k] = source.position;
            let node = grid.index(i, j, k);
            let host = &materials[grid.material_ids(c)[node] as usize];
            let loaded_id = format!("{}+VoltageSource", host.id);
            let id = match materials.iter().position(|m| m.id == loaded_id) {
                Some(id) => id as u32,
                None => {
                    let area = spacing[(axis + 1) % 3] * spacing[(axis + 2) % 3];
                    let mut loaded = host.clone();
                    loaded.id = loaded_id;
                    loaded.se += spacing[axis] / (resistance * area);
                    materials.push(loaded);
                    (materials.len() - 1) as u32
                }
            };
            grid.set_component_material(c, node, id);
        }

        let table = CoefficientTable::build(&materials, dt, spacing);
        log::info!(
            "Coefficient table: {} materials, {} bytes, max poles {}",
            table.num_materials(),
            table.nbytes(),
            table.max_poles()
        );

        debug_assert_eq!(table.max_poles(), grid.max_poles());

        let pml = build_slabs(&config.pml, dims, spacing, dt);
        for slab in &pml {
            log::info!(
                "PML slab {}: {} cells, {} CFS order(s)",
                slab.face().name(),
                slab.thickness(),
                slab.orders()
            );
        }

        let sources = Sources::from_config(&config.sources, dt, iterations);
        for source in &config.sources {
            log::info!(
                "Source {:?} polarised {:?} at {:?}",
                source.kind,
                source.polarisation,
                source.position
            );
        }

        let receivers: Vec<Receiver> = config
            .all_receivers()
            .iter()
            .enumerate()
            .map(|(n, rx)| Receiver::new(n, rx, iterations))
            .collect();
        for rx in &receivers {
            log::info!("Receiver '{}' at {:?}", rx.id, rx.position);
        }

        let snapshots: Vec<Snapshot> = config
            .snapshots
            .iter()
            .map(|s| Snapshot::new(s, dt))
            .collect();
        for snap in &snapshots {
            log::info!(
                "Snapshot '{}' {:?}..{:?} stride {:?} at iteration {}",
                snap.name,
                snap.lower,
                snap.upper,
                snap.stride,
                snap.iteration
            );
        }

        Ok(Self {
            materials,
            table,
            grid,
            pml,
            sources,
            receivers,
            snapshots,
            iterations,
            backend: config.backend,
        })
    }

    pub fn grid(&self) -> &GridState {
        &self.grid
    }

    pub fn table(&self) -> &CoefficientTable {
        &self.table
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn backend_config(&self) -> &BackendConfig {
        &self.backend
    }

    pub fn receivers(&self) -> &[Receiver] {
        &self.receivers
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn transmission_lines(&self) -> &[TransmissionLine] {
        &self.sources.lines
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub fn pml(&self) -> &[PmlSlab] {
        &self.pml
    }

    /// Return fields, auxiliary state and all recorded outputs to their initial values.
    pub fn reset(&mut self) {
        self.grid.reset();
        for slab in &mut self.pml {
            slab.reset();
        }
        self.sources.reset();
        for rx in &mut self.receivers {
            rx.reset();
        }
        for snap in &mut self.snapshots {
            snap.data = None;
        }
    }

    /// Serialise receiver series, transmission-line records and snapshots as JSON.
    pub fn write_outputs(&self, path: impl AsRef<Path>) -> Result<(), SolverError> {
        let lines = self
            .sources
            .lines
            .iter()
            .map(|line| LineOutput {
                position: line.point.position,
                vinc: &line.vinc,
                iinc: &line.iinc,
                vtotal: &line.vtotal,
                itotal: &line.itotal,
            })
            .collect();
        let out = OutputFile {
            dt: self.grid.dt,
            iterations: self.iterations,
            receivers: &self.receivers,
            transmission_lines: lines,
            snapshots: &self.snapshots,
        };
        let file = std::io::BufWriter::new(std::fs::File::create(path.as_ref())?);
        serde_json::to_writer(file, &out)?;
        log::info!("Wrote outputs to {}", path.as_ref().display());
        Ok(())
    }
}

#[derive(Serialize)]
struct LineOutput<'a> {
    position: [usize; 3],
    vinc: &'a [f32],
    iinc: &'a [f32],
    vtotal: &'a [f32],
    itotal: &'a [f32],
}

#[derive(Serialize)]
struct OutputFile<'a> {
    dt: f64,
    iterations: usize,
    receivers: &'a [Receiver],
    transmission_lines: Vec<LineOutput<'a>>,
    snapshots: &'a [Snapshot],
}

fn material_index(materials: &[Material], id: &str) -> Result<u32, ConfigError> {
    materials
        .iter()
        .position(|m| m.id == id)
        .map(|n| n as u32)
        .ok_or_else(|| ConfigError::UnknownMaterial(id.to_string()))
}
