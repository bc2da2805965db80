//! GPU backend - each update phase is one compute pass over device-resident state.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use super::GpuError;
use crate::compute::backend::{Backend, SolverError};
use crate::compute::coefficients::CoefficientTable;
use crate::compute::grid::{Component, GridState};
use crate::compute::model::Model;
use crate::compute::outputs::SnapshotVolume;
use crate::compute::pml::PmlSlab;
use crate::schema::SnapshotTransfer;

// Embed shader templates at compile time
const MAGNETIC_SHADER: &str = include_str!("shaders/magnetic.wgsl");
const ELECTRIC_SHADER: &str = include_str!("shaders/electric.wgsl");
const DISPERSIVE_A_SHADER: &str = include_str!("shaders/dispersive_a.wgsl");
const DISPERSIVE_B_SHADER: &str = include_str!("shaders/dispersive_b.wgsl");
const PML_SHADER: &str = include_str!("shaders/pml.wgsl");
const SOURCES_SHADER: &str = include_str!("shaders/sources.wgsl");
const RECEIVERS_SHADER: &str = include_str!("shaders/receivers.wgsl");
const SNAPSHOT_SHADER: &str = include_str!("shaders/snapshot.wgsl");

const WORKGROUP_SIZE: u32 = 64;
const MAX_WORKGROUPS: u32 = 65_535;

/// Source kinds as understood by the source kernel.
const HARD_VOLTAGE: u32 = 0;
const SOFT_VOLTAGE: u32 = 1;
const HERTZIAN_DIPOLE: u32 = 2;
const MAGNETIC_DIPOLE: u32 = 3;

const CONSTANT_TABLE: &str = "material coefficient table (constant memory)";
const FIELD_STORAGE: &str = "field storage buffer";
const RECEIVER_SERIES: &str = "receiver series buffer";

/// Size of the E+H coefficient table once packed for constant memory.
///
/// Every material takes two `vec4<f32>` per table, so rows stay 16-byte aligned.
pub fn constant_table_bytes(num_materials: usize) -> u64 {
    (num_materials * 2 * 2 * 16) as u64
}

/// Uniform buffer struct shared by the field kernels.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct GridParams {
    nx: u32,
    ny: u32,
    nz: u32,
    len: u32,
    sx: u32,
    sy: u32,
    max_poles: u32,
    _pad: u32,
}

/// Uniform buffer struct for one PML slab and field kind.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct PmlParams {
    lower: [u32; 3],
    extent: [u32; 3],
    axis: u32,
    orders: u32,
    electric: u32,
    dims: [u32; 3],
    sx: u32,
    sy: u32,
    len: u32,
    _pad: u32,
}

/// Uniform buffer struct for the source kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct SourceParams {
    iteration: u32,
    count: u32,
    magnetic: u32,
    len: u32,
    samples: u32,
    _pad: [u32; 3],
}

/// Per-source record uploaded once at startup.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct SourceInfo {
    node: u32,
    axis: u32,
    kind: u32,
    start: u32,
    stop: u32,
    _pad0: u32,
    scale: f32,
    _pad1: f32,
}

/// Uniform buffer struct for the receiver kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ReceiverParams {
    index: u32,
    count: u32,
    iterations: u32,
    len: u32,
}

/// Uniform buffer struct for the snapshot kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct SnapshotParams {
    lower: [u32; 3],
    stride: [u32; 3],
    shape: [u32; 3],
    sx: u32,
    sy: u32,
    len: u32,
    volume: u32,
    _pad: [u32; 3],
}

/// A bind group and the number of invocations it is dispatched with.
struct Dispatch {
    bind_group: wgpu::BindGroup,
    items: usize,
}

struct SourceKernel {
    params: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    count: u32,
    samples: u32,
}

struct ReceiverKernel {
    params: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    series: wgpu::Buffer,
    count: usize,
}

struct SnapshotKernel {
    dispatch: Dispatch,
    /// Index into `snapshot_slots`.
    slot: usize,
    shape: [usize; 3],
    captured: bool,
}

/// GPU backend using WebGPU compute shaders.
pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    len: usize,
    iterations: usize,
    max_poles: usize,
    policy: SnapshotTransfer,

    // Compute pipelines
    magnetic_pipeline: wgpu::ComputePipeline,
    electric_pipeline: wgpu::ComputePipeline,
    dispersive_a_pipeline: wgpu::ComputePipeline,
    dispersive_b_pipeline: wgpu::ComputePipeline,
    pml_pipeline: wgpu::ComputePipeline,
    sources_pipeline: wgpu::ComputePipeline,
    receivers_pipeline: wgpu::ComputePipeline,
    snapshot_pipeline: wgpu::ComputePipeline,

    // GPU buffers
    fields_buffer: wgpu::Buffer,
    aux_buffer: wgpu::Buffer,
    snapshot_slots: Vec<wgpu::Buffer>,

    // Bind groups
    field_bind_group: wgpu::BindGroup,
    dispersive_bind_group: wgpu::BindGroup,
    pml_magnetic: Vec<Dispatch>,
    pml_electric: Vec<Dispatch>,
    magnetic_sources: Option<SourceKernel>,
    electric_sources: Option<SourceKernel>,
    receivers: Option<ReceiverKernel>,
    snapshots: Vec<SnapshotKernel>,

    /// First readback failure during the run; reported by `finalise`.
    deferred_error: Option<GpuError>,
    start: Option<Instant>,
}

impl GpuBackend {
    /// Create the backend and mirror `model` in device memory.
    ///
    /// Fails with [`GpuError::CapacityExceeded`] when the coefficient table does not fit
    /// the constant-memory budget. The configured budget is checked before any device is
    /// requested; the device limit once one is available.
    pub async fn new(model: &Model) -> Result<Self, GpuError> {
        let table = model.table();
        let backend = model.backend_config();
        let required = constant_table_bytes(table.num_materials());
        check_capacity(CONSTANT_TABLE, required, backend.constant_memory_bytes)?;
        check_supported(model)?;

        // 1. Create wgpu instance
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // 2. Request adapter
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        // 3. Request device and queue
        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("GPR FDTD GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        let limits = device.limits();
        let limit = backend
            .constant_memory_bytes
            .min(limits.max_uniform_buffer_binding_size as u64);
        check_capacity(CONSTANT_TABLE, required, limit)?;

        check_storage(model, limits.max_storage_buffer_binding_size as u64)?;
        let grid = model.grid();
        let len = grid.len();
        let field_bytes = (6 * len * size_of::<f32>()) as u64;

        log::info!(
            "GPU backend on '{}': coefficient table uses {} of {} bytes of constant memory",
            adapter.get_info().name,
            required,
            limit
        );

        // 4. Create shader modules and pipelines from the templates
        let num_materials = table.num_materials();
        let field_layout = create_field_bind_group_layout(&device);
        let dispersive_layout = create_dispersive_bind_group_layout(&device);
        let pml_layout = create_pml_bind_group_layout(&device);
        let sources_layout = create_sources_bind_group_layout(&device);
        let receivers_layout = create_receivers_bind_group_layout(&device);
        let snapshot_layout = create_snapshot_bind_group_layout(&device);

        let pipeline = |label: &str, template: &str, layout: &wgpu::BindGroupLayout| {
            create_pipeline(&device, label, &shader_source(template, num_materials), layout)
        };
        let magnetic_pipeline = pipeline("Magnetic Pipeline", MAGNETIC_SHADER, &field_layout);
        let electric_pipeline = pipeline("Electric Pipeline", ELECTRIC_SHADER, &field_layout);
        let dispersive_a_pipeline =
            pipeline("Dispersive A Pipeline", DISPERSIVE_A_SHADER, &dispersive_layout);
        let dispersive_b_pipeline =
            pipeline("Dispersive B Pipeline", DISPERSIVE_B_SHADER, &dispersive_layout);
        let pml_pipeline = pipeline("PML Pipeline", PML_SHADER, &pml_layout);
        let sources_pipeline = pipeline("Sources Pipeline", SOURCES_SHADER, &sources_layout);
        let receivers_pipeline =
            pipeline("Receivers Pipeline", RECEIVERS_SHADER, &receivers_layout);
        let snapshot_pipeline = pipeline("Snapshot Pipeline", SNAPSHOT_SHADER, &snapshot_layout);

        // 5. Mirror the grid and the coefficient tables
        let storage = wgpu::BufferUsages::STORAGE;
        let fields_buffer = create_buffer(
            &device,
            "Fields Buffer",
            field_bytes,
            storage | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        );
        for c in Component::ALL {
            let offset = (c.index() * len * size_of::<f32>()) as u64;
            queue.write_buffer(&fields_buffer, offset, bytemuck::cast_slice(grid.field(c)));
        }
        let ids_buffer = upload(&device, &queue, "Material Id Buffer", &grid.ids, storage);
        let aux: Vec<_> = [&grid.tx, &grid.ty, &grid.tz]
            .into_iter()
            .flat_map(|t| t.iter().copied())
            .collect();
        let aux_buffer = upload(
            &device,
            &queue,
            "Auxiliary State Buffer",
            &aux,
            storage | wgpu::BufferUsages::COPY_SRC,
        );
        let poles_buffer = upload(&device, &queue, "Pole Buffer", table.dispersive(), storage);
        let coeff_buffer = upload(
            &device,
            &queue,
            "Coefficient Buffer",
            &pack_coefficients(table),
            wgpu::BufferUsages::UNIFORM,
        );

        let strides = grid.strides();
        let grid_params = GridParams {
            nx: grid.nx as u32,
            ny: grid.ny as u32,
            nz: grid.nz as u32,
            len: len as u32,
            sx: strides.x as u32,
            sy: strides.y as u32,
            max_poles: grid.max_poles() as u32,
            _pad: 0,
        };
        let grid_params_buffer = upload(
            &device,
            &queue,
            "Grid Params",
            std::slice::from_ref(&grid_params),
            wgpu::BufferUsages::UNIFORM,
        );

        // 6. Bind groups
        let field_bind_group = create_bind_group(
            &device,
            "Field Bind Group",
            &field_layout,
            &[&grid_params_buffer, &coeff_buffer, &fields_buffer, &ids_buffer],
        );
        let dispersive_bind_group = create_bind_group(
            &device,
            "Dispersive Bind Group",
            &dispersive_layout,
            &[
                &grid_params_buffer,
                &coeff_buffer,
                &fields_buffer,
                &ids_buffer,
                &aux_buffer,
                &poles_buffer,
            ],
        );

        let shared = [&coeff_buffer, &fields_buffer, &ids_buffer];
        let mut pml_magnetic = Vec::with_capacity(model.pml().len());
        let mut pml_electric = Vec::with_capacity(model.pml().len());
        for slab in model.pml() {
            pml_magnetic.push(pml_dispatch(
                &device, &queue, &pml_layout, &shared, grid, slab, false,
            ));
            pml_electric.push(pml_dispatch(
                &device, &queue, &pml_layout, &shared, grid, slab, true,
            ));
        }

        let (infos, waveforms) = source_table(model);
        let samples = (model.iterations() + 1) as u32;
        let source_kernel = |magnetic: bool| {
            let count = infos
                .iter()
                .filter(|s| (s.kind == MAGNETIC_DIPOLE) == magnetic)
                .count();
            if count == 0 {
                return None;
            }
            let label = if magnetic {
                "Magnetic Sources"
            } else {
                "Electric Sources"
            };
            let params = create_buffer(
                &device,
                label,
                size_of::<SourceParams>() as u64,
                wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            );
            let info_buffer = upload(&device, &queue, "Source Info Buffer", &infos, storage);
            let waveform_buffer =
                upload(&device, &queue, "Waveform Buffer", &waveforms, storage);
            let bind_group = create_bind_group(
                &device,
                label,
                &sources_layout,
                &[
                    &params,
                    &coeff_buffer,
                    &fields_buffer,
                    &ids_buffer,
                    &info_buffer,
                    &waveform_buffer,
                ],
            );
            Some(SourceKernel {
                params,
                bind_group,
                count: infos.len() as u32,
                samples,
            })
        };
        let magnetic_sources = source_kernel(true);
        let electric_sources = source_kernel(false);

        let receivers = (!model.receivers().is_empty()).then(|| {
            let nodes: Vec<u32> = model
                .receivers()
                .iter()
                .map(|rx| {
                    let [i, j, k] = rx.position;
                    grid.index(i, j, k) as u32
                })
                .collect();
            let series_bytes = receiver_series_bytes(model.iterations(), nodes.len());
            let series = create_buffer(
                &device,
                "Receiver Series Buffer",
                series_bytes,
                storage | wgpu::BufferUsages::COPY_SRC,
            );
            let params = create_buffer(
                &device,
                "Receiver Params",
                size_of::<ReceiverParams>() as u64,
                wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            );
            let node_buffer = upload(&device, &queue, "Receiver Node Buffer", &nodes, storage);
            let bind_group = create_bind_group(
                &device,
                "Receiver Bind Group",
                &receivers_layout,
                &[&params, &fields_buffer, &node_buffer, &series],
            );
            ReceiverKernel {
                params,
                bind_group,
                series,
                count: nodes.len(),
            }
        });

        let policy = backend.snapshot_transfer;
        let volume_bytes =
            |shape: [usize; 3]| (6 * shape.iter().product::<usize>() * size_of::<f32>()) as u64;
        let slot_usage = storage | wgpu::BufferUsages::COPY_SRC;
        let snapshot_slots: Vec<wgpu::Buffer> = match policy {
            SnapshotTransfer::Immediate => model
                .snapshots()
                .iter()
                .map(|s| volume_bytes(s.shape()))
                .max()
                .map(|size| create_buffer(&device, "Snapshot Slot", size, slot_usage))
                .into_iter()
                .collect(),
            SnapshotTransfer::Deferred => model
                .snapshots()
                .iter()
                .map(|s| {
                    create_buffer(&device, "Snapshot Slot", volume_bytes(s.shape()), slot_usage)
                })
                .collect(),
        };
        let snapshots = model
            .snapshots()
            .iter()
            .enumerate()
            .map(|(n, snap)| {
                let slot = match policy {
                    SnapshotTransfer::Immediate => 0,
                    SnapshotTransfer::Deferred => n,
                };
                let shape = snap.shape();
                let volume = shape.iter().product::<usize>();
                let params = SnapshotParams {
                    lower: snap.lower.map(|v| v as u32),
                    stride: snap.stride.map(|v| v as u32),
                    shape: shape.map(|v| v as u32),
                    sx: strides.x as u32,
                    sy: strides.y as u32,
                    len: len as u32,
                    volume: volume as u32,
                    _pad: [0; 3],
                };
                let params_buffer = upload(
                    &device,
                    &queue,
                    "Snapshot Params",
                    std::slice::from_ref(&params),
                    wgpu::BufferUsages::UNIFORM,
                );
                let bind_group = create_bind_group(
                    &device,
                    "Snapshot Bind Group",
                    &snapshot_layout,
                    &[&params_buffer, &fields_buffer, &snapshot_slots[slot]],
                );
                SnapshotKernel {
                    dispatch: Dispatch {
                        bind_group,
                        items: volume,
                    },
                    slot,
                    shape,
                    captured: false,
                }
            })
            .collect();

        Ok(Self {
            device,
            queue,
            len,
            iterations: model.iterations(),
            max_poles: table.max_poles(),
            policy,
            magnetic_pipeline,
            electric_pipeline,
            dispersive_a_pipeline,
            dispersive_b_pipeline,
            pml_pipeline,
            sources_pipeline,
            receivers_pipeline,
            snapshot_pipeline,
            fields_buffer,
            aux_buffer,
            snapshot_slots,
            field_bind_group,
            dispersive_bind_group,
            pml_magnetic,
            pml_electric,
            magnetic_sources,
            electric_sources,
            receivers,
            snapshots,
            deferred_error: None,
            start: None,
        })
    }

    /// Encode and submit one compute pass.
    fn dispatch(
        &self,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        bind_group: &wgpu::BindGroup,
        items: usize,
    ) {
        if items == 0 {
            return;
        }
        let groups = (items as u32).div_ceil(WORKGROUP_SIZE);
        let (x, y) = if groups > MAX_WORKGROUPS {
            (MAX_WORKGROUPS, groups.div_ceil(MAX_WORKGROUPS))
        } else {
            (groups, 1)
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(x, y, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn run_sources(&self, kernel: Option<&SourceKernel>, iteration: usize, magnetic: bool) {
        let Some(kernel) = kernel else {
            return;
        };
        let params = SourceParams {
            iteration: iteration as u32,
            count: kernel.count,
            magnetic: magnetic as u32,
            len: self.len as u32,
            samples: kernel.samples,
            _pad: [0; 3],
        };
        self.queue
            .write_buffer(&kernel.params, 0, bytemuck::bytes_of(&params));
        self.dispatch("Sources Pass", &self.sources_pipeline, &kernel.bind_group, 1);
    }

    /// Copy `size` bytes of `buffer` back to the host.
    fn read_back<T: bytemuck::Pod>(
        &self,
        buffer: &wgpu::Buffer,
        size: u64,
    ) -> Result<Vec<T>, GpuError> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::PollType::wait_indefinitely()).ok();
        rx.recv().expect("map_async callback dropped")?;

        let data = {
            let view = buffer_slice.get_mapped_range();
            bytemuck::cast_slice(&view).to_vec()
        };
        staging.unmap();
        Ok(data)
    }

    fn read_snapshot(&self, kernel: &SnapshotKernel) -> Result<SnapshotVolume, GpuError> {
        let volume = kernel.dispatch.items;
        let bytes = (6 * volume * size_of::<f32>()) as u64;
        let data: Vec<f32> = self.read_back(&self.snapshot_slots[kernel.slot], bytes)?;
        let mut out = SnapshotVolume::zeros(kernel.shape);
        for c in Component::ALL {
            let n = c.index();
            out.component_mut(c)
                .copy_from_slice(&data[n * volume..(n + 1) * volume]);
        }
        Ok(out)
    }

    fn read_grid(&self, grid: &mut GridState) -> Result<(), GpuError> {
        let len = self.len;
        let fields: Vec<f32> =
            self.read_back(&self.fields_buffer, (6 * len * size_of::<f32>()) as u64)?;
        for c in Component::ALL {
            let n = c.index();
            grid.field_mut(c)
                .copy_from_slice(&fields[n * len..(n + 1) * len]);
        }

        if self.max_poles > 0 {
            let per = len * self.max_poles;
            let bytes = (3 * per * size_of::<num_complex::Complex32>()) as u64;
            let aux: Vec<num_complex::Complex32> = self.read_back(&self.aux_buffer, bytes)?;
            grid.tx.copy_from_slice(&aux[..per]);
            grid.ty.copy_from_slice(&aux[per..2 * per]);
            grid.tz.copy_from_slice(&aux[2 * per..]);
        }
        Ok(())
    }

    fn read_receivers(&self, model: &mut Model) -> Result<(), GpuError> {
        let Some(kernel) = &self.receivers else {
            return Ok(());
        };
        let its = self.iterations;
        let n_rx = kernel.count;
        let bytes = (6 * its * n_rx * size_of::<f32>()) as u64;
        let series: Vec<f32> = self.read_back(&kernel.series, bytes)?;
        for (r, rx) in model.receivers.iter_mut().enumerate() {
            for s in &mut rx.series {
                let Some(f) = s.component.field_index() else {
                    continue;
                };
                for (n, v) in s.values.iter_mut().enumerate() {
                    *v = series[(f * its + n) * n_rx + r];
                }
            }
        }
        Ok(())
    }
}

impl Backend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn update_magnetic(&mut self, _model: &mut Model) {
        self.dispatch(
            "Magnetic Pass",
            &self.magnetic_pipeline,
            &self.field_bind_group,
            self.len,
        );
    }

    fn update_magnetic_pml(&mut self, _model: &mut Model) {
        for slab in &self.pml_magnetic {
            self.dispatch("PML Magnetic Pass", &self.pml_pipeline, &slab.bind_group, slab.items);
        }
    }

    fn update_magnetic_sources(&mut self, model: &mut Model) {
        self.run_sources(self.magnetic_sources.as_ref(), model.grid.iteration, true);
    }

    fn update_electric_a(&mut self, _model: &mut Model) {
        if self.max_poles == 0 {
            self.dispatch(
                "Electric Pass",
                &self.electric_pipeline,
                &self.field_bind_group,
                self.len,
            );
        } else {
            self.dispatch(
                "Dispersive A Pass",
                &self.dispersive_a_pipeline,
                &self.dispersive_bind_group,
                self.len,
            );
        }
    }

    fn update_electric_pml(&mut self, _model: &mut Model) {
        for slab in &self.pml_electric {
            self.dispatch("PML Electric Pass", &self.pml_pipeline, &slab.bind_group, slab.items);
        }
    }

    fn update_electric_sources(&mut self, model: &mut Model) {
        self.run_sources(self.electric_sources.as_ref(), model.grid.iteration, false);
    }

    fn update_electric_b(&mut self, _model: &mut Model) {
        if self.max_poles > 0 {
            self.dispatch(
                "Dispersive B Pass",
                &self.dispersive_b_pipeline,
                &self.dispersive_bind_group,
                self.len,
            );
        }
    }

    fn store_outputs(&mut self, model: &mut Model) {
        let Some(kernel) = &self.receivers else {
            return;
        };
        let Some(index) = model.grid.iteration.checked_sub(1) else {
            return;
        };
        let params = ReceiverParams {
            index: index as u32,
            count: kernel.count as u32,
            iterations: self.iterations as u32,
            len: self.len as u32,
        };
        self.queue
            .write_buffer(&kernel.params, 0, bytemuck::bytes_of(&params));
        self.dispatch(
            "Receivers Pass",
            &self.receivers_pipeline,
            &kernel.bind_group,
            kernel.count,
        );
    }

    fn store_snapshots(&mut self, model: &mut Model, iteration: usize) {
        for n in 0..self.snapshots.len() {
            let kernel = &self.snapshots[n];
            if kernel.captured || model.snapshots[n].iteration != iteration {
                continue;
            }
            log::debug!(
                "Capturing snapshot '{}' at iteration {}",
                model.snapshots[n].name,
                iteration
            );
            self.dispatch(
                "Snapshot Pass",
                &self.snapshot_pipeline,
                &kernel.dispatch.bind_group,
                kernel.dispatch.items,
            );
            if self.policy == SnapshotTransfer::Immediate {
                match self.read_snapshot(kernel) {
                    Ok(volume) => model.snapshots[n].data = Some(volume),
                    Err(e) => {
                        self.deferred_error.get_or_insert(e);
                    }
                }
            }
            self.snapshots[n].captured = true;
        }
    }

    fn time_start(&mut self) {
        self.device.poll(wgpu::PollType::wait_indefinitely()).ok();
        self.start = Some(Instant::now());
    }

    fn calculate_tsolve(&mut self) -> Duration {
        self.device.poll(wgpu::PollType::wait_indefinitely()).ok();
        self.start.map(|t| t.elapsed()).unwrap_or_default()
    }

    fn finalise(&mut self, model: &mut Model) -> Result<(), SolverError> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e.into());
        }
        self.read_grid(&mut model.grid)?;
        self.read_receivers(model)?;
        if self.policy == SnapshotTransfer::Deferred {
            for (n, kernel) in self.snapshots.iter().enumerate() {
                if kernel.captured {
                    model.snapshots[n].data = Some(self.read_snapshot(kernel)?);
                }
            }
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        self.fields_buffer.destroy();
        self.aux_buffer.destroy();
        for slot in &self.snapshot_slots {
            slot.destroy();
        }
        if let Some(kernel) = &self.receivers {
            kernel.series.destroy();
        }
        self.start = None;
    }
}

fn check_capacity(resource: &'static str, required: u64, limit: u64) -> Result<(), GpuError> {
    if required > limit {
        return Err(GpuError::CapacityExceeded {
            resource,
            required,
            limit,
        });
    }
    Ok(())
}

/// Check the largest storage bindings against the device binding limit.
fn check_storage(model: &Model, limit: u64) -> Result<(), GpuError> {
    let field_bytes = (6 * model.grid().len() * size_of::<f32>()) as u64;
    check_capacity(FIELD_STORAGE, field_bytes, limit)?;
    let series_bytes = receiver_series_bytes(model.iterations(), model.receivers().len());
    check_capacity(RECEIVER_SERIES, series_bytes, limit)
}

/// Bytes of the `[6][iterations][n_rx]` receiver series buffer.
fn receiver_series_bytes(iterations: usize, receivers: usize) -> u64 {
    (6 * iterations * receivers * size_of::<f32>()) as u64
}

/// Reject model features the kernels do not implement.
fn check_supported(model: &Model) -> Result<(), GpuError> {
    if !model.transmission_lines().is_empty() {
        return Err(GpuError::Unsupported(
            "transmission-line sources run on the CPU backend only".into(),
        ));
    }
    for rx in model.receivers() {
        if let Some(s) = rx.series.iter().find(|s| s.component.field_index().is_none()) {
            return Err(GpuError::Unsupported(format!(
                "receiver '{}' requests {:?}; only field components are recorded",
                rx.id, s.component
            )));
        }
    }
    Ok(())
}

/// Substitute the material count into a shader template.
fn shader_source(template: &str, num_materials: usize) -> String {
    template
        .replace("{{NUM_MATERIALS}}", &num_materials.to_string())
        .replace("{{COEFF_VEC4S}}", &(4 * num_materials).to_string())
}

/// E rows then H rows, each as `(A, Bx, By, Bz), (src, 0, 0, 0)`.
fn pack_coefficients(table: &CoefficientTable) -> Vec<[f32; 4]> {
    let n = table.num_materials();
    let rows = (0..n)
        .map(|id| table.e_row(id))
        .chain((0..n).map(|id| table.h_row(id)));
    let mut packed = Vec::with_capacity(4 * n);
    for r in rows {
        packed.push([r[0], r[1], r[2], r[3]]);
        packed.push([r[4], 0.0, 0.0, 0.0]);
    }
    packed
}

/// Source records in application order (voltage, Hertzian, magnetic) and their
/// waveforms, one sample per iteration plus a trailing one.
fn source_table(model: &Model) -> (Vec<SourceInfo>, Vec<f32>) {
    let grid = model.grid();
    let sources = model.sources();
    let samples = model.iterations() + 1;
    let [dx, dy, dz] = grid.spacing();
    let mut infos = Vec::with_capacity(sources.len());
    let mut waveforms = Vec::with_capacity(sources.len() * samples);

    let voltage = sources.voltage.iter().map(|s| {
        let axis = s.point.axis;
        let spacing = grid.spacing();
        if s.resistance == 0.0 {
            (&s.point, HARD_VOLTAGE, spacing[axis] as f32)
        } else {
            let area = spacing[(axis + 1) % 3] * spacing[(axis + 2) % 3];
            (&s.point, SOFT_VOLTAGE, (s.resistance * area) as f32)
        }
    });
    let hertzian = sources.hertzian.iter().map(|s| {
        let dl = grid.spacing()[s.point.axis];
        (&s.point, HERTZIAN_DIPOLE, (dl / (dx * dy * dz)) as f32)
    });
    let magnetic = sources
        .magnetic
        .iter()
        .map(|s| (&s.point, MAGNETIC_DIPOLE, (dx * dy * dz) as f32));

    for (point, kind, scale) in voltage.chain(hertzian).chain(magnetic) {
        let [i, j, k] = point.position;
        infos.push(SourceInfo {
            node: grid.index(i, j, k) as u32,
            axis: point.axis as u32,
            kind,
            start: point.window.start as u32,
            stop: point.window.stop as u32,
            _pad0: 0,
            scale,
            _pad1: 0.0,
        });
        waveforms.extend((0..samples).map(|n| point.sample(n)));
    }
    (infos, waveforms)
}

fn pml_dispatch(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    layout: &wgpu::BindGroupLayout,
    shared: &[&wgpu::Buffer; 3],
    grid: &GridState,
    slab: &PmlSlab,
    electric: bool,
) -> Dispatch {
    let (bx, layers, psi) = if electric {
        (slab.e_box(), slab.e_layers(), slab.psi_e())
    } else {
        (slab.h_box(), slab.h_layers(), slab.psi_h())
    };
    let strides = grid.strides();
    let params = PmlParams {
        lower: [bx[0].start as u32, bx[1].start as u32, bx[2].start as u32],
        extent: [bx[0].len() as u32, bx[1].len() as u32, bx[2].len() as u32],
        axis: slab.face().axis() as u32,
        orders: slab.orders() as u32,
        electric: electric as u32,
        dims: grid.dims().map(|d| d as u32),
        sx: strides.x as u32,
        sy: strides.y as u32,
        len: grid.len() as u32,
        _pad: 0,
    };
    let label = if electric { "PML Electric" } else { "PML Magnetic" };
    let params_buffer = upload(
        device,
        queue,
        label,
        std::slice::from_ref(&params),
        wgpu::BufferUsages::UNIFORM,
    );
    let storage = wgpu::BufferUsages::STORAGE;
    let layer_buffer = upload(device, queue, "PML Layer Buffer", layers, storage);
    let psi_buffer = upload(device, queue, "PML Psi Buffer", psi, storage);
    let [coeffs, fields, ids] = *shared;
    let bind_group = create_bind_group(
        device,
        label,
        layout,
        &[&params_buffer, coeffs, fields, ids, &layer_buffer, &psi_buffer],
    );
    Dispatch {
        bind_group,
        items: bx.iter().map(|r| r.len()).product(),
    }
}

fn create_buffer(
    device: &wgpu::Device,
    label: &str,
    size: u64,
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        // Bindings may not be empty.
        size: size.max(16),
        usage,
        mapped_at_creation: false,
    })
}

fn upload<T: bytemuck::Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    data: &[T],
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let buffer = create_buffer(
        device,
        label,
        bytes.len() as u64,
        usage | wgpu::BufferUsages::COPY_DST,
    );
    if !bytes.is_empty() {
        queue.write_buffer(&buffer, 0, bytes);
    }
    buffer
}

fn create_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    layout: &wgpu::BindGroupLayout,
) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        ..Default::default()
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

fn create_bind_group(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::BindGroupLayout,
    buffers: &[&wgpu::Buffer],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &entries,
    })
}

fn layout_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

const UNIFORM: wgpu::BufferBindingType = wgpu::BufferBindingType::Uniform;
const READ: wgpu::BufferBindingType = wgpu::BufferBindingType::Storage { read_only: true };
const READ_WRITE: wgpu::BufferBindingType = wgpu::BufferBindingType::Storage { read_only: false };

fn create_field_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Field Bind Group Layout"),
        entries: &[
            layout_entry(0, UNIFORM),
            layout_entry(1, UNIFORM),
            layout_entry(2, READ_WRITE),
            layout_entry(3, READ),
        ],
    })
}

fn create_dispersive_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Dispersive Bind Group Layout"),
        entries: &[
            layout_entry(0, UNIFORM),
            layout_entry(1, UNIFORM),
            layout_entry(2, READ_WRITE),
            layout_entry(3, READ),
            layout_entry(4, READ_WRITE),
            layout_entry(5, READ),
        ],
    })
}

fn create_pml_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("PML Bind Group Layout"),
        entries: &[
            layout_entry(0, UNIFORM),
            layout_entry(1, UNIFORM),
            layout_entry(2, READ_WRITE),
            layout_entry(3, READ),
            layout_entry(4, READ),
            layout_entry(5, READ_WRITE),
        ],
    })
}

fn create_sources_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Sources Bind Group Layout"),
        entries: &[
            layout_entry(0, UNIFORM),
            layout_entry(1, UNIFORM),
            layout_entry(2, READ_WRITE),
            layout_entry(3, READ),
            layout_entry(4, READ),
            layout_entry(5, READ),
        ],
    })
}

fn create_receivers_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Receivers Bind Group Layout"),
        entries: &[
            layout_entry(0, UNIFORM),
            layout_entry(1, READ),
            layout_entry(2, READ),
            layout_entry(3, READ_WRITE),
        ],
    })
}

fn create_snapshot_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Snapshot Bind Group Layout"),
        entries: &[
            layout_entry(0, UNIFORM),
            layout_entry(1, READ),
            layout_entry(2, READ_WRITE),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::backend::UpdateEngine;
    use crate::compute::cpu::CpuBackend;
    use crate::schema::{
        DebyePole, Dispersion, DomainConfig, Material, OutputComponent, PmlConfig, Polarisation,
        ReceiverConfig, Shape, SnapshotConfig, SnapshotTime, SolverConfig, SourceConfig,
        SourceKind, TimeWindow,
    };

    fn pulse(iterations: usize) -> Vec<f32> {
        (0..iterations)
            .map(|n| {
                let t = (n as f64 - 15.0) / 5.0;
                (-2.0 * t * (-t * t).exp()) as f32
            })
            .collect()
    }

    fn source(kind: SourceKind, polarisation: Polarisation, position: [usize; 3]) -> SourceConfig {
        SourceConfig {
            kind,
            polarisation,
            position,
            start: 0.0,
            stop: None,
            waveform: pulse(40),
        }
    }

    fn test_config() -> SolverConfig {
        SolverConfig {
            domain: DomainConfig {
                nx: 24,
                ny: 20,
                nz: 22,
                dx: 2e-3,
                dy: 2e-3,
                dz: 2e-3,
            },
            time_window: TimeWindow::Iterations(40),
            pml: PmlConfig::uniform(5),
            materials: vec![Material::new("concrete", 6.0, 0.01, 1.0, 0.0)],
            geometry: vec![Shape::Box {
                lower: [0, 0, 0],
                upper: [24, 20, 8],
                material: "concrete".into(),
            }],
            sources: vec![
                source(SourceKind::HertzianDipole, Polarisation::Z, [12, 10, 12]),
                source(
                    SourceKind::VoltageSource { resistance: 50.0 },
                    Polarisation::X,
                    [9, 10, 12],
                ),
                source(SourceKind::MagneticDipole, Polarisation::Y, [14, 9, 13]),
            ],
            receivers: vec![
                ReceiverConfig {
                    id: None,
                    position: [15, 10, 12],
                    outputs: OutputComponent::FIELDS.to_vec(),
                },
                ReceiverConfig {
                    id: None,
                    position: [12, 10, 9],
                    outputs: vec![OutputComponent::Ez, OutputComponent::Hx],
                },
            ],
            snapshots: vec![SnapshotConfig {
                name: "mid".into(),
                lower: [2, 2, 2],
                upper: [22, 18, 20],
                stride: [2, 3, 1],
                at: SnapshotTime::Iteration(25),
            }],
            ..Default::default()
        }
    }

    fn gpu_engine(config: &SolverConfig) -> Option<UpdateEngine> {
        let model = Model::build(config).unwrap();
        match pollster::block_on(GpuBackend::new(&model)) {
            Ok(backend) => Some(UpdateEngine::new(model, Box::new(backend))),
            Err(GpuError::NoAdapter) => {
                eprintln!("Skipping GPU test: no adapter available");
                None
            }
            Err(e) => panic!("Failed to create GPU backend: {:?}", e),
        }
    }

    fn cpu_engine(config: &SolverConfig) -> UpdateEngine {
        let model = Model::build(config).unwrap();
        UpdateEngine::new(model, Box::new(CpuBackend::new(Some(2)).unwrap()))
    }

    fn relative_error(reference: &[f32], other: &[f32]) -> f64 {
        let norm = reference
            .iter()
            .map(|&x| (x as f64) * (x as f64))
            .sum::<f64>()
            .sqrt();
        let diff = reference
            .iter()
            .zip(other)
            .map(|(&a, &b)| (a as f64 - b as f64).powi(2))
            .sum::<f64>()
            .sqrt();
        if norm > 1e-20 { diff / norm } else { diff }
    }

    fn assert_equivalent(config: &SolverConfig, tolerance: f64) {
        let Some(mut gpu) = gpu_engine(config) else {
            return;
        };
        let mut cpu = cpu_engine(config);
        cpu.run().unwrap();
        gpu.run().unwrap();

        for (a, b) in cpu.model().receivers().iter().zip(gpu.model().receivers()) {
            for (sa, sb) in a.series.iter().zip(&b.series) {
                assert!(sa.values.iter().any(|&v| v != 0.0));
                let err = relative_error(&sa.values, &sb.values);
                assert!(
                    err < tolerance,
                    "Receiver {} {:?}: GPU/CPU mismatch - relative error {:.3e}",
                    a.id,
                    sa.component,
                    err
                );
            }
        }
        for c in Component::ALL {
            let err = relative_error(cpu.model().grid().field(c), gpu.model().grid().field(c));
            assert!(err < tolerance, "{:?}: relative error {:.3e}", c, err);
        }
        assert_eq!(gpu.model().grid().iteration, config.iterations());
    }

    #[test]
    fn test_gpu_backend_creation() {
        let model = Model::build(&test_config()).unwrap();
        let result = pollster::block_on(GpuBackend::new(&model));

        // Skip test if no GPU available
        if let Err(GpuError::NoAdapter) = &result {
            eprintln!("Skipping GPU test: no adapter available");
            return;
        }

        assert!(result.is_ok(), "Failed to create GPU backend");
    }

    #[test]
    fn test_gpu_cpu_equivalence() {
        assert_equivalent(&test_config(), 1e-5);
    }

    #[test]
    fn test_gpu_cpu_equivalence_dispersive() {
        let mut config = test_config();
        config.materials.push(
            Material::new("wet_soil", 4.0, 0.002, 1.0, 0.0).with_dispersion(Dispersion::Debye(
                vec![
                    DebyePole {
                        delta_er: 8.0,
                        tau: 2e-11,
                    },
                    DebyePole {
                        delta_er: 2.0,
                        tau: 1e-10,
                    },
                ],
            )),
        );
        config.geometry.push(Shape::Box {
            lower: [0, 0, 0],
            upper: [24, 20, 5],
            material: "wet_soil".into(),
        });
        config.time_window = TimeWindow::Iterations(60);
        // Complex pole state accumulates more rounding than the plain curl update.
        assert_equivalent(&config, 1e-4);
    }

    #[test]
    fn test_snapshot_policies_agree() {
        let mut deferred_config = test_config();
        deferred_config.backend.snapshot_transfer = SnapshotTransfer::Deferred;
        let mut immediate_config = deferred_config.clone();
        immediate_config.backend.snapshot_transfer = SnapshotTransfer::Immediate;
        immediate_config.snapshots.push(SnapshotConfig {
            name: "late".into(),
            lower: [0, 0, 0],
            upper: [24, 20, 22],
            stride: [4, 4, 4],
            at: SnapshotTime::Iteration(40),
        });
        deferred_config.snapshots = immediate_config.snapshots.clone();

        let (Some(mut deferred), Some(mut immediate)) =
            (gpu_engine(&deferred_config), gpu_engine(&immediate_config))
        else {
            return;
        };
        let mut cpu = cpu_engine(&deferred_config);
        deferred.run().unwrap();
        immediate.run().unwrap();
        cpu.run().unwrap();

        for n in 0..2 {
            let d = deferred.model().snapshots()[n].data.as_ref().unwrap();
            let i = immediate.model().snapshots()[n].data.as_ref().unwrap();
            let c = cpu.model().snapshots()[n].data.as_ref().unwrap();
            assert_eq!(d, i);
            assert_eq!(d.shape, c.shape);
            for comp in Component::ALL {
                let err = relative_error(c.component(comp), d.component(comp));
                assert!(err < 1e-4, "snapshot {} {:?}: {:.3e}", n, comp, err);
            }
        }
    }

    #[test]
    fn test_coefficient_table_over_budget_rejected() {
        let mut config = test_config();
        config.materials = (0..1100)
            .map(|n| Material::new(format!("m{n}"), 1.0 + n as f64 * 0.01, 0.0, 1.0, 0.0))
            .collect();
        config.geometry.clear();
        let model = Model::build(&config).unwrap();
        let before = model.grid().clone();

        let result = pollster::block_on(GpuBackend::new(&model));
        match result {
            Err(GpuError::CapacityExceeded {
                resource,
                required,
                limit,
            }) => {
                assert_eq!(resource, CONSTANT_TABLE);
                assert_eq!(required, constant_table_bytes(1102));
                assert_eq!(limit, 65_536);
            }
            Err(e) => panic!("expected capacity error, got {:?}", e),
            Ok(_) => panic!("expected capacity error"),
        }
        assert_eq!(model.grid().iteration, 0);
        assert_eq!(model.grid().ez, before.ez);
        assert_eq!(model.grid().hx, before.hx);
    }

    #[test]
    fn test_device_uniform_limit_applies() {
        let mut config = test_config();
        config.backend.constant_memory_bytes = u64::MAX;
        config.materials = (0..1100)
            .map(|n| Material::new(format!("m{n}"), 2.0, 0.0, 1.0, 0.0))
            .collect();
        config.geometry.clear();
        let model = Model::build(&config).unwrap();
        match pollster::block_on(GpuBackend::new(&model)) {
            Err(GpuError::NoAdapter) => {
                eprintln!("Skipping GPU test: no adapter available");
            }
            Err(GpuError::CapacityExceeded { limit, .. }) => {
                assert!(limit < constant_table_bytes(1102));
            }
            Err(e) => panic!("expected capacity error, got {:?}", e),
            Ok(_) => panic!("expected capacity error"),
        }
    }

    #[test]
    fn test_receiver_series_over_storage_limit_rejected() {
        let mut config = test_config();
        config.time_window = TimeWindow::Iterations(20_000);
        let model = Model::build(&config).unwrap();
        let field_bytes = (6 * model.grid().len() * size_of::<f32>()) as u64;
        let n_rx = model.receivers().len();
        assert!(check_storage(&model, u64::MAX).is_ok());

        match check_storage(&model, field_bytes) {
            Err(GpuError::CapacityExceeded {
                resource,
                required,
                limit,
            }) => {
                assert_eq!(resource, RECEIVER_SERIES);
                assert_eq!(required, receiver_series_bytes(20_000, n_rx));
                assert_eq!(limit, field_bytes);
            }
            other => panic!("expected receiver capacity error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_transmission_line_unsupported() {
        let mut config = test_config();
        config.sources.push(source(
            SourceKind::TransmissionLine { resistance: 50.0 },
            Polarisation::Z,
            [10, 10, 14],
        ));
        let model = Model::build(&config).unwrap();
        assert!(matches!(
            pollster::block_on(GpuBackend::new(&model)),
            Err(GpuError::Unsupported(_))
        ));
    }

    #[test]
    fn test_current_output_unsupported() {
        let mut config = test_config();
        config.receivers[1].outputs.push(OutputComponent::Iz);
        let model = Model::build(&config).unwrap();
        assert!(matches!(
            pollster::block_on(GpuBackend::new(&model)),
            Err(GpuError::Unsupported(_))
        ));
    }

    #[test]
    fn test_coefficient_packing() {
        let model = Model::build(&test_config()).unwrap();
        let table = model.table();
        let packed = pack_coefficients(table);
        let n = table.num_materials();
        assert_eq!(packed.len(), 4 * n);
        assert_eq!(
            (packed.len() * size_of::<[f32; 4]>()) as u64,
            constant_table_bytes(n)
        );
        let id = 2;
        assert_eq!(packed[2 * id][1], table.e_row(id)[1]);
        assert_eq!(packed[2 * id + 1][0], table.e_row(id)[4]);
        assert_eq!(packed[2 * (n + id)][0], table.h_row(id)[0]);
        let source = shader_source(MAGNETIC_SHADER, n);
        assert!(source.contains(&format!("array<vec4<f32>, {}>", 4 * n)));
        assert!(!source.contains("{{"));
    }
}
