//! GPU compute backend for the field solver.
//!
//! Mirrors the grid in device memory and runs every update phase as a wgpu compute pass.

mod backend;

pub use backend::{GpuBackend, constant_table_bytes};

/// Error type for GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("Buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("{resource} needs {required} bytes but only {limit} are available")]
    CapacityExceeded {
        resource: &'static str,
        required: u64,
        limit: u64,
    },

    #[error("Not supported on the GPU backend: {0}")]
    Unsupported(String),
}
