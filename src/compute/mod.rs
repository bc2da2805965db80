//! Compute module - Yee-grid field updates, boundary absorption and the two backends.

mod backend;
mod coefficients;
mod cpu;
mod dispersive;
mod fields;
mod grid;
mod model;
mod outputs;
mod pml;
mod sources;

pub mod gpu;

pub use backend::*;
pub use coefficients::*;
pub use cpu::*;
pub use dispersive::*;
pub use fields::*;
pub use grid::*;
pub use model::*;
pub use outputs::*;
pub use pml::*;
pub use sources::*;
