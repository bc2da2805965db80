//! Schema module - Configuration types for solver runs.

mod config;
mod constants;
mod geometry;
mod material;
mod outputs;
mod pml;
mod sources;

pub use config::*;
pub use constants::*;
pub use geometry::*;
pub use material::*;
pub use outputs::*;
pub use pml::*;
pub use sources::*;
