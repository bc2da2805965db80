//! Minimal geometry for assembling a model: material-filled shapes on the cell lattice.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Shapes are applied in order; later shapes overwrite earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    /// Axis-aligned box of cells `lower..upper` (upper exclusive).
    Box {
        lower: [usize; 3],
        upper: [usize; 3],
        material: String,
    },
}

impl Shape {
    pub fn material(&self) -> &str {
        match self {
            Shape::Box { material, .. } => material,
        }
    }

    /// Cell ranges covered by the shape, clipped to the domain.
    pub fn cell_ranges(&self, dims: [usize; 3]) -> [std::ops::Range<usize>; 3] {
        match self {
            Shape::Box { lower, upper, .. } => [
                lower[0].min(dims[0])..upper[0].min(dims[0]),
                lower[1].min(dims[1])..upper[1].min(dims[1]),
                lower[2].min(dims[2])..upper[2].min(dims[2]),
            ],
        }
    }

    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        match self {
            Shape::Box { lower, upper, .. } => {
                if (0..3).any(|a| lower[a] >= upper[a]) {
                    return Err(ConfigError::InvalidGeometry {
                        index,
                        reason: "the lower coordinates should be less than the upper coordinates",
                    });
                }
            }
        }
        Ok(())
    }
}
