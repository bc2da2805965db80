//! Source configuration: point excitations and the transmission-line feed.

use serde::{Deserialize, Serialize};

use super::{ConfigError, Z0};

/// Field axis a source drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarisation {
    X,
    Y,
    Z,
}

impl Polarisation {
    #[inline]
    pub fn axis(self) -> usize {
        match self {
            Polarisation::X => 0,
            Polarisation::Y => 1,
            Polarisation::Z => 2,
        }
    }
}

/// Kind-specific source parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// Resistive voltage source; zero resistance makes it a hard source.
    VoltageSource { resistance: f64 },
    /// Soft current-element source.
    HertzianDipole,
    /// Soft magnetic current source.
    MagneticDipole,
    /// One-dimensional feed line connected at a single cell.
    TransmissionLine { resistance: f64 },
}

/// A source placed at one cell, with its precomputed per-iteration waveform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(flatten)]
    pub kind: SourceKind,
    pub polarisation: Polarisation,
    /// Cell coordinate (i, j, k).
    pub position: [usize; 3],
    /// Activation time (s).
    #[serde(default)]
    pub start: f64,
    /// Removal time (s); defaults to the end of the time window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<f64>,
    /// Waveform sample per iteration. Missing trailing samples are zero.
    pub waveform: Vec<f32>,
}

impl SourceConfig {
    pub fn validate(&self, index: usize, dims: [usize; 3]) -> Result<(), ConfigError> {
        let invalid = |reason: &'static str| ConfigError::InvalidSource { index, reason };

        if !(self.start >= 0.0) {
            return Err(invalid(
                "delay of the initiation of the source should not be less than zero",
            ));
        }
        if let Some(stop) = self.stop {
            if !(stop >= 0.0) {
                return Err(invalid(
                    "time to remove the source should not be less than zero",
                ));
            }
            if stop - self.start <= 0.0 {
                return Err(invalid("duration of the source should not be zero or less"));
            }
        }
        match self.kind {
            SourceKind::VoltageSource { resistance } if !(resistance >= 0.0) => {
                return Err(invalid("requires a source resistance of zero or greater"));
            }
            SourceKind::TransmissionLine { resistance }
                if !(resistance > 0.0 && resistance < Z0) =>
            {
                return Err(invalid(
                    "requires a resistance greater than zero and less than the impedance \
                     of free space, i.e. 376.73 Ohms",
                ));
            }
            _ => {}
        }
        if self.position.iter().zip(dims).any(|(&p, n)| p >= n) {
            return Err(ConfigError::OutOfDomain {
                what: format!("source {index}"),
                position: self.position,
            });
        }
        Ok(())
    }
}
