//! Receiver and snapshot configuration.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Quantity a receiver can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputComponent {
    Ex,
    Ey,
    Ez,
    Hx,
    Hy,
    Hz,
    Ix,
    Iy,
    Iz,
}

impl OutputComponent {
    /// The six field components recorded by default.
    pub const FIELDS: [OutputComponent; 6] = [
        OutputComponent::Ex,
        OutputComponent::Ey,
        OutputComponent::Ez,
        OutputComponent::Hx,
        OutputComponent::Hy,
        OutputComponent::Hz,
    ];

    /// Field component slot (0..6) or `None` for loop currents.
    pub fn field_index(self) -> Option<usize> {
        match self {
            OutputComponent::Ex => Some(0),
            OutputComponent::Ey => Some(1),
            OutputComponent::Ez => Some(2),
            OutputComponent::Hx => Some(3),
            OutputComponent::Hy => Some(4),
            OutputComponent::Hz => Some(5),
            _ => None,
        }
    }

    /// Axis of a loop-current output.
    pub fn current_axis(self) -> Option<usize> {
        match self {
            OutputComponent::Ix => Some(0),
            OutputComponent::Iy => Some(1),
            OutputComponent::Iz => Some(2),
            _ => None,
        }
    }
}

fn default_outputs() -> Vec<OutputComponent> {
    OutputComponent::FIELDS.to_vec()
}

/// A single receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub position: [usize; 3],
    #[serde(default = "default_outputs")]
    pub outputs: Vec<OutputComponent>,
}

/// A regular lattice of receivers recording the default outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverArrayConfig {
    pub lower: [usize; 3],
    pub upper: [usize; 3],
    pub step: [usize; 3],
}

impl ReceiverArrayConfig {
    /// Expand into individual receivers, x fastest.
    pub fn expand(&self) -> Vec<ReceiverConfig> {
        let axis = |a: usize| (self.lower[a]..=self.upper[a]).step_by(self.step[a].max(1));
        let mut receivers = Vec::new();
        for k in axis(2) {
            for j in axis(1) {
                for i in axis(0) {
                    receivers.push(ReceiverConfig {
                        id: None,
                        position: [i, j, k],
                        outputs: default_outputs(),
                    });
                }
            }
        }
        receivers
    }

    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if (0..3).any(|a| self.lower[a] > self.upper[a]) {
            return Err(ConfigError::InvalidReceiver {
                index,
                reason: "the lower coordinates should be less than the upper coordinates",
            });
        }
        if self.step.contains(&0) {
            return Err(ConfigError::InvalidReceiver {
                index,
                reason: "the step size should not be less than the spatial discretisation",
            });
        }
        Ok(())
    }
}

/// Snapshot trigger: an explicit iteration or a time in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotTime {
    Iteration(usize),
    Time(f64),
}

impl SnapshotTime {
    /// Target iteration (1-based count of completed iterations).
    pub fn iteration(self, dt: f64) -> Option<usize> {
        match self {
            SnapshotTime::Iteration(it) => Some(it),
            SnapshotTime::Time(t) if t > 0.0 => Some((t / dt).round() as usize + 1),
            SnapshotTime::Time(_) => None,
        }
    }
}

/// A decimated sub-box captured once at a target iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub name: String,
    pub lower: [usize; 3],
    pub upper: [usize; 3],
    #[serde(default = "default_stride")]
    pub stride: [usize; 3],
    pub at: SnapshotTime,
}

fn default_stride() -> [usize; 3] {
    [1, 1, 1]
}

impl SnapshotConfig {
    pub fn validate(
        &self,
        index: usize,
        dims: [usize; 3],
        dt: f64,
        iterations: usize,
    ) -> Result<(), ConfigError> {
        let invalid = |reason: &'static str| ConfigError::InvalidSnapshot { index, reason };

        if self.stride.contains(&0) {
            return Err(invalid(
                "the step size should not be less than the spatial discretisation",
            ));
        }
        if (0..3).any(|a| self.lower[a] >= self.upper[a] || self.upper[a] > dims[a] + 1) {
            return Err(invalid("the box corners are not valid for the domain"));
        }
        match self.at.iteration(dt) {
            None => Err(invalid("time value must be greater than zero")),
            Some(it) if it == 0 || it > iterations => Err(invalid("time value is not valid")),
            Some(_) => Ok(()),
        }
    }
}
