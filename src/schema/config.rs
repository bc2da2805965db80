//! Configuration types for a solver run.

use serde::{Deserialize, Serialize};

use super::{
    C, FREE_SPACE_ID, Material, PEC_ID, PmlConfig, ReceiverArrayConfig, ReceiverConfig, Shape,
    SnapshotConfig, SourceConfig,
};

fn default_stability_factor() -> f64 {
    0.99
}

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Domain size and spatial discretisation.
    pub domain: DomainConfig,
    /// Length of the run.
    pub time_window: TimeWindow,
    /// Fraction of the Courant limit used for the time step.
    #[serde(default = "default_stability_factor")]
    pub stability_factor: f64,
    /// Backend selection and resource limits.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Absorbing boundary.
    #[serde(default)]
    pub pml: PmlConfig,
    /// User materials (`pec` and `free_space` are built in).
    #[serde(default)]
    pub materials: Vec<Material>,
    /// Shapes filling the background with materials.
    #[serde(default)]
    pub geometry: Vec<Shape>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,
    #[serde(default)]
    pub rx_arrays: Vec<ReceiverArrayConfig>,
    #[serde(default)]
    pub snapshots: Vec<SnapshotConfig>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            domain: DomainConfig::default(),
            time_window: TimeWindow::Iterations(200),
            stability_factor: default_stability_factor(),
            backend: BackendConfig::default(),
            pml: PmlConfig::default(),
            materials: Vec::new(),
            geometry: Vec::new(),
            sources: Vec::new(),
            receivers: Vec::new(),
            rx_arrays: Vec::new(),
            snapshots: Vec::new(),
        }
    }
}

/// Domain size in cells and the cell dimensions in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            nx: 60,
            ny: 60,
            nz: 60,
            dx: 2e-3,
            dy: 2e-3,
            dz: 2e-3,
        }
    }
}

impl DomainConfig {
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        [self.dx, self.dy, self.dz]
    }
}

/// Time window as an iteration count or a duration in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Iterations(usize),
    Seconds(f64),
}

/// Which backend executes the update phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Cpu,
    Gpu,
}

/// When accelerator snapshots are copied back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotTransfer {
    /// Copy each snapshot right after capture, reusing one device slot.
    Immediate,
    /// Keep one device slot per snapshot and copy all of them at finalize.
    #[default]
    Deferred,
}

fn default_constant_memory() -> u64 {
    65_536
}

/// Backend selection and per-backend resource settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Host worker threads; `None` uses all available cores.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub snapshot_transfer: SnapshotTransfer,
    /// Accelerator constant-memory budget for the material coefficient table (bytes).
    #[serde(default = "default_constant_memory")]
    pub constant_memory_bytes: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Cpu,
            threads: None,
            snapshot_transfer: SnapshotTransfer::default(),
            constant_memory_bytes: default_constant_memory(),
        }
    }
}

impl SolverConfig {
    /// Time step from the Courant limit scaled by the stability factor.
    pub fn dt(&self) -> f64 {
        let d = &self.domain;
        let inv = (1.0 / (d.dx * d.dx) + 1.0 / (d.dy * d.dy) + 1.0 / (d.dz * d.dz)).sqrt();
        self.stability_factor / (C * inv)
    }

    /// Total number of iterations in the run.
    pub fn iterations(&self) -> usize {
        match self.time_window {
            TimeWindow::Iterations(n) => n,
            TimeWindow::Seconds(t) => (t / self.dt()).ceil() as usize + 1,
        }
    }

    /// Time window in seconds.
    pub fn time_window_seconds(&self) -> f64 {
        match self.time_window {
            TimeWindow::Iterations(n) => n.saturating_sub(1) as f64 * self.dt(),
            TimeWindow::Seconds(t) => t,
        }
    }

    /// All receivers, including expanded receiver arrays.
    pub fn all_receivers(&self) -> Vec<ReceiverConfig> {
        let mut receivers = self.receivers.clone();
        for array in &self.rx_arrays {
            receivers.extend(array.expand());
        }
        receivers
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.domain;
        if d.nx == 0 || d.ny == 0 || d.nz == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if !(d.dx > 0.0 && d.dy > 0.0 && d.dz > 0.0) {
            return Err(ConfigError::InvalidSpatialStep);
        }
        if !(self.stability_factor > 0.0 && self.stability_factor <= 1.0) {
            return Err(ConfigError::InvalidStabilityFactor(self.stability_factor));
        }
        match self.time_window {
            TimeWindow::Iterations(0) => return Err(ConfigError::InvalidTimeWindow),
            TimeWindow::Seconds(t) if !(t > 0.0) => return Err(ConfigError::InvalidTimeWindow),
            _ => {}
        }
        if self.backend.threads == Some(0) {
            return Err(ConfigError::InvalidThreadCount);
        }

        let dims = d.dims();
        let dt = self.dt();
        let iterations = self.iterations();

        self.pml.validate(dims)?;

        let mut seen = vec![PEC_ID, FREE_SPACE_ID];
        for material in &self.materials {
            if seen.contains(&material.id.as_str()) {
                return Err(ConfigError::DuplicateMaterial(material.id.clone()));
            }
            seen.push(material.id.as_str());
            material.validate(dt)?;
        }

        for (i, shape) in self.geometry.iter().enumerate() {
            shape.validate(i)?;
            if !seen.contains(&shape.material()) {
                return Err(ConfigError::UnknownMaterial(shape.material().to_string()));
            }
        }

        for (i, source) in self.sources.iter().enumerate() {
            source.validate(i, dims)?;
        }

        for (i, array) in self.rx_arrays.iter().enumerate() {
            array.validate(i)?;
        }
        for (i, rx) in self.all_receivers().iter().enumerate() {
            if rx.position.iter().zip(dims).any(|(&p, n)| p >= n) {
                return Err(ConfigError::OutOfDomain {
                    what: format!("receiver {i}"),
                    position: rx.position,
                });
            }
            if rx.outputs.is_empty() {
                return Err(ConfigError::InvalidReceiver {
                    index: i,
                    reason: "requires at least one output component",
                });
            }
        }

        for (i, snap) in self.snapshots.iter().enumerate() {
            snap.validate(i, dims, dt, iterations)?;
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Domain dimensions (nx, ny, nz) must be non-zero")]
    InvalidDimensions,
    #[error("Spatial steps (dx, dy, dz) must be positive")]
    InvalidSpatialStep,
    #[error("Stability factor must be in (0, 1], got {0}")]
    InvalidStabilityFactor(f64),
    #[error("Time window must be positive")]
    InvalidTimeWindow,
    #[error("Thread count must be non-zero")]
    InvalidThreadCount,
    #[error("Material '{id}' {reason}")]
    InvalidMaterial { id: String, reason: &'static str },
    #[error("Material '{material}' pole {index}: {reason}")]
    InvalidPole {
        material: String,
        index: usize,
        reason: &'static str,
    },
    #[error("Material '{0}' already exists")]
    DuplicateMaterial(String),
    #[error("Material '{0}' does not exist")]
    UnknownMaterial(String),
    #[error("PML CFS: {0}")]
    InvalidCfs(&'static str),
    #[error("PML CFS can only be given one or two times, for up to a 2nd order PML (got {0})")]
    TooManyCfs(usize),
    #[error("PML thickness {thickness} along axis {axis} does not fit in {cells} cells")]
    InvalidPml {
        axis: usize,
        thickness: usize,
        cells: usize,
    },
    #[error("Geometry {index}: {reason}")]
    InvalidGeometry { index: usize, reason: &'static str },
    #[error("Source {index}: {reason}")]
    InvalidSource { index: usize, reason: &'static str },
    #[error("Receiver {index}: {reason}")]
    InvalidReceiver { index: usize, reason: &'static str },
    #[error("Snapshot {index}: {reason}")]
    InvalidSnapshot { index: usize, reason: &'static str },
    #[error("{what} at {position:?} lies outside the domain")]
    OutOfDomain { what: String, position: [usize; 3] },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Polarisation, SourceKind};

    #[test]
    fn test_default_config_is_valid() {
        let config = SolverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.iterations(), 200);
    }

    #[test]
    fn test_courant_time_step() {
        let config = SolverConfig {
            stability_factor: 1.0,
            ..Default::default()
        };
        let dx = config.domain.dx;
        let expected = dx / (C * 3f64.sqrt());
        assert!((config.dt() - expected).abs() / expected < 1e-12);
    }

    #[test]
    fn test_time_window_in_seconds() {
        let mut config = SolverConfig::default();
        let dt = config.dt();
        config.time_window = TimeWindow::Seconds(10.0 * dt);
        assert_eq!(config.iterations(), 11);
    }

    #[test]
    fn test_unknown_material_rejected() {
        let config = SolverConfig {
            geometry: vec![Shape::Box {
                lower: [0, 0, 0],
                upper: [5, 5, 5],
                material: "granite".into(),
            }],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownMaterial(_))
        ));
    }

    #[test]
    fn test_duplicate_builtin_rejected() {
        let config = SolverConfig {
            materials: vec![Material::new("free_space", 2.0, 0.0, 1.0, 0.0)],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateMaterial(_))
        ));
    }

    #[test]
    fn test_invalid_source_reported() {
        let config = SolverConfig {
            sources: vec![SourceConfig {
                kind: SourceKind::VoltageSource { resistance: -1.0 },
                polarisation: Polarisation::Z,
                position: [1, 1, 1],
                start: 0.0,
                stop: None,
                waveform: vec![],
            }],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSource { index: 0, .. })
        ));
    }

    #[test]
    fn test_json_roundtrip_defaults() {
        let json = r#"{
            "domain": {"nx": 40, "ny": 40, "nz": 40, "dx": 0.01, "dy": 0.01, "dz": 0.01},
            "time_window": {"iterations": 50}
        }"#;
        let config: SolverConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.backend.kind, BackendKind::Cpu);
        assert_eq!(config.backend.constant_memory_bytes, 65_536);
        assert_eq!(config.pml.thickness, [10; 6]);
        assert!(config.validate().is_ok());
    }
}
