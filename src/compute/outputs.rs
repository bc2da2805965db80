//! Receiver time series and snapshot volumes.

use serde::Serialize;

use super::grid::{Component, GridState};
use super::sources::TransmissionLine;
use crate::schema::{OutputComponent, ReceiverConfig, SnapshotConfig};

/// One recorded quantity of a receiver.
#[derive(Debug, Clone, Serialize)]
pub struct Series {
    pub component: OutputComponent,
    pub values: Vec<f32>,
}

/// Point receiver recording one value per iteration for each requested output.
#[derive(Debug, Clone, Serialize)]
pub struct Receiver {
    pub id: String,
    pub position: [usize; 3],
    pub series: Vec<Series>,
}

impl Receiver {
    pub fn new(index: usize, config: &ReceiverConfig, iterations: usize) -> Self {
        let [i, j, k] = config.position;
        Self {
            id: config
                .id
                .clone()
                .unwrap_or_else(|| format!("rx{index}({i},{j},{k})")),
            position: config.position,
            series: config
                .outputs
                .iter()
                .map(|&component| Series {
                    component,
                    values: vec![0.0; iterations],
                })
                .collect(),
        }
    }

    /// Store the current values at slot `index`.
    pub fn store(&mut self, index: usize, grid: &GridState) {
        let [i, j, k] = self.position;
        for s in &mut self.series {
            let value = match (s.component.field_index(), s.component.current_axis()) {
                (Some(f), _) => grid.get(Component::ALL[f], i, j, k),
                (None, Some(axis)) => grid.loop_current(axis, i, j, k),
                (None, None) => continue,
            };
            if let Some(slot) = s.values.get_mut(index) {
                *slot = value;
            }
        }
    }

    pub fn get(&self, component: OutputComponent) -> Option<&[f32]> {
        self.series
            .iter()
            .find(|s| s.component == component)
            .map(|s| s.values.as_slice())
    }

    pub fn reset(&mut self) {
        for s in &mut self.series {
            s.values.fill(0.0);
        }
    }
}

/// Decimated copy of the six field components over a sub-box.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotVolume {
    /// Samples per axis.
    pub shape: [usize; 3],
    pub ex: Vec<f32>,
    pub ey: Vec<f32>,
    pub ez: Vec<f32>,
    pub hx: Vec<f32>,
    pub hy: Vec<f32>,
    pub hz: Vec<f32>,
}

impl SnapshotVolume {
    pub fn zeros(shape: [usize; 3]) -> Self {
        let n = shape.iter().product();
        Self {
            shape,
            ex: vec![0.0; n],
            ey: vec![0.0; n],
            ez: vec![0.0; n],
            hx: vec![0.0; n],
            hy: vec![0.0; n],
            hz: vec![0.0; n],
        }
    }

    pub fn component(&self, c: Component) -> &[f32] {
        match c {
            Component::Ex => &self.ex,
            Component::Ey => &self.ey,
            Component::Ez => &self.ez,
            Component::Hx => &self.hx,
            Component::Hy => &self.hy,
            Component::Hz => &self.hz,
        }
    }

    pub fn component_mut(&mut self, c: Component) -> &mut [f32] {
        match c {
            Component::Ex => &mut self.ex,
            Component::Ey => &mut self.ey,
            Component::Ez => &mut self.ez,
            Component::Hx => &mut self.hx,
            Component::Hy => &mut self.hy,
            Component::Hz => &mut self.hz,
        }
    }

    /// Value at sample `(a, b, c)`.
    pub fn get(&self, c: Component, a: usize, b: usize, d: usize) -> f32 {
        self.component(c)[(a * self.shape[1] + b) * self.shape[2] + d]
    }
}

/// A snapshot request and, once taken, its captured volume.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub name: String,
    pub lower: [usize; 3],
    pub upper: [usize; 3],
    pub stride: [usize; 3],
    /// Iteration count at which the volume is captured.
    pub iteration: usize,
    pub data: Option<SnapshotVolume>,
}

impl Snapshot {
    pub fn new(config: &SnapshotConfig, dt: f64) -> Self {
        Self {
            name: config.name.clone(),
            lower: config.lower,
            upper: config.upper,
            stride: config.stride,
            iteration: config.at.iteration(dt).unwrap_or(0),
            data: None,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        std::array::from_fn(|a| (self.upper[a] - self.lower[a]).div_ceil(self.stride[a]))
    }

    pub fn is_captured(&self) -> bool {
        self.data.is_some()
    }

    /// Whether the snapshot is due at `iteration` and not yet taken.
    pub fn is_due(&self, iteration: usize) -> bool {
        self.iteration == iteration && !self.is_captured()
    }

    /// Copy the decimated sub-box out of the grid.
    pub fn capture(&mut self, grid: &GridState) {
        let shape = self.shape();
        let mut volume = SnapshotVolume::zeros(shape);
        for c in Component::ALL {
            let field = grid.field(c);
            let out = volume.component_mut(c);
            let mut n = 0;
            for a in 0..shape[0] {
                for b in 0..shape[1] {
                    for d in 0..shape[2] {
                        let i = self.lower[0] + a * self.stride[0];
                        let j = self.lower[1] + b * self.stride[1];
                        let k = self.lower[2] + d * self.stride[2];
                        out[n] = field[grid.index(i, j, k)];
                        n += 1;
                    }
                }
            }
        }
        self.data = Some(volume);
    }
}

/// Record every receiver and transmission line for the iteration just completed.
pub fn store_outputs(
    grid: &GridState,
    receivers: &mut [Receiver],
    lines: &mut [TransmissionLine],
) {
    let Some(index) = grid.iteration.checked_sub(1) else {
        return;
    };
    for rx in receivers {
        rx.store(index, grid);
    }
    for line in lines {
        line.record(index);
    }
}

/// Capture every snapshot due at `iteration`; each is taken at most once.
pub fn store_snapshots(grid: &GridState, snapshots: &mut [Snapshot], iteration: usize) {
    for snap in snapshots.iter_mut().filter(|s| s.is_due(iteration)) {
        log::debug!("Capturing snapshot '{}' at iteration {}", snap.name, iteration);
        snap.capture(grid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SnapshotTime;

    fn grid() -> GridState {
        let mut grid = GridState::new([8; 3], [1e-3; 3], 1e-12, 0);
        for (n, v) in grid.ex.iter_mut().enumerate() {
            *v = n as f32;
        }
        grid
    }

    #[test]
    fn test_receiver_stores_at_previous_iteration() {
        let mut grid = grid();
        let config = ReceiverConfig {
            id: None,
            position: [2, 3, 4],
            outputs: vec![OutputComponent::Ex, OutputComponent::Iz],
        };
        let mut rx = Receiver::new(0, &config, 5);
        assert_eq!(rx.id, "rx0(2,3,4)");

        grid.iteration = 1;
        store_outputs(&grid, std::slice::from_mut(&mut rx), &mut []);
        let expected = grid.get(Component::Ex, 2, 3, 4);
        assert_eq!(rx.get(OutputComponent::Ex).unwrap()[0], expected);
        assert_eq!(rx.get(OutputComponent::Iz).unwrap()[0], 0.0);
        assert!(rx.get(OutputComponent::Hy).is_none());
    }

    #[test]
    fn test_no_store_before_first_iteration() {
        let grid = grid();
        let config = ReceiverConfig {
            id: Some("a".into()),
            position: [2, 3, 4],
            outputs: OutputComponent::FIELDS.to_vec(),
        };
        let mut rx = Receiver::new(0, &config, 3);
        store_outputs(&grid, std::slice::from_mut(&mut rx), &mut []);
        assert!(rx.series.iter().all(|s| s.values.iter().all(|&v| v == 0.0)));
    }

    #[test]
    fn test_snapshot_decimation() {
        let grid = grid();
        let config = SnapshotConfig {
            name: "s".into(),
            lower: [1, 0, 2],
            upper: [6, 3, 9],
            stride: [2, 1, 3],
            at: SnapshotTime::Iteration(3),
        };
        let mut snap = Snapshot::new(&config, 1e-12);
        assert_eq!(snap.shape(), [3, 3, 3]);

        store_snapshots(&grid, std::slice::from_mut(&mut snap), 2);
        assert!(!snap.is_captured());
        store_snapshots(&grid, std::slice::from_mut(&mut snap), 3);
        let data = snap.data.as_ref().unwrap();
        assert_eq!(data.get(Component::Ex, 2, 1, 2), grid.get(Component::Ex, 5, 1, 8));
        assert_eq!(data.get(Component::Ex, 0, 0, 0), grid.get(Component::Ex, 1, 0, 2));
    }

    #[test]
    fn test_snapshot_taken_at_most_once() {
        let mut grid = grid();
        let config = SnapshotConfig {
            name: "s".into(),
            lower: [0, 0, 0],
            upper: [2, 2, 2],
            stride: [1, 1, 1],
            at: SnapshotTime::Iteration(1),
        };
        let mut snap = Snapshot::new(&config, 1e-12);
        store_snapshots(&grid, std::slice::from_mut(&mut snap), 1);
        let first = snap.data.clone();
        grid.ex.fill(-1.0);
        store_snapshots(&grid, std::slice::from_mut(&mut snap), 1);
        assert_eq!(snap.data, first);
    }
}
