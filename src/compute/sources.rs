//! Source excitations applied between the field updates.
//!
//! Magnetic phase order: transmission lines, then magnetic dipoles.
//! Electric phase order: voltage sources, transmission lines, then Hertzian dipoles.
//! Every source reads the iteration counter before it is incremented.

use super::coefficients::CoefficientTable;
use super::grid::{Component, GridState};
use crate::schema::{C, SourceConfig, SourceKind};

const WINDOW_TOLERANCE: f64 = 1e-9;

/// Half-open range of iterations during which a source is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: usize,
    pub stop: usize,
}

impl ActiveWindow {
    /// Convert start / stop times into iterations. A missing stop, or one past the
    /// end of the run, is clamped to `iterations`.
    pub fn new(start: f64, stop: Option<f64>, dt: f64, iterations: usize) -> Self {
        let to_iteration = |t: f64| (t / dt - WINDOW_TOLERANCE).ceil().max(0.0) as usize;
        let stop = stop.map(to_iteration).unwrap_or(iterations).min(iterations);
        Self {
            start: to_iteration(start),
            stop,
        }
    }

    #[inline]
    pub fn contains(&self, iteration: usize) -> bool {
        self.start <= iteration && iteration < self.stop
    }
}

/// Placement and excitation shared by every source kind.
#[derive(Debug, Clone)]
pub struct PointSource {
    pub axis: usize,
    pub position: [usize; 3],
    pub window: ActiveWindow,
    waveform: Vec<f32>,
}

impl PointSource {
    fn new(config: &SourceConfig, dt: f64, iterations: usize) -> Self {
        Self {
            axis: config.polarisation.axis(),
            position: config.position,
            window: ActiveWindow::new(config.start, config.stop, dt, iterations),
            waveform: config.waveform.clone(),
        }
    }

    /// Waveform sample at a whole step; zero past the end of the samples.
    #[inline]
    pub fn sample(&self, iteration: usize) -> f32 {
        self.waveform.get(iteration).copied().unwrap_or(0.0)
    }

    /// Waveform value half a step after `iteration`.
    #[inline]
    pub fn sample_half(&self, iteration: usize) -> f32 {
        0.5 * (self.sample(iteration) + self.sample(iteration + 1))
    }

    /// Sample while the window is open.
    #[inline]
    pub fn active_sample(&self, iteration: usize) -> Option<f32> {
        self.window.contains(iteration).then(|| self.sample(iteration))
    }

    pub fn waveform(&self) -> &[f32] {
        &self.waveform
    }

    fn node(&self, grid: &GridState) -> usize {
        let [i, j, k] = self.position;
        grid.index(i, j, k)
    }
}

/// Coefficient column 4 of the material at the source node.
fn source_coefficient(
    grid: &GridState,
    table: &CoefficientTable,
    c: Component,
    idx: usize,
) -> f32 {
    let id = grid.material_ids(c)[idx] as usize;
    if c.is_electric() {
        table.e_row(id)[4]
    } else {
        table.h_row(id)[4]
    }
}

/// Resistive voltage source; a zero resistance imposes the field directly.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    pub point: PointSource,
    pub resistance: f64,
}

impl VoltageSource {
    pub fn update_electric(
        &self,
        iteration: usize,
        grid: &mut GridState,
        table: &CoefficientTable,
    ) {
        let Some(v) = self.point.active_sample(iteration) else {
            return;
        };
        let c = Component::electric(self.point.axis);
        let idx = self.point.node(grid);
        let spacing = grid.spacing();
        let axis = self.point.axis;

        if self.resistance == 0.0 {
            grid.field_mut(c)[idx] = -v / spacing[axis] as f32;
        } else {
            let area = spacing[(axis + 1) % 3] * spacing[(axis + 2) % 3];
            let srce = source_coefficient(grid, table, c, idx);
            grid.field_mut(c)[idx] -= srce * v / (self.resistance * area) as f32;
        }
    }
}

/// Soft current-element source.
#[derive(Debug, Clone)]
pub struct HertzianDipole {
    pub point: PointSource,
}

impl HertzianDipole {
    pub fn update_electric(
        &self,
        iteration: usize,
        grid: &mut GridState,
        table: &CoefficientTable,
    ) {
        let Some(v) = self.point.active_sample(iteration) else {
            return;
        };
        let c = Component::electric(self.point.axis);
        let idx = self.point.node(grid);
        let [dx, dy, dz] = grid.spacing();
        let dl = grid.spacing()[self.point.axis];
        let srce = source_coefficient(grid, table, c, idx);
        grid.field_mut(c)[idx] -= srce * v * (dl / (dx * dy * dz)) as f32;
    }
}

/// Soft magnetic current source.
#[derive(Debug, Clone)]
pub struct MagneticDipole {
    pub point: PointSource,
}

impl MagneticDipole {
    pub fn update_magnetic(
        &self,
        iteration: usize,
        grid: &mut GridState,
        table: &CoefficientTable,
    ) {
        if !self.point.window.contains(iteration) {
            return;
        }
        let v = self.point.sample_half(iteration);
        let c = Component::magnetic(self.point.axis);
        let idx = self.point.node(grid);
        let [dx, dy, dz] = grid.spacing();
        let srcm = source_coefficient(grid, table, c, idx);
        grid.field_mut(c)[idx] -= srcm * v / (dx * dy * dz) as f32;
    }
}

/// One-dimensional feed line coupled to the grid at a single cell.
///
/// The line is first run on its own, long enough that nothing reflects back within
/// the time window, to record the incident voltage and current at the antenna node.
/// It is then shortened to end at the antenna node for the coupled run.
#[derive(Debug, Clone)]
pub struct TransmissionLine {
    pub point: PointSource,
    pub resistance: f64,
    /// Cell length of the line.
    pub dl: f64,
    /// Node where the one-way excitation is injected.
    pub srcpos: usize,
    /// Node connected to the grid.
    pub antpos: usize,
    nl: usize,
    courant: f64,
    abc_coeff: f64,
    voltage: Vec<f64>,
    current: Vec<f64>,
    abcv0: f64,
    abcv1: f64,
    pub vinc: Vec<f32>,
    pub iinc: Vec<f32>,
    pub vtotal: Vec<f32>,
    pub itotal: Vec<f32>,
}

impl TransmissionLine {
    pub const SRCPOS: usize = 5;
    pub const ANTPOS: usize = 10;

    pub fn new(point: PointSource, resistance: f64, dt: f64, iterations: usize) -> Self {
        let dl = 3f64.sqrt() * C * dt;
        let nl = ((0.667 * iterations as f64).round() as usize).max(Self::ANTPOS + 2);
        let mut line = Self {
            point,
            resistance,
            dl,
            srcpos: Self::SRCPOS,
            antpos: Self::ANTPOS,
            nl,
            courant: C * dt / dl,
            abc_coeff: (C * dt - dl) / (C * dt + dl),
            voltage: vec![0.0; nl],
            current: vec![0.0; nl],
            abcv0: 0.0,
            abcv1: 0.0,
            vinc: vec![0.0; iterations],
            iinc: vec![0.0; iterations],
            vtotal: vec![0.0; iterations],
            itotal: vec![0.0; iterations],
        };
        line.calculate_incident(iterations);
        line
    }

    fn calculate_incident(&mut self, iterations: usize) {
        for it in 0..iterations {
            self.vinc[it] = self.voltage[self.antpos] as f32;
            self.iinc[it] = self.current[self.antpos] as f32;
            let (half, whole) = match self.point.active_sample(it) {
                Some(v) => (self.point.sample_half(it), v),
                None => (0.0, 0.0),
            };
            self.update_current(half);
            self.update_voltage(whole);
        }

        self.nl = self.antpos + 1;
        self.voltage = vec![0.0; self.nl];
        self.current = vec![0.0; self.nl];
        self.abcv0 = 0.0;
        self.abcv1 = 0.0;
    }

    /// Number of line nodes currently simulated.
    #[inline]
    pub fn nodes(&self) -> usize {
        self.nl
    }

    #[inline]
    pub fn antenna_voltage(&self) -> f64 {
        self.voltage[self.antpos]
    }

    #[inline]
    pub fn antenna_current(&self) -> f64 {
        self.current[self.antpos]
    }

    fn update_abc(&mut self) {
        self.voltage[0] = self.abc_coeff * (self.voltage[1] - self.abcv0) + self.abcv1;
        self.abcv0 = self.voltage[0];
        self.abcv1 = self.voltage[1];
    }

    fn update_voltage(&mut self, injected: f32) {
        let k = self.resistance * self.courant;
        for n in 1..self.nl {
            self.voltage[n] -= k * (self.current[n] - self.current[n - 1]);
        }
        self.voltage[self.srcpos] += self.courant * injected as f64;
        self.update_abc();
    }

    fn update_current(&mut self, injected: f32) {
        let k = self.courant / self.resistance;
        for n in 0..self.nl - 1 {
            self.current[n] -= k * (self.voltage[n + 1] - self.voltage[n]);
        }
        self.current[self.srcpos - 1] += k * injected as f64;
    }

    pub fn update_magnetic(&mut self, iteration: usize, grid: &GridState) {
        if !self.point.window.contains(iteration) {
            return;
        }
        let [i, j, k] = self.point.position;
        self.current[self.antpos] = grid.loop_current(self.point.axis, i, j, k) as f64;
        self.update_current(self.point.sample_half(iteration));
    }

    pub fn update_electric(&mut self, iteration: usize, grid: &mut GridState) {
        if !self.point.window.contains(iteration) {
            return;
        }
        self.update_voltage(self.point.sample(iteration));
        let c = Component::electric(self.point.axis);
        let idx = self.point.node(grid);
        let d = grid.spacing()[self.point.axis];
        grid.field_mut(c)[idx] = -(self.voltage[self.antpos] / d) as f32;
    }

    /// Record the total voltage and current at the antenna node.
    pub fn record(&mut self, index: usize) {
        if let (Some(v), Some(i)) = (self.vtotal.get_mut(index), self.itotal.get_mut(index)) {
            *v = self.voltage[self.antpos] as f32;
            *i = self.current[self.antpos] as f32;
        }
    }

    pub fn reset(&mut self) {
        self.voltage.fill(0.0);
        self.current.fill(0.0);
        self.abcv0 = 0.0;
        self.abcv1 = 0.0;
        self.vtotal.fill(0.0);
        self.itotal.fill(0.0);
    }
}

/// All sources of a model, grouped by kind.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    pub voltage: Vec<VoltageSource>,
    pub hertzian: Vec<HertzianDipole>,
    pub magnetic: Vec<MagneticDipole>,
    pub lines: Vec<TransmissionLine>,
}

impl Sources {
    pub fn from_config(configs: &[SourceConfig], dt: f64, iterations: usize) -> Self {
        let mut sources = Self::default();
        for config in configs {
            let point = PointSource::new(config, dt, iterations);
            match config.kind {
                SourceKind::VoltageSource { resistance } => {
                    sources.voltage.push(VoltageSource { point, resistance })
                }
                SourceKind::HertzianDipole => sources.hertzian.push(HertzianDipole { point }),
                SourceKind::MagneticDipole => sources.magnetic.push(MagneticDipole { point }),
                SourceKind::TransmissionLine { resistance } => sources
                    .lines
                    .push(TransmissionLine::new(point, resistance, dt, iterations)),
            }
        }
        sources
    }

    pub fn len(&self) -> usize {
        self.voltage.len() + self.hertzian.len() + self.magnetic.len() + self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn update_magnetic(
        &mut self,
        iteration: usize,
        grid: &mut GridState,
        table: &CoefficientTable,
    ) {
        for line in &mut self.lines {
            line.update_magnetic(iteration, grid);
        }
        for src in &self.magnetic {
            src.update_magnetic(iteration, grid, table);
        }
    }

    pub fn update_electric(
        &mut self,
        iteration: usize,
        grid: &mut GridState,
        table: &CoefficientTable,
    ) {
        for src in &self.voltage {
            src.update_electric(iteration, grid, table);
        }
        for line in &mut self.lines {
            line.update_electric(iteration, grid);
        }
        for src in &self.hertzian {
            src.update_electric(iteration, grid, table);
        }
    }

    pub fn reset(&mut self) {
        for line in &mut self.lines {
            line.reset();
        }
    }
}
