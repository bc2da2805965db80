//! Grid state - field arrays, per-component material ids and dispersive auxiliary state.
//!
//! Every array covers `(nx + 1) x (ny + 1) x (nz + 1)` nodes (the extra layer is the
//! halo), flattened as `i * (ny + 1) * (nz + 1) + j * (nz + 1) + k`.

use std::ops::Range;

use num_complex::Complex32;

use crate::schema::{E0, M0};

/// Material id every cell starts with (the free-space background).
pub const FREE_SPACE: u32 = 1;

/// Material id of the built-in perfect conductor.
pub const PEC: u32 = 0;

/// One of the six Yee field components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Ex,
    Ey,
    Ez,
    Hx,
    Hy,
    Hz,
}

impl Component {
    pub const ALL: [Component; 6] = [
        Component::Ex,
        Component::Ey,
        Component::Ez,
        Component::Hx,
        Component::Hy,
        Component::Hz,
    ];

    /// Slot in packed component-major arrays.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn is_electric(self) -> bool {
        self.index() < 3
    }

    /// Spatial axis the component points along.
    #[inline]
    pub fn axis(self) -> usize {
        self.index() % 3
    }

    pub fn electric(axis: usize) -> Self {
        Component::ALL[axis]
    }

    pub fn magnetic(axis: usize) -> Self {
        Component::ALL[3 + axis]
    }

    /// Node ranges the explicit update writes for this component.
    ///
    /// Tangential E on the outer halo is never written, so the outer walls act as
    /// perfect conductors.
    pub fn update_ranges(self, dims: [usize; 3]) -> [Range<usize>; 3] {
        let [nx, ny, nz] = dims;
        match self {
            Component::Ex => [0..nx, 1..ny, 1..nz],
            Component::Ey => [1..nx, 0..ny, 1..nz],
            Component::Ez => [1..nx, 1..ny, 0..nz],
            Component::Hx => [1..nx, 0..ny, 0..nz],
            Component::Hy => [0..nx, 1..ny, 0..nz],
            Component::Hz => [0..nx, 0..ny, 1..nz],
        }
    }
}

/// Flat-index strides for a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strides {
    pub x: usize,
    pub y: usize,
}

impl Strides {
    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i * self.x + j * self.y + k
    }

    /// Stride along an axis (z is contiguous).
    #[inline]
    pub fn along(&self, axis: usize) -> usize {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => 1,
        }
    }
}

/// The authoritative field state mutated by the update engine.
#[derive(Debug, Clone)]
pub struct GridState {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub dt: f64,
    /// Completed iterations; incremented once per electric source phase.
    pub iteration: usize,
    pub ex: Vec<f32>,
    pub ey: Vec<f32>,
    pub ez: Vec<f32>,
    pub hx: Vec<f32>,
    pub hy: Vec<f32>,
    pub hz: Vec<f32>,
    /// Material ids, component-major: `[component][node]`.
    pub ids: Vec<u32>,
    /// Dispersive polarisation state per electric component, pole-minor: `[node][pole]`.
    pub tx: Vec<Complex32>,
    pub ty: Vec<Complex32>,
    pub tz: Vec<Complex32>,
    max_poles: usize,
}

impl GridState {
    /// Allocate a zeroed grid filled with free space.
    ///
    /// `max_poles` sizes the auxiliary state uniformly for every node; 0 allocates none.
    pub fn new(dims: [usize; 3], spacing: [f64; 3], dt: f64, max_poles: usize) -> Self {
        let [nx, ny, nz] = dims;
        let len = (nx + 1) * (ny + 1) * (nz + 1);
        Self {
            nx,
            ny,
            nz,
            dx: spacing[0],
            dy: spacing[1],
            dz: spacing[2],
            dt,
            iteration: 0,
            ex: vec![0.0; len],
            ey: vec![0.0; len],
            ez: vec![0.0; len],
            hx: vec![0.0; len],
            hy: vec![0.0; len],
            hz: vec![0.0; len],
            ids: vec![FREE_SPACE; 6 * len],
            tx: vec![Complex32::new(0.0, 0.0); len * max_poles],
            ty: vec![Complex32::new(0.0, 0.0); len * max_poles],
            tz: vec![Complex32::new(0.0, 0.0); len * max_poles],
            max_poles,
        }
    }

    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    #[inline]
    pub fn spacing(&self) -> [f64; 3] {
        [self.dx, self.dy, self.dz]
    }

    /// Number of nodes per component array.
    #[inline]
    pub fn len(&self) -> usize {
        self.ex.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ex.is_empty()
    }

    #[inline]
    pub fn strides(&self) -> Strides {
        Strides {
            x: (self.ny + 1) * (self.nz + 1),
            y: self.nz + 1,
        }
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        self.strides().index(i, j, k)
    }

    #[inline]
    pub fn max_poles(&self) -> usize {
        self.max_poles
    }

    pub fn field(&self, c: Component) -> &[f32] {
        match c {
            Component::Ex => &self.ex,
            Component::Ey => &self.ey,
            Component::Ez => &self.ez,
            Component::Hx => &self.hx,
            Component::Hy => &self.hy,
            Component::Hz => &self.hz,
        }
    }

    pub fn field_mut(&mut self, c: Component) -> &mut [f32] {
        match c {
            Component::Ex => &mut self.ex,
            Component::Ey => &mut self.ey,
            Component::Ez => &mut self.ez,
            Component::Hx => &mut self.hx,
            Component::Hy => &mut self.hy,
            Component::Hz => &mut self.hz,
        }
    }

    /// One component mutably, alongside a component of the opposite kind and the
    /// target's material ids.
    pub fn split_mut(
        &mut self,
        target: Component,
        source: Component,
    ) -> (&mut [f32], &[f32], &[u32]) {
        debug_assert_ne!(target.is_electric(), source.is_electric());
        let len = self.len();
        let GridState {
            ex,
            ey,
            ez,
            hx,
            hy,
            hz,
            ids,
            ..
        } = self;
        let (dst_set, src_set) = if target.is_electric() {
            ([ex, ey, ez], [hx, hy, hz])
        } else {
            ([hx, hy, hz], [ex, ey, ez])
        };
        let [d0, d1, d2] = dst_set;
        let [s0, s1, s2] = src_set;
        let dst = match target.axis() {
            0 => d0,
            1 => d1,
            _ => d2,
        };
        let src = match source.axis() {
            0 => s0,
            1 => s1,
            _ => s2,
        };
        (
            dst.as_mut_slice(),
            src.as_slice(),
            &ids[target.index() * len..(target.index() + 1) * len],
        )
    }

    /// Material ids for one component.
    pub fn material_ids(&self, c: Component) -> &[u32] {
        let len = self.len();
        &self.ids[c.index() * len..(c.index() + 1) * len]
    }

    /// Assign a material to every component of a cell.
    pub fn set_material(&mut self, i: usize, j: usize, k: usize, id: u32) {
        let idx = self.index(i, j, k);
        let len = self.len();
        for c in 0..6 {
            self.ids[c * len + idx] = id;
        }
    }

    /// Assign a material to one component at a node.
    pub fn set_component_material(&mut self, c: Component, node: usize, id: u32) {
        let len = self.len();
        self.ids[c.index() * len + node] = id;
    }

    /// Field value at a node.
    #[inline]
    pub fn get(&self, c: Component, i: usize, j: usize, k: usize) -> f32 {
        self.field(c)[self.index(i, j, k)]
    }

    /// Current through a cell along `axis`, from the loop integral of H around it.
    pub fn loop_current(&self, axis: usize, i: usize, j: usize, k: usize) -> f32 {
        let (dx, dy, dz) = (self.dx as f32, self.dy as f32, self.dz as f32);
        let at = |c: Component, i: Option<usize>, j: Option<usize>, k: Option<usize>| {
            match (i, j, k) {
                (Some(i), Some(j), Some(k)) => self.get(c, i, j, k),
                _ => 0.0,
            }
        };
        let (pi, pj, pk) = (Some(i), Some(j), Some(k));
        let (mi, mj, mk) = (i.checked_sub(1), j.checked_sub(1), k.checked_sub(1));
        match axis {
            0 => {
                dy * (at(Component::Hy, pi, pj, mk) - at(Component::Hy, pi, pj, pk))
                    + dz * (at(Component::Hz, pi, pj, pk) - at(Component::Hz, pi, mj, pk))
            }
            1 => {
                dx * (at(Component::Hx, pi, pj, pk) - at(Component::Hx, pi, pj, mk))
                    + dz * (at(Component::Hz, mi, pj, pk) - at(Component::Hz, pi, pj, pk))
            }
            _ => {
                dx * (at(Component::Hx, pi, mj, pk) - at(Component::Hx, pi, pj, pk))
                    + dy * (at(Component::Hy, pi, pj, pk) - at(Component::Hy, mi, pj, pk))
            }
        }
    }

    /// Free-space electromagnetic energy over the whole grid (J).
    pub fn field_energy(&self) -> f64 {
        let dv = self.dx * self.dy * self.dz;
        let sum = |f: &[f32]| f.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>();
        let e = sum(&self.ex) + sum(&self.ey) + sum(&self.ez);
        let h = sum(&self.hx) + sum(&self.hy) + sum(&self.hz);
        0.5 * (E0 * e + M0 * h) * dv
    }

    /// Zero all fields and auxiliary state and reset the iteration counter.
    pub fn reset(&mut self) {
        for c in Component::ALL {
            self.field_mut(c).fill(0.0);
        }
        for t in [&mut self.tx, &mut self.ty, &mut self.tz] {
            t.fill(Complex32::new(0.0, 0.0));
        }
        self.iteration = 0;
    }
}

/// Summary statistics over the field state.
#[derive(Debug, Clone, Copy)]
pub struct FieldStats {
    pub iteration: usize,
    pub max_e: f32,
    pub max_h: f32,
    pub energy: f64,
}

impl FieldStats {
    pub fn from_grid(grid: &GridState) -> Self {
        let max_abs = |f: &[f32]| f.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        Self {
            iteration: grid.iteration,
            max_e: max_abs(&grid.ex).max(max_abs(&grid.ey)).max(max_abs(&grid.ez)),
            max_h: max_abs(&grid.hx).max(max_abs(&grid.hy)).max(max_abs(&grid.hz)),
            energy: grid.field_energy(),
        }
    }
}
