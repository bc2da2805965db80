//! Convolutional PML slabs on the six domain faces.
//!
//! Each slab corrects only the spatial derivatives taken along its own normal, using
//! recursive-convolution state per CFS order. The main update has already applied
//! the plain curl, so a slab adds `sign * CB * ((1/kappa - 1) * d + psi)`.

use std::ops::Range;

use rayon::prelude::*;

use super::coefficients::{CoefficientTable, NY_MATCOEFFS};
use super::grid::{Component, GridState};
use crate::schema::{Cfs, E0, MAX_CFS_ORDER, PmlConfig, Z0};

/// Domain face, ordered as the PML thickness array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Face {
    XMinus,
    XPlus,
    YMinus,
    YPlus,
    ZMinus,
    ZPlus,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::XMinus,
        Face::XPlus,
        Face::YMinus,
        Face::YPlus,
        Face::ZMinus,
        Face::ZPlus,
    ];

    #[inline]
    pub fn axis(self) -> usize {
        self as usize / 2
    }

    /// Whether the face sits at the upper end of its axis.
    #[inline]
    pub fn is_upper(self) -> bool {
        self as usize % 2 == 1
    }

    pub fn name(self) -> &'static str {
        ["x-", "x+", "y-", "y+", "z-", "z+"][self as usize]
    }
}

/// Per-layer recursive-convolution coefficients for one field kind.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LayerCoeffs {
    /// `1 / kappa - 1`, with kappa multiplied across CFS orders.
    pub kappa_term: f32,
    pub _pad0: f32,
    pub a: [f32; MAX_CFS_ORDER],
    pub b: [f32; MAX_CFS_ORDER],
    pub _pad1: [f32; 2],
}

/// Target component axis, source component axis and sign for the two corrections
/// along normal `a`.
fn couplings(axis: usize, electric: bool) -> [(usize, usize, f32); 2] {
    let (b, c) = ((axis + 1) % 3, (axis + 2) % 3);
    if electric {
        [(b, c, -1.0), (c, b, 1.0)]
    } else {
        [(b, c, 1.0), (c, b, -1.0)]
    }
}

/// One PML slab.
#[derive(Debug, Clone)]
pub struct PmlSlab {
    face: Face,
    thickness: usize,
    orders: usize,
    /// Node box holding E corrections; normal range covers the layers, tangential the full grid.
    e_box: [Range<usize>; 3],
    h_box: [Range<usize>; 3],
    e_layers: Vec<LayerCoeffs>,
    h_layers: Vec<LayerCoeffs>,
    /// `[coupling][node in box][order]`.
    psi_e: Vec<f32>,
    psi_h: Vec<f32>,
}

impl PmlSlab {
    pub fn new(
        face: Face,
        thickness: usize,
        cfs: &[Cfs],
        dims: [usize; 3],
        spacing: [f64; 3],
        dt: f64,
    ) -> Self {
        let axis = face.axis();
        let n = dims[axis];
        let t = thickness;

        let (e_normal, h_normal) = if face.is_upper() {
            (n + 1 - t..n + 1, n - t..n)
        } else {
            (0..t, 0..t)
        };
        let full = |a: usize| 0..dims[a] + 1;
        let mut e_box = [full(0), full(1), full(2)];
        let mut h_box = e_box.clone();
        e_box[axis] = e_normal;
        h_box[axis] = h_normal;

        // Depth into the layer, in cells, measured from the interior interface.
        let e_depth = |l: usize| if face.is_upper() { l as f64 + 1.0 } else { (t - l) as f64 };
        let h_depth = |l: usize| {
            if face.is_upper() {
                l as f64 + 0.5
            } else {
                (t - l) as f64 - 0.5
            }
        };
        let d = spacing[axis];
        let e_layers = (0..t)
            .map(|l| layer_coeffs(cfs, e_depth(l) / t as f64, d, dt))
            .collect();
        let h_layers = (0..t)
            .map(|l| layer_coeffs(cfs, h_depth(l) / t as f64, d, dt))
            .collect();

        let volume = |b: &[Range<usize>; 3]| b.iter().map(|r| r.len()).product::<usize>();
        let orders = cfs.len().min(MAX_CFS_ORDER);
        let psi_e = vec![0.0; orders * 2 * volume(&e_box)];
        let psi_h = vec![0.0; orders * 2 * volume(&h_box)];

        Self {
            face,
            thickness,
            orders,
            e_box,
            h_box,
            e_layers,
            h_layers,
            psi_e,
            psi_h,
        }
    }

    #[inline]
    pub fn face(&self) -> Face {
        self.face
    }

    #[inline]
    pub fn thickness(&self) -> usize {
        self.thickness
    }

    #[inline]
    pub fn orders(&self) -> usize {
        self.orders
    }

    pub fn e_box(&self) -> &[Range<usize>; 3] {
        &self.e_box
    }

    pub fn h_box(&self) -> &[Range<usize>; 3] {
        &self.h_box
    }

    pub fn e_layers(&self) -> &[LayerCoeffs] {
        &self.e_layers
    }

    pub fn h_layers(&self) -> &[LayerCoeffs] {
        &self.h_layers
    }

    pub fn psi_e(&self) -> &[f32] {
        &self.psi_e
    }

    pub fn psi_h(&self) -> &[f32] {
        &self.psi_h
    }

    /// Apply the magnetic corrections of this slab.
    pub fn update_magnetic(&mut self, grid: &mut GridState, table: &CoefficientTable) {
        let (bx, layers, psi) = (&self.h_box, &self.h_layers, &mut self.psi_h);
        correct(grid, table.h(), self.face.axis(), false, bx, layers, self.orders, psi);
    }

    /// Apply the electric corrections of this slab.
    pub fn update_electric(&mut self, grid: &mut GridState, table: &CoefficientTable) {
        let (bx, layers, psi) = (&self.e_box, &self.e_layers, &mut self.psi_e);
        correct(grid, table.e(), self.face.axis(), true, bx, layers, self.orders, psi);
    }

    /// Zero the convolution state.
    pub fn reset(&mut self) {
        self.psi_e.fill(0.0);
        self.psi_h.fill(0.0);
    }
}

/// Applies both tangential couplings of one slab, parallel over x-planes.
///
/// `psi` is laid out `[coupling][node in box][order]`, so an x-plane of the box owns a
/// contiguous run of every coupling's state.
#[allow(clippy::too_many_arguments)]
fn correct(
    grid: &mut GridState,
    coeffs: &[f32],
    axis: usize,
    electric: bool,
    bx: &[Range<usize>; 3],
    layers: &[LayerCoeffs],
    orders: usize,
    psi: &mut [f32],
) {
    if orders == 0 {
        return;
    }
    let dims = grid.dims();
    let strides = grid.strides();
    let s = strides.along(axis);
    let (bj, bk) = (bx[1].len(), bx[2].len());
    let plane = bj * bk * orders;
    let slot_len = bx[0].len() * plane;

    for (slot, (target, source, sign)) in couplings(axis, electric).into_iter().enumerate() {
        let (target, source) = if electric {
            (Component::electric(target), Component::magnetic(source))
        } else {
            (Component::magnetic(target), Component::electric(source))
        };
        let ranges = target.update_ranges(dims);
        let clip = |a: usize| bx[a].start.max(ranges[a].start)..bx[a].end.min(ranges[a].end);
        let (ri, rj, rk) = (clip(0), clip(1), clip(2));
        if ri.is_empty() {
            continue;
        }

        let (field, src, ids) = grid.split_mut(target, source);
        let first = ri.start - bx[0].start;
        let psi_slot = &mut psi[slot * slot_len..(slot + 1) * slot_len];

        field[ri.start * strides.x..ri.end * strides.x]
            .par_chunks_mut(strides.x)
            .zip(psi_slot[first * plane..(first + ri.len()) * plane].par_chunks_mut(plane))
            .enumerate()
            .for_each(|(n, (row, psi_plane))| {
                let i = ri.start + n;
                for j in rj.clone() {
                    for k in rk.clone() {
                        let local = j * strides.y + k;
                        let idx = i * strides.x + local;
                        let layer = &layers[[i, j, k][axis] - bx[axis].start];
                        let diff = if electric {
                            src[idx] - src[idx - s]
                        } else {
                            src[idx + s] - src[idx]
                        };

                        let node = ((j - bx[1].start) * bk + (k - bx[2].start)) * orders;
                        let mut psi_sum = 0.0;
                        for (o, p) in psi_plane[node..node + orders].iter_mut().enumerate() {
                            *p = layer.b[o] * *p + layer.a[o] * diff;
                            psi_sum += *p;
                        }

                        let id = ids[idx] as usize;
                        let cb = coeffs[id * NY_MATCOEFFS + 1 + axis];
                        row[local] += sign * cb * (layer.kappa_term * diff + psi_sum);
                    }
                }
            });
    }
}

/// Optimal maximum conductivity for a polynomial grading of order `m`.
pub fn sigma_optimal(order: i32, d: f64, er: f64, mr: f64) -> f64 {
    0.8 * (order as f64 + 1.0) / (Z0 * d * (er * mr).sqrt())
}

fn layer_coeffs(cfs: &[Cfs], x: f64, d: f64, dt: f64) -> LayerCoeffs {
    let mut out = LayerCoeffs::default();
    let mut kappa_total = 1.0;
    for (o, c) in cfs.iter().take(MAX_CFS_ORDER).enumerate() {
        let sigma_max = c
            .sigma
            .max
            .unwrap_or_else(|| sigma_optimal(c.sigma.profile.order(), d, 1.0, 1.0));
        let sigma = c.sigma.value_at(x, sigma_max);
        let kappa = c.kappa.value_at(x, c.kappa.max.unwrap_or(c.kappa.min));
        let alpha = c.alpha.value_at(x, c.alpha.max.unwrap_or(c.alpha.min));

        let b = (-(sigma / kappa + alpha) * dt / E0).exp();
        let a = if sigma == 0.0 {
            0.0
        } else {
            sigma / (sigma * kappa + kappa * kappa * alpha) * (b - 1.0)
        };
        out.a[o] = a as f32;
        out.b[o] = b as f32;
        kappa_total *= kappa;
    }
    out.kappa_term = (1.0 / kappa_total - 1.0) as f32;
    out
}

/// Build slabs for every face with non-zero thickness.
pub fn build_slabs(
    config: &PmlConfig,
    dims: [usize; 3],
    spacing: [f64; 3],
    dt: f64,
) -> Vec<PmlSlab> {
    Face::ALL
        .iter()
        .zip(config.thickness)
        .filter(|(_, t)| *t > 0)
        .map(|(&face, t)| PmlSlab::new(face, t, &config.cfs, dims, spacing, dt))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{C, CfsParameter, Material};

    const D: f64 = 1e-3;

    fn dt() -> f64 {
        0.99 * D / (C * 3f64.sqrt())
    }

    #[test]
    fn test_face_axes() {
        assert_eq!(Face::YPlus.axis(), 1);
        assert!(Face::YPlus.is_upper());
        assert!(!Face::ZMinus.is_upper());
        assert_eq!(Face::ZMinus.name(), "z-");
    }

    #[test]
    fn test_grading_increases_towards_wall() {
        let slab = PmlSlab::new(Face::XMinus, 8, &[Cfs::default()], [30; 3], [D; 3], dt());
        // Layer 0 is the outermost on the lower face.
        let b: Vec<f32> = slab.e_layers().iter().map(|l| l.b[0]).collect();
        assert!(b.windows(2).all(|w| w[0] <= w[1]));
        assert!(b[0] < 1.0);

        let upper = PmlSlab::new(Face::XPlus, 8, &[Cfs::default()], [30; 3], [D; 3], dt());
        let b: Vec<f32> = upper.e_layers().iter().map(|l| l.b[0]).collect();
        assert!(b.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(upper.e_box()[0], 23..31);
        assert_eq!(upper.h_box()[0], 22..30);
    }

    #[test]
    fn test_unit_kappa_has_no_kappa_term() {
        let slab = PmlSlab::new(Face::ZPlus, 4, &[Cfs::default()], [20; 3], [D; 3], dt());
        assert!(slab.e_layers().iter().all(|l| l.kappa_term == 0.0));
    }

    #[test]
    fn test_second_order_cfs_fills_both_slots() {
        let mut second = Cfs::default();
        second.kappa = CfsParameter::constant(2.0);
        let slab = PmlSlab::new(Face::YMinus, 5, &[Cfs::default(), second], [20; 3], [D; 3], dt());
        assert_eq!(slab.orders(), 2);
        let layer = slab.h_layers()[0];
        assert!(layer.b[1] < 1.0 && layer.a[1] < 0.0);
        assert!((layer.kappa_term + 0.5).abs() < 1e-6);
        assert_eq!(slab.psi_h().len(), 2 * 2 * 5 * 21 * 21);
    }

    #[test]
    fn test_slab_only_touches_its_layers() {
        let dt = dt();
        let table = CoefficientTable::build(&[Material::pec(), Material::free_space()], dt, [D; 3]);
        let mut grid = GridState::new([20; 3], [D; 3], dt, 0);
        grid.hy.fill(1.0);
        for i in 0..21 {
            for j in 0..21 {
                for k in 0..21 {
                    let idx = grid.index(i, j, k);
                    grid.hz[idx] = i as f32;
                }
            }
        }
        let mut slab = PmlSlab::new(Face::XMinus, 6, &[Cfs::default()], [20; 3], [D; 3], dt);
        slab.update_electric(&mut grid, &table);
        // Ey reads d(Hz)/dx inside the layer only.
        assert!(grid.get(Component::Ey, 3, 5, 5) != 0.0);
        assert_eq!(grid.get(Component::Ey, 6, 5, 5), 0.0);
        assert_eq!(grid.get(Component::Ey, 12, 5, 5), 0.0);
        // Ez reads d(Hy)/dx, which is zero here.
        assert_eq!(grid.get(Component::Ez, 3, 5, 5), 0.0);
    }

    #[test]
    fn test_corrections_independent_of_thread_count() {
        let dt = dt();
        let table = CoefficientTable::build(&[Material::pec(), Material::free_space()], dt, [D; 3]);
        let mut second = Cfs::default();
        second.kappa = CfsParameter::constant(2.0);
        let cfs = [Cfs::default(), second];

        let run = |threads: usize| {
            let mut grid = GridState::new([16; 3], [D; 3], dt, 0);
            for (n, (e, h)) in grid.ex.iter_mut().zip(grid.hz.iter_mut()).enumerate() {
                *e = (n % 7) as f32 - 3.0;
                *h = (n % 5) as f32 - 2.0;
            }
            let mut slabs: Vec<PmlSlab> = [Face::XMinus, Face::YPlus, Face::ZMinus]
                .into_iter()
                .map(|face| PmlSlab::new(face, 4, &cfs, [16; 3], [D; 3], dt))
                .collect();
            let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
            pool.install(|| {
                for _ in 0..3 {
                    for slab in &mut slabs {
                        slab.update_magnetic(&mut grid, &table);
                        slab.update_electric(&mut grid, &table);
                    }
                }
            });
            (grid, slabs)
        };

        let (serial, serial_slabs) = run(1);
        let (parallel, parallel_slabs) = run(4);
        for c in Component::ALL {
            assert_eq!(serial.field(c), parallel.field(c));
        }
        for (a, b) in serial_slabs.iter().zip(&parallel_slabs) {
            assert_eq!(a.psi_e(), b.psi_e());
            assert_eq!(a.psi_h(), b.psi_h());
            assert!(a.psi_e().iter().any(|&p| p != 0.0));
        }
    }
}
