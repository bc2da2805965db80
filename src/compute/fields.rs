//! Explicit Yee-cell field updates on the host.
//!
//! Each component update is parallelised over x-planes: the destination array is split
//! into disjoint `(ny + 1) * (nz + 1)` chunks and every worker reads the opposite field
//! kind through shared slices.

use std::ops::Range;

use rayon::prelude::*;

use super::coefficients::{CoefficientTable, NY_MATCOEFFS};
use super::grid::{Component, GridState, Strides};

/// Curl term for an electric component along axis `a` (backward differences).
///
/// `fb` / `fc` are the magnetic components along the two cyclic neighbours
/// `b = a + 1` and `c = a + 2` of `a`.
#[inline(always)]
pub(crate) fn electric_curl(
    row: &[f32],
    b: usize,
    c: usize,
    fb: &[f32],
    fc: &[f32],
    idx: usize,
    strides: Strides,
) -> f32 {
    row[1 + b] * (fc[idx] - fc[idx - strides.along(b)])
        - row[1 + c] * (fb[idx] - fb[idx - strides.along(c)])
}

/// Curl term for a magnetic component along axis `a` (forward differences).
#[inline(always)]
pub(crate) fn magnetic_curl(
    row: &[f32],
    b: usize,
    c: usize,
    fb: &[f32],
    fc: &[f32],
    idx: usize,
    strides: Strides,
) -> f32 {
    row[1 + c] * (fb[idx + strides.along(c)] - fb[idx])
        - row[1 + b] * (fc[idx + strides.along(b)] - fc[idx])
}

type Curl = fn(&[f32], usize, usize, &[f32], &[f32], usize, Strides) -> f32;

#[allow(clippy::too_many_arguments)]
fn update_component(
    field: &mut [f32],
    ids: &[u32],
    coeffs: &[f32],
    ranges: [Range<usize>; 3],
    strides: Strides,
    axis: usize,
    fb: &[f32],
    fc: &[f32],
    curl: Curl,
) {
    let [ri, rj, rk] = ranges;
    if ri.is_empty() || rj.is_empty() || rk.is_empty() {
        return;
    }
    let (b, c) = ((axis + 1) % 3, (axis + 2) % 3);

    field
        .par_chunks_mut(strides.x)
        .enumerate()
        .skip(ri.start)
        .take(ri.len())
        .for_each(|(i, plane)| {
            for j in rj.clone() {
                for k in rk.clone() {
                    let local = j * strides.y + k;
                    let idx = i * strides.x + local;
                    let id = ids[idx] as usize;
                    let row = &coeffs[id * NY_MATCOEFFS..(id + 1) * NY_MATCOEFFS];
                    plane[local] = row[0] * plane[local] + curl(row, b, c, fb, fc, idx, strides);
                }
            }
        });
}

/// Advance H by one step from the current E.
pub fn update_magnetic(grid: &mut GridState, table: &CoefficientTable) {
    let dims = grid.dims();
    let strides = grid.strides();
    let len = grid.len();
    let GridState {
        ex,
        ey,
        ez,
        hx,
        hy,
        hz,
        ids,
        ..
    } = grid;
    let ids: &[u32] = ids;
    let ids_of = |c: Component| &ids[c.index() * len..(c.index() + 1) * len];

    let h = table.h();
    update_component(
        hx,
        ids_of(Component::Hx),
        h,
        Component::Hx.update_ranges(dims),
        strides,
        0,
        ey,
        ez,
        magnetic_curl,
    );
    update_component(
        hy,
        ids_of(Component::Hy),
        h,
        Component::Hy.update_ranges(dims),
        strides,
        1,
        ez,
        ex,
        magnetic_curl,
    );
    update_component(
        hz,
        ids_of(Component::Hz),
        h,
        Component::Hz.update_ranges(dims),
        strides,
        2,
        ex,
        ey,
        magnetic_curl,
    );
}

/// Advance E by one step from the current H (non-dispersive update).
pub fn update_electric(grid: &mut GridState, table: &CoefficientTable) {
    let dims = grid.dims();
    let strides = grid.strides();
    let len = grid.len();
    let GridState {
        ex,
        ey,
        ez,
        hx,
        hy,
        hz,
        ids,
        ..
    } = grid;
    let ids: &[u32] = ids;
    let ids_of = |c: Component| &ids[c.index() * len..(c.index() + 1) * len];

    let e = table.e();
    update_component(
        ex,
        ids_of(Component::Ex),
        e,
        Component::Ex.update_ranges(dims),
        strides,
        0,
        hy,
        hz,
        electric_curl,
    );
    update_component(
        ey,
        ids_of(Component::Ey),
        e,
        Component::Ey.update_ranges(dims),
        strides,
        1,
        hz,
        hx,
        electric_curl,
    );
    update_component(
        ez,
        ids_of(Component::Ez),
        e,
        Component::Ez.update_ranges(dims),
        strides,
        2,
        hx,
        hy,
        electric_curl,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::grid::PEC;
    use crate::schema::{C, Material};

    fn setup(n: usize) -> (GridState, CoefficientTable) {
        let d = 1e-3;
        let dt = 0.99 * d / (C * 3f64.sqrt());
        let grid = GridState::new([n, n, n], [d; 3], dt, 0);
        let table = CoefficientTable::build(&[Material::pec(), Material::free_space()], dt, [d; 3]);
        (grid, table)
    }

    #[test]
    fn test_zero_fields_stay_zero() {
        let (mut grid, table) = setup(8);
        for _ in 0..5 {
            update_magnetic(&mut grid, &table);
            update_electric(&mut grid, &table);
        }
        assert_eq!(grid.field_energy(), 0.0);
    }

    #[test]
    fn test_pulse_spreads_to_neighbours() {
        let (mut grid, table) = setup(8);
        let idx = grid.index(4, 4, 4);
        grid.ez[idx] = 1.0;
        update_magnetic(&mut grid, &table);
        // Ez at (4,4,4) drives Hx at (4,3,4) and (4,4,4) with opposite signs.
        let a = grid.get(Component::Hx, 4, 3, 4);
        let b = grid.get(Component::Hx, 4, 4, 4);
        assert!(a != 0.0 && b != 0.0);
        assert!((a + b).abs() < 1e-9 * a.abs().max(1.0));
        assert_eq!(grid.get(Component::Hz, 4, 4, 4), 0.0);
    }

    #[test]
    fn test_outer_tangential_e_untouched() {
        let (mut grid, table) = setup(6);
        grid.hz.fill(1.0);
        grid.hy.fill(-1.0);
        let idx = grid.index(3, 3, 3);
        grid.hz[idx] = 5.0;
        update_electric(&mut grid, &table);
        // j = 0 and k = 0 faces carry tangential Ex and are never written.
        assert_eq!(grid.get(Component::Ex, 3, 0, 3), 0.0);
        assert_eq!(grid.get(Component::Ex, 3, 3, 0), 0.0);
        assert!(grid.get(Component::Ex, 3, 3, 3) != 0.0);
    }

    #[test]
    fn test_pec_cell_holds_zero_e() {
        let (mut grid, table) = setup(6);
        grid.set_material(3, 3, 3, PEC);
        grid.hx.fill(0.5);
        let idx = grid.index(3, 3, 3);
        grid.hy[idx] = 2.0;
        update_electric(&mut grid, &table);
        assert_eq!(grid.get(Component::Ez, 3, 3, 3), 0.0);
        assert!(grid.get(Component::Ez, 4, 3, 3) != 0.0);
    }

    #[test]
    fn test_stable_below_courant_limit() {
        let (mut grid, table) = setup(10);
        let idx = grid.index(5, 5, 5);
        grid.ez[idx] = 1.0;
        for _ in 0..200 {
            update_magnetic(&mut grid, &table);
            update_electric(&mut grid, &table);
        }
        let stats = crate::compute::grid::FieldStats::from_grid(&grid);
        assert!(stats.max_e.is_finite() && stats.max_e < 2.0);
    }
}
