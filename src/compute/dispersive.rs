//! Two-phase electric update for dispersive materials.
//!
//! Phase A advances E with the polarisation correction from the stored auxiliary
//! state and folds the old E into it. Phase B, run after the electric sources, folds
//! in the new E. Non-dispersive materials have all-zero pole rows, so the same loop
//! reduces to the standard update for them.

use std::ops::Range;

use num_complex::Complex32;
use rayon::prelude::*;

use super::coefficients::{CoefficientTable, NY_MATCOEFFS, NY_POLECOEFFS};
use super::fields::electric_curl;
use super::grid::{Component, GridState, Strides};

struct Slabs<'a> {
    ids: &'a [u32],
    ranges: [Range<usize>; 3],
    strides: Strides,
    max_poles: usize,
}

#[allow(clippy::too_many_arguments)]
fn phase_a_component(
    field: &mut [f32],
    aux: &mut [Complex32],
    slabs: &Slabs,
    table: &CoefficientTable,
    axis: usize,
    fb: &[f32],
    fc: &[f32],
) {
    let [ri, rj, rk] = slabs.ranges.clone();
    if ri.is_empty() || rj.is_empty() || rk.is_empty() {
        return;
    }
    let (b, c) = ((axis + 1) % 3, (axis + 2) % 3);
    let strides = slabs.strides;
    let mp = slabs.max_poles;
    let coeffs = table.e();

    field
        .par_chunks_mut(strides.x)
        .zip(aux.par_chunks_mut(strides.x * mp))
        .enumerate()
        .skip(ri.start)
        .take(ri.len())
        .for_each(|(i, (plane, t_plane))| {
            for j in rj.clone() {
                for k in rk.clone() {
                    let local = j * strides.y + k;
                    let idx = i * strides.x + local;
                    let id = slabs.ids[idx] as usize;
                    let row = &coeffs[id * NY_MATCOEFFS..(id + 1) * NY_MATCOEFFS];
                    let poles = table.dispersive_row(id);
                    let t = &mut t_plane[local * mp..(local + 1) * mp];

                    let e_old = plane[local];
                    let mut phi = 0.0f32;
                    for (p, tp) in t.iter_mut().enumerate() {
                        let pc = &poles[p * NY_POLECOEFFS..(p + 1) * NY_POLECOEFFS];
                        phi += (pc[0] * *tp).re;
                        *tp = pc[1] * *tp + pc[2] * e_old;
                    }
                    plane[local] = row[0] * e_old + electric_curl(row, b, c, fb, fc, idx, strides)
                        - row[4] * phi;
                }
            }
        });
}

fn phase_b_component(
    field: &[f32],
    aux: &mut [Complex32],
    slabs: &Slabs,
    table: &CoefficientTable,
) {
    let [ri, rj, rk] = slabs.ranges.clone();
    if ri.is_empty() || rj.is_empty() || rk.is_empty() {
        return;
    }
    let strides = slabs.strides;
    let mp = slabs.max_poles;

    aux.par_chunks_mut(strides.x * mp)
        .enumerate()
        .skip(ri.start)
        .take(ri.len())
        .for_each(|(i, t_plane)| {
            for j in rj.clone() {
                for k in rk.clone() {
                    let local = j * strides.y + k;
                    let idx = i * strides.x + local;
                    let poles = table.dispersive_row(slabs.ids[idx] as usize);
                    let e_new = field[idx];
                    let t = &mut t_plane[local * mp..(local + 1) * mp];
                    for (p, tp) in t.iter_mut().enumerate() {
                        *tp += poles[p * NY_POLECOEFFS + 2] * e_new;
                    }
                }
            }
        });
}

/// First dispersive phase: replaces the standard electric update when any material has poles.
pub fn update_electric_dispersive_a(grid: &mut GridState, table: &CoefficientTable) {
    let mp = grid.max_poles();
    if mp == 0 {
        return;
    }
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
        tx,
        ty,
        tz,
        ..
    } = grid;
    let ids: &[u32] = ids;
    let slabs = |c: Component| Slabs {
        ids: &ids[c.index() * len..(c.index() + 1) * len],
        ranges: c.update_ranges(dims),
        strides,
        max_poles: mp,
    };

    phase_a_component(ex, tx, &slabs(Component::Ex), table, 0, hy, hz);
    phase_a_component(ey, ty, &slabs(Component::Ey), table, 1, hz, hx);
    phase_a_component(ez, tz, &slabs(Component::Ez), table, 2, hx, hy);
}

/// Second dispersive phase: folds the post-source E into the auxiliary state.
pub fn update_electric_dispersive_b(grid: &mut GridState, table: &CoefficientTable) {
    let mp = grid.max_poles();
    if mp == 0 {
        return;
    }
    let dims = grid.dims();
    let strides = grid.strides();
    let len = grid.len();
    let GridState {
        ex,
        ey,
        ez,
        ids,
        tx,
        ty,
        tz,
        ..
    } = grid;
    let ids: &[u32] = ids;
    let slabs = |c: Component| Slabs {
        ids: &ids[c.index() * len..(c.index() + 1) * len],
        ranges: c.update_ranges(dims),
        strides,
        max_poles: mp,
    };

    phase_b_component(ex, tx, &slabs(Component::Ex), table);
    phase_b_component(ey, ty, &slabs(Component::Ey), table);
    phase_b_component(ez, tz, &slabs(Component::Ez), table);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::fields::update_electric;
    use crate::schema::{C, DebyePole, Dispersion, E0, Material};

    const D: f64 = 1e-3;

    fn dt() -> f64 {
        0.99 * D / (C * 3f64.sqrt())
    }

    fn debye(delta_er: f64, tau: f64) -> Material {
        Material::new("water", 4.0, 0.0, 1.0, 0.0)
            .with_dispersion(Dispersion::Debye(vec![DebyePole { delta_er, tau }]))
    }

    #[test]
    fn test_debye_step_response() {
        let dt = dt();
        let (delta_er, tau) = (10.0, 50.0 * dt);
        let table = CoefficientTable::build(
            &[Material::pec(), Material::free_space(), debye(delta_er, tau)],
            dt,
            [D; 3],
        );
        let mut grid = GridState::new([4, 4, 4], [D; 3], dt, 1);
        let (i, j, k) = (2, 2, 2);
        grid.set_material(i, j, k, 2);
        let idx = grid.index(i, j, k);

        // Hold Ex at a constant value: with no curl the auxiliary state must follow
        // the analytic Debye polarisation.
        let e0 = 1.0f32;
        for n in 1..=200 {
            grid.ex[idx] = e0;
            update_electric_dispersive_a(&mut grid, &table);
            grid.ex[idx] = e0;
            update_electric_dispersive_b(&mut grid, &table);

            let t = n as f64 * dt;
            let expected = E0 * delta_er * e0 as f64 * (1.0 - (-t / tau).exp());
            let got = grid.tx[idx].re as f64;
            assert!(
                (got - expected).abs() <= 1e-4 * E0 * delta_er,
                "iteration {n}: {got} vs {expected}"
            );
        }
    }

    #[test]
    fn test_non_dispersive_cells_match_standard_update() {
        let dt = dt();
        let table = CoefficientTable::build(
            &[Material::pec(), Material::free_space(), debye(5.0, 1e-10)],
            dt,
            [D; 3],
        );
        let mut disp = GridState::new([6, 6, 6], [D; 3], dt, 1);
        for (n, v) in disp.hz.iter_mut().enumerate() {
            *v = (n % 7) as f32 * 0.1;
        }
        for (n, v) in disp.hx.iter_mut().enumerate() {
            *v = (n % 5) as f32 * -0.2;
        }
        disp.ex.fill(0.3);
        let mut plain = disp.clone();

        update_electric_dispersive_a(&mut disp, &table);
        update_electric(&mut plain, &table);
        assert_eq!(disp.ex, plain.ex);
        assert_eq!(disp.ey, plain.ey);
        assert_eq!(disp.ez, plain.ez);
    }

    #[test]
    fn test_no_poles_is_noop() {
        let table = CoefficientTable::build(&[Material::free_space()], 1e-12, [D; 3]);
        let mut grid = GridState::new([3, 3, 3], [D; 3], 1e-12, 0);
        grid.hz.fill(1.0);
        let before = grid.ex.clone();
        update_electric_dispersive_a(&mut grid, &table);
        update_electric_dispersive_b(&mut grid, &table);
        assert_eq!(grid.ex, before);
    }
}
