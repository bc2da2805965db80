//! Material coefficient table - per-material update coefficients and dispersive pole terms.
//!
//! Built once from the material list before the first iteration and never mutated
//! afterwards. Both backends broadcast it to every cell through the per-component
//! material id arrays.

use num_complex::{Complex32, Complex64};

use crate::schema::{Dispersion, E0, M0, Material};

/// Columns per material row: `[CA, CBx, CBy, CBz, srce]` (E) or `[DA, DBx, DBy, DBz, srcm]` (H).
pub const NY_MATCOEFFS: usize = 5;

/// Dispersive columns per pole: `[(eqt - 1) / dt, eqt, k / 2]`.
pub const NY_POLECOEFFS: usize = 3;

/// Dense coefficient table indexed by material id.
#[derive(Debug, Clone)]
pub struct CoefficientTable {
    e: Vec<f32>,
    h: Vec<f32>,
    dispersive: Vec<Complex32>,
    num_materials: usize,
    max_poles: usize,
}

impl CoefficientTable {
    /// Precompute coefficients for `materials` (row i = material id i).
    pub fn build(materials: &[Material], dt: f64, spacing: [f64; 3]) -> Self {
        let max_poles = materials.iter().map(Material::poles).max().unwrap_or(0);
        let num_materials = materials.len();

        let mut e = Vec::with_capacity(num_materials * NY_MATCOEFFS);
        let mut h = Vec::with_capacity(num_materials * NY_MATCOEFFS);
        let mut dispersive =
            vec![Complex32::new(0.0, 0.0); num_materials * max_poles * NY_POLECOEFFS];

        for (id, material) in materials.iter().enumerate() {
            let terms = pole_terms(material);
            let mut se = material.se;
            let mut k_sum = 0.0;

            let row = &mut dispersive[id * max_poles * NY_POLECOEFFS..];
            for (p, term) in terms.iter().enumerate() {
                let eqt = (term.q * dt).exp();
                let k = E0 * term.w * (eqt - 1.0) / term.q;
                k_sum += k.re;
                se += term.extra_conductivity;

                let c = &mut row[p * NY_POLECOEFFS..(p + 1) * NY_POLECOEFFS];
                c[0] = to_c32((eqt - 1.0) / dt);
                c[1] = to_c32(eqt);
                c[2] = to_c32(k * 0.5);
            }

            e.extend_from_slice(&electric_row(material, se, k_sum, dt, spacing));
            h.extend_from_slice(&magnetic_row(material, dt, spacing));
        }

        Self {
            e,
            h,
            dispersive,
            num_materials,
            max_poles,
        }
    }

    #[inline]
    pub fn e_row(&self, id: usize) -> &[f32] {
        &self.e[id * NY_MATCOEFFS..(id + 1) * NY_MATCOEFFS]
    }

    #[inline]
    pub fn h_row(&self, id: usize) -> &[f32] {
        &self.h[id * NY_MATCOEFFS..(id + 1) * NY_MATCOEFFS]
    }

    /// Dispersive coefficients for one material (`max_poles * NY_POLECOEFFS` values).
    #[inline]
    pub fn dispersive_row(&self, id: usize) -> &[Complex32] {
        let w = self.max_poles * NY_POLECOEFFS;
        &self.dispersive[id * w..(id + 1) * w]
    }

    pub fn e(&self) -> &[f32] {
        &self.e
    }

    pub fn h(&self) -> &[f32] {
        &self.h
    }

    pub fn dispersive(&self) -> &[Complex32] {
        &self.dispersive
    }

    #[inline]
    pub fn num_materials(&self) -> usize {
        self.num_materials
    }

    /// Widest pole count over all materials; sizes the auxiliary state.
    #[inline]
    pub fn max_poles(&self) -> usize {
        self.max_poles
    }

    /// Bytes occupied by the E and H tables.
    pub fn nbytes(&self) -> usize {
        (self.e.len() + self.h.len()) * std::mem::size_of::<f32>()
    }
}

fn to_c32(z: Complex64) -> Complex32 {
    Complex32::new(z.re as f32, z.im as f32)
}

/// One exponential term of a susceptibility `chi(t) = Re(w * exp(q t))`.
#[derive(Debug, Clone, Copy)]
struct PoleTerm {
    w: Complex64,
    q: Complex64,
    /// Static conductivity split off the pole (Drude).
    extra_conductivity: f64,
}

fn pole_terms(material: &Material) -> Vec<PoleTerm> {
    let two_pi = 2.0 * std::f64::consts::PI;
    match &material.dispersion {
        None => Vec::new(),
        Some(Dispersion::Debye(poles)) => poles
            .iter()
            .map(|p| PoleTerm {
                w: Complex64::new(p.delta_er / p.tau, 0.0),
                q: Complex64::new(-1.0 / p.tau, 0.0),
                extra_conductivity: 0.0,
            })
            .collect(),
        Some(Dispersion::Lorentz(poles)) => poles
            .iter()
            .map(|p| {
                let w0 = two_pi * p.omega;
                let wp2 = w0 * w0 * p.delta_er;
                let nu = Complex64::new(w0 * w0 - p.delta * p.delta, 0.0).sqrt();
                PoleTerm {
                    w: Complex64::new(0.0, -wp2) / nu,
                    q: Complex64::new(-p.delta, 0.0) + Complex64::i() * nu,
                    extra_conductivity: 0.0,
                }
            })
            .collect(),
        Some(Dispersion::Drude(poles)) => poles
            .iter()
            .map(|p| {
                let wp = two_pi * p.omega;
                let wp2 = wp * wp;
                PoleTerm {
                    w: Complex64::new(-wp2 / p.alpha, 0.0),
                    q: Complex64::new(-p.alpha, 0.0),
                    extra_conductivity: E0 * wp2 / p.alpha,
                }
            })
            .collect(),
    }
}

fn electric_row(
    material: &Material,
    se: f64,
    k_sum: f64,
    dt: f64,
    spacing: [f64; 3],
) -> [f32; NY_MATCOEFFS] {
    if material.is_pec() {
        return [0.0; NY_MATCOEFFS];
    }
    let ea = E0 * material.er / dt + 0.5 * se + 0.5 * k_sum / dt;
    let eb = E0 * material.er / dt - 0.5 * se - 0.5 * k_sum / dt;
    [
        (eb / ea) as f32,
        (1.0 / (ea * spacing[0])) as f32,
        (1.0 / (ea * spacing[1])) as f32,
        (1.0 / (ea * spacing[2])) as f32,
        (1.0 / ea) as f32,
    ]
}

fn magnetic_row(material: &Material, dt: f64, spacing: [f64; 3]) -> [f32; NY_MATCOEFFS] {
    let ha = M0 * material.mr / dt + 0.5 * material.sm;
    let hb = M0 * material.mr / dt - 0.5 * material.sm;
    [
        (hb / ha) as f32,
        (1.0 / (ha * spacing[0])) as f32,
        (1.0 / (ha * spacing[1])) as f32,
        (1.0 / (ha * spacing[2])) as f32,
        (1.0 / ha) as f32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DebyePole, DrudePole, LorentzPole};

    const DT: f64 = 1e-12;
    const D: [f64; 3] = [1e-3; 3];

    #[test]
    fn test_free_space_row() {
        let table = CoefficientTable::build(&[Material::pec(), Material::free_space()], DT, D);
        let e = table.e_row(1);
        assert!((e[0] - 1.0).abs() < 1e-6);
        let expected = DT / (E0 * D[0]);
        assert!(((e[1] as f64) - expected).abs() / expected < 1e-6);
        assert_eq!(table.max_poles(), 0);
        assert!(table.dispersive().is_empty());
    }

    #[test]
    fn test_pec_row_is_zero() {
        let table = CoefficientTable::build(&[Material::pec()], DT, D);
        assert!(table.e_row(0).iter().all(|&c| c == 0.0));
        assert!((table.h_row(0)[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_lossy_material_damps() {
        let table =
            CoefficientTable::build(&[Material::new("lossy", 4.0, 0.05, 1.0, 0.0)], DT, D);
        let ca = table.e_row(0)[0];
        assert!(ca > 0.0 && ca < 1.0);
    }

    #[test]
    fn test_max_poles_is_explicit_field() {
        let debye = Material::new("a", 2.0, 0.0, 1.0, 0.0).with_dispersion(Dispersion::Debye(
            vec![
                DebyePole {
                    delta_er: 1.0,
                    tau: 1e-9,
                },
                DebyePole {
                    delta_er: 2.0,
                    tau: 1e-10,
                },
            ],
        ));
        let table = CoefficientTable::build(
            &[Material::pec(), Material::free_space(), debye],
            DT,
            D,
        );
        assert_eq!(table.max_poles(), 2);
        assert_eq!(table.dispersive().len(), 3 * 2 * NY_POLECOEFFS);
        // Non-dispersive rows are zero so the dispersive kernel stays branch-free.
        assert!(table.dispersive_row(1).iter().all(|c| c.norm() == 0.0));
        assert!(table.dispersive_row(2)[1].re < 1.0);
    }

    #[test]
    fn test_debye_coefficients() {
        let tau = 1e-10;
        let delta_er = 3.0;
        let m = Material::new("d", 2.0, 0.0, 1.0, 0.0)
            .with_dispersion(Dispersion::Debye(vec![DebyePole { delta_er, tau }]));
        let table = CoefficientTable::build(&[m], DT, D);
        let row = table.dispersive_row(0);
        let eqt = (-DT / tau).exp();
        assert!(((row[1].re as f64) - eqt).abs() < 1e-6);
        assert!(row[1].im.abs() < 1e-9);
        let half_k = 0.5 * E0 * delta_er * (1.0 - eqt);
        assert!(((row[2].re as f64) - half_k).abs() / half_k < 1e-5);
    }

    #[test]
    fn test_lorentz_pole_is_complex() {
        let m = Material::new("l", 2.0, 0.0, 1.0, 0.0).with_dispersion(Dispersion::Lorentz(
            vec![LorentzPole {
                delta_er: 1.0,
                omega: 1e9,
                delta: 1e8,
            }],
        ));
        let table = CoefficientTable::build(&[m], DT, D);
        let eqt = table.dispersive_row(0)[1];
        assert!(eqt.im.abs() > 0.0);
        assert!(eqt.norm() < 1.0);
    }

    #[test]
    fn test_drude_adds_conductivity() {
        let plain = Material::new("p", 1.0, 0.0, 1.0, 0.0);
        let drude = plain.clone().with_dispersion(Dispersion::Drude(vec![DrudePole {
            omega: 1e9,
            alpha: 1e10,
        }]));
        let table = CoefficientTable::build(&[plain, drude], DT, D);
        assert!(table.e_row(1)[0] < table.e_row(0)[0]);
    }

    #[test]
    fn test_nbytes() {
        let table = CoefficientTable::build(&[Material::pec(), Material::free_space()], DT, D);
        assert_eq!(table.nbytes(), 2 * 2 * NY_MATCOEFFS * 4);
    }
}
