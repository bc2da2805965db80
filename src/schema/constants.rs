//! Physical constants shared by coefficient precompute and source models.

/// Speed of light in vacuum (m/s).
pub const C: f64 = 299_792_458.0;

/// Permeability of free space (H/m).
pub const M0: f64 = 4.0 * std::f64::consts::PI * 1e-7;

/// Permittivity of free space (F/m).
pub const E0: f64 = 1.0 / (M0 * C * C);

/// Impedance of free space (Ohms).
pub const Z0: f64 = M0 * C;
