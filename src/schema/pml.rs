//! Boundary absorption (PML) configuration with complex-frequency-shifted parameters.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Maximum number of CFS entries (absorption order).
pub const MAX_CFS_ORDER: usize = 2;

/// Polynomial grading of a CFS parameter through the slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScalingProfile {
    #[default]
    Constant,
    Linear,
    InverseLinear,
    Quadratic,
    Cubic,
    Quartic,
    Quintic,
    Sextic,
}

impl ScalingProfile {
    /// Polynomial order used when grading.
    pub fn order(self) -> i32 {
        match self {
            ScalingProfile::Constant => 0,
            ScalingProfile::Linear => 1,
            ScalingProfile::InverseLinear => -1,
            ScalingProfile::Quadratic => 2,
            ScalingProfile::Cubic => 3,
            ScalingProfile::Quartic => 4,
            ScalingProfile::Quintic => 5,
            ScalingProfile::Sextic => 6,
        }
    }
}

/// Whether a parameter grows towards the outer wall or towards the interior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScalingDirection {
    #[default]
    Forward,
    Reverse,
}

/// One graded CFS parameter (alpha, kappa or sigma).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CfsParameter {
    #[serde(default)]
    pub profile: ScalingProfile,
    #[serde(default)]
    pub direction: ScalingDirection,
    pub min: f64,
    /// `None` selects the optimal value (sigma only).
    pub max: Option<f64>,
}

impl CfsParameter {
    pub fn constant(value: f64) -> Self {
        Self {
            profile: ScalingProfile::Constant,
            direction: ScalingDirection::Forward,
            min: value,
            max: Some(value),
        }
    }

    /// Value at normalised depth `x` in [0, 1], where 1 is the outer wall.
    ///
    /// `max` is resolved by the caller when the parameter requests the optimal value.
    pub fn value_at(&self, x: f64, max: f64) -> f64 {
        let x = match self.direction {
            ScalingDirection::Forward => x,
            ScalingDirection::Reverse => 1.0 - x,
        }
        .clamp(0.0, 1.0);

        let s = match self.profile.order() {
            0 => 1.0,
            -1 => 1.0 - x,
            m => x.powi(m),
        };
        self.min + (max - self.min) * s
    }
}

/// Complex-frequency-shifted parameter set for one absorption pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cfs {
    pub alpha: CfsParameter,
    pub kappa: CfsParameter,
    pub sigma: CfsParameter,
}

impl Default for Cfs {
    fn default() -> Self {
        Self {
            alpha: CfsParameter::constant(0.0),
            kappa: CfsParameter::constant(1.0),
            sigma: CfsParameter {
                profile: ScalingProfile::Quartic,
                direction: ScalingDirection::Forward,
                min: 0.0,
                max: None,
            },
        }
    }
}

impl Cfs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let alpha_max = self.alpha.max.unwrap_or(0.0);
        let kappa_max = self.kappa.max.unwrap_or(self.kappa.min);
        let negative = [self.alpha.min, alpha_max, self.kappa.min, kappa_max, self.sigma.min]
            .iter()
            .any(|v| v.is_nan() || *v < 0.0)
            || self.sigma.max.is_some_and(|v| v.is_nan() || v < 0.0);
        if negative {
            return Err(ConfigError::InvalidCfs(
                "minimum and maximum scaling values must be zero or greater",
            ));
        }
        if self.kappa.min < 1.0 {
            return Err(ConfigError::InvalidCfs(
                "minimum scaling value for kappa must be greater than or equal to one",
            ));
        }
        if self.alpha.max.is_none() || self.kappa.max.is_none() {
            return Err(ConfigError::InvalidCfs(
                "only sigma may request an optimal maximum value",
            ));
        }
        Ok(())
    }
}

/// PML thickness per face and the CFS passes applied on every face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmlConfig {
    /// Thickness in cells for [x-, x+, y-, y+, z-, z+]; 0 disables a face.
    pub thickness: [usize; 6],
    /// One entry per absorption order (at most two).
    #[serde(default = "default_cfs")]
    pub cfs: Vec<Cfs>,
}

fn default_cfs() -> Vec<Cfs> {
    vec![Cfs::default()]
}

impl Default for PmlConfig {
    fn default() -> Self {
        Self {
            thickness: [10; 6],
            cfs: default_cfs(),
        }
    }
}

impl PmlConfig {
    /// Uniform thickness on all six faces.
    pub fn uniform(cells: usize) -> Self {
        Self {
            thickness: [cells; 6],
            ..Default::default()
        }
    }

    /// No absorbing boundary (outer walls are perfect conductors).
    pub fn disabled() -> Self {
        Self {
            thickness: [0; 6],
            ..Default::default()
        }
    }

    pub fn validate(&self, dims: [usize; 3]) -> Result<(), ConfigError> {
        if self.cfs.is_empty() || self.cfs.len() > MAX_CFS_ORDER {
            return Err(ConfigError::TooManyCfs(self.cfs.len()));
        }
        for cfs in &self.cfs {
            cfs.validate()?;
        }
        for axis in 0..3 {
            let lo = self.thickness[2 * axis];
            let hi = self.thickness[2 * axis + 1];
            if lo + hi >= dims[axis] && lo + hi > 0 {
                return Err(ConfigError::InvalidPml {
                    axis,
                    thickness: lo + hi,
                    cells: dims[axis],
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_cfs_is_valid() {
        assert!(Cfs::default().validate().is_ok());
        assert!(PmlConfig::default().validate([40, 40, 40]).is_ok());
    }

    #[test]
    fn test_kappa_min_below_one_rejected() {
        let mut cfs = Cfs::default();
        cfs.kappa = CfsParameter::constant(0.5);
        assert!(matches!(cfs.validate(), Err(ConfigError::InvalidCfs(_))));
    }

    #[test]
    fn test_zero_bounds_accepted_negative_rejected() {
        let mut cfs = Cfs::default();
        cfs.alpha = CfsParameter::constant(0.0);
        assert!(cfs.validate().is_ok());

        cfs.sigma.min = -1.0;
        let err = cfs.validate().unwrap_err();
        assert!(err.to_string().contains("zero or greater"), "{err}");
    }

    #[test]
    fn test_at_most_two_passes() {
        let mut config = PmlConfig::uniform(5);
        config.cfs = vec![Cfs::default(); 3];
        assert!(matches!(
            config.validate([40, 40, 40]),
            Err(ConfigError::TooManyCfs(3))
        ));

        config.cfs.truncate(2);
        assert!(config.validate([40, 40, 40]).is_ok());
    }

    #[test]
    fn test_pml_thicker_than_domain_rejected() {
        let config = PmlConfig::uniform(10);
        assert!(config.validate([20, 40, 40]).is_err());
        assert!(PmlConfig::disabled().validate([1, 1, 1]).is_ok());
    }

    #[test]
    fn test_reverse_direction_mirrors_profile() {
        let p = CfsParameter {
            profile: ScalingProfile::Linear,
            direction: ScalingDirection::Reverse,
            min: 0.0,
            max: Some(2.0),
        };
        assert!((p.value_at(0.0, 2.0) - 2.0).abs() < 1e-12);
        assert!((p.value_at(1.0, 2.0) - 0.0).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_forward_grading_is_monotone(
            a in 0.0f64..1.0,
            b in 0.0f64..1.0,
            max in 0.0f64..100.0,
        ) {
            let p = CfsParameter {
                profile: ScalingProfile::Quartic,
                direction: ScalingDirection::Forward,
                min: 0.0,
                max: Some(max),
            };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(p.value_at(lo, max) <= p.value_at(hi, max) + 1e-12);
            prop_assert!(p.value_at(hi, max) <= max + 1e-9);
        }
    }
}
