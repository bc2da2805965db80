//! Material definitions: electric/magnetic constants plus optional dispersion poles.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Identifier of the built-in perfect electric conductor.
pub const PEC_ID: &str = "pec";

/// Identifier of the built-in free-space background.
pub const FREE_SPACE_ID: &str = "free_space";

/// A bulk material. Immutable once the model is assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Unique material identifier referenced by geometry.
    pub id: String,
    /// Relative permittivity (at infinite frequency for dispersive materials).
    pub er: f64,
    /// Electric conductivity (S/m). `"inf"` in JSON for a perfect conductor.
    #[serde(default, with = "conductivity")]
    pub se: f64,
    /// Relative permeability.
    #[serde(default = "default_mr")]
    pub mr: f64,
    /// Magnetic loss (Ohms/m).
    #[serde(default)]
    pub sm: f64,
    /// Optional frequency-dependent response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispersion: Option<Dispersion>,
}

fn default_mr() -> f64 {
    1.0
}

/// Multi-pole dispersion model; every pole in a material shares one formulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "poles", rename_all = "lowercase")]
pub enum Dispersion {
    Debye(Vec<DebyePole>),
    Lorentz(Vec<LorentzPole>),
    Drude(Vec<DrudePole>),
}

/// Relaxation pole: permittivity step `delta_er` with relaxation time `tau` (s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DebyePole {
    pub delta_er: f64,
    pub tau: f64,
}

/// Resonant pole with resonance frequency `omega` (Hz) and damping `delta` (Hz).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LorentzPole {
    pub delta_er: f64,
    pub omega: f64,
    pub delta: f64,
}

/// Free-carrier pole with plasma frequency `omega` (Hz) and collision rate `alpha`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrudePole {
    pub omega: f64,
    pub alpha: f64,
}

/// Dispersion formulation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispersionKind {
    None,
    Debye,
    Lorentz,
    Drude,
}

impl Material {
    /// Non-dispersive material.
    pub fn new(id: impl Into<String>, er: f64, se: f64, mr: f64, sm: f64) -> Self {
        Self {
            id: id.into(),
            er,
            se,
            mr,
            sm,
            dispersion: None,
        }
    }

    /// Built-in perfect electric conductor.
    pub fn pec() -> Self {
        Self::new(PEC_ID, 1.0, f64::INFINITY, 1.0, 0.0)
    }

    /// Built-in free-space background.
    pub fn free_space() -> Self {
        Self::new(FREE_SPACE_ID, 1.0, 0.0, 1.0, 0.0)
    }

    /// Attach a dispersion model.
    pub fn with_dispersion(mut self, dispersion: Dispersion) -> Self {
        self.dispersion = Some(dispersion);
        self
    }

    #[inline]
    pub fn is_pec(&self) -> bool {
        self.se.is_infinite()
    }

    pub fn kind(&self) -> DispersionKind {
        match &self.dispersion {
            None => DispersionKind::None,
            Some(Dispersion::Debye(_)) => DispersionKind::Debye,
            Some(Dispersion::Lorentz(_)) => DispersionKind::Lorentz,
            Some(Dispersion::Drude(_)) => DispersionKind::Drude,
        }
    }

    /// Number of dispersion poles.
    pub fn poles(&self) -> usize {
        match &self.dispersion {
            None => 0,
            Some(Dispersion::Debye(p)) => p.len(),
            Some(Dispersion::Lorentz(p)) => p.len(),
            Some(Dispersion::Drude(p)) => p.len(),
        }
    }

    /// Whether geometry smoothing may average this material with its neighbours.
    pub fn averagable(&self) -> bool {
        !self.is_pec() && self.poles() == 0
    }

    /// Check bulk ranges and pole feasibility against the time step.
    pub fn validate(&self, dt: f64) -> Result<(), ConfigError> {
        let invalid = |reason: &'static str| ConfigError::InvalidMaterial {
            id: self.id.clone(),
            reason,
        };

        if !(self.er >= 1.0) {
            return Err(invalid(
                "requires a positive value of one or greater for static (DC) permittivity",
            ));
        }
        if !(self.se >= 0.0) {
            return Err(invalid("requires a positive value for conductivity"));
        }
        if !(self.mr >= 1.0) {
            return Err(invalid(
                "requires a positive value of one or greater for permeability",
            ));
        }
        if !(self.sm >= 0.0) {
            return Err(invalid("requires a positive value for magnetic conductivity"));
        }

        let bad_pole = |index: usize, reason: &'static str| ConfigError::InvalidPole {
            material: self.id.clone(),
            index,
            reason,
        };

        match &self.dispersion {
            None => {}
            Some(Dispersion::Debye(poles)) => {
                for (i, p) in poles.iter().enumerate() {
                    if !(p.tau > 0.0) {
                        return Err(bad_pole(i, "Debye relaxation time must be positive"));
                    }
                }
            }
            Some(Dispersion::Lorentz(poles)) => {
                for (i, p) in poles.iter().enumerate() {
                    if !(p.delta_er > 0.0 && p.omega > dt && p.delta > dt) {
                        return Err(bad_pole(
                            i,
                            "Lorentz pole requires a positive permittivity difference and \
                             frequency/damping values greater than the time step",
                        ));
                    }
                }
            }
            Some(Dispersion::Drude(poles)) => {
                for (i, p) in poles.iter().enumerate() {
                    if !(p.omega > 0.0 && p.alpha > dt) {
                        return Err(bad_pole(
                            i,
                            "Drude pole requires a positive frequency and a collision value \
                             greater than the time step",
                        ));
                    }
                }
            }
        }
        if self.dispersion.is_some() && self.poles() == 0 {
            return Err(invalid("dispersion requires at least one pole"));
        }
        Ok(())
    }
}

/// Conductivity that may be written as `"inf"` for perfect conductors.
mod conductivity {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_infinite() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(s) if s.eq_ignore_ascii_case("inf") => Ok(f64::INFINITY),
            Repr::Text(s) => Err(serde::de::Error::custom(format!(
                "invalid conductivity '{s}', expected a number or \"inf\""
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 1e-12;

    #[test]
    fn test_builtin_materials() {
        assert!(Material::pec().is_pec());
        assert!(!Material::pec().averagable());
        assert!(Material::free_space().averagable());
        assert!(Material::pec().validate(DT).is_ok());
        assert!(Material::free_space().validate(DT).is_ok());
    }

    #[test]
    fn test_bulk_ranges_rejected() {
        assert!(Material::new("a", 0.5, 0.0, 1.0, 0.0).validate(DT).is_err());
        assert!(Material::new("b", 4.0, -1.0, 1.0, 0.0).validate(DT).is_err());
        assert!(Material::new("c", 4.0, 0.0, 0.9, 0.0).validate(DT).is_err());
        assert!(Material::new("d", 4.0, 0.0, 1.0, -0.1).validate(DT).is_err());
        assert!(Material::new("e", f64::NAN, 0.0, 1.0, 0.0).validate(DT).is_err());
    }

    #[test]
    fn test_dispersive_not_averagable() {
        let m = Material::new("water", 4.9, 0.0, 1.0, 0.0).with_dispersion(Dispersion::Debye(
            vec![DebyePole {
                delta_er: 75.0,
                tau: 9.23e-12,
            }],
        ));
        assert_eq!(m.kind(), DispersionKind::Debye);
        assert_eq!(m.poles(), 1);
        assert!(!m.averagable());
        assert!(m.validate(DT).is_ok());
    }

    #[test]
    fn test_pole_feasibility_against_dt() {
        let lorentz = Material::new("l", 2.0, 0.0, 1.0, 0.0).with_dispersion(Dispersion::Lorentz(
            vec![LorentzPole {
                delta_er: 1.0,
                omega: 1e9,
                delta: DT / 2.0,
            }],
        ));
        assert!(matches!(
            lorentz.validate(DT),
            Err(ConfigError::InvalidPole { index: 0, .. })
        ));

        let drude = Material::new("d", 1.0, 0.0, 1.0, 0.0).with_dispersion(Dispersion::Drude(
            vec![DrudePole {
                omega: 1e9,
                alpha: 1e8,
            }],
        ));
        assert!(drude.validate(DT).is_ok());

        let debye = Material::new("x", 1.0, 0.0, 1.0, 0.0).with_dispersion(Dispersion::Debye(
            vec![DebyePole {
                delta_er: 1.0,
                tau: 0.0,
            }],
        ));
        assert!(debye.validate(DT).is_err());
    }

    #[test]
    fn test_infinite_conductivity_json() {
        let m: Material =
            serde_json::from_str(r#"{"id": "metal", "er": 1.0, "se": "inf"}"#).unwrap();
        assert!(m.is_pec());
        assert_eq!(m.mr, 1.0);

        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"inf\""));
        let back: Material = serde_json::from_str(&json).unwrap();
        assert!(back.is_pec());
    }

    #[test]
    fn test_dispersion_json_shape() {
        let m: Material = serde_json::from_str(
            r#"{
                "id": "soil", "er": 3.0, "se": 0.001,
                "dispersion": {"kind": "debye", "poles": [{"delta_er": 2.0, "tau": 1e-9}]}
            }"#,
        )
        .unwrap();
        assert_eq!(m.kind(), DispersionKind::Debye);
        assert_eq!(m.poles(), 1);
    }
}
