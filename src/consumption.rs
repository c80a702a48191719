//! Structure Consumption Model
//!
//! Maps a DINS damage category to the fraction of a structure's combustible mass
//! consumed by fire. Presets come from the fire-science literature:
//!   - HOLDER: 80% for Major or Destroyed (Holder et al. 2023)
//!   - DINS3:  50% Major, 95% Destroyed
//!   - DINS5:  midpoint of each DINS damage bin
//!   - CARB:   7% for any damage (CARB 1999)

use crate::error::ConfigError;
use crate::schema::{DamageCategory, CONSUMPTION_FACTOR, DAMAGE};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named consumption preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConsumptionPreset {
    Holder,
    Dins3,
    Dins5,
    Carb,
}

impl ConsumptionPreset {
    /// Fractions indexed by damage severity ordinal
    pub fn fractions(self) -> [f64; 5] {
        match self {
            ConsumptionPreset::Holder => [0.0, 0.0, 0.0, 0.8, 0.8],
            ConsumptionPreset::Dins3 => [0.0, 0.0, 0.0, 0.50, 0.95],
            ConsumptionPreset::Dins5 => [0.0, 0.05, 0.175, 0.38, 0.755],
            ConsumptionPreset::Carb => [0.0, 0.07, 0.07, 0.07, 0.07],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ConsumptionPreset::Holder => "HOLDER",
            ConsumptionPreset::Dins3 => "DINS3",
            ConsumptionPreset::Dins5 => "DINS5",
            ConsumptionPreset::Carb => "CARB",
        }
    }
}

impl FromStr for ConsumptionPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "HOLDER" => Ok(ConsumptionPreset::Holder),
            "DINS3" => Ok(ConsumptionPreset::Dins3),
            "DINS5" => Ok(ConsumptionPreset::Dins5),
            "CARB" => Ok(ConsumptionPreset::Carb),
            _ => Err(ConfigError::UnknownPreset {
                kind: "consumption",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ConsumptionPreset {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConsumptionPreset> for String {
    fn from(preset: ConsumptionPreset) -> Self {
        preset.name().to_string()
    }
}

impl fmt::Display for ConsumptionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Damage category → consumption fraction
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionModel {
    fractions: [f64; 5],
    name: String,
}

impl ConsumptionModel {
    pub fn preset(preset: ConsumptionPreset) -> Self {
        Self {
            fractions: preset.fractions(),
            name: preset.name().to_string(),
        }
    }

    /// Caller-supplied mapping, ordered No Damage → Destroyed
    ///
    /// # Errors
    /// Values outside [0, 1] or decreasing with severity.
    pub fn custom(fractions: [f64; 5]) -> Result<Self, ConfigError> {
        if let Some(bad) = fractions.iter().find(|f| !(0.0..=1.0).contains(*f)) {
            return Err(ConfigError::InvalidConsumptionMapping(format!(
                "fraction {} outside [0, 1]",
                bad
            )));
        }
        if fractions.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(ConfigError::InvalidConsumptionMapping(
                "fractions must not decrease with damage severity".to_string(),
            ));
        }
        Ok(Self {
            fractions,
            name: "CUSTOM".to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fraction(&self, category: DamageCategory) -> f64 {
        self.fractions[category.ordinal()]
    }

    /// Fraction for a raw inventory label; `None` when the label is unrecognized
    pub fn lookup(&self, label: &str) -> Option<f64> {
        DamageCategory::from_label(label).map(|c| self.fraction(c))
    }

    /// Table-wide lookup expression producing `CONSUMPTION_FACTOR`
    ///
    /// Unrecognized or missing labels evaluate to null, never to zero.
    pub fn expr(&self) -> Expr {
        DamageCategory::ALL
            .iter()
            .rev()
            .fold(lit(NULL).cast(DataType::Float64), |otherwise, &category| {
                when(col(DAMAGE).eq(lit(category.label())))
                    .then(lit(self.fraction(category)))
                    .otherwise(otherwise)
            })
            .alias(CONSUMPTION_FACTOR)
    }
}

impl From<ConsumptionPreset> for ConsumptionModel {
    fn from(preset: ConsumptionPreset) -> Self {
        ConsumptionModel::preset(preset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ALL_PRESETS: [ConsumptionPreset; 4] = [
        ConsumptionPreset::Holder,
        ConsumptionPreset::Dins3,
        ConsumptionPreset::Dins5,
        ConsumptionPreset::Carb,
    ];

    #[test]
    fn test_documented_fractions() {
        let expected: [(ConsumptionPreset, [f64; 5]); 4] = [
            (ConsumptionPreset::Holder, [0.0, 0.0, 0.0, 0.8, 0.8]),
            (ConsumptionPreset::Dins3, [0.0, 0.0, 0.0, 0.5, 0.95]),
            (ConsumptionPreset::Dins5, [0.0, 0.05, 0.175, 0.38, 0.755]),
            (ConsumptionPreset::Carb, [0.0, 0.07, 0.07, 0.07, 0.07]),
        ];

        for (preset, fractions) in expected {
            let model = ConsumptionModel::preset(preset);
            for category in DamageCategory::ALL {
                let got = model.lookup(category.label()).unwrap();
                assert_relative_eq!(got, fractions[category.ordinal()], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_presets_are_monotonic() {
        for preset in ALL_PRESETS {
            let f = preset.fractions();
            assert!(f.windows(2).all(|w| w[0] <= w[1]), "{} not monotonic", preset);
        }
    }

    #[test]
    fn test_unrecognized_label_has_no_fraction() {
        let model = ConsumptionModel::preset(ConsumptionPreset::Dins3);
        assert_eq!(model.lookup("Burnt"), None);
        assert_eq!(model.lookup(""), None);
    }

    #[test]
    fn test_padded_label_unrecognized_by_lookup_and_expr() {
        let model = ConsumptionModel::preset(ConsumptionPreset::Holder);
        assert_eq!(model.lookup("Destroyed (>50%) "), None);

        let df = df![DAMAGE => &["Destroyed (>50%) "]].unwrap();
        let out = df.lazy().with_column(model.expr()).collect().unwrap();
        assert_eq!(out.column(CONSUMPTION_FACTOR).unwrap().f64().unwrap().get(0), None);
    }

    #[test]
    fn test_custom_mapping_validation() {
        assert!(ConsumptionModel::custom([0.0, 0.1, 0.2, 0.3, 1.0]).is_ok());
        assert!(ConsumptionModel::custom([0.0, 0.5, 0.2, 0.3, 1.0]).is_err());
        assert!(ConsumptionModel::custom([0.0, 0.1, 0.2, 0.3, 1.5]).is_err());
    }

    #[test]
    fn test_preset_parsing_is_case_insensitive() {
        assert_eq!("dins5".parse::<ConsumptionPreset>().unwrap(), ConsumptionPreset::Dins5);
        assert!("DINS4".parse::<ConsumptionPreset>().is_err());
    }

    #[test]
    fn test_expr_leaves_unknown_labels_null() {
        let df = df![
            DAMAGE => &[Some("Destroyed (>50%)"), Some("Burnt"), None, Some("No Damage")],
        ]
        .unwrap();

        let model = ConsumptionModel::preset(ConsumptionPreset::Dins3);
        let out = df.lazy().with_column(model.expr()).collect().unwrap();
        let cf = out.column(CONSUMPTION_FACTOR).unwrap().f64().unwrap();

        assert_eq!(cf.get(0), Some(0.95));
        assert_eq!(cf.get(1), None);
        assert_eq!(cf.get(2), None);
        assert_eq!(cf.get(3), Some(0.0));
    }
}
