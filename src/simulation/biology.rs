//! Static biology table: compound potency, kinetics, cell lines, morphology
//!
//! Consumed as configuration, never learned here. Compounds are read into an
//! all-optional raw form and validated field by field so that a missing
//! kinetic parameter is reported with the compound and field that caused
//! it. Nothing falls back to a default potency.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::core::error::{LabError, Result};
use crate::core::types::{FeatureArray, MechanismClass};

/// Validated kinetic and potency parameters for one compound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundParams {
    pub id: String,
    pub stress_axis: MechanismClass,
    /// Half-maximal dose in µM
    pub ic50_um: f64,
    /// Hill coefficient of the dose-response curve
    pub hill: f64,
    /// Fraction of live cells killed instantly at saturating dose
    pub instant_kill_max: f64,
    /// Attrition hazard per hour at full dysfunction
    pub attrition_rate_per_h: f64,
    /// Time constant of dysfunction onset
    pub dysfunction_tau_h: f64,
}

impl CompoundParams {
    /// Fractional engagement at `dose_um`, in [0, 1)
    pub fn potency(&self, dose_um: f64) -> f64 {
        if dose_um <= 0.0 {
            return 0.0;
        }
        let d = dose_um.powf(self.hill);
        let k = self.ic50_um.powf(self.hill);
        d / (d + k)
    }

    /// Dose expressed as a multiple of IC50
    pub fn dose_multiplier(&self, dose_um: f64) -> f64 {
        dose_um / self.ic50_um
    }
}

/// Compound entry as written in the table, before validation
#[derive(Debug, Clone, Default, Deserialize)]
struct RawCompound {
    id: Option<String>,
    stress_axis: Option<MechanismClass>,
    ic50_um: Option<f64>,
    hill: Option<f64>,
    instant_kill_max: Option<f64>,
    attrition_rate_per_h: Option<f64>,
    dysfunction_tau_h: Option<f64>,
}

impl RawCompound {
    fn validate(self, position: usize) -> Result<CompoundParams> {
        let id = self
            .id
            .ok_or_else(|| LabError::InvalidConfig(format!("compound #{} has no id", position)))?;

        let stress_axis = self.stress_axis.ok_or_else(|| LabError::MissingParameter {
            compound: id.clone(),
            parameter: "stress_axis",
        })?;

        let require = |value: Option<f64>, parameter: &'static str| -> Result<f64> {
            let value = value.ok_or_else(|| LabError::MissingParameter {
                compound: id.clone(),
                parameter,
            })?;
            if !value.is_finite() || value < 0.0 {
                return Err(LabError::InvalidParameter {
                    compound: id.clone(),
                    parameter,
                    value,
                });
            }
            Ok(value)
        };

        let ic50_um = require(self.ic50_um, "ic50_um")?;
        let hill = require(self.hill, "hill")?;
        let instant_kill_max = require(self.instant_kill_max, "instant_kill_max")?;
        let attrition_rate_per_h = require(self.attrition_rate_per_h, "attrition_rate_per_h")?;
        let dysfunction_tau_h = require(self.dysfunction_tau_h, "dysfunction_tau_h")?;

        let positive = |value: f64, parameter: &'static str| -> Result<()> {
            if value > 0.0 {
                Ok(())
            } else {
                Err(LabError::InvalidParameter {
                    compound: id.clone(),
                    parameter,
                    value,
                })
            }
        };
        positive(ic50_um, "ic50_um")?;
        positive(hill, "hill")?;
        positive(dysfunction_tau_h, "dysfunction_tau_h")?;
        if instant_kill_max > 1.0 {
            return Err(LabError::InvalidParameter {
                compound: id,
                parameter: "instant_kill_max",
                value: instant_kill_max,
            });
        }

        Ok(CompoundParams {
            id,
            stress_axis,
            ic50_um,
            hill,
            instant_kill_max,
            attrition_rate_per_h,
            dysfunction_tau_h,
        })
    }
}

/// Per-cell-line response scaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellLine {
    pub id: String,
    /// Multiplier on target dysfunction
    pub sensitivity: f64,
}

/// Morphology response of one stress axis at full dysfunction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisMorphology {
    /// Mean log-fold-change per channel
    pub mean: FeatureArray,
    /// Cell-to-cell spread per channel
    pub spread: FeatureArray,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawBiology {
    #[serde(default)]
    compounds: Vec<RawCompound>,
    #[serde(default)]
    cell_lines: Vec<CellLine>,
    #[serde(default)]
    morphology: BTreeMap<String, AxisMorphology>,
}

/// The complete, validated biology table
#[derive(Debug, Clone, PartialEq)]
pub struct BiologyTable {
    compounds: BTreeMap<String, CompoundParams>,
    cell_lines: BTreeMap<String, CellLine>,
    morphology: BTreeMap<MechanismClass, AxisMorphology>,
}

impl BiologyTable {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawBiology = toml::from_str(contents)?;

        let mut compounds = BTreeMap::new();
        for (position, entry) in raw.compounds.into_iter().enumerate() {
            let params = entry.validate(position)?;
            compounds.insert(params.id.clone(), params);
        }

        let mut cell_lines = BTreeMap::new();
        for line in raw.cell_lines {
            if !(line.sensitivity.is_finite() && line.sensitivity > 0.0) {
                return Err(LabError::InvalidConfig(format!(
                    "cell line {} has invalid sensitivity {}",
                    line.id, line.sensitivity
                )));
            }
            cell_lines.insert(line.id.clone(), line);
        }

        let mut morphology = BTreeMap::new();
        for (name, axis) in raw.morphology {
            let class = parse_axis(&name)?;
            morphology.insert(class, axis);
        }

        Self::new(compounds.into_values().collect(), cell_lines.into_values().collect(), morphology)
    }

    /// Build from already-validated parts; every stress axis used by a compound needs a morphology entry
    pub fn new(
        compounds: Vec<CompoundParams>,
        cell_lines: Vec<CellLine>,
        morphology: BTreeMap<MechanismClass, AxisMorphology>,
    ) -> Result<Self> {
        for compound in &compounds {
            if !morphology.contains_key(&compound.stress_axis) {
                return Err(LabError::InvalidConfig(format!(
                    "compound {} uses stress axis {} with no morphology entry",
                    compound.id, compound.stress_axis
                )));
            }
        }
        Ok(Self {
            compounds: compounds.into_iter().map(|c| (c.id.clone(), c)).collect(),
            cell_lines: cell_lines.into_iter().map(|l| (l.id.clone(), l)).collect(),
            morphology,
        })
    }

    pub fn compound(&self, id: &str) -> Result<&CompoundParams> {
        self.compounds
            .get(id)
            .ok_or_else(|| LabError::UnknownCompound(id.to_string()))
    }

    pub fn cell_line(&self, id: &str) -> Result<&CellLine> {
        self.cell_lines
            .get(id)
            .ok_or_else(|| LabError::UnknownCellLine(id.to_string()))
    }

    /// Morphology for an axis; validated to exist for every compound's axis
    pub fn morphology(&self, axis: MechanismClass) -> Option<&AxisMorphology> {
        self.morphology.get(&axis)
    }

    pub fn compounds(&self) -> impl Iterator<Item = &CompoundParams> {
        self.compounds.values()
    }

    pub fn cell_lines(&self) -> impl Iterator<Item = &CellLine> {
        self.cell_lines.values()
    }
}

fn parse_axis(name: &str) -> Result<MechanismClass> {
    MechanismClass::ALL
        .iter()
        .copied()
        .find(|class| class.to_string() == name)
        .ok_or_else(|| LabError::InvalidConfig(format!("unknown stress axis `{}`", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
        [[compounds]]
        id = "tunicamycin"
        stress_axis = "er_stress"
        ic50_um = 2.0
        hill = 1.5
        instant_kill_max = 0.1
        attrition_rate_per_h = 0.02
        dysfunction_tau_h = 12.0

        [[cell_lines]]
        id = "A549"
        sensitivity = 1.0

        [morphology.er_stress]
        mean = [1.1, 0.1, 0.1, -0.2, 0.5]
        spread = [0.35, 0.1, 0.15, 0.1, 0.3]
    "#;

    #[test]
    fn test_load_valid_table() {
        let table = BiologyTable::from_toml_str(TABLE).expect("table should load");
        let compound = table.compound("tunicamycin").unwrap();
        assert_eq!(compound.stress_axis, MechanismClass::ErStress);
        assert_eq!(table.cell_line("A549").unwrap().sensitivity, 1.0);
    }

    #[test]
    fn test_unknown_compound_is_configuration_error() {
        let table = BiologyTable::from_toml_str(TABLE).unwrap();
        assert!(matches!(
            table.compound("aspirin"),
            Err(LabError::UnknownCompound(name)) if name == "aspirin"
        ));
    }

    #[test]
    fn test_missing_kinetic_parameter_names_field() {
        let broken = TABLE.replace("dysfunction_tau_h = 12.0\n", "");
        let err = BiologyTable::from_toml_str(&broken).unwrap_err();
        match err {
            LabError::MissingParameter { compound, parameter } => {
                assert_eq!(compound, "tunicamycin");
                assert_eq!(parameter, "dysfunction_tau_h");
            }
            other => panic!("expected MissingParameter, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_ic50_rejected() {
        let broken = TABLE.replace("ic50_um = 2.0", "ic50_um = 0.0");
        assert!(matches!(
            BiologyTable::from_toml_str(&broken),
            Err(LabError::InvalidParameter { parameter: "ic50_um", .. })
        ));
    }

    #[test]
    fn test_potency_is_half_at_ic50() {
        let table = BiologyTable::from_toml_str(TABLE).unwrap();
        let compound = table.compound("tunicamycin").unwrap();
        assert_eq!(compound.potency(2.0), 0.5);
        assert_eq!(compound.potency(0.0), 0.0);
        assert!(compound.potency(20.0) > 0.9);
    }

    #[test]
    fn test_axis_without_morphology_rejected() {
        let broken = TABLE.replace("stress_axis = \"er_stress\"", "stress_axis = \"microtubule\"");
        assert!(matches!(
            BiologyTable::from_toml_str(&broken),
            Err(LabError::InvalidConfig(_))
        ));
    }
}
