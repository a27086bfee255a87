//! Crop/stage rule table.
//!
//! Every (crop, stage) pair maps to a validated [`RuleSet`]. The table is
//! built once from defaults plus `[[rules.overrides]]` when the config is
//! loaded, so lookups at request time cannot miss.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::{RuleOverride, RulesConfig};
use crate::types::{CropType, GrowthStage};

/// Soil nutrient band. Fertilizer is advised only below `min`, and then
/// tops the level up to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NutrientRange {
    pub min: f64,
    pub target: f64,
}

impl NutrientRange {
    pub const fn new(min: f64, target: f64) -> Self {
        Self { min, target }
    }

    /// kg/acre needed to reach `target`, or zero when the reading is at or
    /// above `min`.
    pub fn deficit(&self, measured: f64) -> f64 {
        if measured < self.min {
            (self.target - measured).max(0.0)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RuleSet {
    /// Irrigate below this volumetric moisture percent.
    pub moisture_threshold_pct: f64,
    pub irrigation_liters_per_acre: f64,
    pub nitrogen: NutrientRange,
    pub phosphorus: NutrientRange,
    pub potassium: NutrientRange,
    pub ph_min: f64,
    pub ph_max: f64,
}

impl RuleSet {
    fn validate(&self, key: (CropType, GrowthStage), errors: &mut Vec<String>) {
        let (crop, stage) = key;
        if !(self.moisture_threshold_pct > 0.0 && self.moisture_threshold_pct < 100.0) {
            errors.push(format!(
                "rules[{crop}/{stage}].moisture_threshold_pct = {} must be within (0, 100)",
                self.moisture_threshold_pct
            ));
        }
        if self.irrigation_liters_per_acre <= 0.0 {
            errors.push(format!(
                "rules[{crop}/{stage}].irrigation_liters_per_acre = {} must be > 0",
                self.irrigation_liters_per_acre
            ));
        }
        for (name, range) in [
            ("nitrogen", self.nitrogen),
            ("phosphorus", self.phosphorus),
            ("potassium", self.potassium),
        ] {
            if range.min < 0.0 {
                errors.push(format!("rules[{crop}/{stage}].{name}_min = {} cannot be negative", range.min));
            }
            if range.target < range.min {
                errors.push(format!(
                    "rules[{crop}/{stage}].{name}_target ({}) must be >= {name}_min ({})",
                    range.target, range.min
                ));
            }
        }
        if !(0.0..=14.0).contains(&self.ph_min) || !(0.0..=14.0).contains(&self.ph_max) {
            errors.push(format!("rules[{crop}/{stage}] pH band must lie within 0-14"));
        }
        if self.ph_min >= self.ph_max {
            errors.push(format!(
                "rules[{crop}/{stage}].ph_min ({}) must be < ph_max ({})",
                self.ph_min, self.ph_max
            ));
        }
    }

    fn apply_override(&mut self, o: &RuleOverride) {
        if let Some(v) = o.moisture_threshold_pct {
            self.moisture_threshold_pct = v;
        }
        if let Some(v) = o.irrigation_liters_per_acre {
            self.irrigation_liters_per_acre = v;
        }
        if let Some(v) = o.nitrogen_min {
            self.nitrogen.min = v;
        }
        if let Some(v) = o.nitrogen_target {
            self.nitrogen.target = v;
        }
        if let Some(v) = o.phosphorus_min {
            self.phosphorus.min = v;
        }
        if let Some(v) = o.phosphorus_target {
            self.phosphorus.target = v;
        }
        if let Some(v) = o.potassium_min {
            self.potassium.min = v;
        }
        if let Some(v) = o.potassium_target {
            self.potassium.target = v;
        }
        if let Some(v) = o.ph_min {
            self.ph_min = v;
        }
        if let Some(v) = o.ph_max {
            self.ph_max = v;
        }
    }
}

/// Built-in agronomic defaults.
pub fn default_rule_set(crop: CropType, stage: GrowthStage) -> RuleSet {
    use CropType::{Maize, Other, Rice, Wheat};
    use GrowthStage::{Flowering, Vegetative};

    let moisture_threshold_pct = match (crop, stage) {
        (Rice, _) => 50.0,
        (Wheat, _) | (Other, _) => 30.0,
        (Maize, Vegetative) => 25.0,
        (Maize, Flowering) => 35.0,
    };
    let irrigation_liters_per_acre = match crop {
        Rice => 1000.0,
        Wheat => 500.0,
        Maize | Other => 400.0,
    };
    // (N, P, K) targets in kg/acre
    let (n, p, k) = match (crop, stage) {
        (Wheat, Vegetative) => (50.0, 30.0, 20.0),
        (Wheat, Flowering) => (30.0, 40.0, 30.0),
        (Rice, Vegetative) => (60.0, 30.0, 30.0),
        (Rice, Flowering) => (40.0, 40.0, 40.0),
        (Maize | Other, _) => (40.0, 30.0, 20.0),
    };
    let (ph_min, ph_max) = match crop {
        Rice => (5.5, 7.0),
        Maize => (5.5, 7.5),
        Wheat | Other => (6.0, 7.5),
    };

    RuleSet {
        moisture_threshold_pct,
        irrigation_liters_per_acre,
        nitrogen: NutrientRange::new(20.0, n),
        phosphorus: NutrientRange::new(10.0, p),
        potassium: NutrientRange::new(10.0, k),
        ph_min,
        ph_max,
    }
}

/// Validated rule entries for every crop and stage.
#[derive(Debug, Clone)]
pub struct RuleTable {
    entries: HashMap<(CropType, GrowthStage), RuleSet>,
}

impl RuleTable {
    /// Build the table from defaults plus overrides, returning every
    /// validation problem found.
    pub fn from_config(config: &RulesConfig) -> Result<Self, Vec<String>> {
        let mut entries = HashMap::new();
        for crop in CropType::ALL {
            for stage in GrowthStage::ALL {
                entries.insert((crop, stage), default_rule_set(crop, stage));
            }
        }

        for o in &config.overrides {
            if let Some(entry) = entries.get_mut(&(o.crop, o.stage)) {
                entry.apply_override(o);
            }
        }

        let mut errors = Vec::new();
        let mut keys: Vec<_> = entries.keys().copied().collect();
        keys.sort_by_key(|(c, s)| (c.to_string(), s.to_string()));
        for key in keys {
            if let Some(entry) = entries.get(&key) {
                entry.validate(key, &mut errors);
            }
        }

        if errors.is_empty() {
            Ok(Self { entries })
        } else {
            Err(errors)
        }
    }

    pub fn get(&self, crop: CropType, stage: GrowthStage) -> RuleSet {
        self.entries
            .get(&(crop, stage))
            .copied()
            .unwrap_or_else(|| default_rule_set(crop, stage))
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        let entries = CropType::ALL
            .into_iter()
            .flat_map(|c| GrowthStage::ALL.into_iter().map(move |s| ((c, s), default_rule_set(c, s))))
            .collect();
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn override_for(crop: CropType, stage: GrowthStage) -> RuleOverride {
        RuleOverride {
            crop,
            stage,
            moisture_threshold_pct: None,
            irrigation_liters_per_acre: None,
            nitrogen_min: None,
            nitrogen_target: None,
            phosphorus_min: None,
            phosphorus_target: None,
            potassium_min: None,
            potassium_target: None,
            ph_min: None,
            ph_max: None,
        }
    }

    #[test]
    fn test_default_table_validates() {
        assert!(RuleTable::from_config(&RulesConfig::default()).is_ok());
    }

    #[test]
    fn test_wheat_vegetative_defaults() {
        let rs = RuleTable::default().get(CropType::Wheat, GrowthStage::Vegetative);
        assert!((rs.moisture_threshold_pct - 30.0).abs() < f64::EPSILON);
        assert!((rs.irrigation_liters_per_acre - 500.0).abs() < f64::EPSILON);
        assert!((rs.nitrogen.target - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_override_applies_only_to_its_key() {
        let mut config = RulesConfig::default();
        let mut o = override_for(CropType::Maize, GrowthStage::Flowering);
        o.moisture_threshold_pct = Some(40.0);
        config.overrides.push(o);

        let table = RuleTable::from_config(&config).unwrap();
        assert!((table.get(CropType::Maize, GrowthStage::Flowering).moisture_threshold_pct - 40.0).abs() < f64::EPSILON);
        assert!((table.get(CropType::Maize, GrowthStage::Vegetative).moisture_threshold_pct - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_override_rejected_at_load() {
        let mut config = RulesConfig::default();
        let mut o = override_for(CropType::Rice, GrowthStage::Vegetative);
        o.nitrogen_target = Some(5.0);
        o.ph_min = Some(8.0);
        config.overrides.push(o);

        let errors = RuleTable::from_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("nitrogen_target")));
        assert!(errors.iter().any(|e| e.contains("ph_min")));
    }

    #[test]
    fn test_nutrient_deficit() {
        let range = NutrientRange::new(20.0, 50.0);
        assert!((range.deficit(12.0) - 38.0).abs() < 1e-12);
        assert!(range.deficit(20.0).abs() < f64::EPSILON);
        assert!(range.deficit(35.0).abs() < f64::EPSILON);
    }
}
