//! Threshold Rule Engine
//!
//! Deterministic mapping from a field snapshot and an optional rainfall
//! forecast to an [`ActionPlan`] with its [`Explanation`]. The irrigation
//! rule runs first, then the fertilizer rule; each is skipped with an
//! "insufficient data" line when its soil inputs are missing. A crop
//! health check over the latest image closes the evaluation.

pub mod crop_health;
mod table;

pub use table::{default_rule_set, NutrientRange, RuleSet, RuleTable};

use crate::config::{MissingForecastPolicy, RulesConfig};
use crate::types::{
    ActionPlan, CropIssue, Explanation, FertilizerPlan, FieldState, ForecastInput,
    IrrigationDecision, SensorSample,
};

/// Stateless evaluator over a validated rule table.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    table: RuleTable,
    policy: MissingForecastPolicy,
    rain_skip_threshold_mm: f64,
    lookahead_days: u32,
}

impl RuleEngine {
    /// Build from config. Fails with every validation error of the table.
    pub fn from_config(config: &RulesConfig) -> Result<Self, Vec<String>> {
        Ok(Self {
            table: RuleTable::from_config(config)?,
            policy: config.missing_forecast_policy,
            rain_skip_threshold_mm: config.rain_skip_threshold_mm,
            lookahead_days: u32::try_from(config.irrigation_lookahead_days.max(1)).unwrap_or(1),
        })
    }

    pub const fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Evaluate irrigation then fertilizer rules.
    pub fn evaluate(&self, state: &FieldState, forecast: &ForecastInput<'_>) -> (ActionPlan, Explanation) {
        let rules = self.table.get(state.profile.crop, state.profile.stage);
        let mut explanation = Explanation::new();

        let irrigation = self.irrigation_rule(state, &rules, forecast, &mut explanation);
        let fertilizer = Self::fertilizer_rule(state, &rules, irrigation.as_ref(), &mut explanation);
        let crop_issue = crop_health_rule(state, &mut explanation);

        (
            ActionPlan {
                irrigation,
                fertilizer,
                crop_issue,
            },
            explanation,
        )
    }

    fn irrigation_rule(
        &self,
        state: &FieldState,
        rules: &RuleSet,
        forecast: &ForecastInput<'_>,
        explanation: &mut Explanation,
    ) -> Option<IrrigationDecision> {
        let Some(sensor) = state.sensor.as_ref() else {
            explanation.push(
                "insufficient data for irrigation rule (insufficient soil data: no recent soil moisture reading)",
            );
            return None;
        };

        let outlook = self.rain_outlook(forecast);
        if !outlook.missing_days.is_empty() {
            let days = format_days(&outlook.missing_days);
            match self.policy {
                MissingForecastPolicy::SkipIrrigation => {
                    explanation.push(format!(
                        "insufficient data for irrigation rule (no rainfall forecast for {days}: {})",
                        outlook.reason
                    ));
                    return None;
                }
                MissingForecastPolicy::AssumeNoRain => {
                    explanation.push(format!(
                        "Assumption: 0 mm rainfall used for {days} because no forecast was available ({}); this is not a confirmed dry forecast",
                        outlook.reason
                    ));
                }
            }
        }

        let threshold = rules.moisture_threshold_pct;
        let rain = outlook.total_mm;
        let window = self.lookahead_days;
        let area = state.profile.area_acres;

        let decision = if sensor.moisture < threshold {
            if rain < self.rain_skip_threshold_mm {
                explanation.push(format!(
                    "Irrigate: moisture below {}% and low expected rainfall ({}% measured, {} mm expected over the next {} day(s), under the {} mm skip threshold)",
                    fmt_amount(threshold),
                    fmt_amount(sensor.moisture),
                    fmt_amount(rain),
                    window,
                    fmt_amount(self.rain_skip_threshold_mm),
                ));
                IrrigationDecision {
                    irrigate: true,
                    liters_per_acre: rules.irrigation_liters_per_acre,
                    total_liters: rules.irrigation_liters_per_acre * area,
                    timing: "within 24 hours, early morning or evening".to_string(),
                    expected_rain_mm: rain,
                    rain_assumed: outlook.assumed,
                }
            } else {
                explanation.push(format!(
                    "Delay irrigation: moisture below {}% but {} mm rainfall expected over the next {} day(s); re-check after the rain",
                    fmt_amount(threshold),
                    fmt_amount(rain),
                    window,
                ));
                IrrigationDecision {
                    irrigate: false,
                    liters_per_acre: 0.0,
                    total_liters: 0.0,
                    timing: "after expected rain".to_string(),
                    expected_rain_mm: rain,
                    rain_assumed: outlook.assumed,
                }
            }
        } else {
            explanation.push(format!(
                "No irrigation: moisture {}% is at or above the {}% threshold for {} ({})",
                fmt_amount(sensor.moisture),
                fmt_amount(threshold),
                state.profile.crop,
                state.profile.stage,
            ));
            IrrigationDecision {
                irrigate: false,
                liters_per_acre: 0.0,
                total_liters: 0.0,
                timing: "not needed".to_string(),
                expected_rain_mm: rain,
                rain_assumed: outlook.assumed,
            }
        };

        Some(decision)
    }

    fn fertilizer_rule(
        state: &FieldState,
        rules: &RuleSet,
        irrigation: Option<&IrrigationDecision>,
        explanation: &mut Explanation,
    ) -> Option<FertilizerPlan> {
        let Some(sensor) = state.sensor.as_ref() else {
            explanation.push(
                "insufficient data for fertilizer rule (insufficient soil data: no recent soil nutrient test)",
            );
            return None;
        };

        let nitrogen = rules.nitrogen.deficit(sensor.nitrogen);
        let phosphorus = rules.phosphorus.deficit(sensor.phosphorus);
        let potassium = rules.potassium.deficit(sensor.potassium);

        for (name, measured, range, delta) in [
            ("Nitrogen", sensor.nitrogen, rules.nitrogen, nitrogen),
            ("Phosphorus", sensor.phosphorus, rules.phosphorus, phosphorus),
            ("Potassium", sensor.potassium, rules.potassium, potassium),
        ] {
            if delta > 0.0 {
                explanation.push(format!(
                    "{name} {} kg/acre is below the {} kg/acre minimum: apply {} kg/acre to reach {} kg/acre",
                    fmt_amount(measured),
                    fmt_amount(range.min),
                    fmt_amount(delta),
                    fmt_amount(range.target),
                ));
            }
        }

        let apply = nitrogen > 0.0 || phosphorus > 0.0 || potassium > 0.0;
        if !apply {
            explanation.push(format!(
                "No fertilizer: N, P and K meet the minimums for {} ({})",
                state.profile.crop, state.profile.stage
            ));
        }

        ph_advice(sensor, rules, explanation);

        let timing = if !apply {
            "not needed"
        } else if irrigation.is_some_and(|i| i.irrigate) {
            "apply with the scheduled irrigation"
        } else {
            "within 7 days, before expected rain"
        };

        Some(FertilizerPlan {
            apply,
            nitrogen_kg_per_acre: nitrogen,
            phosphorus_kg_per_acre: phosphorus,
            potassium_kg_per_acre: potassium,
            timing: timing.to_string(),
        })
    }

    /// Rainfall expected over the lookahead days, noting any day with no
    /// forecast value.
    fn rain_outlook(&self, forecast: &ForecastInput<'_>) -> RainOutlook {
        let mut outlook = RainOutlook {
            total_mm: 0.0,
            missing_days: Vec::new(),
            assumed: false,
            reason: String::new(),
        };

        for day in 1..=self.lookahead_days {
            match forecast.vector().and_then(|v| v.rainfall_on(day)) {
                Some(mm) => outlook.total_mm += mm.max(0.0),
                None => outlook.missing_days.push(day),
            }
        }

        if !outlook.missing_days.is_empty() {
            outlook.assumed = true;
            outlook.reason = match forecast {
                ForecastInput::NotAvailable { reason } => reason.clone(),
                ForecastInput::Available(_) => "forecast does not cover this day".to_string(),
            };
        }
        outlook
    }
}

struct RainOutlook {
    total_mm: f64,
    missing_days: Vec<u32>,
    assumed: bool,
    reason: String,
}

fn crop_health_rule(state: &FieldState, explanation: &mut Explanation) -> Option<CropIssue> {
    let image = state.image.as_ref()?;
    let found = crop_health::detect(state.profile.crop, image);
    match &found {
        Some(issue) => explanation.push(format!(
            "Crop image suggests {} ({} severity, cue \"{}\"): {}",
            issue.issue, issue.severity, issue.cue, issue.treatment
        )),
        None => explanation.push("Crop image shows no known issue cues"),
    }
    found
}

fn ph_advice(sensor: &SensorSample, rules: &RuleSet, explanation: &mut Explanation) {
    if sensor.ph < rules.ph_min {
        explanation.push(format!(
            "Soil pH {} is below {}: apply agricultural lime",
            fmt_amount(sensor.ph),
            fmt_amount(rules.ph_min)
        ));
    } else if sensor.ph > rules.ph_max {
        explanation.push(format!(
            "Soil pH {} is above {}: apply elemental sulfur or gypsum",
            fmt_amount(sensor.ph),
            fmt_amount(rules.ph_max)
        ));
    }
}

fn format_days(days: &[u32]) -> String {
    let list: Vec<String> = days.iter().map(|d| format!("day +{d}")).collect();
    list.join(", ")
}

/// Whole numbers print without decimals, everything else with one.
fn fmt_amount(v: f64) -> String {
    if (v - v.round()).abs() < 1e-9 {
        format!("{v:.0}")
    } else {
        format!("{v:.1}")
    }
}
