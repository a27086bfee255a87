//! Field profile and ingested observation records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field identifier as issued by the registration layer.
pub type FieldId = String;

/// Crops covered by the agronomic rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropType {
    Rice,
    Wheat,
    Maize,
    /// Any crop without a dedicated rule entry.
    Other,
}

impl CropType {
    pub const ALL: [Self; 4] = [Self::Rice, Self::Wheat, Self::Maize, Self::Other];

    /// Parse a free-form crop name. Unrecognised names map to `Other`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rice" | "paddy" => Self::Rice,
            "wheat" => Self::Wheat,
            "maize" | "corn" => Self::Maize,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for CropType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rice => write!(f, "rice"),
            Self::Wheat => write!(f, "wheat"),
            Self::Maize => write!(f, "maize"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthStage {
    Vegetative,
    Flowering,
}

impl GrowthStage {
    pub const ALL: [Self; 2] = [Self::Vegetative, Self::Flowering];

    /// Parse a free-form stage name. Unknown stages fall back to vegetative.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "flowering" | "reproductive" | "heading" => Self::Flowering,
            _ => Self::Vegetative,
        }
    }
}

impl fmt::Display for GrowthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vegetative => write!(f, "vegetative"),
            Self::Flowering => write!(f, "flowering"),
        }
    }
}

/// Registered field with the agronomic context the engine needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldProfile {
    pub id: FieldId,
    #[serde(default)]
    pub name: String,
    pub crop: CropType,
    pub stage: GrowthStage,
    pub latitude: f64,
    pub longitude: f64,
    /// Cultivated area in acres.
    #[serde(default = "default_area_acres")]
    pub area_acres: f64,
    pub registered_at: DateTime<Utc>,
}

const fn default_area_acres() -> f64 {
    1.0
}

/// One soil probe reading. Moisture is volumetric percent, nutrients are
/// kg per acre as reported by the soil test kit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub field_id: FieldId,
    pub timestamp: DateTime<Utc>,
    pub moisture: f64,
    pub ph: f64,
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherKind {
    /// Measured value at or before ingestion time.
    Historical,
    /// Provider forecast point for a future timestamp.
    Forecast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub field_id: FieldId,
    pub timestamp: DateTime<Utc>,
    pub kind: WeatherKind,
    /// Air temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity percent.
    pub humidity: f64,
    /// Rainfall in millimetres over the observation period.
    pub rainfall: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    Phone,
    Drone,
}

/// Crop image metadata. The image bytes live in external storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub field_id: FieldId,
    pub timestamp: DateTime<Utc>,
    pub uri: String,
    pub source: ImageSource,
    /// Grower's description of what the image shows.
    #[serde(default)]
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_parse_lenient() {
        assert_eq!(CropType::parse_lenient(" Wheat "), CropType::Wheat);
        assert_eq!(CropType::parse_lenient("corn"), CropType::Maize);
        assert_eq!(CropType::parse_lenient("sorghum"), CropType::Other);
    }

    #[test]
    fn test_unknown_stage_falls_back_to_vegetative() {
        assert_eq!(GrowthStage::parse_lenient("tillering"), GrowthStage::Vegetative);
        assert_eq!(GrowthStage::parse_lenient("FLOWERING"), GrowthStage::Flowering);
    }

    #[test]
    fn test_enums_serialize_snake_case() {
        let json = serde_json::to_string(&WeatherKind::Historical).unwrap();
        assert_eq!(json, "\"historical\"");
        let src: ImageSource = serde_json::from_str("\"drone\"").unwrap();
        assert_eq!(src, ImageSource::Drone);
    }
}
