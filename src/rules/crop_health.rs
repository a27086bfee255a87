//! Crop health cues from image metadata.
//!
//! The grower's notes and the image URI are scanned for visual cue words
//! ("yellow", "spot", "wilt", ...). Each crop has its own ordered cue list;
//! the first cue found wins, and the generic list is tried when no
//! crop-specific cue matches.

use crate::types::{CropIssue, CropType, ImageMeta, IssueSeverity};

struct Cue {
    keyword: &'static str,
    issue: &'static str,
    treatment: &'static str,
    severity: IssueSeverity,
}

const fn cue(keyword: &'static str, issue: &'static str, treatment: &'static str, severity: IssueSeverity) -> Cue {
    Cue {
        keyword,
        issue,
        treatment,
        severity,
    }
}

const RICE_CUES: &[Cue] = &[
    cue("yellow", "Nitrogen deficiency", "Top-dress urea at 22 kg/acre", IssueSeverity::Medium),
    cue("orange", "Tungro virus", "Control the green leafhopper vector", IssueSeverity::High),
    cue("brown", "Brown spot (Helminthosporium)", "Spray mancozeb 2.0 g/l", IssueSeverity::High),
    cue("spot", "Rice blast (Pyricularia)", "Spray tricyclazole 75% WP", IssueSeverity::High),
    cue("white", "Thrips damage", "Spray phosphamidon 40 SL", IssueSeverity::Low),
];

const GENERIC_CUES: &[Cue] = &[
    cue("yellow", "Nutrient deficiency (general)", "Apply a balanced NPK fertilizer", IssueSeverity::Medium),
    cue("spot", "Fungal leaf spot", "Apply a mild fungicide", IssueSeverity::Medium),
    cue("wilt", "Root zone problem", "Check drainage and soil moisture", IssueSeverity::High),
];

const fn cues_for(crop: CropType) -> &'static [Cue] {
    match crop {
        CropType::Rice => RICE_CUES,
        CropType::Wheat | CropType::Maize | CropType::Other => GENERIC_CUES,
    }
}

fn first_match<'a>(cues: &'a [Cue], text: &str) -> Option<&'a Cue> {
    cues.iter().find(|c| text.contains(c.keyword))
}

/// Crop issue suggested by the image's notes and URI, if any cue matches.
pub fn detect(crop: CropType, image: &ImageMeta) -> Option<CropIssue> {
    let text = format!("{} {}", image.notes, image.uri).to_lowercase();
    let found = first_match(cues_for(crop), &text).or_else(|| first_match(GENERIC_CUES, &text))?;
    Some(CropIssue {
        issue: found.issue.to_string(),
        treatment: found.treatment.to_string(),
        severity: found.severity,
        cue: found.keyword.to_string(),
        image_uri: image.uri.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageSource;
    use chrono::Utc;

    fn image(uri: &str, notes: &str) -> ImageMeta {
        ImageMeta {
            field_id: "f1".into(),
            timestamp: Utc::now(),
            uri: uri.into(),
            source: ImageSource::Phone,
            notes: notes.into(),
        }
    }

    #[test]
    fn test_rice_cue_takes_priority_over_generic() {
        let issue = detect(CropType::Rice, &image("s3://b/leaf.jpg", "Yellow tips on lower leaves")).unwrap();
        assert_eq!(issue.issue, "Nitrogen deficiency");
        assert_eq!(issue.severity, IssueSeverity::Medium);
        assert_eq!(issue.cue, "yellow");
    }

    #[test]
    fn test_first_cue_in_table_order_wins() {
        // "brown" precedes "spot" for rice
        let issue = detect(CropType::Rice, &image("s3://b/x.jpg", "brown spot on flag leaf")).unwrap();
        assert_eq!(issue.cue, "brown");
    }

    #[test]
    fn test_rice_falls_back_to_generic_cues() {
        let issue = detect(CropType::Rice, &image("s3://b/x.jpg", "plants wilt by noon")).unwrap();
        assert_eq!(issue.issue, "Root zone problem");
        assert_eq!(issue.severity, IssueSeverity::High);
    }

    #[test]
    fn test_uri_is_scanned_too() {
        let issue = detect(CropType::Wheat, &image("https://cdn.example/wheat_leaf_spot.png", "")).unwrap();
        assert_eq!(issue.issue, "Fungal leaf spot");
        assert_eq!(issue.image_uri, "https://cdn.example/wheat_leaf_spot.png");
    }

    #[test]
    fn test_no_cue_no_issue() {
        assert!(detect(CropType::Maize, &image("s3://b/canopy.jpg", "looks healthy")).is_none());
    }
}
