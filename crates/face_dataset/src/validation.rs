//! Dataset validation and quality checks.

use crate::annotations::FaceDataset;
use crate::types::{DatasetSummary, ValidationOutcome, ValidationReport, ValidationThresholds};

/// Count boxes per breed and species and check every referenced image on disk.
pub fn summarize_records(dataset: &FaceDataset) -> DatasetSummary {
    let map = dataset.label_map();
    let mut summary = DatasetSummary {
        source: dataset.source().to_path_buf(),
        images: dataset.len(),
        boxes: dataset.num_boxes(),
        ..Default::default()
    };
    for record in dataset.records() {
        if record.boxes.is_empty() {
            summary.empty_images += 1;
        }
        let path = dataset.image_path(record);
        if !path.is_file() {
            summary.missing_files.push(path);
        }
        for label in record.labels() {
            let breed = map
                .name(label)
                .map(str::to_string)
                .unwrap_or_else(|| format!("label_{label}"));
            *summary.per_breed.entry(breed).or_default() += 1;
            if let Some(species) = map.species(label) {
                *summary
                    .per_species
                    .entry(species.as_str().to_string())
                    .or_default() += 1;
            }
        }
    }
    summary
}

fn apply_thresholds(
    label: &str,
    count: usize,
    ratio: f32,
    max_count: Option<usize>,
    max_ratio: Option<f32>,
    outcome: &mut ValidationOutcome,
    reasons: &mut Vec<String>,
) {
    if let Some(max) = max_count {
        if count > max {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!("{label}: {count} exceeds max {max}"));
        }
    }
    if let Some(max_r) = max_ratio {
        if ratio > max_r {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!(
                "{label}: ratio {:.3} exceeds max {:.3}",
                ratio, max_r
            ));
        }
    }
    if count > 0 {
        if *outcome == ValidationOutcome::Pass {
            *outcome = ValidationOutcome::Warn;
        }
        reasons.push(format!("{label}: {count} observed"));
    }
}

pub fn validate_summary(
    summary: DatasetSummary,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    let denom = summary.images.max(1) as f32;
    let missing = summary.missing();

    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();

    apply_thresholds(
        "missing image files",
        missing,
        missing as f32 / denom,
        thresholds.max_missing,
        thresholds.max_missing_ratio,
        &mut outcome,
        &mut reasons,
    );
    apply_thresholds(
        "images without boxes",
        summary.empty_images,
        summary.empty_images as f32 / denom,
        thresholds.max_empty,
        thresholds.max_empty_ratio,
        &mut outcome,
        &mut reasons,
    );

    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}

pub fn summarize_with_thresholds(
    dataset: &FaceDataset,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    validate_summary(summarize_records(dataset), thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_over_limit_fails() {
        let summary = DatasetSummary {
            images: 10,
            missing_files: vec!["a.jpg".into(), "b.jpg".into()],
            ..Default::default()
        };
        let report = validate_summary(
            summary.clone(),
            &ValidationThresholds {
                max_missing: Some(1),
                ..Default::default()
            },
        );
        assert_eq!(report.outcome, ValidationOutcome::Fail);

        let lenient = validate_summary(summary, &ValidationThresholds::default());
        assert_eq!(lenient.outcome, ValidationOutcome::Warn);
        assert_eq!(lenient.reasons, vec!["missing image files: 2 observed"]);
    }

    #[test]
    fn clean_summary_passes() {
        let report = validate_summary(
            DatasetSummary {
                images: 3,
                boxes: 3,
                ..Default::default()
            },
            &ValidationThresholds::default(),
        );
        assert_eq!(report.outcome, ValidationOutcome::Pass);
        assert!(report.reasons.is_empty());
    }
}
