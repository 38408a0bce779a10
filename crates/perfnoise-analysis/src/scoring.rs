use std::sync::Arc;

use perfnoise_core::SegmentBoundarySet;

use crate::{AnalysisError, DevianceClassifier};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scores {
    pub relative_noise: Option<f64>,
    pub dev_status: Option<String>,
    pub dev_score: Option<f64>,
}

/// Scores the most recent stable segment after discarding its extremes.
pub struct NoiseDevianceScorer {
    classifier: Arc<dyn DevianceClassifier>,
    trim: usize,
}

impl NoiseDevianceScorer {
    pub fn new(classifier: Arc<dyn DevianceClassifier>, trim: usize) -> Self {
        Self { classifier, trim }
    }

    pub fn score(
        &self,
        new_segments: &SegmentBoundarySet,
        values: &[f64],
        title: &str,
    ) -> Result<Scores, AnalysisError> {
        let Some((start, end)) = new_segments.last_segment() else {
            return Ok(Scores::default());
        };
        let Some(segment) = values.get(start..end) else {
            return Ok(Scores::default());
        };

        let trimmed = trim_extremes(segment, self.trim);
        if trimmed.is_empty() {
            tracing::debug!(
                title,
                segment_len = segment.len(),
                trim = self.trim,
                "last segment too short to score"
            );
            return Ok(Scores::default());
        }

        let deviance = self.classifier.classify(&trimmed)?;
        let relative_noise = relative_noise(&trimmed);
        tracing::info!(
            title,
            dev_status = %deviance.status,
            dev_score = deviance.score,
            relative_noise,
            "scored last segment"
        );

        Ok(Scores {
            relative_noise,
            dev_status: Some(deviance.status),
            dev_score: Some(deviance.score).filter(|score| score.is_finite()),
        })
    }
}

/// Sorts `values` ascending and drops `trim` entries from each end.
pub fn trim_extremes(values: &[f64], trim: usize) -> Vec<f64> {
    if values.len() <= trim.saturating_mul(2) {
        return Vec::new();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted[trim..sorted.len() - trim].to_vec()
}

/// Population standard deviation over mean. `None` for empty input or a
/// mean that cannot be divided by.
pub fn relative_noise(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    if mean == 0.0 || !mean.is_finite() {
        return None;
    }
    let variance = values
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / count;

    Some(variance.sqrt() / mean).filter(|noise| noise.is_finite())
}
