use std::sync::Arc;
use std::time::Instant;

use perfnoise_core::{Push, SegmentBoundarySet, Signature};

use crate::{AnalysisError, PlotHook, Segmenter};

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub new_segments: SegmentBoundarySet,
    pub old_segments: SegmentBoundarySet,
    pub is_diff: bool,
    pub max_diff: Option<f64>,
}

/// Compares a fresh segmentation against the one implied by recorded alerts.
pub struct SegmentReconciler {
    segmenter: Arc<dyn Segmenter>,
    plot: Arc<dyn PlotHook>,
}

impl SegmentReconciler {
    pub fn new(segmenter: Arc<dyn Segmenter>, plot: Arc<dyn PlotHook>) -> Self {
        Self { segmenter, plot }
    }

    pub fn flush_plots(&self) {
        self.plot.flush();
    }

    pub fn reconcile(
        &self,
        signature: &Signature,
        pushes: &[Push],
        values: &[f64],
        title: &str,
        show: bool,
    ) -> Result<Reconciliation, AnalysisError> {
        let started = Instant::now();
        let segmentation = self.segmenter.segment(
            values,
            signature.alert_change_type,
            signature.alert_threshold,
        )?;
        tracing::debug!(
            title,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "find segments"
        );

        let new_segments = SegmentBoundarySet::new(segmentation.boundaries, pushes.len())
            .map_err(|source| AnalysisError::InvalidSegmentation {
                id: signature.id,
                source,
            })?;
        let old_segments = historical_segments(pushes);

        let is_diff = new_segments != old_segments;
        let max_diff = if is_diff {
            max_novel_diff(&new_segments, &segmentation.diffs, &old_segments)
        } else {
            None
        };

        if is_diff {
            tracing::warn!(title, "Disagree");
            tracing::info!(
                old = ?old_segments.as_slice(),
                new = ?new_segments.as_slice(),
                max_diff,
                "segmentation differs from recorded alerts"
            );
        } else {
            tracing::info!(title, "Agree");
        }

        if show && !pushes.is_empty() {
            self.plot
                .plot(values, &old_segments, format!("OLD {title}").as_str());
            self.plot
                .plot(values, &new_segments, format!("NEW {title}").as_str());
        }

        Ok(Reconciliation {
            new_segments,
            old_segments,
            is_diff,
            max_diff,
        })
    }
}

/// Boundaries implied by history: every push carrying an alert starts a
/// segment.
pub fn historical_segments(pushes: &[Push]) -> SegmentBoundarySet {
    let alerted = pushes
        .iter()
        .enumerate()
        .filter(|(_, push)| push.has_alert())
        .map(|(index, _)| index);
    SegmentBoundarySet::from_indices(alerted, pushes.len())
}

/// Largest diff among boundaries found by the segmenter but absent from
/// history. `None` when no such boundary has a finite diff.
pub fn max_novel_diff(
    new_segments: &SegmentBoundarySet,
    diffs: &[Option<f64>],
    old_segments: &SegmentBoundarySet,
) -> Option<f64> {
    new_segments
        .as_slice()
        .iter()
        .zip(diffs)
        .filter(|(boundary, _)| !old_segments.contains(**boundary))
        .filter_map(|(_, diff)| diff.filter(|value| value.is_finite()))
        .reduce(f64::max)
}
