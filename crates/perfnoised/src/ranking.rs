use std::fmt;

use anyhow::{Context, Result};
use perfnoise_analysis::SignalPipeline;
use perfnoise_core::{SignatureId, SummaryRecord};
use perfnoise_store::{CompareOp, Filter, Sort, StoreError, SummaryCache, SummaryField};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankMetric {
    MaxDiff,
    RelativeNoise,
}

impl RankMetric {
    pub fn field(self) -> SummaryField {
        match self {
            Self::MaxDiff => SummaryField::MaxDiff,
            Self::RelativeNoise => SummaryField::RelativeNoise,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Deviant,
    Noise,
    Missing,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deviant => "deviant",
            Self::Noise => "noise",
            Self::Missing => "missing",
        }
    }

    pub fn metric(self) -> RankMetric {
        match self {
            Self::Deviant | Self::Missing => RankMetric::MaxDiff,
            Self::Noise => RankMetric::RelativeNoise,
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedReport {
    pub kind: ReportKind,
    pub records: Vec<SummaryRecord>,
}

/// Candidate ids with at least one push, highest `|metric|` first. Records
/// without the metric sort last.
pub fn top_signals(
    cache: &dyn SummaryCache,
    candidates: &[SignatureId],
    metric: RankMetric,
    k: usize,
) -> Result<Vec<SignatureId>, StoreError> {
    if k == 0 {
        return Ok(Vec::new());
    }

    let documents = cache.query(
        &[SummaryField::Id],
        &Filter::And(vec![
            Filter::id_in(candidates.iter().map(|id| id.get())),
            Filter::Compare {
                field: SummaryField::NumPushes,
                op: CompareOp::Gte,
                value: 1.0,
            },
        ]),
        Some(&Sort::desc(metric.field()).by_abs()),
        k,
    )?;

    Ok(documents
        .iter()
        .filter_map(|document| document.get("id").and_then(|value| value.as_i64()))
        .map(SignatureId)
        .collect())
}

pub struct RankingReporter<'a> {
    pipeline: &'a SignalPipeline,
}

impl<'a> RankingReporter<'a> {
    pub fn new(pipeline: &'a SignalPipeline) -> Self {
        Self { pipeline }
    }

    /// Re-analyzes each of the top `k` signals with display enabled so the
    /// report reflects current data rather than the cached summary.
    pub fn report(
        &self,
        kind: ReportKind,
        candidates: &[SignatureId],
        k: usize,
    ) -> Result<RankedReport> {
        let top = top_signals(self.pipeline.cache(), candidates, kind.metric(), k)
            .with_context(|| format!("failed to rank {kind} signals"))?;
        tracing::info!(report = %kind, requested = k, found = top.len(), "showing top signals");

        let mut records = Vec::with_capacity(top.len());
        for id in top {
            let record = self
                .pipeline
                .process(id, true)
                .with_context(|| format!("failed to process signature {id}"))?;
            records.push(record);
        }

        Ok(RankedReport { kind, records })
    }
}
