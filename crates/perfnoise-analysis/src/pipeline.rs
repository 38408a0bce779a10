use std::sync::Arc;

use perfnoise_config::{AnalysisConfig, PerfnoiseConfig};
use perfnoise_core::{
    RawRun, Signature, SignatureId, StrictClock, SummaryRecord, today_midnight_unix,
};
use perfnoise_source::SignalSource;
use perfnoise_store::SummaryCache;

use crate::{
    AnalysisError, CommandClassifier, CommandPlot, CommandSegmenter, DevianceClassifier, LogPlot,
    NoiseDevianceScorer, PlotHook, SegmentReconciler, Segmenter, aggregate_pushes, window_cutoff,
};

/// Per-signal analysis: fetch, aggregate, reconcile, score, persist.
pub struct SignalPipeline {
    source: Arc<dyn SignalSource>,
    cache: Arc<dyn SummaryCache>,
    reconciler: SegmentReconciler,
    scorer: NoiseDevianceScorer,
    clock: StrictClock,
    window_months: u32,
}

impl SignalPipeline {
    pub fn new(
        source: Arc<dyn SignalSource>,
        cache: Arc<dyn SummaryCache>,
        segmenter: Arc<dyn Segmenter>,
        classifier: Arc<dyn DevianceClassifier>,
        plot: Arc<dyn PlotHook>,
        analysis: &AnalysisConfig,
    ) -> Self {
        Self {
            source,
            cache,
            reconciler: SegmentReconciler::new(segmenter, plot),
            scorer: NoiseDevianceScorer::new(classifier, analysis.trim),
            clock: StrictClock::new(),
            window_months: analysis.window_months,
        }
    }

    /// Wires the command-backed tools named in `[tools]`.
    pub fn from_config(
        config: &PerfnoiseConfig,
        source: Arc<dyn SignalSource>,
        cache: Arc<dyn SummaryCache>,
    ) -> Result<Self, AnalysisError> {
        let segmenter = CommandSegmenter::new(
            config
                .tools
                .segmenter
                .clone()
                .ok_or(AnalysisError::ToolNotConfigured("segmenter"))?,
        )?;
        let classifier = CommandClassifier::new(
            config
                .tools
                .deviance
                .clone()
                .ok_or(AnalysisError::ToolNotConfigured("deviance"))?,
        )?;
        let plot: Arc<dyn PlotHook> = match config.tools.plot.clone() {
            Some(argv) => Arc::new(CommandPlot::new(argv)?),
            None => Arc::new(LogPlot),
        };

        Ok(Self::new(
            source,
            cache,
            Arc::new(segmenter),
            Arc::new(classifier),
            plot,
            &config.analysis,
        ))
    }

    pub fn source(&self) -> &dyn SignalSource {
        self.source.as_ref()
    }

    pub fn cache(&self) -> &dyn SummaryCache {
        self.cache.as_ref()
    }

    /// Blocks until every plot requested by earlier `process` calls has been
    /// handed to the plot tool.
    pub fn flush_plots(&self) {
        self.reconciler.flush_plots();
    }

    /// Recomputes the summary for `id` and replaces its cached record.
    pub fn process(&self, id: SignatureId, show: bool) -> Result<SummaryRecord, AnalysisError> {
        let signature = self.source.signature(id)?;
        let runs = self.source.runs(id)?;

        let record = self.analyze(&signature, runs, today_midnight_unix(), show)?;
        self.cache.upsert(record.id, &record)?;
        Ok(record)
    }

    /// Builds the summary for already fetched data without persisting it.
    pub fn analyze(
        &self,
        signature: &Signature,
        runs: Vec<RawRun>,
        today_midnight: i64,
        show: bool,
    ) -> Result<SummaryRecord, AnalysisError> {
        let aggregated = aggregate_pushes(runs, window_cutoff(today_midnight, self.window_months));
        let title = signature.title();
        tracing::info!(title = %title, pushes = aggregated.len(), "analyzing signal");

        let reconciliation = self.reconciler.reconcile(
            signature,
            &aggregated.pushes,
            &aggregated.values,
            &title,
            show,
        )?;
        let scores = self
            .scorer
            .score(&reconciliation.new_segments, &aggregated.values, &title)?;

        Ok(SummaryRecord {
            id: signature.id,
            title,
            num_pushes: aggregated.len(),
            is_diff: reconciliation.is_diff,
            max_diff: reconciliation.max_diff,
            num_new_segments: reconciliation.new_segments.len(),
            num_old_segments: reconciliation.old_segments.len(),
            relative_noise: scores.relative_noise,
            dev_status: scores.dev_status,
            dev_score: scores.dev_score,
            last_updated: self.clock.stamp(),
        })
    }
}
