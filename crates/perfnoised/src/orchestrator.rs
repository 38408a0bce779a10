use anyhow::{Context, Result, anyhow};
use perfnoise_analysis::SignalPipeline;
use perfnoise_config::PerfnoiseConfig;
use perfnoise_core::{SignatureId, SummaryRecord};

use crate::ranking::{RankedReport, RankingReporter, ReportKind};
use crate::refresh::{CacheRefreshScheduler, RefreshReport};

/// Everything one run needs, passed explicitly.
pub struct RunContext<'a> {
    pub config: &'a PerfnoiseConfig,
    pub pipeline: &'a SignalPipeline,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunRequest {
    /// When non-empty only these signals are processed.
    pub ids: Vec<SignatureId>,
    pub skip_refresh: bool,
    pub deviant: Option<usize>,
    pub noise: Option<usize>,
    pub missing: Option<usize>,
}

impl RunRequest {
    fn reports(&self) -> impl Iterator<Item = (ReportKind, usize)> {
        [
            (ReportKind::Deviant, self.deviant),
            (ReportKind::Noise, self.noise),
            (ReportKind::Missing, self.missing),
        ]
        .into_iter()
        .filter_map(|(kind, count)| count.map(|count| (kind, count)))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunOutcome {
    pub direct: Vec<SummaryRecord>,
    pub refresh: Option<RefreshReport>,
    pub reports: Vec<RankedReport>,
}

pub fn run(context: &RunContext<'_>, request: &RunRequest) -> Result<RunOutcome> {
    if !request.ids.is_empty() {
        let mut direct = Vec::with_capacity(request.ids.len());
        for id in &request.ids {
            let record = context
                .pipeline
                .process(*id, true)
                .with_context(|| format!("failed to process signature {id}"))?;
            direct.push(record);
        }
        return Ok(RunOutcome {
            direct,
            ..RunOutcome::default()
        });
    }

    let selection = context
        .config
        .source
        .selection
        .as_deref()
        .ok_or_else(|| anyhow!("source.selection must be set to discover candidate signals"))?;
    let candidates = context
        .pipeline
        .source()
        .candidates(selection)
        .context("failed to discover candidate signals")?;
    tracing::info!(candidates = candidates.len(), "discovered candidate signals");

    let refresh = if request.skip_refresh {
        tracing::info!("skipping local update");
        None
    } else {
        let scheduler = CacheRefreshScheduler::new(context.pipeline, &context.config.analysis);
        Some(scheduler.refresh(&candidates)?)
    };

    let reporter = RankingReporter::new(context.pipeline);
    let mut reports = Vec::new();
    for (kind, count) in request.reports() {
        reports.push(reporter.report(kind, &candidates, count)?);
    }

    Ok(RunOutcome {
        direct: Vec::new(),
        refresh,
        reports,
    })
}
