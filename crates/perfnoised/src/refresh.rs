use std::collections::HashSet;
use std::time::Instant;

use anyhow::{Context, Result};
use perfnoise_analysis::SignalPipeline;
use perfnoise_config::AnalysisConfig;
use perfnoise_core::{SignatureId, today_midnight_unix};
use perfnoise_store::{Filter, Sort, StoreError, SummaryCache, SummaryField};

use crate::worker_pool::WorkerPool;

const EXISTING_QUERY_LIMIT: usize = 100_000;
const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshPlan {
    pub missing: Vec<SignatureId>,
    /// Oldest first.
    pub stale: Vec<SignatureId>,
}

impl RefreshPlan {
    /// Missing signals first, then stale ones.
    pub fn needs_update(&self) -> Vec<SignatureId> {
        self.missing.iter().chain(&self.stale).copied().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshReport {
    pub candidates: usize,
    pub needs_update: usize,
    pub queued: usize,
    pub refreshed: usize,
    pub failed: usize,
}

/// Milliseconds before which a cached record counts as stale.
pub fn stale_cutoff_ms(today_midnight: i64, retention_days: u32) -> i64 {
    today_midnight.saturating_mul(1000) - i64::from(retention_days) * DAY_MS
}

pub fn plan_refresh(
    cache: &dyn SummaryCache,
    candidates: &[SignatureId],
    stale_before_ms: i64,
) -> Result<RefreshPlan, StoreError> {
    let existing = cache.query(
        &[SummaryField::Id, SummaryField::LastUpdated],
        &Filter::And(vec![
            Filter::id_in(candidates.iter().map(|id| id.get())),
            Filter::Exists(SummaryField::NumPushes),
        ]),
        Some(&Sort::asc(SummaryField::LastUpdated)),
        EXISTING_QUERY_LIMIT,
    )?;

    let mut known = HashSet::with_capacity(existing.len());
    let mut stale = Vec::new();
    for document in &existing {
        let Some(id) = document.get("id").and_then(|value| value.as_i64()) else {
            continue;
        };
        known.insert(id);
        let last_updated = document
            .get("last_updated")
            .and_then(|value| value.as_i64())
            .unwrap_or(i64::MIN);
        if last_updated < stale_before_ms {
            stale.push(SignatureId(id));
        }
    }

    let mut seen = HashSet::new();
    let missing = candidates
        .iter()
        .copied()
        .filter(|id| !known.contains(&id.get()) && seen.insert(*id))
        .collect();

    Ok(RefreshPlan { missing, stale })
}

/// Brings the summary cache up to date for a candidate set, missing signals
/// first, then the stalest.
pub struct CacheRefreshScheduler<'a> {
    pipeline: &'a SignalPipeline,
    limit: usize,
    retention_days: u32,
    workers: usize,
}

impl<'a> CacheRefreshScheduler<'a> {
    pub fn new(pipeline: &'a SignalPipeline, analysis: &AnalysisConfig) -> Self {
        Self {
            pipeline,
            limit: analysis.limit,
            retention_days: analysis.retention_days,
            workers: analysis.workers,
        }
    }

    pub fn refresh(&self, candidates: &[SignatureId]) -> Result<RefreshReport> {
        let stale_before = stale_cutoff_ms(today_midnight_unix(), self.retention_days);
        let plan = plan_refresh(self.pipeline.cache(), candidates, stale_before)
            .context("failed to read summary cache")?;

        let needs_update = plan.needs_update();
        tracing::info!(
            num = needs_update.len(),
            missing = plan.missing.len(),
            stale = plan.stale.len(),
            "{} series are candidates for local update",
            needs_update.len()
        );

        let batch: Vec<SignatureId> = needs_update.iter().copied().take(self.limit).collect();
        let queued = batch.len();

        let started = Instant::now();
        let pool = WorkerPool::new("refresh", self.workers);
        let outcome = pool
            .run(batch, |id| self.pipeline.process(*id, false).map(|_| ()))
            .context("failed to start refresh workers")?;
        tracing::info!(
            queued,
            refreshed = outcome.completed,
            failed = outcome.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Local database is up to date"
        );

        Ok(RefreshReport {
            candidates: candidates.len(),
            needs_update: needs_update.len(),
            queued,
            refreshed: outcome.completed,
            failed: outcome.failed,
        })
    }
}
