use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use perfnoise_analysis::{
    AnalysisError, Deviance, DevianceClassifier, LogPlot, Segmentation, Segmenter, SignalPipeline,
};
use perfnoise_config::PerfnoiseConfig;
use perfnoise_core::{
    AlertChangeType, RawRun, SegmentBoundarySet, Signature, SignatureId, SummaryRecord,
    today_midnight_unix,
};
use perfnoise_source::{SignalSource, SourceError};
use perfnoise_store::{SqliteSummaryCache, SummaryCache};
use perfnoised::orchestrator::{RunContext, RunRequest, run};
use perfnoised::ranking::ReportKind;
use tempfile::tempdir;

const DAY: i64 = 86_400;

struct FakeSource {
    candidates: Vec<SignatureId>,
    runs: HashMap<SignatureId, Vec<RawRun>>,
    fetches: AtomicUsize,
    discoveries: AtomicUsize,
}

impl FakeSource {
    fn new(candidates: &[i64], runs: HashMap<SignatureId, Vec<RawRun>>) -> Self {
        Self {
            candidates: candidates.iter().copied().map(SignatureId).collect(),
            runs,
            fetches: AtomicUsize::new(0),
            discoveries: AtomicUsize::new(0),
        }
    }
}

impl SignalSource for FakeSource {
    fn signature(&self, id: SignatureId) -> Result<Signature, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.runs.contains_key(&id) {
            return Err(SourceError::NotFound(id));
        }
        Ok(Signature {
            id,
            framework: "awsy".to_owned(),
            suite: "base".to_owned(),
            test: "heap".to_owned(),
            platform: "windows10".to_owned(),
            repository: "autoland".to_owned(),
            alert_change_type: AlertChangeType::Absolute,
            alert_threshold: None,
        })
    }

    fn runs(&self, id: SignatureId) -> Result<Vec<RawRun>, SourceError> {
        Ok(self.runs.get(&id).cloned().unwrap_or_default())
    }

    fn candidates(&self, _selection: &str) -> Result<Vec<SignatureId>, SourceError> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        Ok(self.candidates.clone())
    }
}

/// Treats every series as one stable segment.
struct FlatSegmenter;

impl Segmenter for FlatSegmenter {
    fn segment(
        &self,
        values: &[f64],
        _change_type: AlertChangeType,
        _threshold: Option<f64>,
    ) -> Result<Segmentation, AnalysisError> {
        let boundaries = SegmentBoundarySet::from_indices([], values.len())
            .as_slice()
            .to_vec();
        let diffs = vec![None; boundaries.len()];
        Ok(Segmentation { boundaries, diffs })
    }
}

struct FixedClassifier;

impl DevianceClassifier for FixedClassifier {
    fn classify(&self, _values: &[f64]) -> Result<Deviance, AnalysisError> {
        Ok(Deviance {
            status: "OK".to_owned(),
            score: 0.0,
        })
    }
}

/// Twenty pushes alternating around 100 by `amplitude`, ten days back.
fn alternating_runs(amplitude: f64) -> Vec<RawRun> {
    let start = today_midnight_unix() - 10 * DAY;
    (0..20)
        .map(|index| RawRun {
            push_time: start + index * 60,
            value: if index % 2 == 0 {
                100.0 + amplitude
            } else {
                100.0 - amplitude
            },
            alert_id: None,
        })
        .collect()
}

fn config() -> PerfnoiseConfig {
    let mut config = PerfnoiseConfig::default();
    config.source.selection = Some("framework = awsy".to_owned());
    config
}

fn pipeline(
    source: Arc<FakeSource>,
    cache: Arc<SqliteSummaryCache>,
    config: &PerfnoiseConfig,
) -> SignalPipeline {
    SignalPipeline::new(
        source,
        cache,
        Arc::new(FlatSegmenter),
        Arc::new(FixedClassifier),
        Arc::new(LogPlot),
        &config.analysis,
    )
}

fn runs_by_id(amplitudes: &[(i64, f64)]) -> HashMap<SignatureId, Vec<RawRun>> {
    amplitudes
        .iter()
        .map(|(id, amplitude)| (SignatureId(*id), alternating_runs(*amplitude)))
        .collect()
}

#[test]
fn refresh_fills_cache_then_noise_report_ranks_candidates() {
    let temp = tempdir().expect("tempdir");
    let cache = Arc::new(
        SqliteSummaryCache::open(temp.path().join("summary.sqlite")).expect("open cache"),
    );
    // 4 is a candidate the source cannot resolve.
    let source = Arc::new(FakeSource::new(
        &[1, 2, 3, 4],
        runs_by_id(&[(1, 40.0), (2, 5.0), (3, 20.0)]),
    ));
    let config = config();
    let pipeline = pipeline(Arc::clone(&source), Arc::clone(&cache), &config);

    let outcome = run(
        &RunContext {
            config: &config,
            pipeline: &pipeline,
        },
        &RunRequest {
            noise: Some(2),
            ..RunRequest::default()
        },
    )
    .expect("run scan");

    let refresh = outcome.refresh.expect("refresh ran");
    assert_eq!(refresh.candidates, 4);
    assert_eq!(refresh.needs_update, 4);
    assert_eq!(refresh.refreshed, 3);
    assert_eq!(refresh.failed, 1);

    for id in [1, 2, 3] {
        let record = cache
            .get(SignatureId(id))
            .expect("read cache")
            .expect("record cached");
        assert_eq!(record.num_pushes, 20);
        assert!(!record.is_diff);
    }
    assert!(cache.get(SignatureId(4)).expect("read cache").is_none());

    assert_eq!(outcome.reports.len(), 1);
    let report = &outcome.reports[0];
    assert_eq!(report.kind, ReportKind::Noise);
    let ranked: Vec<SignatureId> = report.records.iter().map(|record| record.id).collect();
    assert_eq!(ranked, vec![SignatureId(1), SignatureId(3)]);
    let noise = report.records[0].relative_noise.expect("noise scored");
    assert!((noise - 0.4).abs() < 1e-9, "noise was {noise}");
}

#[test]
fn fresh_records_are_not_refetched() {
    let temp = tempdir().expect("tempdir");
    let cache = Arc::new(
        SqliteSummaryCache::open(temp.path().join("summary.sqlite")).expect("open cache"),
    );
    let source = Arc::new(FakeSource::new(&[1, 2], runs_by_id(&[(1, 10.0), (2, 10.0)])));
    let config = config();
    let pipeline = pipeline(Arc::clone(&source), Arc::clone(&cache), &config);
    let context = RunContext {
        config: &config,
        pipeline: &pipeline,
    };

    let first = run(&context, &RunRequest::default()).expect("first scan");
    assert_eq!(first.refresh.expect("refresh ran").refreshed, 2);
    let fetched = source.fetches.load(Ordering::SeqCst);

    let second = run(&context, &RunRequest::default()).expect("second scan");
    let refresh = second.refresh.expect("refresh ran");
    assert_eq!(refresh.needs_update, 0);
    assert_eq!(refresh.refreshed, 0);
    assert_eq!(source.fetches.load(Ordering::SeqCst), fetched);
}

#[test]
fn stale_records_are_refreshed_after_missing_ones() {
    let temp = tempdir().expect("tempdir");
    let cache = Arc::new(
        SqliteSummaryCache::open(temp.path().join("summary.sqlite")).expect("open cache"),
    );
    let stale_at = (today_midnight_unix() - 5 * DAY) * 1000;
    cache
        .upsert(
            SignatureId(2),
            &SummaryRecord {
                id: SignatureId(2),
                title: "old".to_owned(),
                num_pushes: 3,
                is_diff: false,
                max_diff: None,
                num_new_segments: 2,
                num_old_segments: 2,
                relative_noise: None,
                dev_status: None,
                dev_score: None,
                last_updated: stale_at,
            },
        )
        .expect("seed stale record");

    let source = Arc::new(FakeSource::new(&[1, 2], runs_by_id(&[(1, 10.0), (2, 10.0)])));
    let mut config = config();
    config.analysis.limit = 1;
    let pipeline = pipeline(Arc::clone(&source), Arc::clone(&cache), &config);

    let outcome = run(
        &RunContext {
            config: &config,
            pipeline: &pipeline,
        },
        &RunRequest::default(),
    )
    .expect("run scan");

    let refresh = outcome.refresh.expect("refresh ran");
    assert_eq!(refresh.needs_update, 2);
    assert_eq!(refresh.queued, 1);
    assert!(cache.get(SignatureId(1)).expect("read cache").is_some());
    let untouched = cache
        .get(SignatureId(2))
        .expect("read cache")
        .expect("record cached");
    assert_eq!(untouched.last_updated, stale_at);
}

#[test]
fn now_flag_reports_from_cache_without_refresh() {
    let temp = tempdir().expect("tempdir");
    let cache = Arc::new(
        SqliteSummaryCache::open(temp.path().join("summary.sqlite")).expect("open cache"),
    );
    let source = Arc::new(FakeSource::new(&[1], runs_by_id(&[(1, 10.0)])));
    let config = config();
    let pipeline = pipeline(Arc::clone(&source), Arc::clone(&cache), &config);

    let outcome = run(
        &RunContext {
            config: &config,
            pipeline: &pipeline,
        },
        &RunRequest {
            skip_refresh: true,
            deviant: Some(10),
            missing: Some(10),
            ..RunRequest::default()
        },
    )
    .expect("run scan");

    assert!(outcome.refresh.is_none());
    assert_eq!(outcome.reports.len(), 2);
    assert!(outcome.reports.iter().all(|report| report.records.is_empty()));
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
}

#[test]
fn explicit_ids_skip_discovery() {
    let temp = tempdir().expect("tempdir");
    let cache = Arc::new(
        SqliteSummaryCache::open(temp.path().join("summary.sqlite")).expect("open cache"),
    );
    let source = Arc::new(FakeSource::new(&[1, 2], runs_by_id(&[(1, 10.0), (2, 30.0)])));
    let config = PerfnoiseConfig::default();
    let pipeline = pipeline(Arc::clone(&source), Arc::clone(&cache), &config);

    let outcome = run(
        &RunContext {
            config: &config,
            pipeline: &pipeline,
        },
        &RunRequest {
            ids: vec![SignatureId(2)],
            noise: Some(10),
            ..RunRequest::default()
        },
    )
    .expect("run scan");

    assert_eq!(outcome.direct.len(), 1);
    assert_eq!(outcome.direct[0].id, SignatureId(2));
    assert!(outcome.reports.is_empty());
    assert!(outcome.refresh.is_none());
    assert_eq!(source.discoveries.load(Ordering::SeqCst), 0);
    assert!(cache.get(SignatureId(2)).expect("read cache").is_some());
}

#[test]
fn discovery_requires_a_selection() {
    let temp = tempdir().expect("tempdir");
    let cache = Arc::new(
        SqliteSummaryCache::open(temp.path().join("summary.sqlite")).expect("open cache"),
    );
    let source = Arc::new(FakeSource::new(&[1], runs_by_id(&[(1, 10.0)])));
    let config = PerfnoiseConfig::default();
    let pipeline = pipeline(Arc::clone(&source), Arc::clone(&cache), &config);

    let err = run(
        &RunContext {
            config: &config,
            pipeline: &pipeline,
        },
        &RunRequest::default(),
    )
    .expect_err("selection missing");

    assert!(err.to_string().contains("source.selection"));
    assert_eq!(source.discoveries.load(Ordering::SeqCst), 0);
}
