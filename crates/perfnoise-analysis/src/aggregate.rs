use std::collections::BTreeMap;

use chrono::{DateTime, Months, Utc};
use perfnoise_core::{Push, RawRun};

/// Time-ordered pushes and their values, index-aligned.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregatedPushes {
    pub pushes: Vec<Push>,
    pub values: Vec<f64>,
}

impl AggregatedPushes {
    pub fn len(&self) -> usize {
        self.pushes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pushes.is_empty()
    }
}

/// Unix seconds `months` calendar months before `today_midnight`.
pub fn window_cutoff(today_midnight: i64, months: u32) -> i64 {
    DateTime::<Utc>::from_timestamp(today_midnight, 0)
        .and_then(|today| today.checked_sub_months(Months::new(months)))
        .map(|cutoff| cutoff.timestamp())
        .unwrap_or(i64::MIN)
}

/// Groups runs newer than `cutoff` by exact push time. Each push takes the
/// median of its runs and keeps the runs for alert inspection.
pub fn aggregate_pushes(runs: Vec<RawRun>, cutoff: i64) -> AggregatedPushes {
    let mut groups: BTreeMap<i64, Vec<RawRun>> = BTreeMap::new();
    for run in runs {
        if run.push_time <= cutoff || !run.value.is_finite() {
            continue;
        }
        groups.entry(run.push_time).or_default().push(run);
    }

    let mut aggregated = AggregatedPushes::default();
    for (time, runs) in groups {
        let mut values: Vec<f64> = runs.iter().map(|run| run.value).collect();
        let Some(value) = median(&mut values) else {
            continue;
        };
        aggregated.values.push(value);
        aggregated.pushes.push(Push { time, value, runs });
    }

    aggregated
}

/// Median; the mean of the two middle values for even lengths.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
