mod boundaries;
mod clock;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use boundaries::{BoundaryError, SegmentBoundarySet};
pub use clock::{StrictClock, today_midnight_unix};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SignatureId(pub i64);

impl SignatureId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SignatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SignatureId {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_signature_id(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertChangeType {
    #[default]
    Percentage,
    Absolute,
}

impl AlertChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Absolute => "absolute",
        }
    }
}

impl std::str::FromStr for AlertChangeType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "percentage" => Ok(Self::Percentage),
            "absolute" => Ok(Self::Absolute),
            other => Err(format!(
                "invalid alert change type '{other}', expected one of: percentage, absolute"
            )),
        }
    }
}

/// Immutable descriptor of one performance series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub id: SignatureId,
    pub framework: String,
    pub suite: String,
    pub test: String,
    pub platform: String,
    pub repository: String,
    #[serde(default)]
    pub alert_change_type: AlertChangeType,
    #[serde(default)]
    pub alert_threshold: Option<f64>,
}

impl Signature {
    pub fn title(&self) -> String {
        [
            self.id.to_string(),
            self.framework.clone(),
            self.suite.clone(),
            self.test.clone(),
            self.platform.clone(),
            self.repository.clone(),
        ]
        .join("-")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRun {
    /// Unix seconds of the push this run belongs to.
    pub push_time: i64,
    pub value: f64,
    #[serde(default)]
    pub alert_id: Option<i64>,
}

/// All runs sharing one push time, reduced to their median.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Push {
    pub time: i64,
    pub value: f64,
    pub runs: Vec<RawRun>,
}

impl Push {
    pub fn has_alert(&self) -> bool {
        self.runs.iter().any(|run| run.alert_id.is_some())
    }
}

/// One cached analysis result per signal. Optional metrics stay `None` when
/// they could not be computed so that "not scored" never reads as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub id: SignatureId,
    pub title: String,
    pub num_pushes: usize,
    pub is_diff: bool,
    pub max_diff: Option<f64>,
    pub num_new_segments: usize,
    pub num_old_segments: usize,
    pub relative_noise: Option<f64>,
    pub dev_status: Option<String>,
    pub dev_score: Option<f64>,
    /// Unix milliseconds.
    pub last_updated: i64,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("expecting integer signature id, got '{0}'")]
    InvalidSignatureId(String),
}

pub fn parse_signature_id(value: &str) -> Result<SignatureId, CoreError> {
    value
        .trim()
        .parse::<i64>()
        .map(SignatureId)
        .map_err(|_| CoreError::InvalidSignatureId(value.to_owned()))
}
