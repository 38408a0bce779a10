use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

use perfnoise_core::{AlertChangeType, SegmentBoundarySet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::AnalysisError;

/// Raw output of a segmentation function. `diffs[i]` belongs to
/// `boundaries[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segmentation {
    #[serde(rename = "segments")]
    pub boundaries: Vec<usize>,
    #[serde(default)]
    pub diffs: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deviance {
    pub status: String,
    pub score: f64,
}

/// Change-point segmentation over a value sequence.
pub trait Segmenter: Send + Sync {
    fn segment(
        &self,
        values: &[f64],
        change_type: AlertChangeType,
        threshold: Option<f64>,
    ) -> Result<Segmentation, AnalysisError>;
}

/// Classifies how anomalous a (trimmed) value sequence is.
pub trait DevianceClassifier: Send + Sync {
    fn classify(&self, values: &[f64]) -> Result<Deviance, AnalysisError>;
}

/// Fire-and-forget rendering of a segmented series.
pub trait PlotHook: Send + Sync {
    fn plot(&self, values: &[f64], segments: &SegmentBoundarySet, title: &str);

    /// Waits until every plot requested so far has been handed over.
    fn flush(&self) {}
}

#[derive(Debug, Serialize)]
struct SegmentRequest<'a> {
    values: &'a [f64],
    change_type: AlertChangeType,
    threshold: Option<f64>,
}

#[derive(Debug, Serialize)]
struct DevianceRequest<'a> {
    values: &'a [f64],
}

#[derive(Debug, Serialize)]
struct PlotRequest<'a> {
    title: &'a str,
    values: &'a [f64],
    segments: &'a [usize],
}

/// Runs an external program that reads a JSON request on stdin and answers
/// with `{"segments": [...], "diffs": [...]}` on stdout.
#[derive(Debug, Clone)]
pub struct CommandSegmenter {
    argv: Vec<String>,
}

impl CommandSegmenter {
    pub fn new(argv: Vec<String>) -> Result<Self, AnalysisError> {
        if argv.is_empty() {
            return Err(AnalysisError::ToolNotConfigured("segmenter"));
        }
        Ok(Self { argv })
    }
}

impl Segmenter for CommandSegmenter {
    fn segment(
        &self,
        values: &[f64],
        change_type: AlertChangeType,
        threshold: Option<f64>,
    ) -> Result<Segmentation, AnalysisError> {
        run_json_tool(
            &self.argv,
            &SegmentRequest {
                values,
                change_type,
                threshold,
            },
        )
    }
}

/// Runs an external program that reads `{"values": [...]}` on stdin and
/// answers with `{"status": "...", "score": n}`.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    argv: Vec<String>,
}

impl CommandClassifier {
    pub fn new(argv: Vec<String>) -> Result<Self, AnalysisError> {
        if argv.is_empty() {
            return Err(AnalysisError::ToolNotConfigured("deviance"));
        }
        Ok(Self { argv })
    }
}

impl DevianceClassifier for CommandClassifier {
    fn classify(&self, values: &[f64]) -> Result<Deviance, AnalysisError> {
        run_json_tool(&self.argv, &DevianceRequest { values })
    }
}

/// Hands the series to an external plotting program without waiting for its
/// result. The program is launched before `plot` returns; feeding its stdin
/// and reaping it happen on a background thread that `flush` (or drop) joins.
#[derive(Debug)]
pub struct CommandPlot {
    argv: Vec<String>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl CommandPlot {
    pub fn new(argv: Vec<String>) -> Result<Self, AnalysisError> {
        if argv.is_empty() {
            return Err(AnalysisError::ToolNotConfigured("plot"));
        }
        Ok(Self {
            argv,
            pending: Mutex::new(Vec::new()),
        })
    }

    fn launch(&self, payload: Vec<u8>, title: &str) -> Result<(), AnalysisError> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(AnalysisError::ToolNotConfigured("plot"));
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| AnalysisError::ToolLaunch {
                tool: tool_name(&self.argv),
                source,
            })?;

        let tool = tool_name(&self.argv);
        let title = title.to_owned();
        let stdin = child.stdin.take();
        let handle = std::thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                if let Err(err) = stdin.write_all(&payload) {
                    tracing::debug!(error = %err, tool = %tool, "plot tool closed stdin early");
                }
            }
            match child.wait_with_output() {
                Ok(output) if output.status.success() => {}
                Ok(output) => tracing::warn!(
                    tool = %tool,
                    title = %title,
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "plot hook failed"
                ),
                Err(err) => {
                    tracing::warn!(error = %err, tool = %tool, title = %title, "plot hook failed")
                }
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|handle| !handle.is_finished());
        pending.push(handle);
        Ok(())
    }
}

impl PlotHook for CommandPlot {
    fn plot(&self, values: &[f64], segments: &SegmentBoundarySet, title: &str) {
        let payload = match serde_json::to_vec(&PlotRequest {
            title,
            values,
            segments: segments.as_slice(),
        }) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, title, "failed to encode plot request");
                return;
            }
        };

        if let Err(err) = self.launch(payload, title) {
            tracing::warn!(error = %err, title, "plot hook failed");
        }
    }

    fn flush(&self) {
        let handles = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!("plot hook thread panicked");
            }
        }
    }
}

impl Drop for CommandPlot {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Default hook: records the boundaries in the log instead of drawing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPlot;

impl PlotHook for LogPlot {
    fn plot(&self, values: &[f64], segments: &SegmentBoundarySet, title: &str) {
        tracing::info!(
            title,
            points = values.len(),
            segments = ?segments.as_slice(),
            "segmented series"
        );
    }
}

fn run_json_tool<Req, Resp>(argv: &[String], request: &Req) -> Result<Resp, AnalysisError>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let payload = serde_json::to_vec(request)?;
    let stdout = run_tool(argv, &payload)?;
    serde_json::from_slice(&stdout).map_err(|source| AnalysisError::ToolOutput {
        tool: tool_name(argv),
        source,
    })
}

fn run_tool(argv: &[String], payload: &[u8]) -> Result<Vec<u8>, AnalysisError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(AnalysisError::ToolNotConfigured("command"));
    };
    let launch_error = |source| AnalysisError::ToolLaunch {
        tool: tool_name(argv),
        source,
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(launch_error)?;

    // Feed stdin from its own thread so a chatty tool cannot block on a full
    // stdout pipe while we are still writing.
    let stdin = child.stdin.take();
    let output = std::thread::scope(|scope| {
        if let Some(mut stdin) = stdin {
            scope.spawn(move || {
                if let Err(err) = stdin.write_all(payload) {
                    tracing::debug!(error = %err, "tool closed stdin early");
                }
            });
        }
        child.wait_with_output()
    })
    .map_err(launch_error)?;

    if !output.status.success() {
        return Err(AnalysisError::ToolFailed {
            tool: tool_name(argv),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }

    Ok(output.stdout)
}

fn tool_name(argv: &[String]) -> String {
    argv.join(" ")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()]
    }

    #[test]
    fn command_segmenter_parses_tool_response() {
        let segmenter = CommandSegmenter::new(sh(
            r#"cat > /dev/null; echo '{"segments":[0,2,4],"diffs":[null,1.5,0.0]}'"#,
        ))
        .expect("segmenter");

        let segmentation = segmenter
            .segment(&[1.0, 1.0, 5.0, 5.0], AlertChangeType::Percentage, Some(2.0))
            .expect("segment");

        assert_eq!(segmentation.boundaries, vec![0, 2, 4]);
        assert_eq!(segmentation.diffs, vec![None, Some(1.5), Some(0.0)]);
    }

    #[test]
    fn command_segmenter_sends_values_and_alert_settings() {
        let segmenter = CommandSegmenter::new(sh(
            r#"input=$(cat); case "$input" in *'"values":[1.0,2.0]'*'"change_type":"absolute"'*'"threshold":null'*) echo '{"segments":[0,2]}';; *) exit 3;; esac"#,
        ))
        .expect("segmenter");

        let segmentation = segmenter
            .segment(&[1.0, 2.0], AlertChangeType::Absolute, None)
            .expect("segment");
        assert_eq!(segmentation.boundaries, vec![0, 2]);
        assert!(segmentation.diffs.is_empty());
    }

    #[test]
    fn command_classifier_parses_status_and_score() {
        let classifier = CommandClassifier::new(sh(
            r#"cat > /dev/null; echo '{"status":"SKEWED","score":2.25}'"#,
        ))
        .expect("classifier");

        let deviance = classifier.classify(&[1.0, 2.0, 3.0]).expect("classify");
        assert_eq!(
            deviance,
            Deviance {
                status: "SKEWED".to_owned(),
                score: 2.25
            }
        );
    }

    #[test]
    fn failing_tool_reports_status_and_stderr() {
        let classifier = CommandClassifier::new(sh("cat > /dev/null; echo boom >&2; exit 4"))
            .expect("classifier");

        let err = classifier.classify(&[1.0]).expect_err("tool failure");
        match err {
            AnalysisError::ToolFailed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn garbage_output_is_a_tool_output_error() {
        let classifier =
            CommandClassifier::new(sh("cat > /dev/null; echo not-json")).expect("classifier");

        let err = classifier.classify(&[1.0]).expect_err("bad output");
        assert!(matches!(err, AnalysisError::ToolOutput { .. }));
    }

    #[test]
    fn command_plot_delivers_payload_before_flush_returns() {
        let temp = tempfile::tempdir().expect("tempdir");
        let target = temp.path().join("plot.json");
        let plot = CommandPlot::new(sh(&format!("cat > '{}'", target.display()))).expect("plot");

        let segments = SegmentBoundarySet::from_indices([2], 4);
        plot.plot(&[1.0, 1.0, 5.0, 5.0], &segments, "NEW 12-talos-tp5");
        plot.flush();

        let raw = std::fs::read_to_string(&target).expect("read plot payload");
        let payload: serde_json::Value = serde_json::from_str(&raw).expect("parse plot payload");
        assert_eq!(payload["title"], "NEW 12-talos-tp5");
        assert_eq!(payload["values"], serde_json::json!([1.0, 1.0, 5.0, 5.0]));
        assert_eq!(payload["segments"], serde_json::json!([0, 2, 4]));
    }

    #[test]
    fn command_plot_is_delivered_when_dropped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let target = temp.path().join("plot.json");
        {
            let plot =
                CommandPlot::new(sh(&format!("sleep 0.2; cat > '{}'", target.display())))
                    .expect("plot");
            plot.plot(&[3.0], &SegmentBoundarySet::from_indices([], 1), "OLD 1");
        }

        let raw = std::fs::read_to_string(&target).expect("read plot payload");
        assert!(raw.contains("\"OLD 1\""));
    }

    #[test]
    fn failing_plot_tools_do_not_propagate() {
        let segments = SegmentBoundarySet::from_indices([], 1);

        let failing = CommandPlot::new(sh("cat > /dev/null; echo nope >&2; exit 2")).expect("plot");
        failing.plot(&[1.0], &segments, "title");
        failing.flush();

        let missing =
            CommandPlot::new(vec!["/nonexistent/perfnoise-plot".to_owned()]).expect("plot");
        missing.plot(&[1.0], &segments, "title");
        missing.flush();
        assert!(missing.pending.lock().expect("pending lock").is_empty());
    }

    #[test]
    fn empty_argv_is_not_configured() {
        assert!(matches!(
            CommandSegmenter::new(Vec::new()),
            Err(AnalysisError::ToolNotConfigured("segmenter"))
        ));
        assert!(matches!(
            CommandPlot::new(Vec::new()),
            Err(AnalysisError::ToolNotConfigured("plot"))
        ));
    }

    #[test]
    fn missing_program_is_a_launch_error() {
        let classifier = CommandClassifier::new(vec!["/nonexistent/perfnoise-tool".to_owned()])
            .expect("classifier");
        assert!(matches!(
            classifier.classify(&[1.0]),
            Err(AnalysisError::ToolLaunch { .. })
        ));
    }
}
