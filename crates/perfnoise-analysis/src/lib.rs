mod aggregate;
mod error;
mod external;
mod pipeline;
mod reconcile;
mod scoring;

pub use aggregate::{AggregatedPushes, aggregate_pushes, median, window_cutoff};
pub use error::AnalysisError;
pub use external::{
    CommandClassifier, CommandPlot, CommandSegmenter, Deviance, DevianceClassifier, LogPlot,
    PlotHook, Segmentation, Segmenter,
};
pub use pipeline::SignalPipeline;
pub use reconcile::{Reconciliation, SegmentReconciler, historical_segments, max_novel_diff};
pub use scoring::{NoiseDevianceScorer, Scores, relative_noise, trim_extremes};
