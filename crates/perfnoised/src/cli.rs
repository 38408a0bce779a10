use std::ffi::OsStr;
use std::path::PathBuf;

use clap::Parser;
use perfnoise_core::{SignatureId, parse_signature_id};

use crate::logging::LogFormat;
use crate::orchestrator::RunRequest;
use crate::report::OutputFormat;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Performance signal noise and missed-alert scanner")]
pub struct Cli {
    #[arg(
        long,
        default_value = ".",
        help = "Workspace root holding .perfnoise/config.toml"
    )]
    pub workspace: PathBuf,

    #[arg(
        long = "id",
        visible_aliases = ["ids", "key", "keys"],
        num_args = 0..,
        value_parser = parse_id,
        help = "Process only these signatures and exit; a bare flag means a normal scan"
    )]
    pub ids: Vec<SignatureId>,

    #[arg(
        long,
        help = "Skip the local update and report from what is already cached"
    )]
    pub now: bool,

    #[arg(
        long = "deviant",
        visible_aliases = ["dev", "deviance"],
        num_args = 0..=1,
        default_missing_value = DEFAULT_REPORT_COUNT_ARG,
        help = "Show the top N signals whose segmentation disagrees with alerts"
    )]
    pub deviant: Option<usize>,

    #[arg(
        long = "noise",
        visible_alias = "noisy",
        num_args = 0..=1,
        default_missing_value = DEFAULT_REPORT_COUNT_ARG,
        help = "Show the top N noisiest signals"
    )]
    pub noise: Option<usize>,

    #[arg(
        long = "missing",
        visible_alias = "missing-alerts",
        num_args = 0..=1,
        default_missing_value = DEFAULT_REPORT_COUNT_ARG,
        help = "Show the top N signals with missing alerts"
    )]
    pub missing: Option<usize>,

    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Report format: table or json"
    )]
    pub output: OutputFormat,

    #[arg(
        long,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[arg(long, help = "Log at debug level unless RUST_LOG is set")]
    pub verbose: bool,
}

const DEFAULT_REPORT_COUNT_ARG: &str = "10";

impl Cli {
    /// A report count of 0 means the report was not requested.
    pub fn run_request(&self) -> RunRequest {
        let requested = |count: Option<usize>| count.filter(|count| *count > 0);
        RunRequest {
            ids: self.ids.clone(),
            skip_refresh: self.now,
            deviant: requested(self.deviant),
            noise: requested(self.noise),
            missing: requested(self.missing),
        }
    }
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_id(value: &str) -> Result<SignatureId, String> {
    parse_signature_id(value).map_err(|err| err.to_string())
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse()
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}
