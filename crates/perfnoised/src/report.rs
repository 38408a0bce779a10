use std::io::Write;

use perfnoise_core::SummaryRecord;
use serde::Serialize;

use crate::orchestrator::RunOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid output format '{other}', expected one of: table, json"
            )),
        }
    }
}

pub fn write_outcome(
    outcome: &RunOutcome,
    format: OutputFormat,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    match format {
        OutputFormat::Table => {
            if !outcome.direct.is_empty() {
                write_summary_table(&outcome.direct, out)?;
            }
            for report in &outcome.reports {
                writeln!(out, "# {}", report.kind)?;
                write_summary_table(&report.records, out)?;
            }
        }
        OutputFormat::Json => {
            if !outcome.direct.is_empty() {
                write_json_line("ids", &outcome.direct, out)?;
            }
            for report in &outcome.reports {
                write_json_line(report.kind.as_str(), &report.records, out)?;
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct ReportLine<'a> {
    report: &'a str,
    records: &'a [SummaryRecord],
}

fn write_json_line(
    report: &str,
    records: &[SummaryRecord],
    out: &mut dyn Write,
) -> std::io::Result<()> {
    serde_json::to_writer(&mut *out, &ReportLine { report, records })?;
    writeln!(out)
}

pub fn write_summary_table(records: &[SummaryRecord], out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        out,
        "id\ttitle\tnum_pushes\tis_diff\tmax_diff\trelative_noise\tdev_status\tdev_score"
    )?;

    for record in records {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            record.id,
            normalize_table_field(&record.title),
            record.num_pushes,
            record.is_diff,
            format_optional(record.max_diff),
            format_optional(record.relative_noise),
            record
                .dev_status
                .as_deref()
                .map(normalize_table_field)
                .unwrap_or_else(|| "-".to_owned()),
            format_optional(record.dev_score),
        )?;
    }

    Ok(())
}

fn format_optional(value: Option<f64>) -> String {
    value
        .map(|value| format!("{value:.4}"))
        .unwrap_or_else(|| "-".to_owned())
}

fn normalize_table_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
