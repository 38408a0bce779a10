use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use perfnoise_analysis::SignalPipeline;
use perfnoise_config::{config_path, ensure_workspace_config, local_db_path, validate_config};
use perfnoise_source::HttpSignalSource;
use perfnoise_store::SqliteSummaryCache;
use perfnoised::cli::{Cli, parse_cli};
use perfnoised::logging::init_logging;
use perfnoised::orchestrator::{RunContext, run};
use perfnoised::report::write_outcome;

fn main() -> ExitCode {
    let cli = parse_cli();
    init_logging(cli.log_format, cli.verbose);

    let code = match run_scan(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "problem with perf scan");
            ExitCode::FAILURE
        }
    };
    let _ = std::io::stdout().flush();
    code
}

fn run_scan(cli: &Cli) -> Result<()> {
    let workspace = cli.workspace.canonicalize().with_context(|| {
        format!(
            "failed to resolve workspace path {}",
            cli.workspace.display()
        )
    })?;

    let config = ensure_workspace_config(&workspace).with_context(|| {
        format!(
            "failed to load or create workspace config at {}",
            config_path(&workspace).display()
        )
    })?;
    for warning in validate_config(&config) {
        tracing::warn!(code = warning.code, "{}", warning.message);
    }

    let db_path = local_db_path(&workspace, &config);
    let cache = SqliteSummaryCache::open(&db_path)
        .with_context(|| format!("failed to open summary cache at {}", db_path.display()))?;
    let source = HttpSignalSource::from_config(&config.source)
        .context("failed to initialize signal source")?;
    let pipeline = SignalPipeline::from_config(&config, Arc::new(source), Arc::new(cache))
        .context("failed to initialize analysis tools")?;

    let context = RunContext {
        config: &config,
        pipeline: &pipeline,
    };
    let outcome = run(&context, &cli.run_request());
    pipeline.flush_plots();
    let outcome = outcome?;

    if let Some(refresh) = &outcome.refresh {
        tracing::info!(
            candidates = refresh.candidates,
            needs_update = refresh.needs_update,
            refreshed = refresh.refreshed,
            failed = refresh.failed,
            "local update finished"
        );
    }

    let mut out = std::io::stdout().lock();
    write_outcome(&outcome, cli.output, &mut out).context("failed to write report")?;
    Ok(())
}
