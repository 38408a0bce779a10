use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PERFNOISE_DIR_NAME: &str = ".perfnoise";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_LOCAL_DB: &str = "summary.sqlite";
pub const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_UPDATE_LIMIT: usize = 100;
pub const DEFAULT_RETENTION_DAYS: u32 = 3;
pub const DEFAULT_WINDOW_MONTHS: u32 = 3;
pub const DEFAULT_TRIM: usize = 3;
pub const DEFAULT_REFRESH_WORKERS: usize = 3;
pub const DEFAULT_REPORT_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PerfnoiseConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Selection expression forwarded to the remote discovery query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
    #[serde(default = "default_source_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            selection: None,
            timeout_secs: default_source_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_local_db")]
    pub local_db: String,
    #[serde(default = "default_update_limit")]
    pub limit: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_window_months")]
    pub window_months: u32,
    #[serde(default = "default_trim")]
    pub trim: usize,
    #[serde(default = "default_refresh_workers")]
    pub workers: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            local_db: default_local_db(),
            limit: default_update_limit(),
            retention_days: default_retention_days(),
            window_months: default_window_months(),
            trim: default_trim(),
            workers: default_refresh_workers(),
        }
    }
}

/// External programs standing in for the segmentation, deviance and plot
/// functions. Each entry is an argv array; the first element is the program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmenter: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deviance: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn perfnoise_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(PERFNOISE_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    perfnoise_dir(workspace_root).join(CONFIG_FILE_NAME)
}

/// Resolves `analysis.local_db` against the `.perfnoise` directory unless it
/// is already absolute.
pub fn local_db_path(workspace_root: impl AsRef<Path>, config: &PerfnoiseConfig) -> PathBuf {
    let configured = Path::new(config.analysis.local_db.as_str());
    if configured.is_absolute() {
        return configured.to_path_buf();
    }
    perfnoise_dir(workspace_root).join(configured)
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<PerfnoiseConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(PerfnoiseConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: PerfnoiseConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<PerfnoiseConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(perfnoise_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = PerfnoiseConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

pub fn validate_config(config: &PerfnoiseConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.source.endpoint.is_none() {
        warnings.push(ConfigWarning {
            code: "source_endpoint_missing",
            message: "source.endpoint is not set; signals cannot be fetched".to_owned(),
        });
    }
    if config.source.selection.is_none() {
        warnings.push(ConfigWarning {
            code: "source_selection_missing",
            message: "source.selection is not set; candidate discovery will select nothing"
                .to_owned(),
        });
    }
    if config.tools.segmenter.is_none() {
        warnings.push(ConfigWarning {
            code: "segmenter_missing",
            message: "tools.segmenter is not set; signals cannot be segmented".to_owned(),
        });
    }
    if config.tools.deviance.is_none() {
        warnings.push(ConfigWarning {
            code: "deviance_missing",
            message: "tools.deviance is not set; signals cannot be scored".to_owned(),
        });
    }
    if config.analysis.workers != DEFAULT_REFRESH_WORKERS {
        warnings.push(ConfigWarning {
            code: "workers_non_default",
            message: format!(
                "analysis.workers = {} differs from the default of {DEFAULT_REFRESH_WORKERS}; the remote source may see more load",
                config.analysis.workers
            ),
        });
    }

    warnings
}

fn default_local_db() -> String {
    DEFAULT_LOCAL_DB.to_owned()
}

fn default_source_timeout_secs() -> u64 {
    DEFAULT_SOURCE_TIMEOUT_SECS
}

fn default_update_limit() -> usize {
    DEFAULT_UPDATE_LIMIT
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_window_months() -> u32 {
    DEFAULT_WINDOW_MONTHS
}

fn default_trim() -> usize {
    DEFAULT_TRIM
}

fn default_refresh_workers() -> usize {
    DEFAULT_REFRESH_WORKERS
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_command(input: Option<Vec<String>>) -> Option<Vec<String>> {
    input
        .map(|argv| {
            argv.into_iter()
                .map(|arg| arg.trim().to_owned())
                .filter(|arg| !arg.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|argv| !argv.is_empty())
}

fn normalize_config(mut config: PerfnoiseConfig) -> PerfnoiseConfig {
    config.source.endpoint = normalize_optional(config.source.endpoint.take())
        .map(|endpoint| endpoint.trim_end_matches('/').to_owned());
    config.source.selection = normalize_optional(config.source.selection.take());
    config.source.timeout_secs = config.source.timeout_secs.max(1);

    let local_db = config.analysis.local_db.trim();
    if local_db.is_empty() {
        config.analysis.local_db = default_local_db();
    } else {
        config.analysis.local_db = local_db.to_owned();
    }
    config.analysis.limit = config.analysis.limit.max(1);
    config.analysis.window_months = config.analysis.window_months.max(1);
    config.analysis.workers = config.analysis.workers.max(1);

    config.tools.segmenter = normalize_command(config.tools.segmenter.take());
    config.tools.deviance = normalize_command(config.tools.deviance.take());
    config.tools.plot = normalize_command(config.tools.plot.take());

    config
}
