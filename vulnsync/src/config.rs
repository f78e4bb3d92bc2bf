use anyhow::{bail, Context, Result};
use findings_sqlite::TableNames;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG: &str = "vulnsync.yaml";
pub const DEFAULT_DATABASE: &str = "vulnsync.sqlite";

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ScannerConfig {
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_tls: Option<bool>,
    pub retry_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ExcludeConfig {
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub scans: Vec<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct TablesConfig {
    pub findings: Option<String>,
    pub history: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct StagingConfig {
    pub dir: Option<PathBuf>,
    pub remove_files: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct ExportConfig {
    pub status_interval_secs: Option<u64>,
    pub status_max: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub exclude: ExcludeConfig,
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub export: ExportConfig,
    pub database: Option<PathBuf>,
}

impl Config {
    pub fn table_names(&self) -> Result<TableNames> {
        let findings = self.tables.findings.as_deref().unwrap_or(findings_sqlite::DEFAULT_FINDINGS_TABLE);
        let ledger = self.tables.history.as_deref().unwrap_or(findings_sqlite::DEFAULT_LEDGER_TABLE);
        TableNames::new(findings, ledger).context("invalid tables section")
    }

    pub fn database(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.database.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE))
    }
}

/// Loads `path`, or `./vulnsync.yaml` when no path is given and it exists.
/// A missing default file yields an empty config.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if p.exists() { p.to_path_buf() } else { return Ok(Config::default()); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&s).with_context(|| format!("invalid config {}", path.display()))
}

pub fn parse_config(s: &str) -> Result<Config> {
    if s.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = serde_yaml::from_str(s)?;
    if cfg.scanner.retry_attempts == Some(0) {
        bail!("scanner.retry_attempts must be at least 1");
    }
    if cfg.export.status_max == Some(0) {
        bail!("export.status_max must be at least 1");
    }
    Ok(cfg)
}
