use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use findings_sqlite::{Db, FindingFilter, TrendMode};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use vulnsync_core::Risk;

mod config;
mod logging;
mod report;

use report::OutputArgs;

fn parse_risk(s: &str) -> Result<Risk, String> {
    Risk::from_label(s).ok_or_else(|| format!("unknown risk {s:?} (critical, high, medium, low, none)"))
}

#[derive(Debug, Parser)]
#[command(name = "vulnsync", version, about = "Incremental loader and reports for vulnerability scanner results")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./vulnsync.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database file (overrides `database` in the config)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Load every completed scan history not yet in the database
    #[cfg(feature = "ingest")]
    Ingest {
        /// Scanner base URL, e.g. https://nessus:8834
        #[arg(long, env = "VULNSYNC_SERVER")]
        server: Option<String>,
        #[arg(long, env = "VULNSYNC_USERNAME")]
        username: Option<String>,
        #[arg(long, env = "VULNSYNC_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Verify the scanner's TLS certificate
        #[arg(long, default_value_t = false)]
        verify_tls: bool,
        /// Folder to skip (repeatable, added to the config list)
        #[arg(long = "exclude-folder", value_name = "NAME")]
        exclude_folders: Vec<String>,
        /// Scan to skip (repeatable, added to the config list)
        #[arg(long = "exclude-scan", value_name = "NAME")]
        exclude_scans: Vec<String>,
        /// Where exports are downloaded
        #[arg(long, value_name = "DIR")]
        staging_dir: Option<PathBuf>,
        /// Delete each export once loaded
        #[arg(long, default_value_t = false)]
        remove_files: bool,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Findings from the latest history of every scan
    Snapshot {
        /// Minimum CVSS (v3 base score, v2 when v3 is missing)
        #[arg(long)]
        cvss_min: Option<f64>,
        /// Risk categories to keep (repeatable)
        #[arg(long, value_parser = parse_risk)]
        risk: Vec<Risk>,
        /// Only findings from histories at most this many days old
        #[arg(long)]
        max_age_days: Option<i64>,
        /// Only findings with a public exploit framework module
        #[arg(long, default_value_t = false)]
        exploitable: bool,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Weekly finding counts per risk category
    Trend {
        /// Count distinct (plugin, host) pairs instead of rows
        #[arg(long, default_value_t = false)]
        distinct: bool,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Missing Microsoft patches in the latest snapshot, one row per KB
    Patches {
        #[command(flatten)]
        output: OutputArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet);
    let cfg = config::load_config(cli.config.as_deref())?;
    let db_path = cfg.database(cli.db.as_deref());
    let tables = cfg.table_names()?;

    match cli.command {
        Commands::Version => {
            println!("vulnsync {} (core {})", env!("CARGO_PKG_VERSION"), vulnsync_core::version());
        }
        #[cfg(feature = "ingest")]
        Commands::Ingest {
            server,
            username,
            password,
            verify_tls,
            exclude_folders,
            exclude_scans,
            staging_dir,
            remove_files,
            output,
        } => {
            let overrides = ingest_cmd::Overrides {
                server,
                username,
                password,
                verify_tls,
                exclude_folders,
                exclude_scans,
                staging_dir,
                remove_files,
            };
            let batch = ingest_cmd::batch_config(&cfg, tables, overrides)?;
            let mut db = Db::open_or_create(&db_path)
                .with_context(|| format!("failed to open database {}", db_path.display()))?;
            let summary = ingest::run_batch(&mut db, &batch)?;
            let mut w = output.writer()?;
            ingest_cmd::write_summary(&mut *w, &summary, &output)?;
        }
        Commands::Snapshot { cvss_min, risk, max_age_days, exploitable, output } => {
            let db = open_existing(&db_path)?;
            let mut filter = FindingFilter::default().exploitable_only(exploitable);
            if let Some(min) = cvss_min {
                filter = filter.cvss_min(min);
            }
            if !risk.is_empty() {
                filter = filter.risks(risk);
            }
            if let Some(days) = max_age_days {
                filter = filter.max_age_days(days);
            }
            let rows = db.filter(&tables, &filter, OffsetDateTime::now_utc().unix_timestamp())?;
            let mut w = output.writer()?;
            report::write_findings(&mut *w, &rows, &output)?;
        }
        Commands::Trend { distinct, output } => {
            let db = open_existing(&db_path)?;
            let mode = if distinct { TrendMode::DistinctPlugins } else { TrendMode::Findings };
            let series = db.trend(&tables, mode)?;
            let mut w = output.writer()?;
            report::write_trend(&mut *w, &series, &output)?;
        }
        Commands::Patches { output } => {
            let db = open_existing(&db_path)?;
            let rows = db.kb_exposure(&tables)?;
            let mut w = output.writer()?;
            report::write_kbs(&mut *w, &rows, &output)?;
        }
    }
    Ok(())
}

/// Reports never create a database.
fn open_existing(path: &Path) -> Result<Db> {
    if !path.exists() {
        bail!("database {} does not exist; run `vulnsync ingest` first", path.display());
    }
    Db::open_or_create(path).with_context(|| format!("failed to open database {}", path.display()))
}

#[cfg(feature = "ingest")]
mod ingest_cmd {
    use crate::config::Config;
    use crate::report::{OutputArgs, OutputFormat};
    use anyhow::{Context, Result};
    use findings_sqlite::TableNames;
    use ingest::{BatchConfig, BatchSummary, Staging};
    use scanner_api::{Credentials, Exclusions, ExportOptions};
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    pub struct Overrides {
        pub server: Option<String>,
        pub username: Option<String>,
        pub password: Option<String>,
        pub verify_tls: bool,
        pub exclude_folders: Vec<String>,
        pub exclude_scans: Vec<String>,
        pub staging_dir: Option<PathBuf>,
        pub remove_files: bool,
    }

    /// Flags win over the file; exclusion lists are merged.
    pub fn batch_config(cfg: &Config, tables: TableNames, o: Overrides) -> Result<BatchConfig> {
        let s = &cfg.scanner;
        let server = o.server.or_else(|| s.server.clone()).context("no scanner server: set scanner.server or --server")?;
        let username =
            o.username.or_else(|| s.username.clone()).context("no username: set scanner.username or --username")?;
        let password = o
            .password
            .or_else(|| s.password.clone())
            .context("no password: set scanner.password or VULNSYNC_PASSWORD")?;

        let mut batch = BatchConfig::new(server, Credentials { username, password });
        batch.verify_tls = o.verify_tls || s.verify_tls.unwrap_or(false);
        if let Some(n) = s.retry_attempts {
            batch.retry_attempts = n;
        }
        batch.exclusions = Exclusions::new(
            cfg.exclude.folders.iter().cloned().chain(o.exclude_folders),
            cfg.exclude.scans.iter().cloned().chain(o.exclude_scans),
        );
        batch.tables = tables;
        let defaults = Staging::default();
        batch.staging = Staging {
            dir: o.staging_dir.or_else(|| cfg.staging.dir.clone()).unwrap_or(defaults.dir),
            remove_files: o.remove_files || cfg.staging.remove_files.unwrap_or(defaults.remove_files),
        };
        let export = ExportOptions::default();
        batch.export = ExportOptions {
            status_interval: cfg.export.status_interval_secs.map(Duration::from_secs).unwrap_or(export.status_interval),
            status_max: cfg.export.status_max.unwrap_or(export.status_max),
        };
        Ok(batch)
    }

    pub fn write_summary(w: &mut dyn Write, summary: &BatchSummary, out: &OutputArgs) -> Result<()> {
        match out.format {
            OutputFormat::Text => {
                writeln!(
                    w,
                    "run {}: {} imported, {} skipped, {} failed, {} rows",
                    summary.run_id, summary.imported, summary.skipped, summary.failed, summary.rows
                )?;
                for f in &summary.failures {
                    writeln!(w, "  {}: [{}] {}", f.scope, f.code, f.message)?;
                }
            }
            _ => writeln!(w, "{}", serde_json::to_string(summary)?)?,
        }
        w.flush()?;
        Ok(())
    }

}
