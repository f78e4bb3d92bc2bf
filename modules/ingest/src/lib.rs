//! Incremental loader: walks the scanner catalog, exports every completed
//! history not yet in the ledger, and appends its findings to the store.
//!
//! Each history is committed on its own, so an interrupted run leaves a
//! consistent database and the next run resumes where this one stopped.

mod staging;
pub mod transform;

pub use staging::{scan_date, Staging, DEFAULT_STAGING_DIR};

use findings_sqlite::{Db, LedgerEntry, RunCounts, RunMeta, TableNames};
use log::{debug, info, warn};
use scanner_api::{
    Catalog, Credentials, Exclusions, ExportOptions, ExportPoller, HttpTransport, RetryClient, Session,
    WalkFailure, WorkItem, DEFAULT_RETRY_ATTEMPTS,
};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;
use vulnsync_core::{SyncError, SyncResult};

/// Everything one batch run needs.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub server: String,
    pub credentials: Credentials,
    pub verify_tls: bool,
    pub retry_attempts: u32,
    pub exclusions: Exclusions,
    pub tables: TableNames,
    pub staging: Staging,
    pub export: ExportOptions,
}

impl BatchConfig {
    pub fn new(server: impl Into<String>, credentials: Credentials) -> Self {
        BatchConfig {
            server: server.into(),
            credentials,
            verify_tls: false,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            exclusions: Exclusions::default(),
            tables: TableNames::default(),
            staging: Staging::default(),
            export: ExportOptions::default(),
        }
    }

    /// Settings recorded with the run. Never includes credentials.
    fn options_json(&self) -> String {
        let mut folders: Vec<_> = self.exclusions.folders.iter().cloned().collect();
        let mut scans: Vec<_> = self.exclusions.scans.iter().cloned().collect();
        folders.sort();
        scans.sort();
        serde_json::json!({
            "username": self.credentials.username,
            "verify_tls": self.verify_tls,
            "retry_attempts": self.retry_attempts,
            "exclude_folders": folders,
            "exclude_scans": scans,
            "findings_table": self.tables.findings(),
            "ledger_table": self.tables.ledger(),
            "staging_dir": self.staging.dir.display().to_string(),
            "remove_files": self.staging.remove_files,
            "status_interval_ms": u64::try_from(self.export.status_interval.as_millis()).unwrap_or(u64::MAX),
            "status_max": self.export.status_max,
        })
        .to_string()
    }
}

/// A history, scan or folder that could not be loaded this run. Nothing
/// under it reaches the ledger, so the next run tries it again.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    /// Same string as the `errors` row, e.g. `scan=3 history=12`.
    pub scope: String,
    pub scan_id: Option<i64>,
    pub history_id: Option<i64>,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub imported: i64,
    pub skipped: i64,
    pub failed: i64,
    pub rows: i64,
    pub failures: Vec<ItemFailure>,
}

/// Connects to the scanner described by `cfg` and runs one batch.
pub fn run_batch(db: &mut Db, cfg: &BatchConfig) -> SyncResult<BatchSummary> {
    if !cfg.verify_tls {
        warn!("TLS certificate verification is disabled for {}", cfg.server);
    }
    let transport = Arc::new(HttpTransport::new(cfg.verify_tls)?);
    let session = Arc::new(Session::new(cfg.server.clone(), cfg.credentials.clone()));
    let client = RetryClient::new(transport, session).with_attempts(cfg.retry_attempts);
    run_with_client(&client, db, cfg)
}

/// Runs one batch over an existing client. Per-history failures are recorded
/// and skipped; authentication, network and configuration failures abort the
/// run after bookkeeping is closed out.
pub fn run_with_client(client: &RetryClient, db: &mut Db, cfg: &BatchConfig) -> SyncResult<BatchSummary> {
    db.ensure_tables(&cfg.tables).map_err(store_err(None))?;
    let ledger = db.load_ledger(&cfg.tables).map_err(store_err(None))?;
    let meta = RunMeta {
        run_id: Uuid::now_v7(),
        started_at: now_secs(),
        tool_version: vulnsync_core::version().to_string(),
        server: client.session().server().to_string(),
        options_json: cfg.options_json(),
    };
    let run_id = db.begin_run(&meta).map_err(store_err(None))?;
    info!("run {run_id}: {} histories already loaded", ledger.len());

    let mut loader = Loader { client, db, cfg, run_id, ledger, counts: RunCounts::default(), failures: Vec::new() };
    let result = loader.run();
    let outcome = if result.is_ok() { "completed" } else { "aborted" };
    let closed = loader.db.finish_run(&run_id, now_secs(), &loader.counts, outcome);

    if let Err(e) = client.logout() {
        warn!("logout failed: {e}");
    }

    result?;
    closed.map_err(store_err(None))?;
    let c = loader.counts;
    info!(
        "run {run_id} finished: {} imported, {} skipped, {} failed, {} rows",
        c.imported, c.skipped, c.failed, c.rows
    );
    Ok(BatchSummary {
        run_id,
        imported: c.imported,
        skipped: c.skipped,
        failed: c.failed,
        rows: c.rows,
        failures: loader.failures,
    })
}

struct Loader<'a> {
    client: &'a RetryClient,
    db: &'a mut Db,
    cfg: &'a BatchConfig,
    run_id: Uuid,
    ledger: HashSet<i64>,
    counts: RunCounts,
    failures: Vec<ItemFailure>,
}

impl Loader<'_> {
    fn run(&mut self) -> SyncResult<()> {
        let walk = match Catalog::new(self.client).walk(&self.cfg.exclusions) {
            Ok(walk) => walk,
            Err(e) => {
                warn!("catalog walk failed: {e}");
                self.log_error("catalog", &e);
                return Err(e);
            }
        };
        for failure in &walk.failures {
            self.record_walk_failure(failure);
        }
        debug!("{} candidate histories", walk.items.len());
        for item in walk.items {
            let h = &item.history;
            let date = scan_date(h.creation_date).unwrap_or_else(|_| h.creation_date.to_string());
            info!("    {} - {date}", h.history_id);
            if self.ledger.contains(&h.history_id) {
                info!("      skipping, already loaded");
                self.counts.skipped += 1;
                continue;
            }
            match self.load(&item) {
                Ok(rows) => {
                    info!("      loaded {rows} findings");
                    self.ledger.insert(h.history_id);
                    self.counts.imported += 1;
                    self.counts.rows += i64::try_from(rows).unwrap_or(i64::MAX);
                }
                Err(e) => {
                    self.record_failure(&item, &e);
                    if e.is_fatal() {
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    fn load(&mut self, item: &WorkItem) -> SyncResult<usize> {
        let h = &item.history;
        let dest = self.cfg.staging.path_for(h)?;
        let path = ExportPoller::new(self.client, self.cfg.export.clone()).export(h.scan_id, h.history_id, &dest)?;
        let findings = transform::read_findings(&path, h)?;
        let entry = LedgerEntry { history_id: h.history_id, scan_id: h.scan_id, ingested_at: now_secs() };
        let rows = self
            .db
            .append_history(&self.cfg.tables, &entry, &findings)
            .map_err(store_err(Some(h.history_id)))?;
        if self.cfg.staging.remove_files {
            if let Err(e) = fs::remove_file(&path) {
                warn!("could not remove {}: {e}", path.display());
            }
        }
        Ok(rows)
    }

    fn record_failure(&mut self, item: &WorkItem, err: &SyncError) {
        let h = &item.history;
        warn!("      scan {} history {} failed: {err}", h.scan_id, h.history_id);
        self.counts.failed += 1;
        let mut scope = format!("scan={} history={}", h.scan_id, h.history_id);
        if let SyncError::ExportTimeout { file_id, .. } = err {
            scope.push_str(&format!(" file={file_id}"));
        }
        self.log_error(&scope, err);
        self.failures.push(ItemFailure {
            scope,
            scan_id: Some(h.scan_id),
            history_id: Some(h.history_id),
            code: err.code(),
            message: err.to_string(),
        });
    }

    /// A folder or scan whose listing failed; its histories were never seen.
    fn record_walk_failure(&mut self, failure: &WalkFailure) {
        let scope = failure.scope();
        self.counts.failed += 1;
        self.log_error(&scope, &failure.error);
        self.failures.push(ItemFailure {
            scope,
            scan_id: failure.scan.as_ref().map(|s| s.id),
            history_id: None,
            code: failure.error.code(),
            message: failure.error.to_string(),
        });
    }

    fn log_error(&self, scope: &str, err: &SyncError) {
        if let Err(e) = self.db.add_error(&self.run_id, scope, err.code(), &err.to_string(), now_millis()) {
            warn!("could not record error for {scope}: {e:#}");
        }
    }
}

fn store_err(history_id: Option<i64>) -> impl Fn(anyhow::Error) -> SyncError {
    move |e| SyncError::persistence(history_id, format!("{e:#}"))
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX)).unwrap_or(0)
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX)).unwrap_or(0)
}
