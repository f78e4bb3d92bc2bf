use crate::TableNames;

pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE runs (
  run_id          TEXT PRIMARY KEY,
  started_at      INTEGER NOT NULL,
  finished_at     INTEGER,
  tool_version    TEXT NOT NULL,
  server          TEXT NOT NULL,
  options_json    TEXT NOT NULL,
  imported_count  INTEGER DEFAULT 0,
  skipped_count   INTEGER DEFAULT 0,
  failed_count    INTEGER DEFAULT 0,
  row_count       INTEGER DEFAULT 0,
  outcome         TEXT
);

CREATE TABLE errors (
  error_id        INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id          TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  scope           TEXT NOT NULL,
  code            TEXT NOT NULL,
  message         TEXT NOT NULL,
  at_ms           INTEGER NOT NULL
);

CREATE INDEX idx_errors_run ON errors(run_id);

COMMIT;
"#
;

/// Finding columns in insert order; `finding_id` is assigned by SQLite.
pub const FINDING_COLUMNS: &[&str] = &[
    "plugin_id",
    "cve",
    "cvss",
    "risk",
    "host",
    "protocol",
    "port",
    "name",
    "synopsis",
    "description",
    "solution",
    "see_also",
    "plugin_output",
    "stig_severity",
    "cvss3_base_score",
    "cvss_temporal_score",
    "cvss3_temporal_score",
    "risk_factor",
    "bid",
    "xref",
    "mskb",
    "plugin_publication_date",
    "metasploit",
    "core_impact",
    "canvas",
    "scan_id",
    "scan_name",
    "history_id",
    "history_date",
];

pub fn findings_ddl(tables: &TableNames) -> String {
    let t = tables.findings();
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {t} (
  finding_id              INTEGER PRIMARY KEY AUTOINCREMENT,
  plugin_id               INTEGER NOT NULL,
  cve                     TEXT,
  cvss                    REAL,
  risk                    TEXT NOT NULL CHECK (risk IN ('Critical','High','Medium','Low','None')),
  host                    TEXT NOT NULL,
  protocol                TEXT,
  port                    INTEGER,
  name                    TEXT,
  synopsis                TEXT,
  description             TEXT,
  solution                TEXT,
  see_also                TEXT,
  plugin_output           TEXT,
  stig_severity           TEXT,
  cvss3_base_score        REAL,
  cvss_temporal_score     REAL,
  cvss3_temporal_score    REAL,
  risk_factor             TEXT,
  bid                     TEXT,
  xref                    TEXT,
  mskb                    TEXT,
  plugin_publication_date TEXT,
  metasploit              INTEGER NOT NULL CHECK (metasploit IN (0,1)) DEFAULT 0,
  core_impact             INTEGER NOT NULL CHECK (core_impact IN (0,1)) DEFAULT 0,
  canvas                  INTEGER NOT NULL CHECK (canvas IN (0,1)) DEFAULT 0,
  scan_id                 INTEGER NOT NULL,
  scan_name               TEXT NOT NULL,
  history_id              INTEGER NOT NULL,
  history_date            INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_{t}_plugin_host ON {t}(plugin_id, host);
CREATE INDEX IF NOT EXISTS idx_{t}_history ON {t}(history_id);
"#
    )
}

pub fn ledger_ddl(tables: &TableNames) -> String {
    let t = tables.ledger();
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {t} (
  history_id   INTEGER PRIMARY KEY,
  scan_id      INTEGER NOT NULL,
  ingested_at  INTEGER NOT NULL,
  row_count    INTEGER NOT NULL
);
"#
    )
}

pub fn insert_finding_sql(tables: &TableNames) -> String {
    let placeholders = vec!["?"; FINDING_COLUMNS.len()].join(",");
    format!(
        "INSERT INTO {}({}) VALUES ({})",
        tables.findings(),
        FINDING_COLUMNS.join(","),
        placeholders
    )
}
