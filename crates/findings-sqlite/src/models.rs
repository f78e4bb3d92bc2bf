use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vulnsync_core::Risk;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: Uuid,
    pub started_at: i64,
    pub tool_version: String,
    pub server: String,
    pub options_json: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub imported: i64,
    pub skipped: i64,
    pub failed: i64,
    pub rows: i64,
}

/// Names of the findings table and the ledger table. Validated as plain SQL
/// identifiers because they are spliced into statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    findings: String,
    ledger: String,
}

pub const DEFAULT_FINDINGS_TABLE: &str = "vulnerabilities";
pub const DEFAULT_LEDGER_TABLE: &str = "history";

impl TableNames {
    pub fn new(findings: impl Into<String>, ledger: impl Into<String>) -> Result<Self> {
        let findings = findings.into();
        let ledger = ledger.into();
        for name in [&findings, &ledger] {
            if !is_identifier(name) {
                bail!("invalid table name {name:?}: use letters, digits and underscores");
            }
        }
        if findings.eq_ignore_ascii_case(&ledger) {
            bail!("findings and ledger tables must differ (both {findings:?})");
        }
        for reserved in ["runs", "errors"] {
            if findings.eq_ignore_ascii_case(reserved) || ledger.eq_ignore_ascii_case(reserved) {
                bail!("table name {reserved:?} is reserved for run bookkeeping");
            }
        }
        Ok(TableNames { findings, ledger })
    }

    pub fn findings(&self) -> &str {
        &self.findings
    }

    pub fn ledger(&self) -> &str {
        &self.ledger
    }
}

impl Default for TableNames {
    fn default() -> Self {
        TableNames { findings: DEFAULT_FINDINGS_TABLE.into(), ledger: DEFAULT_LEDGER_TABLE.into() }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// One vulnerability on one host, as seen in one ingested history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub plugin_id: i64,
    pub cve: Option<String>,
    pub cvss: Option<f64>,
    pub risk: Risk,
    pub host: String,
    pub protocol: Option<String>,
    pub port: Option<i64>,
    pub name: Option<String>,
    pub synopsis: Option<String>,
    pub description: Option<String>,
    pub solution: Option<String>,
    pub see_also: Option<String>,
    pub plugin_output: Option<String>,
    pub stig_severity: Option<String>,
    pub cvss3_base_score: Option<f64>,
    pub cvss_temporal_score: Option<f64>,
    pub cvss3_temporal_score: Option<f64>,
    pub risk_factor: Option<String>,
    pub bid: Option<String>,
    pub xref: Option<String>,
    pub mskb: Option<String>,
    pub plugin_publication_date: Option<String>,
    pub metasploit: bool,
    pub core_impact: bool,
    pub canvas: bool,
    pub scan_id: i64,
    pub scan_name: String,
    pub history_id: i64,
    /// Unix seconds of the history entry this row came from.
    pub history_date: i64,
}

impl Finding {
    pub fn new(plugin_id: i64, host: impl Into<String>, risk: Risk) -> Self {
        Finding {
            plugin_id,
            cve: None,
            cvss: None,
            risk,
            host: host.into(),
            protocol: None,
            port: None,
            name: None,
            synopsis: None,
            description: None,
            solution: None,
            see_also: None,
            plugin_output: None,
            stig_severity: None,
            cvss3_base_score: None,
            cvss_temporal_score: None,
            cvss3_temporal_score: None,
            risk_factor: None,
            bid: None,
            xref: None,
            mskb: None,
            plugin_publication_date: None,
            metasploit: false,
            core_impact: false,
            canvas: false,
            scan_id: 0,
            scan_name: String::new(),
            history_id: 0,
            history_date: 0,
        }
    }

    /// Known to be exploitable with at least one public framework.
    pub fn exploitable(&self) -> bool {
        self.metasploit || self.core_impact || self.canvas
    }

    /// CVSS v3 base score, falling back to v2.
    pub fn score(&self) -> Option<f64> {
        self.cvss3_base_score.or(self.cvss)
    }
}

/// Ledger row: this history's findings are durably stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub history_id: i64,
    pub scan_id: i64,
    pub ingested_at: i64,
}
