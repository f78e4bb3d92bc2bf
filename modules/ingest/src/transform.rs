//! Export file → typed finding rows.

use findings_sqlite::Finding;
use log::debug;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use vulnsync_core::{HistoryEntry, Risk, SyncError, SyncResult};

/// One CSV row as the scanner writes it. Column names moved between scanner
/// versions, hence the aliases; unparseable numbers become null.
#[derive(Debug, Deserialize)]
struct ExportRow {
    #[serde(rename = "Plugin ID")]
    plugin_id: i64,
    #[serde(rename = "CVE", default)]
    cve: Option<String>,
    #[serde(rename = "CVSS", alias = "CVSS v2.0 Base Score", default, deserialize_with = "csv::invalid_option")]
    cvss: Option<f64>,
    #[serde(rename = "Risk", default)]
    risk: Option<String>,
    #[serde(rename = "Host")]
    host: String,
    #[serde(rename = "Protocol", default)]
    protocol: Option<String>,
    #[serde(rename = "Port", default, deserialize_with = "csv::invalid_option")]
    port: Option<i64>,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Synopsis", default)]
    synopsis: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<String>,
    #[serde(rename = "Solution", default)]
    solution: Option<String>,
    #[serde(rename = "See Also", default)]
    see_also: Option<String>,
    #[serde(rename = "Plugin Output", default)]
    plugin_output: Option<String>,
    #[serde(rename = "STIG Severity", default)]
    stig_severity: Option<String>,
    #[serde(rename = "CVSS v3.0 Base Score", default, deserialize_with = "csv::invalid_option")]
    cvss3_base_score: Option<f64>,
    #[serde(
        rename = "CVSS Temporal Score",
        alias = "CVSS v2.0 Temporal Score",
        default,
        deserialize_with = "csv::invalid_option"
    )]
    cvss_temporal_score: Option<f64>,
    #[serde(rename = "CVSS v3.0 Temporal Score", default, deserialize_with = "csv::invalid_option")]
    cvss3_temporal_score: Option<f64>,
    #[serde(rename = "Risk Factor", default)]
    risk_factor: Option<String>,
    #[serde(rename = "BID", default)]
    bid: Option<String>,
    #[serde(rename = "XREF", default)]
    xref: Option<String>,
    #[serde(rename = "MSKB", default)]
    mskb: Option<String>,
    #[serde(rename = "Plugin Publication Date", default)]
    plugin_publication_date: Option<String>,
    #[serde(rename = "Metasploit", default, deserialize_with = "csv::invalid_option")]
    metasploit: Option<bool>,
    #[serde(rename = "Core Impact", default, deserialize_with = "csv::invalid_option")]
    core_impact: Option<bool>,
    #[serde(rename = "CANVAS", default, deserialize_with = "csv::invalid_option")]
    canvas: Option<bool>,
}

impl ExportRow {
    fn into_finding(self, history: &HistoryEntry) -> Finding {
        let label = self.risk.as_deref().unwrap_or("");
        let risk = Risk::from_label(label).unwrap_or_else(|| {
            debug!("unknown risk label {label:?} for plugin {}, counting as None", self.plugin_id);
            Risk::None
        });
        Finding {
            plugin_id: self.plugin_id,
            cve: self.cve,
            cvss: self.cvss,
            risk,
            host: self.host,
            protocol: self.protocol,
            port: self.port,
            name: self.name,
            synopsis: self.synopsis,
            description: self.description,
            solution: self.solution,
            see_also: self.see_also,
            plugin_output: self.plugin_output,
            stig_severity: self.stig_severity,
            cvss3_base_score: self.cvss3_base_score,
            cvss_temporal_score: self.cvss_temporal_score,
            cvss3_temporal_score: self.cvss3_temporal_score,
            risk_factor: self.risk_factor,
            bid: self.bid,
            xref: self.xref,
            mskb: self.mskb,
            plugin_publication_date: self.plugin_publication_date,
            metasploit: self.metasploit.unwrap_or(false),
            core_impact: self.core_impact.unwrap_or(false),
            canvas: self.canvas.unwrap_or(false),
            scan_id: history.scan_id,
            scan_name: history.scan_name.clone(),
            history_id: history.history_id,
            history_date: history.creation_date,
        }
    }
}

/// Columns every export carries. A body without them (empty, an HTML error
/// page) is not an export, even when it parses as CSV.
const REQUIRED_COLUMNS: [&str; 2] = ["Plugin ID", "Host"];

pub fn read_findings(path: &Path, history: &HistoryEntry) -> SyncResult<Vec<Finding>> {
    let file = File::open(path)?;
    parse_findings(file, history, &path.display().to_string())
}

/// Parses an export and stamps every row with the history it came from.
pub fn parse_findings<R: Read>(reader: R, history: &HistoryEntry, source: &str) -> SyncResult<Vec<Finding>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let parse_err = |message: String| SyncError::Parse { path: source.to_string(), message };
    let headers = rdr.headers().map_err(|e| parse_err(e.to_string()))?;
    let missing: Vec<&str> =
        REQUIRED_COLUMNS.iter().copied().filter(|col| !headers.iter().any(|h| h == *col)).collect();
    if !missing.is_empty() {
        return Err(parse_err(format!("not a scanner export: missing column(s) {}", missing.join(", "))));
    }
    let mut out = Vec::new();
    for rec in rdr.deserialize::<ExportRow>() {
        let row = rec.map_err(|e| parse_err(e.to_string()))?;
        out.push(row.into_finding(history));
    }
    Ok(out)
}
