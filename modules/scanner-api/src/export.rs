//! Export job state machine: request, poll until ready, download.

use crate::client::{Call, RetryClient, TokenPlacement};
use crate::transport::CHUNK_SIZE;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vulnsync_core::{SyncError, SyncResult};

/// Report sections and CSV columns sent with every export request.
///
/// The scanner silently drops any column not named here, and this set is
/// exactly what its own UI asks for. Treat it as a wire contract.
#[derive(Debug)]
pub struct ReportContents {
    pub host_sections: &'static [&'static str],
    pub vulnerability_sections: &'static [&'static str],
    pub csv_columns: &'static [&'static str],
}

pub const REPORT_CONTENTS: ReportContents = ReportContents {
    host_sections: &["scan_information", "host_information"],
    vulnerability_sections: &[
        "synopsis",
        "description",
        "see_also",
        "solution",
        "risk_factor",
        "cvss3_base_score",
        "cvss3_temporal_score",
        "cvss_base_score",
        "cvss_temporal_score",
        "stig_severity",
        "references",
        "exploitable_with",
        "plugin_information",
        "plugin_output",
    ],
    csv_columns: &[
        "id",
        "cve",
        "cvss",
        "risk",
        "hostname",
        "protocol",
        "port",
        "plugin_name",
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
        "references",
        "plugin_information",
        "exploitable_with",
    ],
};

impl ReportContents {
    fn apply(&self, mut call: Call) -> Call {
        for s in self.host_sections {
            call = call.param(&format!("reportContents.hostSections.{s}"), true);
        }
        for s in self.vulnerability_sections {
            call = call.param(&format!("reportContents.vulnerabilitySections.{s}"), true);
        }
        let columns: Map<String, Value> =
            self.csv_columns.iter().map(|c| (c.to_string(), Value::Bool(true))).collect();
        call.param("reportContents", serde_json::json!({ "csvColumns": columns }))
    }
}

/// Only one tabular format is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    Pending,
    Ready,
}

#[derive(Debug, Clone)]
pub struct ExportJob {
    pub scan_id: i64,
    pub history_id: Option<i64>,
    pub file_id: String,
    pub status: ExportStatus,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Pause between status checks.
    pub status_interval: Duration,
    /// Status checks before giving up.
    pub status_max: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions { status_interval: Duration::from_secs(1), status_max: 120 }
    }
}

#[derive(Deserialize)]
struct ExportRequested {
    file: Value,
}

#[derive(Deserialize)]
struct ExportState {
    status: String,
}

pub struct ExportPoller<'a> {
    client: &'a RetryClient,
    opts: ExportOptions,
}

impl<'a> ExportPoller<'a> {
    pub fn new(client: &'a RetryClient, opts: ExportOptions) -> Self {
        ExportPoller { client, opts }
    }

    pub fn request_export(&self, scan_id: i64, history_id: Option<i64>, format: ExportFormat) -> SyncResult<ExportJob> {
        let path = format!("/scans/{scan_id}/export");
        let url = self.client.url(&path);
        let mut call = Call::post(path).token(TokenPlacement::PayloadAndCookie).param("format", format.as_str());
        if let Some(h) = history_id {
            call = call.query("history_id", h);
        }
        let call = REPORT_CONTENTS.apply(call);
        let resp = self.client.request(&call)?.require_success(&url)?;
        let body: ExportRequested = resp.json(&url)?;
        let file_id = match body.file {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(SyncError::Decode { url, message: format!("unexpected file id {other}") });
            }
        };
        debug!("export requested: scan {scan_id} history {history_id:?} file {file_id}");
        Ok(ExportJob { scan_id, history_id, file_id, status: ExportStatus::Pending })
    }

    /// One status check. Ready only on a 2xx whose reported state is `ready`.
    pub fn poll_status(&self, scan_id: i64, file_id: &str) -> SyncResult<bool> {
        let path = format!("/scans/{scan_id}/export/{file_id}/status");
        let url = self.client.url(&path);
        let resp = self.client.request(&Call::get(path).token(TokenPlacement::Cookie))?;
        if !resp.is_success() {
            debug!("export status for file {file_id} returned HTTP {}", resp.status);
            return Ok(false);
        }
        let state: ExportState = resp.json(&url)?;
        Ok(state.status == "ready")
    }

    /// Polls until ready; returns the number of checks it took.
    pub fn wait_ready(&self, job: &mut ExportJob) -> SyncResult<u32> {
        let max = self.opts.status_max.max(1);
        for check in 1..=max {
            if self.poll_status(job.scan_id, &job.file_id)? {
                job.status = ExportStatus::Ready;
                return Ok(check);
            }
            debug!("waiting for export file {} to be ready ({check}/{max})", job.file_id);
            if check < max && !self.opts.status_interval.is_zero() {
                std::thread::sleep(self.opts.status_interval);
            }
        }
        Err(SyncError::ExportTimeout {
            scan_id: job.scan_id,
            history_id: job.history_id.unwrap_or_default(),
            file_id: job.file_id.clone(),
            polls: max,
        })
    }

    /// Streams the export to `dest`. The body lands in a `.part` sibling that
    /// replaces `dest` only once complete.
    pub fn download(&self, scan_id: i64, file_id: &str, dest: &Path) -> SyncResult<PathBuf> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let part = part_path(dest);
        let path = format!("/scans/{scan_id}/export/{file_id}/download");
        let url = self.client.url(&path);
        let call = Call::get(path).token(TokenPlacement::Cookie);

        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, File::create(&part)?);
        let status = match self.client.download(&call, &mut writer) {
            Ok(s) => s,
            Err(e) => {
                drop(writer);
                let _ = fs::remove_file(&part);
                return Err(e);
            }
        };
        if !(200..300).contains(&status) {
            drop(writer);
            let _ = fs::remove_file(&part);
            return Err(SyncError::Status { status, url });
        }
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&part, dest)?;
        Ok(dest.to_path_buf())
    }

    /// Request, wait, download.
    pub fn export(&self, scan_id: i64, history_id: i64, dest: &Path) -> SyncResult<PathBuf> {
        let mut job = self.request_export(scan_id, Some(history_id), ExportFormat::Csv)?;
        let checks = self.wait_ready(&mut job)?;
        debug!("export file {} ready after {checks} check(s)", job.file_id);
        let out = self.download(scan_id, &job.file_id, dest)?;
        info!("downloaded export for history {history_id} to {}", out.display());
        Ok(out)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut p = dest.as_os_str().to_owned();
    p.push(".part");
    PathBuf::from(p)
}
