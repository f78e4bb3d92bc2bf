//! Where downloaded exports are kept between download and load.

use std::path::PathBuf;
use time::macros::format_description;
use time::OffsetDateTime;
use vulnsync_core::{HistoryEntry, SyncError, SyncResult};

pub const DEFAULT_STAGING_DIR: &str = "./data/";

#[derive(Debug, Clone)]
pub struct Staging {
    pub dir: PathBuf,
    /// Delete each export once its rows are committed.
    pub remove_files: bool,
}

impl Default for Staging {
    fn default() -> Self {
        Staging { dir: PathBuf::from(DEFAULT_STAGING_DIR), remove_files: false }
    }
}

impl Staging {
    /// `<dir>/<scan name>/<MM-DD-YYYY>_<history_id>.csv`
    pub fn path_for(&self, history: &HistoryEntry) -> SyncResult<PathBuf> {
        let date = scan_date(history.creation_date)?;
        Ok(self
            .dir
            .join(folder_name(&history.scan_name))
            .join(format!("{date}_{}.csv", history.history_id)))
    }
}

/// Creation date as `MM-DD-YYYY` (UTC).
pub fn scan_date(unix: i64) -> SyncResult<String> {
    let bad = |message: String| SyncError::Parse { path: format!("creation_date={unix}"), message };
    let ts = OffsetDateTime::from_unix_timestamp(unix).map_err(|e| bad(e.to_string()))?;
    ts.format(format_description!("[month]-[day]-[year]")).map_err(|e| bad(e.to_string()))
}

fn folder_name(scan_name: &str) -> String {
    let cleaned: String = scan_name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ' ' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use vulnsync_core::HistoryStatus;

    #[test]
    fn path_layout() {
        let staging = Staging { dir: PathBuf::from("/tmp/stage"), remove_files: false };
        let h = HistoryEntry {
            history_id: 42,
            scan_id: 7,
            scan_name: "DMZ / Web".into(),
            // 2024-03-05 12:00:00 UTC
            creation_date: 1_709_640_000,
            status: HistoryStatus::Completed,
        };
        assert_eq!(staging.path_for(&h).unwrap(), Path::new("/tmp/stage/DMZ _ Web/03-05-2024_42.csv"));
    }

    #[test]
    fn traversal_is_neutralised() {
        assert_eq!(folder_name("../../etc"), "______etc");
        assert_eq!(folder_name("  "), "unnamed");
    }
}
