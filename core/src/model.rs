use serde::{Deserialize, Serialize};
use std::fmt;

/// Scanner-side grouping of scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub name: String,
}

/// A configured, repeatable scan definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scan {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub folder_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HistoryStatus {
    Completed,
    Other(String),
}

impl From<String> for HistoryStatus {
    fn from(s: String) -> Self {
        if s == "completed" { HistoryStatus::Completed } else { HistoryStatus::Other(s) }
    }
}

impl From<HistoryStatus> for String {
    fn from(s: HistoryStatus) -> Self {
        match s {
            HistoryStatus::Completed => "completed".to_string(),
            HistoryStatus::Other(s) => s,
        }
    }
}

/// One execution of a scan. Immutable once the scanner has created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub history_id: i64,
    pub scan_id: i64,
    pub scan_name: String,
    /// Unix seconds.
    pub creation_date: i64,
    pub status: HistoryStatus,
}

/// Fixed risk categories, ordered most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Risk {
    Critical,
    High,
    Medium,
    Low,
    None,
}

impl Risk {
    pub const ALL: [Risk; 5] = [Risk::Critical, Risk::High, Risk::Medium, Risk::Low, Risk::None];

    /// Severity rank used for tie-breaking; 0 is the most severe.
    pub fn rank(self) -> u8 {
        match self {
            Risk::Critical => 0,
            Risk::High => 1,
            Risk::Medium => 2,
            Risk::Low => 3,
            Risk::None => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Risk::Critical => "Critical",
            Risk::High => "High",
            Risk::Medium => "Medium",
            Risk::Low => "Low",
            Risk::None => "None",
        }
    }

    /// Case-insensitive match on the scanner's labels. `Info` and blanks map to `None`.
    pub fn from_label(label: &str) -> Option<Risk> {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Risk::Critical),
            "high" => Some(Risk::High),
            "medium" => Some(Risk::Medium),
            "low" => Some(Risk::Low),
            "none" | "info" | "" => Some(Risk::None),
            _ => None,
        }
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_labels_round_trip() {
        for r in Risk::ALL {
            assert_eq!(Risk::from_label(r.as_str()), Some(r));
        }
        assert_eq!(Risk::from_label("info"), Some(Risk::None));
        assert_eq!(Risk::from_label("severe"), None);
    }

    #[test]
    fn risk_rank_follows_severity() {
        assert!(Risk::Critical.rank() < Risk::High.rank());
        assert!(Risk::Low.rank() < Risk::None.rank());
    }

    #[test]
    fn history_status_parses_completed_only() {
        let s: HistoryStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(s, HistoryStatus::Completed);
        let s: HistoryStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(s, HistoryStatus::Other("running".into()));
    }
}
