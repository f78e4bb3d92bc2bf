//! Error taxonomy for a synchronization run.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Credentials rejected, or still unauthorized after every retry.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("export {file_id} for scan {scan_id} (history {history_id}) not ready after {polls} status checks")]
    ExportTimeout {
        scan_id: i64,
        history_id: i64,
        file_id: String,
        polls: u32,
    },

    #[error("network error calling {url}: {message}")]
    Network { url: String, message: String },

    #[error("unexpected HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("malformed response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("malformed export file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("persistence failure{}: {message}", history_suffix(.history_id))]
    Persistence {
        history_id: Option<i64>,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn history_suffix(history_id: &Option<i64>) -> String {
    match history_id {
        Some(id) => format!(" for history {id}"),
        None => String::new(),
    }
}

impl SyncError {
    /// Fatal errors end the whole run; everything else only fails the current item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Auth(_) | SyncError::Network { .. } | SyncError::InvalidConfig(_)
        )
    }

    /// Stable short code recorded alongside failed items.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Auth(_) => "auth",
            SyncError::ExportTimeout { .. } => "export_timeout",
            SyncError::Network { .. } => "network",
            SyncError::Status { .. } => "http_status",
            SyncError::Decode { .. } => "decode",
            SyncError::Parse { .. } => "parse",
            SyncError::Persistence { .. } => "persistence",
            SyncError::Io(_) => "io",
            SyncError::InvalidConfig(_) => "config",
        }
    }

    pub fn persistence(history_id: Option<i64>, err: impl std::fmt::Display) -> Self {
        SyncError::Persistence {
            history_id,
            message: err.to_string(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
