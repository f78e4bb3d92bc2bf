//! Core types shared by the scanner client, the findings store and the loader.

pub mod error;
pub mod model;

pub use error::{SyncError, SyncResult};
pub use model::{Folder, HistoryEntry, HistoryStatus, Risk, Scan};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
