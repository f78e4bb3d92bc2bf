use crate::client::{Call, RetryClient};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashSet;
use vulnsync_core::{Folder, HistoryEntry, HistoryStatus, Scan, SyncError, SyncResult};

/// Folder and scan names that never reach ingestion. Exact match.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    pub folders: HashSet<String>,
    pub scans: HashSet<String>,
}

impl Exclusions {
    pub fn new<I, J, S, T>(folders: I, scans: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Exclusions {
            folders: folders.into_iter().map(Into::into).collect(),
            scans: scans.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows_folder(&self, name: &str) -> bool {
        !self.folders.contains(name)
    }

    pub fn allows_scan(&self, name: &str) -> bool {
        !self.scans.contains(name)
    }
}

/// One history entry to consider for ingestion, with where it came from.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub folder: Folder,
    pub scan: Scan,
    pub history: HistoryEntry,
}

/// A folder or scan whose listing failed with an item-level error. The
/// rest of the catalog is still walked.
#[derive(Debug)]
pub struct WalkFailure {
    pub folder: Folder,
    /// `None` when the folder's scan listing itself failed.
    pub scan: Option<Scan>,
    pub error: SyncError,
}

impl WalkFailure {
    /// `folder=<id>` or `scan=<id>`, for error bookkeeping.
    pub fn scope(&self) -> String {
        match &self.scan {
            Some(scan) => format!("scan={}", scan.id),
            None => format!("folder={}", self.folder.id),
        }
    }
}

#[derive(Debug, Default)]
pub struct CatalogWalk {
    pub items: Vec<WorkItem>,
    pub failures: Vec<WalkFailure>,
}

#[derive(Deserialize)]
struct FolderList {
    #[serde(default)]
    folders: Option<Vec<Folder>>,
}

#[derive(Deserialize)]
struct ScanList {
    #[serde(default)]
    scans: Option<Vec<Scan>>,
}

#[derive(Deserialize)]
struct ScanDetails {
    #[serde(default)]
    info: Option<ScanInfo>,
    #[serde(default)]
    history: Option<Vec<HistoryRecord>>,
}

#[derive(Deserialize)]
struct ScanInfo {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct HistoryRecord {
    history_id: i64,
    creation_date: i64,
    status: HistoryStatus,
}

/// Read-only enumeration of folders, scans and scan history.
pub struct Catalog<'a> {
    client: &'a RetryClient,
}

impl<'a> Catalog<'a> {
    pub fn new(client: &'a RetryClient) -> Self {
        Catalog { client }
    }

    pub fn list_folders(&self) -> SyncResult<Vec<Folder>> {
        let url = self.client.url("/folders");
        let resp = self.client.request(&Call::get("/folders"))?.require_success(&url)?;
        let body: FolderList = resp.json(&url)?;
        Ok(body.folders.unwrap_or_default())
    }

    /// Scans in listing order, restricted to `folder_id` when given.
    pub fn list_scans(&self, folder_id: Option<i64>) -> SyncResult<Vec<Scan>> {
        let url = self.client.url("/scans");
        let mut call = Call::get("/scans");
        if let Some(fid) = folder_id {
            call = call.param("folder_id", fid);
        }
        let resp = self.client.request(&call)?.require_success(&url)?;
        let body: ScanList = resp.json(&url)?;
        let mut scans = body.scans.unwrap_or_default();
        if let Some(fid) = folder_id {
            scans.retain(|s| s.folder_id == Some(fid));
        }
        Ok(scans)
    }

    pub fn list_history(&self, scan_id: i64, completed_only: bool) -> SyncResult<Vec<HistoryEntry>> {
        let path = format!("/scans/{scan_id}");
        let url = self.client.url(&path);
        let resp = self.client.request(&Call::get(path))?.require_success(&url)?;
        let body: ScanDetails = resp.json(&url)?;
        let scan_name = body.info.and_then(|i| i.name).unwrap_or_default();
        Ok(body
            .history
            .unwrap_or_default()
            .into_iter()
            .filter(|h| !completed_only || h.status == HistoryStatus::Completed)
            .map(|h| HistoryEntry {
                history_id: h.history_id,
                scan_id,
                scan_name: scan_name.clone(),
                creation_date: h.creation_date,
                status: h.status,
            })
            .collect())
    }

    /// Every completed history entry outside the exclusions, folders then
    /// scans then history, each in listing order.
    ///
    /// A non-fatal failure listing one folder's scans or one scan's history
    /// is collected and the walk moves on; fatal errors and a failed folder
    /// listing end it.
    pub fn walk(&self, exclusions: &Exclusions) -> SyncResult<CatalogWalk> {
        let mut walk = CatalogWalk::default();
        for folder in self.list_folders()? {
            if !exclusions.allows_folder(&folder.name) {
                debug!("folder {:?} excluded", folder.name);
                continue;
            }
            info!("{}", folder.name);
            let scans = match self.list_scans(Some(folder.id)) {
                Ok(scans) => scans,
                Err(error) if !error.is_fatal() => {
                    warn!("  listing scans of folder {:?} failed: {error}", folder.name);
                    walk.failures.push(WalkFailure { folder, scan: None, error });
                    continue;
                }
                Err(error) => return Err(error),
            };
            for scan in scans {
                if !exclusions.allows_scan(&scan.name) {
                    debug!("  scan {:?} excluded", scan.name);
                    continue;
                }
                info!("  {}", scan.name);
                let history = match self.list_history(scan.id, true) {
                    Ok(history) => history,
                    Err(error) if !error.is_fatal() => {
                        warn!("  listing history of scan {:?} failed: {error}", scan.name);
                        walk.failures.push(WalkFailure { folder: folder.clone(), scan: Some(scan), error });
                        continue;
                    }
                    Err(error) => return Err(error),
                };
                for mut entry in history {
                    // The listing name wins over whatever the details payload carried.
                    entry.scan_name = scan.name.clone();
                    walk.items.push(WorkItem { folder: folder.clone(), scan: scan.clone(), history: entry });
                }
            }
        }
        Ok(walk)
    }
}
