use findings_sqlite::{Db, TableNames};
use ingest::{run_with_client, BatchConfig, Staging};
use scanner_api::testing::{json, raw, MockTransport};
use scanner_api::{ApiRequest, ApiResponse, Credentials, Exclusions, ExportOptions, Method, RetryClient, Session};
use serde_json::json as j;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const SERVER: &str = "https://scanner:8834";
const FILE_OFFSET: i64 = 9000;

#[derive(Default)]
struct Scanner {
    stuck: HashSet<i64>,
    /// Histories whose download body replaces the CSV export.
    bodies: HashMap<i64, &'static str>,
    /// Scans whose details answer 404.
    missing_scans: HashSet<i64>,
    reject_login: bool,
}

fn csv_for(history_id: i64) -> String {
    format!(
        "Plugin ID,CVE,CVSS v2.0 Base Score,Risk,Host,Protocol,Port,Name,MSKB\n\
         97833,CVE-2017-0144,9.3,Critical,10.0.0.{history_id},tcp,445,MS17-010,KB4012212\n\
         10180,,,None,10.0.0.{history_id},tcp,0,Ping the remote host,\n"
    )
}

fn route(state: &Scanner, req: &ApiRequest) -> ApiResponse {
    let path = req.url.trim_start_matches(SERVER);
    if let Some(id) = path.strip_prefix("/scans/").and_then(|id| id.parse::<i64>().ok()) {
        if state.missing_scans.contains(&id) {
            return json(404, j!({"error": "The requested file was not found."}));
        }
    }
    match (req.method, path) {
        (Method::Post, "/session") if state.reject_login => json(401, j!({"error": "Invalid credentials"})),
        (Method::Post, "/session") => json(200, j!({"token": "tok"})),
        (Method::Delete, "/session") => json(200, j!({})),
        (Method::Get, "/folders") => json(200, j!({"folders": [
            {"id": 1, "name": "My Scans"},
            {"id": 2, "name": "Trash"}
        ]})),
        (Method::Get, "/scans") => json(200, j!({"scans": [
            {"id": 10, "name": "Servers", "folder_id": 1},
            {"id": 11, "name": "Laptops", "folder_id": 1},
            {"id": 12, "name": "Old", "folder_id": 2}
        ]})),
        (Method::Get, "/scans/10") => json(200, j!({"info": {"name": "Servers"}, "history": [
            {"history_id": 100, "creation_date": 1_704_153_600, "status": "completed"},
            {"history_id": 101, "creation_date": 1_704_500_000, "status": "running"},
            {"history_id": 102, "creation_date": 1_704_758_400, "status": "completed"}
        ]})),
        (Method::Get, "/scans/11") => json(200, j!({"info": {"name": "Laptops"}, "history": [
            {"history_id": 110, "creation_date": 1_704_240_000, "status": "completed"}
        ]})),
        (Method::Get, "/scans/12") => json(200, j!({"info": {"name": "Old"}, "history": [
            {"history_id": 120, "creation_date": 1_600_000_000, "status": "completed"}
        ]})),
        _ => export_route(state, req, path),
    }
}

fn export_route(state: &Scanner, req: &ApiRequest, path: &str) -> ApiResponse {
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match (req.method, parts.as_slice()) {
        (Method::Post, ["scans", _, "export"]) => {
            let history: i64 = req.query_value("history_id").and_then(|h| h.parse().ok()).unwrap_or(0);
            json(200, j!({"file": history + FILE_OFFSET}))
        }
        (Method::Get, ["scans", _, "export", file, "status"]) => {
            let history = file.parse::<i64>().unwrap() - FILE_OFFSET;
            let status = if state.stuck.contains(&history) { "loading" } else { "ready" };
            json(200, j!({ "status": status }))
        }
        (Method::Get, ["scans", _, "export", file, "download"]) => {
            let history = file.parse::<i64>().unwrap() - FILE_OFFSET;
            match state.bodies.get(&history) {
                Some(body) => raw(200, *body),
                None => raw(200, csv_for(history)),
            }
        }
        _ => json(404, j!({"error": "not found"})),
    }
}

struct Harness {
    state: Arc<Mutex<Scanner>>,
    mock: Arc<MockTransport>,
    client: RetryClient,
    db: Db,
    cfg: BatchConfig,
    _staging: TempDir,
}

fn harness(exclusions: Exclusions) -> Harness {
    let state = Arc::new(Mutex::new(Scanner::default()));
    let routed = state.clone();
    let mock = Arc::new(MockTransport::new(move |req| route(&routed.lock().unwrap(), req)));
    let creds = Credentials { username: "svc".into(), password: "secret".into() };
    let client = RetryClient::new(mock.clone(), Arc::new(Session::new(SERVER, creds.clone())));
    let staging = tempfile::tempdir().unwrap();
    let mut cfg = BatchConfig::new(SERVER, creds);
    cfg.exclusions = exclusions;
    cfg.staging = Staging { dir: staging.path().to_path_buf(), remove_files: false };
    cfg.export = ExportOptions { status_interval: Duration::ZERO, status_max: 3 };
    Harness { state, mock, client, db: Db::open_in_memory().unwrap(), cfg, _staging: staging }
}

impl Harness {
    fn run(&mut self) -> vulnsync_core::SyncResult<ingest::BatchSummary> {
        run_with_client(&self.client, &mut self.db, &self.cfg)
    }

    fn ledger(&self) -> Vec<i64> {
        self.db.ledger_ids(&self.cfg.tables).unwrap()
    }

    fn exports_requested(&self) -> usize {
        self.mock.count(Method::Post, "/export")
    }
}

#[test]
fn second_run_adds_nothing() {
    let mut h = harness(Exclusions::default());
    let first = h.run().unwrap();
    assert_eq!((first.imported, first.skipped, first.failed, first.rows), (4, 0, 0, 8));
    assert_eq!(h.ledger(), vec![100, 102, 110, 120]);
    let rows = h.db.finding_count(&h.cfg.tables).unwrap();
    assert_eq!(rows, 8);
    let exports = h.exports_requested();

    let second = h.run().unwrap();
    assert_eq!((second.imported, second.skipped, second.rows), (0, 4, 0));
    assert_eq!(h.db.finding_count(&h.cfg.tables).unwrap(), rows);
    assert_eq!(h.ledger(), vec![100, 102, 110, 120]);
    assert_eq!(h.exports_requested(), exports);
}

#[test]
fn findings_carry_their_history() {
    let mut h = harness(Exclusions::new(["Trash"], ["Laptops"]));
    h.run().unwrap();
    let (scan_id, scan_name, history_date): (i64, String, i64) = h
        .db
        .conn
        .query_row(
            "SELECT scan_id, scan_name, history_date FROM vulnerabilities WHERE history_id = 102 LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!((scan_id, scan_name.as_str(), history_date), (10, "Servers", 1_704_758_400));
}

#[test]
fn excluded_folders_and_scans_are_never_loaded() {
    let mut h = harness(Exclusions::new(["Trash"], ["Laptops"]));
    let summary = h.run().unwrap();
    assert_eq!(summary.imported, 2);
    assert_eq!(h.ledger(), vec![100, 102]);
    let names: Vec<String> = h
        .db
        .conn
        .prepare("SELECT DISTINCT scan_name FROM vulnerabilities")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(names, vec!["Servers".to_string()]);
    assert_eq!(h.mock.count(Method::Get, "/scans/12"), 0);
    assert_eq!(h.mock.count(Method::Get, "/scans/11"), 0);
}

#[test]
fn stuck_export_is_recorded_and_retried_next_run() {
    let mut h = harness(Exclusions::new(["Trash"], Vec::<String>::new()));
    h.state.lock().unwrap().stuck.insert(102);

    let first = h.run().unwrap();
    assert_eq!((first.imported, first.failed), (2, 1));
    assert_eq!(first.failures[0].history_id, Some(102));
    assert_eq!(first.failures[0].code, "export_timeout");
    assert_eq!(h.ledger(), vec![100, 110]);
    assert_eq!(h.mock.count(Method::Get, "/9102/status"), 3);

    let (scope, code): (String, String) = h
        .db
        .conn
        .query_row("SELECT scope, code FROM errors", [], |r| Ok((r.get(0)?, r.get(1)?)))
        .unwrap();
    assert_eq!(scope, "scan=10 history=102 file=9102");
    assert_eq!(code, "export_timeout");

    h.state.lock().unwrap().stuck.clear();
    let second = h.run().unwrap();
    assert_eq!((second.imported, second.skipped, second.failed), (1, 2, 0));
    assert_eq!(h.ledger(), vec![100, 102, 110]);
}

#[test]
fn rejected_login_aborts_the_run() {
    let mut h = harness(Exclusions::default());
    h.state.lock().unwrap().reject_login = true;

    let err = h.run().unwrap_err();
    assert_eq!(err.code(), "auth");
    assert!(h.ledger().is_empty());
    let outcome: String = h.db.conn.query_row("SELECT outcome FROM runs", [], |r| r.get(0)).unwrap();
    assert_eq!(outcome, "aborted");
}

#[test]
fn staged_exports_are_kept_or_removed() {
    let mut h = harness(Exclusions::new(["Trash"], ["Laptops"]));
    h.run().unwrap();
    let kept = h.cfg.staging.dir.join("Servers").join("01-02-2024_100.csv");
    assert!(kept.exists());

    let mut h = harness(Exclusions::new(["Trash"], ["Laptops"]));
    h.cfg.staging.remove_files = true;
    h.run().unwrap();
    assert!(!h.cfg.staging.dir.join("Servers").join("01-02-2024_100.csv").exists());
    assert_eq!(h.ledger(), vec![100, 102]);
}

#[test]
fn session_is_closed_after_the_run() {
    let mut h = harness(Exclusions::default());
    h.run().unwrap();
    assert_eq!(h.mock.count(Method::Post, "/session"), 1);
    assert_eq!(h.mock.count(Method::Delete, "/session"), 1);
}

#[test]
fn custom_table_names_are_honoured() {
    let mut h = harness(Exclusions::new(["Trash"], ["Laptops"]));
    h.cfg.tables = TableNames::new("vulns_q1", "loaded_q1").unwrap();
    h.run().unwrap();
    assert_eq!(h.db.ledger_ids(&h.cfg.tables).unwrap(), vec![100, 102]);
    assert!(!h.db.table_exists("vulnerabilities").unwrap());
}

#[test]
fn export_that_is_not_csv_stays_out_of_the_ledger() {
    let mut h = harness(Exclusions::new(["Trash"], Vec::<String>::new()));
    {
        let mut state = h.state.lock().unwrap();
        state.bodies.insert(100, "");
        state.bodies.insert(110, "<html><body>Service Unavailable</body></html>");
    }

    let first = h.run().unwrap();
    assert_eq!((first.imported, first.failed), (1, 2));
    assert!(first.failures.iter().all(|f| f.code == "parse"));
    assert_eq!(h.ledger(), vec![102]);
    let scopes: Vec<String> = h
        .db
        .conn
        .prepare("SELECT scope FROM errors ORDER BY scope")
        .unwrap()
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(scopes, vec!["scan=10 history=100", "scan=11 history=110"]);

    h.state.lock().unwrap().bodies.clear();
    let second = h.run().unwrap();
    assert_eq!((second.imported, second.skipped, second.failed), (2, 1, 0));
    assert_eq!(h.ledger(), vec![100, 102, 110]);
}

#[test]
fn unlistable_scan_does_not_abort_the_run() {
    let mut h = harness(Exclusions::new(["Trash"], Vec::<String>::new()));
    h.state.lock().unwrap().missing_scans.insert(11);

    let first = h.run().unwrap();
    assert_eq!((first.imported, first.failed), (2, 1));
    assert_eq!(h.ledger(), vec![100, 102]);
    assert_eq!(first.failures[0].scope, "scan=11");
    assert_eq!(first.failures[0].scan_id, Some(11));
    assert_eq!(first.failures[0].history_id, None);
    assert_eq!(first.failures[0].code, "http_status");

    let (scope, outcome): (String, String) = h
        .db
        .conn
        .query_row("SELECT e.scope, r.outcome FROM errors e JOIN runs r USING (run_id)", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .unwrap();
    assert_eq!((scope.as_str(), outcome.as_str()), ("scan=11", "completed"));

    h.state.lock().unwrap().missing_scans.clear();
    let second = h.run().unwrap();
    assert_eq!((second.imported, second.skipped, second.failed), (1, 2, 0));
    assert_eq!(h.ledger(), vec![100, 102, 110]);
}
