//! Read-only views over the findings table. Nothing here writes.

use crate::{Db, Finding, TableNames};
use anyhow::Result;
use rusqlite::Row;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use vulnsync_core::Risk;

const SECONDS_PER_DAY: i64 = 86_400;

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    /// Every ingested history id; empty when the ledger table does not exist yet.
    pub fn load_ledger(&self, tables: &TableNames) -> Result<HashSet<i64>> {
        Ok(self.ledger_ids(tables)?.into_iter().collect())
    }

    pub fn ledger_ids(&self, tables: &TableNames) -> Result<Vec<i64>> {
        if !self.table_exists(tables.ledger())? {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT history_id FROM {} ORDER BY history_id", tables.ledger()))?;
        let ids = stmt.query_map([], |r| r.get(0))?.collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    pub fn finding_count(&self, tables: &TableNames) -> Result<i64> {
        if !self.table_exists(tables.findings())? {
            return Ok(0);
        }
        let n = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", tables.findings()), [], |r| r.get(0))?;
        Ok(n)
    }

    /// Current state: one row per (plugin_id, host), taken from the most
    /// recent history. Ties on date fall to the later history id, then to
    /// the more severe risk.
    pub fn latest_snapshot(&self, tables: &TableNames) -> Result<Vec<Finding>> {
        if !self.table_exists(tables.findings())? {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM (
               SELECT f.*, ROW_NUMBER() OVER (
                 PARTITION BY f.plugin_id, f.host
                 ORDER BY f.history_date DESC, f.history_id DESC, {}, f.finding_id
               ) AS rn
               FROM {} f
             ) WHERE rn = 1
             ORDER BY plugin_id, host",
            severity_rank_sql("f.risk"),
            tables.findings()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], finding_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Latest snapshot narrowed by `filter`. `now` is unix seconds.
    pub fn filter(&self, tables: &TableNames, filter: &FindingFilter, now: i64) -> Result<Vec<Finding>> {
        let mut rows = self.latest_snapshot(tables)?;
        rows.retain(|f| filter.matches(f, now));
        Ok(rows)
    }

    /// Latest snapshot expanded to one record per Microsoft KB listed in
    /// `mskb`. Findings without a KB are left out.
    pub fn kb_exposure(&self, tables: &TableNames) -> Result<Vec<KbExposure>> {
        Ok(expand_kb(&self.latest_snapshot(tables)?))
    }
}

fn finding_from_row(row: &Row) -> rusqlite::Result<Finding> {
    let risk: String = row.get("risk")?;
    Ok(Finding {
        plugin_id: row.get("plugin_id")?,
        cve: row.get("cve")?,
        cvss: row.get("cvss")?,
        risk: Risk::from_label(&risk).unwrap_or(Risk::None),
        host: row.get("host")?,
        protocol: row.get("protocol")?,
        port: row.get("port")?,
        name: row.get("name")?,
        synopsis: row.get("synopsis")?,
        description: row.get("description")?,
        solution: row.get("solution")?,
        see_also: row.get("see_also")?,
        plugin_output: row.get("plugin_output")?,
        stig_severity: row.get("stig_severity")?,
        cvss3_base_score: row.get("cvss3_base_score")?,
        cvss_temporal_score: row.get("cvss_temporal_score")?,
        cvss3_temporal_score: row.get("cvss3_temporal_score")?,
        risk_factor: row.get("risk_factor")?,
        bid: row.get("bid")?,
        xref: row.get("xref")?,
        mskb: row.get("mskb")?,
        plugin_publication_date: row.get("plugin_publication_date")?,
        metasploit: row.get("metasploit")?,
        core_impact: row.get("core_impact")?,
        canvas: row.get("canvas")?,
        scan_id: row.get("scan_id")?,
        scan_name: row.get("scan_name")?,
        history_id: row.get("history_id")?,
        history_date: row.get("history_date")?,
    })
}

/// Composable predicates over snapshot rows. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct FindingFilter {
    /// Minimum score (CVSS v3 base, else v2). Rows without a score fail.
    pub cvss_min: Option<f64>,
    pub risks: Option<HashSet<Risk>>,
    /// Maximum age of the history the row came from.
    pub max_age_days: Option<i64>,
    pub exploitable_only: bool,
}

impl FindingFilter {
    pub fn cvss_min(mut self, min: f64) -> Self {
        self.cvss_min = Some(min);
        self
    }

    pub fn risks(mut self, risks: impl IntoIterator<Item = Risk>) -> Self {
        self.risks = Some(risks.into_iter().collect());
        self
    }

    pub fn max_age_days(mut self, days: i64) -> Self {
        self.max_age_days = Some(days);
        self
    }

    pub fn exploitable_only(mut self, yes: bool) -> Self {
        self.exploitable_only = yes;
        self
    }

    pub fn matches(&self, f: &Finding, now: i64) -> bool {
        if let Some(min) = self.cvss_min {
            if !f.score().is_some_and(|s| s >= min) {
                return false;
            }
        }
        if let Some(risks) = &self.risks {
            if !risks.contains(&f.risk) {
                return false;
            }
        }
        if let Some(days) = self.max_age_days {
            if now.saturating_sub(f.history_date) > days.saturating_mul(SECONDS_PER_DAY) {
                return false;
            }
        }
        !self.exploitable_only || f.exploitable()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KbExposure {
    pub kb: String,
    pub plugin_id: i64,
    pub host: String,
    pub risk: Risk,
    pub cve: Option<String>,
    pub cvss: Option<f64>,
    pub synopsis: Option<String>,
    pub scan_name: String,
    pub plugin_publication_date: Option<String>,
    pub exploitable: bool,
}

pub fn expand_kb(rows: &[Finding]) -> Vec<KbExposure> {
    let mut out = Vec::new();
    for f in rows {
        let Some(mskb) = f.mskb.as_deref() else { continue };
        // The same KB can repeat inside one field.
        let kbs: BTreeSet<&str> = mskb.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
        for kb in kbs {
            out.push(KbExposure {
                kb: kb.to_string(),
                plugin_id: f.plugin_id,
                host: f.host.clone(),
                risk: f.risk,
                cve: f.cve.clone(),
                cvss: f.score(),
                synopsis: f.synopsis.clone(),
                scan_name: f.scan_name.clone(),
                plugin_publication_date: f.plugin_publication_date.clone(),
                exploitable: f.exploitable(),
            });
        }
    }
    out
}

/// SQL expression ranking a stored risk label by `Risk::rank`. Unknown
/// labels rank with `None`.
fn severity_rank_sql(column: &str) -> String {
    let arms: String = Risk::ALL
        .iter()
        .filter(|r| **r != Risk::None)
        .map(|r| format!(" WHEN '{}' THEN {}", r.as_str(), r.rank()))
        .collect();
    format!("CASE {column}{arms} ELSE {} END", Risk::None.rank())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LedgerEntry;

    fn row(plugin: i64, host: &str, risk: Risk, history_id: i64, date: i64) -> Finding {
        let mut f = Finding::new(plugin, host, risk);
        f.scan_id = 1;
        f.scan_name = "Servers".into();
        f.history_id = history_id;
        f.history_date = date;
        f
    }

    fn store(batches: Vec<(i64, Vec<Finding>)>) -> (Db, TableNames) {
        let mut db = Db::open_in_memory().unwrap();
        let t = TableNames::default();
        db.ensure_tables(&t).unwrap();
        for (history_id, rows) in batches {
            let e = LedgerEntry { history_id, scan_id: 1, ingested_at: 0 };
            db.append_history(&t, &e, &rows).unwrap();
        }
        (db, t)
    }

    #[test]
    fn missing_tables_read_as_empty() {
        let db = Db::open_in_memory().unwrap();
        let t = TableNames::new("nope", "nada").unwrap();
        assert!(db.load_ledger(&t).unwrap().is_empty());
        assert!(db.latest_snapshot(&t).unwrap().is_empty());
        assert_eq!(db.finding_count(&t).unwrap(), 0);
    }

    #[test]
    fn snapshot_keeps_latest_history_per_plugin_host() {
        let (db, t) = store(vec![
            (1, vec![row(100, "a", Risk::High, 1, 1_000), row(200, "a", Risk::Low, 1, 1_000)]),
            (2, vec![row(100, "a", Risk::Medium, 2, 2_000)]),
        ]);
        let snap = db.latest_snapshot(&t).unwrap();
        assert_eq!(snap.len(), 2);
        let p100 = snap.iter().find(|f| f.plugin_id == 100).unwrap();
        assert_eq!((p100.history_date, p100.risk), (2_000, Risk::Medium));
        let p200 = snap.iter().find(|f| f.plugin_id == 200).unwrap();
        assert_eq!(p200.history_id, 1);
    }

    #[test]
    fn snapshot_breaks_date_ties_by_history_then_severity() {
        let (db, t) = store(vec![
            (3, vec![row(1, "a", Risk::Critical, 3, 5_000)]),
            (4, vec![row(1, "a", Risk::Low, 4, 5_000)]),
            (5, vec![row(2, "b", Risk::Low, 5, 7_000), row(2, "b", Risk::Critical, 5, 7_000)]),
        ]);
        let snap = db.latest_snapshot(&t).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!((snap[0].history_id, snap[0].risk), (4, Risk::Low));
        assert_eq!(snap[1].risk, Risk::Critical);
    }

    #[test]
    fn severity_rank_follows_risk_order() {
        assert_eq!(
            severity_rank_sql("risk"),
            "CASE risk WHEN 'Critical' THEN 0 WHEN 'High' THEN 1 WHEN 'Medium' THEN 2 WHEN 'Low' THEN 3 ELSE 4 END"
        );
        let db = Db::open_in_memory().unwrap();
        let rank: i64 = db
            .conn
            .query_row(&format!("SELECT {}", severity_rank_sql("'Bogus'")), [], |r| r.get(0))
            .unwrap();
        assert_eq!(rank, i64::from(Risk::None.rank()));
    }

    #[test]
    fn filter_composes_predicates() {
        let now = 100 * SECONDS_PER_DAY;
        let mut old = row(1, "a", Risk::Critical, 1, now - 40 * SECONDS_PER_DAY);
        old.cvss3_base_score = Some(9.8);
        old.metasploit = true;
        let mut fresh = row(2, "a", Risk::High, 2, now - SECONDS_PER_DAY);
        fresh.cvss = Some(7.2);
        let mut low = row(3, "a", Risk::Low, 2, now - SECONDS_PER_DAY);
        low.cvss = Some(2.6);
        let (db, t) = store(vec![(1, vec![old]), (2, vec![fresh, low])]);

        let ids = |f: &FindingFilter| -> Vec<i64> {
            db.filter(&t, f, now).unwrap().iter().map(|r| r.plugin_id).collect()
        };
        assert_eq!(ids(&FindingFilter::default()), vec![1, 2, 3]);
        assert_eq!(ids(&FindingFilter::default().cvss_min(7.0)), vec![1, 2]);
        assert_eq!(ids(&FindingFilter::default().risks([Risk::High, Risk::Low])), vec![2, 3]);
        assert_eq!(ids(&FindingFilter::default().max_age_days(30)), vec![2, 3]);
        assert_eq!(ids(&FindingFilter::default().exploitable_only(true)), vec![1]);
        assert!(ids(&FindingFilter::default().exploitable_only(true).max_age_days(30)).is_empty());
    }

    #[test]
    fn kb_field_expands_to_one_record_per_kb() {
        let mut a = row(1, "a", Risk::High, 1, 0);
        a.mskb = Some("KB500123; KB500124;;KB500123".into());
        a.metasploit = true;
        let b = row(2, "a", Risk::High, 1, 0);
        let out = expand_kb(&[a, b]);
        let kbs: Vec<&str> = out.iter().map(|k| k.kb.as_str()).collect();
        assert_eq!(kbs, vec!["KB500123", "KB500124"]);
        assert!(out.iter().all(|k| k.plugin_id == 1 && k.exploitable));
    }

    #[test]
    fn reads_do_not_mutate() {
        let (db, t) = store(vec![(1, vec![row(1, "a", Risk::High, 1, 10)])]);
        db.latest_snapshot(&t).unwrap();
        db.filter(&t, &FindingFilter::default().cvss_min(1.0), 0).unwrap();
        db.kb_exposure(&t).unwrap();
        db.trend(&t, crate::TrendMode::Findings).unwrap();
        assert_eq!(db.finding_count(&t).unwrap(), 1);
        assert_eq!(db.ledger_ids(&t).unwrap(), vec![1]);
    }
}
