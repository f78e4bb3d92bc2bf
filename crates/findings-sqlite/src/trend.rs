//! Weekly counts per risk category.

use crate::{Db, TableNames};
use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use time::{Date, Duration, OffsetDateTime};
use vulnsync_core::Risk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrendMode {
    /// Every stored finding row.
    #[default]
    Findings,
    /// Distinct (plugin_id, host) pairs.
    DistinctPlugins,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendPoint {
    /// Monday (UTC) starting the week.
    pub week_start: Date,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendSeries {
    pub risk: Risk,
    pub points: Vec<TrendPoint>,
}

/// Per-history, per-risk tally as read from the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCount {
    pub history_id: i64,
    pub scan_name: String,
    pub history_date: i64,
    pub risk: Risk,
    pub count: i64,
}

impl Db {
    pub fn trend(&self, tables: &TableNames, mode: TrendMode) -> Result<Vec<TrendSeries>> {
        if !self.table_exists(tables.findings())? {
            return bucket_weekly(Vec::new());
        }
        let counted = match mode {
            TrendMode::Findings => "COUNT(*)",
            TrendMode::DistinctPlugins => "COUNT(DISTINCT CAST(plugin_id AS TEXT) || '|' || host)",
        };
        let sql = format!(
            "SELECT history_id, scan_name, history_date, risk, {counted}
             FROM {}
             GROUP BY history_id, scan_name, history_date, risk
             ORDER BY history_date, history_id",
            tables.findings()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |r| {
                let risk: String = r.get(3)?;
                Ok(HistoryCount {
                    history_id: r.get(0)?,
                    scan_name: r.get(1)?,
                    history_date: r.get(2)?,
                    risk: Risk::from_label(&risk).unwrap_or(Risk::None),
                    count: r.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        bucket_weekly(rows)
    }
}

/// Monday of the ISO week holding `unix`, in UTC. Weeks run Monday to
/// Sunday; a Tuesday scan counts toward the Monday before it, not toward a
/// Tuesday-to-Monday bucket.
pub fn week_start(unix: i64) -> Result<Date> {
    let date = OffsetDateTime::from_unix_timestamp(unix)?.date();
    let back = date.weekday().number_days_from_monday();
    Ok(date - Duration::days(i64::from(back)))
}

/// One series per risk category, each covering every week seen in `rows`
/// (zero when the category had nothing that week).
///
/// A scan that ran more than once in a week only contributes its latest
/// history for that week, so repeated runs are not double counted.
pub fn bucket_weekly(rows: Vec<HistoryCount>) -> Result<Vec<TrendSeries>> {
    // (scan, week) -> latest (history_date, history_id)
    let mut latest: HashMap<(String, Date), (i64, i64)> = HashMap::new();
    let mut weeks = BTreeSet::new();
    let mut keyed = Vec::with_capacity(rows.len());
    for r in rows {
        let week = week_start(r.history_date)?;
        weeks.insert(week);
        let candidate = (r.history_date, r.history_id);
        latest
            .entry((r.scan_name.clone(), week))
            .and_modify(|cur| {
                if candidate > *cur {
                    *cur = candidate;
                }
            })
            .or_insert(candidate);
        keyed.push((week, r));
    }

    let mut totals: HashMap<(Risk, Date), i64> = HashMap::new();
    for (week, r) in keyed {
        let keep = latest
            .get(&(r.scan_name.clone(), week))
            .is_some_and(|&(_, hid)| hid == r.history_id);
        if keep {
            *totals.entry((r.risk, week)).or_default() += r.count;
        }
    }

    Ok(Risk::ALL
        .iter()
        .map(|&risk| TrendSeries {
            risk,
            points: weeks
                .iter()
                .map(|&week_start| TrendPoint {
                    week_start,
                    count: totals.get(&(risk, week_start)).copied().unwrap_or(0),
                })
                .collect(),
        })
        .collect())
}
