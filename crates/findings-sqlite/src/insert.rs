use crate::schema::{findings_ddl, insert_finding_sql, ledger_ddl};
use crate::{Db, Finding, LedgerEntry, RunCounts, RunMeta, TableNames};
use anyhow::{Context, Result};
use log::debug;
use rusqlite::params;
use uuid::Uuid;

impl Db {
    pub fn begin_run(&self, meta: &RunMeta) -> Result<Uuid> {
        self.conn.execute(
            "INSERT INTO runs(run_id, started_at, tool_version, server, options_json) VALUES (?,?,?,?,?)",
            params![meta.run_id.to_string(), meta.started_at, meta.tool_version, meta.server, meta.options_json],
        )?;
        Ok(meta.run_id)
    }

    pub fn finish_run(&self, run_id: &Uuid, finished_at: i64, counts: &RunCounts, outcome: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE runs SET finished_at=?, imported_count=?, skipped_count=?, failed_count=?, row_count=?, outcome=? WHERE run_id=?",
            params![finished_at, counts.imported, counts.skipped, counts.failed, counts.rows, outcome, run_id.to_string()],
        )?;
        Ok(())
    }

    pub fn add_error(&self, run_id: &Uuid, scope: &str, code: &str, message: &str, at_ms: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO errors(run_id,scope,code,message,at_ms) VALUES (?,?,?,?,?)",
            params![run_id.to_string(), scope, code, message, at_ms],
        )?;
        Ok(())
    }

    /// Create the findings and ledger tables if they are missing.
    pub fn ensure_tables(&self, tables: &TableNames) -> Result<()> {
        self.conn
            .execute_batch(&findings_ddl(tables))
            .with_context(|| format!("failed to create findings table {}", tables.findings()))?;
        self.conn
            .execute_batch(&ledger_ddl(tables))
            .with_context(|| format!("failed to create ledger table {}", tables.ledger()))?;
        Ok(())
    }

    /// Append one history's findings and its ledger row in a single
    /// transaction. Either both land or neither does; a history already in
    /// the ledger fails the whole append.
    pub fn append_history(&mut self, tables: &TableNames, entry: &LedgerEntry, findings: &[Finding]) -> Result<usize> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        {
            let mut stmt = tx.prepare(&insert_finding_sql(tables))?;
            for f in findings {
                stmt.execute(params![
                    f.plugin_id,
                    f.cve,
                    f.cvss,
                    f.risk.as_str(),
                    f.host,
                    f.protocol,
                    f.port,
                    f.name,
                    f.synopsis,
                    f.description,
                    f.solution,
                    f.see_also,
                    f.plugin_output,
                    f.stig_severity,
                    f.cvss3_base_score,
                    f.cvss_temporal_score,
                    f.cvss3_temporal_score,
                    f.risk_factor,
                    f.bid,
                    f.xref,
                    f.mskb,
                    f.plugin_publication_date,
                    f.metasploit,
                    f.core_impact,
                    f.canvas,
                    entry.scan_id,
                    f.scan_name,
                    entry.history_id,
                    f.history_date,
                ])
                .with_context(|| format!("failed to insert finding for plugin {} on {}", f.plugin_id, f.host))?;
            }
        }
        tx.execute(
            &format!("INSERT INTO {}(history_id, scan_id, ingested_at, row_count) VALUES (?,?,?,?)", tables.ledger()),
            params![entry.history_id, entry.scan_id, entry.ingested_at, findings.len() as i64],
        )
        .with_context(|| format!("failed to record history {} in ledger", entry.history_id))?;
        tx.commit().context("failed to commit transaction")?;
        debug!("history {} committed with {} findings", entry.history_id, findings.len());
        Ok(findings.len())
    }
}
