//! Rendering of query results as text, JSON, JSON lines or CSV.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use findings_sqlite::{Finding, KbExposure, TrendSeries};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use vulnsync_core::Risk;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Jsonl,
}

#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Output format: text, json, or jsonl
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Output file (overwrites). Stdout if omitted.
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
    /// Write CSV instead of text/json
    #[arg(long, default_value_t = false)]
    pub csv: bool,
}

impl OutputArgs {
    pub fn writer(&self) -> Result<Box<dyn Write>> {
        open_output(self.out.as_deref())
    }
}

pub fn open_output(out: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match out {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(io::stdout().lock()),
    })
}

/// One (week, risk) cell of a trend, flattened for JSON and CSV.
#[derive(Debug, Serialize)]
struct TrendRow {
    week_start: String,
    risk: Risk,
    count: i64,
}

fn write_json<T: Serialize>(w: &mut dyn Write, rows: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Jsonl => {
            for r in rows {
                writeln!(w, "{}", serde_json::to_string(r)?)?;
            }
        }
        _ => writeln!(w, "{}", serde_json::to_string_pretty(rows)?)?,
    }
    Ok(())
}

fn write_csv<T: Serialize>(w: &mut dyn Write, rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_findings(w: &mut dyn Write, rows: &[Finding], out: &OutputArgs) -> Result<()> {
    if out.csv {
        return write_csv(w, rows);
    }
    match out.format {
        OutputFormat::Text => {
            for f in rows {
                let port = f.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
                writeln!(
                    w,
                    "{:<8} {:<15} {:>5}/{:<4} {:>7}  {}",
                    f.risk,
                    f.host,
                    port,
                    f.protocol.as_deref().unwrap_or("-"),
                    f.plugin_id,
                    f.name.as_deref().unwrap_or("")
                )?;
            }
            writeln!(w, "{} findings", rows.len())?;
        }
        fmt => write_json(w, rows, fmt)?,
    }
    w.flush()?;
    Ok(())
}

pub fn write_trend(w: &mut dyn Write, series: &[TrendSeries], out: &OutputArgs) -> Result<()> {
    let rows: Vec<TrendRow> = series
        .iter()
        .flat_map(|s| {
            s.points.iter().map(move |p| TrendRow { week_start: p.week_start.to_string(), risk: s.risk, count: p.count })
        })
        .collect();
    if out.csv {
        return write_csv(w, &rows);
    }
    match out.format {
        OutputFormat::Text => {
            write!(w, "{:<10}", "week")?;
            for s in series {
                write!(w, " {:>8}", s.risk)?;
            }
            writeln!(w)?;
            let weeks = series.first().map(|s| s.points.len()).unwrap_or(0);
            for i in 0..weeks {
                write!(w, "{:<10}", series[0].points[i].week_start.to_string())?;
                for s in series {
                    write!(w, " {:>8}", s.points[i].count)?;
                }
                writeln!(w)?;
            }
        }
        fmt => write_json(w, &rows, fmt)?,
    }
    w.flush()?;
    Ok(())
}

pub fn write_kbs(w: &mut dyn Write, rows: &[KbExposure], out: &OutputArgs) -> Result<()> {
    if out.csv {
        return write_csv(w, rows);
    }
    match out.format {
        OutputFormat::Text => {
            for k in rows {
                writeln!(
                    w,
                    "{:<12} {:<15} {:<8} {:>7}  {}{}",
                    k.kb,
                    k.host,
                    k.risk,
                    k.plugin_id,
                    k.cve.as_deref().unwrap_or("-"),
                    if k.exploitable { "  (exploitable)" } else { "" }
                )?;
            }
        }
        fmt => write_json(w, rows, fmt)?,
    }
    w.flush()?;
    Ok(())
}
