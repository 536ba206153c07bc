//! Durable, append-only summary of every completed run.

use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::error::RunError;
use crate::model::{ExperimentConfig, SummaryRow, ValidatedGeneRow, format_weight};
use crate::util::{ensure_parent, now_utc_string};

pub const SUMMARY_COLUMNS: [&str; 6] = ["Type", "Cancer", "Tag", "Alpha", "Beta", "OncoKB_hits"];
pub const VALIDATED_COLUMNS: [&str; 4] = ["Ensembl_ID", "Symbol", "Score", "In_OncoKB"];

/// Summary table backend, picked by file extension.
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryTable {
    Csv(PathBuf),
    Sqlite(PathBuf),
}

impl SummaryTable {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("sqlite") | Some("db") => SummaryTable::Sqlite(path),
            _ => SummaryTable::Csv(path),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            SummaryTable::Csv(path) | SummaryTable::Sqlite(path) => path,
        }
    }

    pub fn append(&self, row: &SummaryRow) -> Result<()> {
        match self {
            SummaryTable::Csv(path) => append_csv(path, row),
            SummaryTable::Sqlite(path) => append_sqlite(path, row),
        }
    }

    /// All rows in write order, duplicates included. A missing table is empty.
    pub fn load(&self) -> Result<Vec<SummaryRow>> {
        if !self.path().exists() {
            return Ok(Vec::new());
        }
        match self {
            SummaryTable::Csv(path) => load_csv(path),
            SummaryTable::Sqlite(path) => load_sqlite(path),
        }
    }
}

fn append_csv(path: &Path, row: &SummaryRow) -> Result<()> {
    ensure_parent(path)?;
    let needs_header = std::fs::metadata(path)
        .map(|meta| meta.len() == 0)
        .unwrap_or(true);

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("failed to open summary table {}", path.display()))?;
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));

    if needs_header {
        writer
            .write_record(SUMMARY_COLUMNS)
            .with_context(|| format!("failed to write header to {}", path.display()))?;
    }

    writer
        .write_record([
            row.run_type.clone(),
            row.cancer.clone(),
            row.tag.clone(),
            row.alpha.map(format_weight).unwrap_or_default(),
            row.beta.map(format_weight).unwrap_or_default(),
            row.reference_hits.to_string(),
        ])
        .with_context(|| format!("failed to append to {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;

    Ok(())
}

fn load_csv(path: &Path) -> Result<Vec<SummaryRow>> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open summary table {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .clone();
    let index_of = |name: &str| headers.iter().position(|header| header.trim() == name);
    let indices: Vec<Option<usize>> = SUMMARY_COLUMNS.iter().map(|name| index_of(*name)).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("failed to read {}", path.display()))?;
        let text = |column: usize| field(&record, indices[column]).to_string();

        rows.push(SummaryRow {
            run_type: text(0),
            cancer: text(1),
            tag: text(2),
            alpha: parse_number(field(&record, indices[3])),
            beta: parse_number(field(&record, indices[4])),
            restart_probability: None,
            reference_hits: coerce_hits(parse_number(field(&record, indices[5]))),
        });
    }

    Ok(rows)
}

fn field(record: &StringRecord, index: Option<usize>) -> &str {
    index
        .and_then(|index| record.get(index))
        .map(str::trim)
        .unwrap_or_default()
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Missing, NaN and negative hit counts all read as zero.
fn coerce_hits(value: Option<f64>) -> u32 {
    match value {
        Some(value) if value > 0.0 => value.round().min(f64::from(u32::MAX)) as u32,
        _ => 0,
    }
}

fn open_sqlite(path: &Path) -> Result<Connection> {
    ensure_parent(path)?;
    let connection = Connection::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS summary (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_type TEXT NOT NULL,
                cancer TEXT NOT NULL,
                tag TEXT NOT NULL,
                alpha REAL,
                beta REAL,
                restart_probability REAL,
                oncokb_hits INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            );",
        )
        .context("failed to ensure summary schema")?;
    Ok(connection)
}

fn append_sqlite(path: &Path, row: &SummaryRow) -> Result<()> {
    let connection = open_sqlite(path)?;
    connection
        .execute(
            "INSERT INTO summary
                (run_type, cancer, tag, alpha, beta, restart_probability, oncokb_hits, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.run_type,
                row.cancer,
                row.tag,
                row.alpha,
                row.beta,
                row.restart_probability,
                row.reference_hits,
                now_utc_string(),
            ],
        )
        .with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

fn load_sqlite(path: &Path) -> Result<Vec<SummaryRow>> {
    let connection = open_sqlite(path)?;
    let mut statement = connection
        .prepare(
            "SELECT run_type, cancer, tag, alpha, beta, restart_probability, oncokb_hits
             FROM summary ORDER BY id",
        )
        .context("failed to prepare summary query")?;

    let rows = statement
        .query_map([], |row| {
            let hits: Option<i64> = row.get(6)?;
            Ok(SummaryRow {
                run_type: row.get(0)?,
                cancer: row.get(1)?,
                tag: row.get(2)?,
                alpha: row.get(3)?,
                beta: row.get(4)?,
                restart_probability: row.get(5)?,
                reference_hits: coerce_hits(hits.map(|value| value as f64)),
            })
        })
        .context("failed to query summary rows")?
        .collect::<rusqlite::Result<Vec<SummaryRow>>>()
        .context("failed to decode summary rows")?;

    Ok(rows)
}

/// Writes `top100_<tag>.tsv`: one line per validated gene, rank order.
pub fn write_validated_table(path: &Path, rows: &[ValidatedGeneRow]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    writer
        .write_record(VALIDATED_COLUMNS)
        .with_context(|| format!("failed to write header to {}", path.display()))?;
    for row in rows {
        writer
            .write_record([
                row.gene.identifier.as_str(),
                row.gene.symbol.as_deref().unwrap_or_default(),
                row.gene.score.to_string().as_str(),
                row.classification.as_str(),
            ])
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;

    Ok(())
}

pub fn validated_table_path(ranked_gene_path: &Path, tag: &str) -> PathBuf {
    ranked_gene_path.with_file_name(format!("top100_{tag}.tsv"))
}

pub fn count_hits(rows: &[ValidatedGeneRow]) -> u32 {
    rows.iter()
        .filter(|row| row.classification.is_match())
        .count() as u32
}

/// Single writer for the summary table; safe to share across workers.
#[derive(Debug)]
pub struct ResultAggregator {
    table: SummaryTable,
    write_lock: Mutex<()>,
}

impl ResultAggregator {
    pub fn new(table: SummaryTable) -> Self {
        Self {
            table,
            write_lock: Mutex::new(()),
        }
    }

    pub fn table(&self) -> &SummaryTable {
        &self.table
    }

    pub fn record_run(
        &self,
        config: &ExperimentConfig,
        rows: &[ValidatedGeneRow],
    ) -> Result<SummaryRow, RunError> {
        let row = SummaryRow::for_config(config, count_hits(rows));

        {
            let _guard = self
                .write_lock
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            self.table.append(&row).map_err(RunError::Summary)?;
        }

        debug!(path = %self.table.path().display(), tag = %row.tag, "summary row appended");
        info!(
            cancer = %row.cancer,
            tag = %row.tag,
            hits = row.reference_hits,
            genes = rows.len(),
            "recorded run"
        );
        Ok(row)
    }
}
