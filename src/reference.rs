//! Drug-target reference table (OncoKB export) and symbol matching.
//!
//! Matching is exact and case-sensitive after trimming both sides. Alias
//! spellings that differ only in case will not match unless listed.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use calamine::{Data, Reader, open_workbook_auto};
use csv::{ReaderBuilder, StringRecord};
use tracing::{info, warn};

use crate::error::MalformedReferenceRow;
use crate::model::{Classification, ReferenceEntry, ResolvedGeneRow};
use crate::util::delimiter_for;

const SYMBOL_COLUMN: &str = "Hugo Symbol";
const DRUG_TARGET_COLUMN: &str = "Cancer Drug target gene";
const ALIASES_COLUMN: &str = "Gene Aliases";
const SPREADSHEET_EXTENSIONS: [&str; 3] = ["xlsx", "xlsm", "xls"];

#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    pub entries: Vec<ReferenceEntry>,
    pub skipped: Vec<MalformedReferenceRow>,
}

impl ReferenceTable {
    pub fn drug_target_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.is_drug_target)
            .count()
    }
}

/// Rows as read from disk, before column parsing. A row that could not be
/// read at all carries its reader error.
type RawRows = Vec<Result<StringRecord, String>>;

/// Loads the reference table from CSV, TSV or the first sheet of an Excel
/// workbook. Bad rows are logged and skipped; only an unreadable file or
/// missing required columns fail the load.
pub fn load_reference_table(path: &Path) -> Result<ReferenceTable> {
    let (headers, rows) = if is_spreadsheet(path) {
        read_spreadsheet(path)?
    } else {
        read_delimited(path)?
    };
    let columns = ReferenceColumns::locate(&headers)
        .with_context(|| format!("unexpected reference table layout in {}", path.display()))?;

    let mut table = ReferenceTable::default();
    for (index, record) in rows.into_iter().enumerate() {
        // Header is line 1.
        let line = index as u64 + 2;
        let parsed = record
            .map_err(|reason| MalformedReferenceRow { line, reason })
            .and_then(|record| columns.parse(&record, line));

        match parsed {
            Ok(entry) => table.entries.push(entry),
            Err(malformed) => {
                warn!(path = %path.display(), error = %malformed, "skipping reference row");
                table.skipped.push(malformed);
            }
        }
    }

    info!(
        path = %path.display(),
        entries = table.entries.len(),
        drug_targets = table.drug_target_count(),
        skipped = table.skipped.len(),
        "loaded reference table"
    );

    Ok(table)
}

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SPREADSHEET_EXTENSIONS
                .iter()
                .any(|candidate| ext.eq_ignore_ascii_case(candidate))
        })
}

fn read_delimited(path: &Path) -> Result<(StringRecord, RawRows)> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open reference table {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .clone();
    let rows = reader
        .records()
        .map(|record| record.map_err(|err| err.to_string()))
        .collect();

    Ok((headers, rows))
}

/// First worksheet only; its first row is the header.
fn read_spreadsheet(path: &Path) -> Result<(StringRecord, RawRows)> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open reference workbook {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .with_context(|| format!("workbook {} has no worksheets", path.display()))?
        .with_context(|| format!("failed to read first worksheet of {}", path.display()))?;

    let mut rows = range.rows().map(|cells| {
        cells
            .iter()
            .map(|cell| match cell {
                Data::Empty => String::new(),
                other => other.to_string(),
            })
            .collect::<StringRecord>()
    });
    let headers = rows
        .next()
        .with_context(|| format!("first worksheet of {} is empty", path.display()))?;

    Ok((headers, rows.map(Ok).collect()))
}

struct ReferenceColumns {
    symbol: usize,
    drug_target: usize,
    aliases: Option<usize>,
}

impl ReferenceColumns {
    fn locate(headers: &StringRecord) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|header| header.trim() == name);

        Ok(Self {
            symbol: find(SYMBOL_COLUMN).with_context(|| format!("missing `{SYMBOL_COLUMN}` column"))?,
            drug_target: find(DRUG_TARGET_COLUMN)
                .with_context(|| format!("missing `{DRUG_TARGET_COLUMN}` column"))?,
            aliases: find(ALIASES_COLUMN),
        })
    }

    fn parse(&self, record: &StringRecord, line: u64) -> Result<ReferenceEntry, MalformedReferenceRow> {
        let canonical_symbol = record
            .get(self.symbol)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| MalformedReferenceRow {
                line,
                reason: format!("empty `{SYMBOL_COLUMN}`"),
            })?
            .to_string();

        let is_drug_target = record
            .get(self.drug_target)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("yes"));

        let aliases = self
            .aliases
            .and_then(|index| record.get(index))
            .map(split_aliases)
            .unwrap_or_default();

        Ok(ReferenceEntry {
            canonical_symbol,
            aliases,
            is_drug_target,
        })
    }
}

/// Splits on any run of `;`, `,` or whitespace and drops empty tokens.
pub fn split_aliases(raw: &str) -> Vec<String> {
    raw.split(|character: char| character == ';' || character == ',' || character.is_whitespace())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

/// Every accepted spelling of a drug-target gene.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSet {
    names: HashSet<String>,
}

impl MatchSet {
    pub fn build(entries: &[ReferenceEntry]) -> Self {
        let mut names = HashSet::new();
        for entry in entries.iter().filter(|entry| entry.is_drug_target) {
            let canonical = entry.canonical_symbol.trim();
            if !canonical.is_empty() {
                names.insert(canonical.to_string());
            }
            names.extend(
                entry
                    .aliases
                    .iter()
                    .map(|alias| alias.trim())
                    .filter(|alias| !alias.is_empty())
                    .map(ToOwned::to_owned),
            );
        }
        Self { names }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name.trim())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub fn classify(row: &ResolvedGeneRow, match_set: &MatchSet) -> Classification {
    match row.symbol.as_deref() {
        Some(symbol) if match_set.contains(symbol) => Classification::Matched,
        _ => Classification::Unmatched,
    }
}
