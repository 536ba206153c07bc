use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use csv::WriterBuilder;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregator::{SUMMARY_COLUMNS, SummaryTable};
use crate::cli::SummaryArgs;
use crate::model::{AblationVariant, Cancer, SummaryRow, WeightPair, format_weight};
use crate::util::ensure_parent;

const PAIR_TOLERANCE: f64 = 1e-9;

/// Reads the weight pair encoded in a tag such as `FULL_A0.75_B0.25`.
pub struct TagPairParser {
    pattern: Regex,
}

impl TagPairParser {
    pub fn new() -> Result<Self> {
        let pattern =
            Regex::new(r"A([\d.]+)_B([\d.]+)").context("failed to compile tag pair regex")?;
        Ok(Self { pattern })
    }

    pub fn pair(&self, tag: &str) -> Option<(f64, f64)> {
        let captures = self.pattern.captures(tag)?;
        let alpha = captures.get(1)?.as_str().parse().ok()?;
        let beta = captures.get(2)?.as_str().parse().ok()?;
        Some((alpha, beta))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SummaryFilter {
    pub cancers: Vec<Cancer>,
    pub variants: Vec<String>,
    pub pairs: Vec<WeightPair>,
}

impl SummaryFilter {
    pub fn matches(&self, row: &SummaryRow, parser: &TagPairParser) -> bool {
        let cancer_ok = self.cancers.is_empty()
            || self
                .cancers
                .iter()
                .any(|cancer| cancer.code().eq_ignore_ascii_case(row.cancer.trim()));

        let tag = row.tag.to_lowercase();
        let variant_ok = self.variants.is_empty()
            || self
                .variants
                .iter()
                .any(|variant| tag.contains(&variant.trim().to_lowercase()));

        let pair_ok = self.pairs.is_empty()
            || parser.pair(&row.tag).is_some_and(|(alpha, beta)| {
                self.pairs.iter().any(|pair| {
                    (pair.alpha() - alpha).abs() < PAIR_TOLERANCE
                        && (pair.beta() - beta).abs() < PAIR_TOLERANCE
                })
            });

        cancer_ok && variant_ok && pair_ok
    }
}

/// Longest canonical variant name the tag starts with; `FULL_A1.0_B1.0` is FULL.
pub fn variant_from_tag(tag: &str) -> Option<AblationVariant> {
    AblationVariant::CANONICAL
        .into_iter()
        .filter(|variant| {
            let name = variant.name();
            tag == name || tag.starts_with(&format!("{name}_"))
        })
        .max_by_key(|variant| variant.name().len())
}

/// Keeps the last row per `(Cancer, Tag)`, ordered by that last occurrence.
pub fn keep_latest(rows: Vec<SummaryRow>) -> Vec<SummaryRow> {
    let mut last_index: HashMap<(String, String), usize> = HashMap::new();
    for (index, row) in rows.iter().enumerate() {
        last_index.insert((row.cancer.clone(), row.tag.clone()), index);
    }
    rows.into_iter()
        .enumerate()
        .filter(|(index, row)| last_index.get(&(row.cancer.clone(), row.tag.clone())) == Some(index))
        .map(|(_, row)| row)
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupMean {
    pub key: String,
    pub runs: usize,
    pub mean_hits: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SummaryStats {
    pub total_runs: usize,
    pub mean_hits: f64,
    pub best: Option<SummaryRow>,
    pub by_variant: Vec<GroupMean>,
    pub by_pair: Vec<GroupMean>,
}

pub fn compute_stats(rows: &[SummaryRow], parser: &TagPairParser) -> SummaryStats {
    let total_runs = rows.len();
    let mean_hits = mean(rows.iter().map(|row| row.reference_hits));

    // First row wins ties so the earliest best run is reported.
    let best = rows
        .iter()
        .fold(None::<&SummaryRow>, |best, row| match best {
            Some(current) if current.reference_hits >= row.reference_hits => Some(current),
            _ => Some(row),
        })
        .cloned();

    let mut by_variant: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    let mut by_pair: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for row in rows {
        if let Some(variant) = variant_from_tag(&row.tag) {
            by_variant
                .entry(variant.name().to_string())
                .or_default()
                .push(row.reference_hits);
        }
        if let Some((alpha, beta)) = parser.pair(&row.tag) {
            by_pair
                .entry(format!("A{}_B{}", format_weight(alpha), format_weight(beta)))
                .or_default()
                .push(row.reference_hits);
        }
    }

    SummaryStats {
        total_runs,
        mean_hits,
        best,
        by_variant: group_means(by_variant),
        by_pair: group_means(by_pair),
    }
}

fn mean(values: impl Iterator<Item = u32>) -> f64 {
    let (sum, count) = values.fold((0_u64, 0_usize), |(sum, count), value| {
        (sum + u64::from(value), count + 1)
    });
    if count == 0 { 0.0 } else { sum as f64 / count as f64 }
}

fn group_means(groups: BTreeMap<String, Vec<u32>>) -> Vec<GroupMean> {
    groups
        .into_iter()
        .map(|(key, hits)| GroupMean {
            key,
            runs: hits.len(),
            mean_hits: mean(hits.into_iter()),
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct SummaryResponse<'a> {
    summary_path: String,
    rows: &'a [SummaryRow],
    stats: &'a SummaryStats,
}

pub fn run(args: SummaryArgs) -> Result<()> {
    let table = SummaryTable::from_path(&args.summary_path);
    if !table.path().exists() {
        warn!(path = %table.path().display(), "summary table missing");
    }

    let parser = TagPairParser::new()?;
    let loaded = table.load()?;
    let total_loaded = loaded.len();
    let filter = SummaryFilter {
        cancers: args.cancers.clone(),
        variants: args.variants.clone(),
        pairs: args.pairs.clone(),
    };
    let mut rows: Vec<SummaryRow> = loaded
        .into_iter()
        .filter(|row| filter.matches(row, &parser))
        .collect();
    if args.latest {
        rows = keep_latest(rows);
    }
    let stats = compute_stats(&rows, &parser);

    info!(
        path = %table.path().display(),
        loaded = total_loaded,
        selected = rows.len(),
        latest_only = args.latest,
        "summary loaded"
    );

    if let Some(export_path) = &args.export {
        export_rows(export_path, &rows)?;
        info!(path = %export_path.display(), rows = rows.len(), "exported summary rows");
    }

    if args.json {
        write_json_response(&table, &rows, &stats)
    } else {
        write_text_response(&rows, &stats)
    }
}

fn export_rows(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer
        .write_record(SUMMARY_COLUMNS)
        .with_context(|| format!("failed to write header to {}", path.display()))?;
    for row in rows {
        writer
            .write_record([
                row.run_type.clone(),
                row.cancer.clone(),
                row.tag.clone(),
                row.alpha.map(format_weight).unwrap_or_default(),
                row.beta.map(format_weight).unwrap_or_default(),
                row.reference_hits.to_string(),
            ])
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

fn write_json_response(table: &SummaryTable, rows: &[SummaryRow], stats: &SummaryStats) -> Result<()> {
    let response = SummaryResponse {
        summary_path: table.path().display().to_string(),
        rows,
        stats,
    };

    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, &response)
        .context("failed to serialize summary json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

fn write_text_response(rows: &[SummaryRow], stats: &SummaryStats) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "{}", SUMMARY_COLUMNS.join("\t"))?;
    for row in rows {
        writeln!(
            output,
            "{}\t{}\t{}\t{}\t{}\t{}",
            row.run_type,
            row.cancer,
            row.tag,
            row.alpha.map(format_weight).unwrap_or_else(|| "-".to_string()),
            row.beta.map(format_weight).unwrap_or_else(|| "-".to_string()),
            row.reference_hits,
        )?;
    }

    writeln!(output)?;
    writeln!(output, "Runs: {}", stats.total_runs)?;
    writeln!(output, "Mean hits: {:.2}", stats.mean_hits)?;
    match &stats.best {
        Some(best) => writeln!(
            output,
            "Best: {}/{} ({}) with {} hits",
            best.cancer, best.tag, best.run_type, best.reference_hits
        )?,
        None => writeln!(output, "Best: -")?,
    }
    for (title, groups) in [("By variant", &stats.by_variant), ("By pair", &stats.by_pair)] {
        if groups.is_empty() {
            continue;
        }
        writeln!(output, "{title}:")?;
        for group in groups {
            writeln!(
                output,
                "  {}: mean {:.2} over {} runs",
                group.key, group.mean_hits, group.runs
            )?;
        }
    }

    output.flush()?;
    Ok(())
}
