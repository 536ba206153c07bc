use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::aggregator::count_hits;
use crate::cli::CheckArgs;
use crate::model::ValidatedGeneRow;
use crate::reference::{MatchSet, load_reference_table};
use crate::resolver::MyGeneClient;
use crate::validation::RunValidator;

pub fn run(args: CheckArgs) -> Result<()> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input));

    info!(
        input = %args.input.display(),
        reference = %args.reference.display(),
        output = %output.display(),
        "check requested"
    );

    let reference = load_reference_table(&args.reference)?;
    let match_set = MatchSet::build(&reference.entries);
    let lookup = MyGeneClient::new(
        &args.lookup.lookup_url,
        args.lookup.lookup_timeout_secs.map(Duration::from_secs),
    )
    .context("failed to build gene lookup client")?;

    let validator = RunValidator::new(&lookup, &match_set);
    let rows = validator
        .validate(&args.input, &output)
        .with_context(|| format!("failed to validate {}", args.input.display()))?;

    log_top_rows(&rows, args.show);
    info!(
        genes = rows.len(),
        hits = count_hits(&rows),
        output = %output.display(),
        "check completed"
    );

    Ok(())
}

/// `results_FULL.txt` -> `top100_results_FULL.tsv` in the same directory.
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "engine_output".to_string());
    input.with_file_name(format!("top100_{stem}.tsv"))
}

fn log_top_rows(rows: &[ValidatedGeneRow], show: usize) {
    for row in rows.iter().take(show) {
        info!(
            rank = row.gene.rank,
            id = %row.gene.identifier,
            symbol = %row.gene.symbol.as_deref().unwrap_or("-"),
            score = row.gene.score,
            in_reference = row.classification.as_str(),
            "top gene"
        );
    }
}
