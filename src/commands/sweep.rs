use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::aggregator::{ResultAggregator, SummaryTable};
use crate::batch::{BatchOptions, BatchReport, BatchRunner, CancellationToken};
use crate::cli::{SweepArgs, SweepPreset};
use crate::engine::SubprocessEngine;
use crate::executor::RunExecutor;
use crate::layout::DataLayout;
use crate::matrix::{DEFAULT_PAIRS, PRESET_PAIRS, SweepPlan, build_matrix, standard_sweep};
use crate::model::{
    AblationVariant, BatchCounts, BatchPaths, BatchRunManifest, Cancer, ExperimentConfig,
    InputHash, RunType,
};
use crate::reference::{MatchSet, ReferenceTable, load_reference_table};
use crate::resolver::MyGeneClient;
use crate::util::{now_utc_string, sha256_file, utc_compact_string, write_json_pretty};

const MANIFEST_VERSION: u32 = 1;

pub fn run(args: SweepArgs) -> Result<()> {
    let started_at = Utc::now();
    let run_id = format!("batch-{}", utc_compact_string(started_at));

    let configs = build_configs(&args)?;
    if configs.is_empty() {
        bail!("sweep has no configurations to run");
    }

    // Engine paths must survive `--engine-dir`.
    let data_root = absolute(&args.data_root)?;
    let output_root = absolute(&args.output_root)?;
    let summary_path = args
        .summary_path
        .clone()
        .unwrap_or_else(|| output_root.join("summary.csv"));
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        output_root
            .join("manifests")
            .join(format!("batch_run_{}.json", utc_compact_string(started_at)))
    });

    info!(
        run_id = %run_id,
        configurations = configs.len(),
        data_root = %data_root.display(),
        output_root = %output_root.display(),
        summary = %summary_path.display(),
        "sweep requested"
    );

    let mut warnings = Vec::new();
    let reference = load_reference_table(&args.reference)?;
    let match_set = MatchSet::build(&reference.entries);
    if match_set.is_empty() {
        let message = format!(
            "reference table {} has no drug-target genes; every run will report 0 hits",
            args.reference.display()
        );
        warn!("{message}");
        warnings.push(message);
    }

    let layout = DataLayout::new(&data_root);
    if !layout.root().is_dir() {
        warn!(
            data_root = %layout.root().display(),
            "data root does not exist; every run will fail on missing inputs"
        );
    }
    let engine = SubprocessEngine::new(&args.engine.engine_program)
        .with_prefix_args(args.engine.engine_args.clone())
        .with_working_dir(args.engine.engine_dir.clone())
        .with_timeout(args.engine.engine_timeout_secs.map(Duration::from_secs));
    let executor = RunExecutor::new(layout.clone(), &output_root, Arc::new(engine));
    let lookup = MyGeneClient::new(
        &args.lookup.lookup_url,
        args.lookup.lookup_timeout_secs.map(Duration::from_secs),
    )
    .context("failed to build gene lookup client")?;
    let aggregator = ResultAggregator::new(SummaryTable::from_path(&summary_path));

    let input_hashes = hash_inputs(
        &[args.reference.clone(), layout.interaction_network()],
        &mut warnings,
    );

    let cancel = budget_token(args.time_budget_secs);
    let runner = BatchRunner::new(&executor, &lookup, &match_set, &aggregator);
    let report = runner.run(&configs, BatchOptions { jobs: args.jobs.max(1) }, &cancel)?;
    report.log_outcome();
    info!(
        path = %aggregator.table().path().display(),
        appended = report.succeeded_count(),
        "summary table updated"
    );

    let manifest = build_manifest(ManifestInputs {
        run_id,
        started_at: started_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        command: render_sweep_command(&args),
        jobs: args.jobs.max(1),
        paths: BatchPaths {
            data_root: data_root.display().to_string(),
            output_root: output_root.display().to_string(),
            reference_path: args.reference.display().to_string(),
            summary_path: summary_path.display().to_string(),
            manifest_path: manifest_path.display().to_string(),
        },
        reference: &reference,
        match_set: &match_set,
        input_hashes,
        warnings,
        report: &report,
    });
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), status = %manifest.status, "wrote batch manifest");

    Ok(())
}

/// A budget too large to represent as an instant means no deadline.
fn budget_token(time_budget_secs: Option<u64>) -> CancellationToken {
    match time_budget_secs.and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs))) {
        Some(deadline) => CancellationToken::with_deadline(deadline),
        None => CancellationToken::new(),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("failed to resolve {}", path.display()))
}

fn build_configs(args: &SweepArgs) -> Result<Vec<ExperimentConfig>> {
    if let Some(plan_path) = &args.plan {
        let plan = SweepPlan::load(plan_path)?;
        info!(path = %plan_path.display(), cancers = plan.cancers.len(), "loaded sweep plan");
        return Ok(plan.configs());
    }

    let cancers: Vec<Cancer> = if args.cancers.is_empty() {
        Cancer::ALL.to_vec()
    } else {
        args.cancers.clone()
    };

    let configs = match args.preset {
        Some(SweepPreset::Standard) => standard_sweep(&cancers, args.restart_probability),
        Some(SweepPreset::Ablation) => cancers
            .iter()
            .flat_map(|&cancer| {
                build_matrix(
                    RunType::Ablation,
                    cancer,
                    &AblationVariant::CANONICAL,
                    &PRESET_PAIRS,
                    args.restart_probability,
                )
            })
            .collect(),
        None => {
            let variants: &[AblationVariant] = if args.variants.is_empty() {
                &AblationVariant::CANONICAL
            } else {
                &args.variants
            };
            let pairs = if args.pairs.is_empty() {
                DEFAULT_PAIRS.to_vec()
            } else {
                args.pairs.clone()
            };
            cancers
                .iter()
                .flat_map(|&cancer| {
                    build_matrix(
                        args.run_type.into(),
                        cancer,
                        variants,
                        &pairs,
                        args.restart_probability,
                    )
                })
                .collect()
        }
    };

    Ok(configs)
}

fn hash_inputs(paths: &[PathBuf], warnings: &mut Vec<String>) -> Vec<InputHash> {
    let mut hashes = Vec::with_capacity(paths.len());
    for path in paths {
        match sha256_file(path) {
            Ok(sha256) => hashes.push(InputHash {
                path: path.display().to_string(),
                sha256,
            }),
            Err(err) => {
                let message = format!("could not hash {}: {err:#}", path.display());
                warn!("{message}");
                warnings.push(message);
            }
        }
    }
    hashes
}

struct ManifestInputs<'a> {
    run_id: String,
    started_at: String,
    command: String,
    jobs: usize,
    paths: BatchPaths,
    reference: &'a ReferenceTable,
    match_set: &'a MatchSet,
    input_hashes: Vec<InputHash>,
    warnings: Vec<String>,
    report: &'a BatchReport,
}

fn build_manifest(inputs: ManifestInputs<'_>) -> BatchRunManifest {
    let report = inputs.report;
    let failures = report.failure_records();
    let cancelled_tags: Vec<String> = report.cancelled().map(ExperimentConfig::to_string).collect();
    let status = if !cancelled_tags.is_empty() {
        "cancelled"
    } else if failures.is_empty() {
        "completed"
    } else {
        "completed_with_failures"
    };

    BatchRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: inputs.run_id,
        status: status.to_string(),
        started_at: inputs.started_at,
        updated_at: now_utc_string(),
        command: inputs.command,
        jobs: inputs.jobs,
        paths: inputs.paths,
        counts: BatchCounts {
            configured: report.total(),
            succeeded: report.succeeded_count(),
            failed: failures.len(),
            cancelled: cancelled_tags.len(),
            reference_entries: inputs.reference.entries.len(),
            reference_rows_skipped: inputs.reference.skipped.len(),
            match_set_size: inputs.match_set.len(),
        },
        input_hashes: inputs.input_hashes,
        results: report.summaries().cloned().collect(),
        failures,
        cancelled_tags,
        warnings: inputs.warnings,
    }
}

fn render_sweep_command(args: &SweepArgs) -> String {
    let mut command = vec![
        "brw-sweep".to_string(),
        "sweep".to_string(),
        "--data-root".to_string(),
        args.data_root.display().to_string(),
        "--output-root".to_string(),
        args.output_root.display().to_string(),
        "--reference".to_string(),
        args.reference.display().to_string(),
    ];

    if let Some(path) = &args.summary_path {
        command.push("--summary-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(preset) = args.preset {
        command.push("--preset".to_string());
        command.push(
            match preset {
                SweepPreset::Standard => "standard",
                SweepPreset::Ablation => "ablation",
            }
            .to_string(),
        );
    }
    if let Some(path) = &args.plan {
        command.push("--plan".to_string());
        command.push(path.display().to_string());
    }
    for cancer in &args.cancers {
        command.push("--cancer".to_string());
        command.push(cancer.code().to_string());
    }
    for variant in &args.variants {
        command.push("--variant".to_string());
        command.push(variant.name().to_string());
    }
    for pair in &args.pairs {
        command.push("--pair".to_string());
        command.push(format!("{},{}", pair.alpha(), pair.beta()));
    }
    command.push("--restart-probability".to_string());
    command.push(args.restart_probability.to_string());
    if args.jobs > 1 {
        command.push("--jobs".to_string());
        command.push(args.jobs.to_string());
    }
    if let Some(secs) = args.time_budget_secs {
        command.push("--time-budget-secs".to_string());
        command.push(secs.to_string());
    }
    if let Some(secs) = args.engine.engine_timeout_secs {
        command.push("--engine-timeout-secs".to_string());
        command.push(secs.to_string());
    }

    command.join(" ")
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Commands};

    fn sweep_args(argv: &[&str]) -> SweepArgs {
        let mut full = vec!["brw-sweep", "sweep"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).expect("arguments should parse").command {
            Commands::Sweep(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn defaults_cover_every_cancer_variant_and_default_pair() {
        let configs = build_configs(&sweep_args(&[])).expect("configs");
        assert_eq!(configs.len(), Cancer::ALL.len() * 5 * DEFAULT_PAIRS.len());
        assert!(configs.iter().all(|config| config.run_type() == RunType::Ablation));
    }

    #[test]
    fn explicit_grid_yields_variant_major_configs() {
        let args = sweep_args(&[
            "--cancer",
            "brca",
            "--variant",
            "noDE",
            "--variant",
            "PPI_only",
            "--pair",
            "0.8,0.2",
            "--run-type",
            "tuning",
        ]);
        let tags: Vec<String> = build_configs(&args)
            .expect("configs")
            .iter()
            .map(ExperimentConfig::tag)
            .collect();
        assert_eq!(tags, vec!["noDE_A0.8_B0.2", "PPI_only_A0.8_B0.2"]);
    }

    #[test]
    fn standard_preset_uses_variant_tags_then_tuning_grid() {
        let args = sweep_args(&["--preset", "standard", "--cancer", "LUAD"]);
        let configs = build_configs(&args).expect("configs");
        assert_eq!(configs.len(), 15);
        assert_eq!(configs[0].tag(), "FULL");
        assert_eq!(configs[5].run_type(), RunType::Tuning);
    }

    #[test]
    fn out_of_range_pair_is_rejected_at_parse_time() {
        let parsed = Cli::try_parse_from(["brw-sweep", "sweep", "--pair", "1.5,0.2"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn oversized_time_budget_runs_without_deadline() {
        assert!(!budget_token(Some(u64::MAX)).is_cancelled());
        assert!(!budget_token(None).is_cancelled());
        assert!(budget_token(Some(0)).is_cancelled());
    }

    #[test]
    fn rendered_command_lists_grid_flags() {
        let args = sweep_args(&["--cancer", "LUAD", "--pair", "0.25,0.75", "--jobs", "4"]);
        let command = render_sweep_command(&args);
        assert!(command.starts_with("brw-sweep sweep --data-root data_set"));
        assert!(command.contains("--cancer LUAD"));
        assert!(command.contains("--pair 0.25,0.75"));
        assert!(command.contains("--restart-probability 0.9"));
        assert!(command.contains("--jobs 4"));
    }
}
