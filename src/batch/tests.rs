use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use super::*;
use crate::aggregator::SummaryTable;
use crate::engine::{Engine, EngineInvocation};
use crate::error::LookupError;
use crate::layout::DataLayout;
use crate::matrix::standard_sweep;
use crate::model::{
    AblationVariant, Cancer, ReferenceEntry, RestartProbability, RunType, WeightPair,
};

/// Writes a three-gene result; fails for any output path containing `fail_tag`.
struct FakeEngine {
    fail_tag: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeEngine {
    fn new(fail_tag: Option<&str>) -> Self {
        Self {
            fail_tag: fail_tag.map(ToOwned::to_owned),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl Engine for FakeEngine {
    fn run(&self, invocation: &EngineInvocation) -> Result<(), RunError> {
        let name = invocation
            .output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.calls.lock().expect("calls lock").push(name.clone());

        if let Some(tag) = &self.fail_tag {
            if name == format!("results_{tag}.txt") {
                return Err(RunError::EngineFailure {
                    status: "exit status: 1".to_string(),
                    stdout: String::new(),
                    stderr: "Traceback: boom".to_string(),
                });
            }
        }

        fs::write(
            &invocation.output,
            "GeneNames\tScore\nENSG_TP53\t0.9\nENSG_GAPDH\t0.5\nENSG_BRCA1\t0.1\n",
        )
        .expect("write engine output");
        Ok(())
    }
}

struct PrefixLookup;

impl GeneLookup for PrefixLookup {
    fn lookup_symbols(&self, identifiers: &[String]) -> Result<HashMap<String, String>, LookupError> {
        Ok(identifiers
            .iter()
            .map(|id| (id.clone(), id.trim_start_matches("ENSG_").to_string()))
            .collect())
    }
}

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, "x").expect("touch");
}

fn seed_inputs(root: &Path, cancer: Cancer) -> DataLayout {
    let layout = DataLayout::new(root.join("data_set"));
    touch(&layout.interaction_network());
    touch(&layout.ontology_graph());
    touch(&layout.seed_set(cancer));
    touch(&layout.differential_expression(cancer));
    touch(&layout.coexpression_network(cancer));
    touch(&layout.disease_ontology(cancer));
    layout
}

fn match_set() -> MatchSet {
    MatchSet::build(&[
        ReferenceEntry {
            canonical_symbol: "TP53".to_string(),
            aliases: Vec::new(),
            is_drug_target: true,
        },
        ReferenceEntry {
            canonical_symbol: "BRCA1".to_string(),
            aliases: vec!["BRCC1".to_string()],
            is_drug_target: true,
        },
    ])
}

fn ablation_configs(cancer: Cancer) -> Vec<ExperimentConfig> {
    AblationVariant::CANONICAL
        .into_iter()
        .map(|variant| {
            ExperimentConfig::new(
                RunType::Ablation,
                cancer,
                variant,
                WeightPair::new(0.5, 0.5).expect("weights"),
                RestartProbability::DEFAULT,
            )
            .with_tag(variant.name())
        })
        .collect()
}

struct Harness {
    _dir: tempfile::TempDir,
    executor: RunExecutor,
    aggregator: ResultAggregator,
    engine: Arc<FakeEngine>,
    outputs: std::path::PathBuf,
}

fn harness(cancer: Cancer, fail_tag: Option<&str>) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = seed_inputs(dir.path(), cancer);
    let outputs = dir.path().join("outputs");
    let engine = Arc::new(FakeEngine::new(fail_tag));
    let executor = RunExecutor::new(layout, &outputs, engine.clone());
    let aggregator = ResultAggregator::new(SummaryTable::from_path(outputs.join("summary.csv")));
    Harness {
        _dir: dir,
        executor,
        aggregator,
        engine,
        outputs,
    }
}

#[test]
fn ablation_batch_appends_one_row_per_variant() {
    let harness = harness(Cancer::Brca, None);
    let match_set = match_set();
    let runner = BatchRunner::new(&harness.executor, &PrefixLookup, &match_set, &harness.aggregator);

    let report = runner
        .run(&ablation_configs(Cancer::Brca), BatchOptions::default(), &CancellationToken::new())
        .expect("batch");

    assert_eq!(report.total(), 5);
    assert_eq!(report.succeeded_count(), 5);

    let rows = harness.aggregator.table().load().expect("load summary");
    let tags: Vec<&str> = rows.iter().map(|row| row.tag.as_str()).collect();
    assert_eq!(tags, vec!["FULL", "noCOEXP", "noDE", "noONTO", "PPI_only"]);
    assert!(rows.iter().all(|row| row.cancer == "BRCA" && row.run_type == "ABL"));
    assert!(rows.iter().all(|row| row.reference_hits == 2));
    assert!(harness.outputs.join("BRCA").join("top100_noDE.tsv").is_file());
}

#[test]
fn failed_configuration_is_isolated_and_not_recorded() {
    let harness = harness(Cancer::Brca, Some("noDE"));
    let match_set = match_set();
    let runner = BatchRunner::new(&harness.executor, &PrefixLookup, &match_set, &harness.aggregator);

    let report = runner
        .run(&ablation_configs(Cancer::Brca), BatchOptions::default(), &CancellationToken::new())
        .expect("batch");

    assert_eq!(report.succeeded_count(), 4);
    let failures = report.failure_records();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].tag, "noDE");
    assert_eq!(failures[0].error_kind, "engine_failure");
    assert!(failures[0].error.contains("boom"));

    let rows = harness.aggregator.table().load().expect("load summary");
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|row| row.tag != "noDE"));
    assert_eq!(harness.engine.calls.lock().expect("calls lock").len(), 5);
}

#[test]
fn missing_input_fails_only_the_affected_cancer() {
    let harness = harness(Cancer::Brca, None);
    let match_set = match_set();
    let runner = BatchRunner::new(&harness.executor, &PrefixLookup, &match_set, &harness.aggregator);

    let mut configs = ablation_configs(Cancer::Brca);
    configs.extend(ablation_configs(Cancer::Luad));
    let report = runner
        .run(&configs, BatchOptions::default(), &CancellationToken::new())
        .expect("batch");

    assert_eq!(report.succeeded_count(), 5);
    let failures = report.failure_records();
    assert_eq!(failures.len(), 5);
    assert!(failures.iter().all(|failure| failure.cancer == "LUAD"));
    assert!(failures.iter().all(|failure| failure.error_kind == "missing_input"));
}

#[test]
fn cancelled_batch_skips_remaining_configurations() {
    let harness = harness(Cancer::Brca, None);
    let match_set = match_set();
    let runner = BatchRunner::new(&harness.executor, &PrefixLookup, &match_set, &harness.aggregator);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = runner
        .run(&ablation_configs(Cancer::Brca), BatchOptions::default(), &cancel)
        .expect("batch");

    assert_eq!(report.succeeded_count(), 0);
    assert_eq!(report.cancelled().count(), 5);
    assert!(harness.engine.calls.lock().expect("calls lock").is_empty());
    assert!(harness.aggregator.table().load().expect("load").is_empty());
}

#[test]
fn expired_deadline_counts_as_cancelled() {
    let token = CancellationToken::with_deadline(Instant::now());
    assert!(token.is_cancelled());
    assert!(!CancellationToken::new().is_cancelled());
}

#[test]
fn parallel_batch_keeps_report_order_and_writes_every_row() {
    let harness = harness(Cancer::Stad, None);
    let match_set = match_set();
    let runner = BatchRunner::new(&harness.executor, &PrefixLookup, &match_set, &harness.aggregator);

    let configs = standard_sweep(&[Cancer::Stad], RestartProbability::DEFAULT);
    let report = runner
        .run(&configs, BatchOptions { jobs: 4 }, &CancellationToken::new())
        .expect("batch");

    let reported: Vec<String> = report.reports.iter().map(|item| item.config.tag()).collect();
    let expected: Vec<String> = configs.iter().map(ExperimentConfig::tag).collect();
    assert_eq!(reported, expected);
    assert_eq!(report.succeeded_count(), configs.len());

    let mut recorded: Vec<String> = harness
        .aggregator
        .table()
        .load()
        .expect("load summary")
        .into_iter()
        .map(|row| row.tag)
        .collect();
    let mut expected_sorted = expected.clone();
    recorded.sort();
    expected_sorted.sort();
    assert_eq!(recorded, expected_sorted);
}
