//! Runs a list of configurations, one isolated unit of work each.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::aggregator::{ResultAggregator, validated_table_path};
use crate::error::RunError;
use crate::executor::RunExecutor;
use crate::model::{ExperimentConfig, RunFailureRecord, SummaryRow};
use crate::reference::MatchSet;
use crate::resolver::GeneLookup;
use crate::validation::RunValidator;

#[cfg(test)]
mod tests;

/// Cooperative stop signal, checked before each configuration starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// An elapsed deadline latches the flag, so every later check agrees.
    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            self.cancel();
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Worker threads; 1 runs configurations in order on the calling thread.
    pub jobs: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self { jobs: 1 }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Succeeded(SummaryRow),
    Failed(RunError),
    Cancelled,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config: ExperimentConfig,
    pub outcome: RunOutcome,
}

/// Per-configuration outcomes, in configuration order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: Vec<ConfigReport>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.reports.len()
    }

    pub fn summaries(&self) -> impl Iterator<Item = &SummaryRow> {
        self.reports.iter().filter_map(|report| match &report.outcome {
            RunOutcome::Succeeded(row) => Some(row),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ExperimentConfig, &RunError)> {
        self.reports.iter().filter_map(|report| match &report.outcome {
            RunOutcome::Failed(err) => Some((&report.config, err)),
            _ => None,
        })
    }

    pub fn cancelled(&self) -> impl Iterator<Item = &ExperimentConfig> {
        self.reports
            .iter()
            .filter(|report| matches!(report.outcome, RunOutcome::Cancelled))
            .map(|report| &report.config)
    }

    pub fn succeeded_count(&self) -> usize {
        self.summaries().count()
    }

    pub fn failure_records(&self) -> Vec<RunFailureRecord> {
        self.failures()
            .map(|(config, err)| {
                let (cancer, tag) = config.identity();
                RunFailureRecord {
                    cancer: cancer.code().to_string(),
                    tag,
                    error_kind: err.kind().to_string(),
                    error: err.to_string(),
                }
            })
            .collect()
    }

    /// Logs the "k of n" line and every failed or skipped tag.
    pub fn log_outcome(&self) {
        let failed: Vec<String> = self.failures().map(|(config, _)| config.to_string()).collect();
        let cancelled: Vec<String> = self.cancelled().map(ExperimentConfig::to_string).collect();

        info!(
            succeeded = self.succeeded_count(),
            total = self.total(),
            failed = failed.len(),
            cancelled = cancelled.len(),
            "batch completed: {} of {} configurations succeeded",
            self.succeeded_count(),
            self.total()
        );
        if !failed.is_empty() {
            warn!(tags = %failed.join(", "), "failed configurations");
        }
        if !cancelled.is_empty() {
            warn!(tags = %cancelled.join(", "), "cancelled before start");
        }
    }
}

/// Everything one unit of work needs. Shared read-only across workers except
/// for the aggregator, which serializes its own appends.
pub struct BatchRunner<'a> {
    executor: &'a RunExecutor,
    lookup: &'a dyn GeneLookup,
    match_set: &'a MatchSet,
    aggregator: &'a ResultAggregator,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        executor: &'a RunExecutor,
        lookup: &'a dyn GeneLookup,
        match_set: &'a MatchSet,
        aggregator: &'a ResultAggregator,
    ) -> Self {
        Self {
            executor,
            lookup,
            match_set,
            aggregator,
        }
    }

    pub fn run(
        &self,
        configs: &[ExperimentConfig],
        options: BatchOptions,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let total = configs.len();
        let started = Instant::now();
        info!(total, jobs = options.jobs, "starting batch");

        let reports: Vec<ConfigReport> = if options.jobs <= 1 {
            configs
                .iter()
                .enumerate()
                .map(|(index, config)| self.run_isolated(index, total, config, cancel))
                .collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.jobs)
                .build()
                .context("failed to build worker pool")?;
            pool.install(|| {
                configs
                    .par_iter()
                    .enumerate()
                    .map(|(index, config)| self.run_isolated(index, total, config, cancel))
                    .collect()
            })
        };

        let report = BatchReport { reports };
        info!(elapsed_ms = started.elapsed().as_millis(), "batch finished");
        Ok(report)
    }

    fn run_isolated(
        &self,
        index: usize,
        total: usize,
        config: &ExperimentConfig,
        cancel: &CancellationToken,
    ) -> ConfigReport {
        if cancel.is_cancelled() {
            return ConfigReport {
                config: config.clone(),
                outcome: RunOutcome::Cancelled,
            };
        }

        info!(
            position = index + 1,
            total,
            cancer = %config.cancer(),
            tag = %config.tag(),
            "configuration started"
        );

        let outcome = match self.run_one(config) {
            Ok(row) => RunOutcome::Succeeded(row),
            Err(err) => {
                error!(
                    cancer = %config.cancer(),
                    tag = %config.tag(),
                    kind = err.kind(),
                    error = %err,
                    "configuration failed"
                );
                if let RunError::EngineFailure { stdout, .. } = &err {
                    if !stdout.trim().is_empty() {
                        warn!(tag = %config.tag(), stdout = %stdout.trim(), "engine stdout");
                    }
                }
                RunOutcome::Failed(err)
            }
        };

        ConfigReport {
            config: config.clone(),
            outcome,
        }
    }

    fn run_one(&self, config: &ExperimentConfig) -> Result<SummaryRow, RunError> {
        let artifact = self.executor.execute(config)?;
        let validated_path =
            validated_table_path(&artifact.ranked_gene_path, &artifact.config.tag());

        let validator = RunValidator::new(self.lookup, self.match_set);
        let rows = validator.validate(&artifact.ranked_gene_path, &validated_path)?;

        self.aggregator.record_run(config, &rows)
    }
}
