//! Experiment matrix generation. Pure data, no I/O.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::model::{
    AblationVariant, Cancer, ExperimentConfig, RestartProbability, RunType, WeightPair,
};

pub const DEFAULT_PAIRS: [WeightPair; 3] = [
    WeightPair::from_const(0.5, 0.5),
    WeightPair::from_const(0.25, 0.75),
    WeightPair::from_const(0.75, 0.25),
];

pub const PRESET_PAIRS: [WeightPair; 7] = [
    WeightPair::from_const(1.0, 1.0),
    WeightPair::from_const(0.0, 0.0),
    WeightPair::from_const(1.0, 0.0),
    WeightPair::from_const(0.0, 1.0),
    WeightPair::from_const(0.5, 0.5),
    WeightPair::from_const(0.75, 0.25),
    WeightPair::from_const(0.25, 0.75),
];

pub const TUNING_GRID: [WeightPair; 10] = [
    WeightPair::from_const(1.0, 1.0),
    WeightPair::from_const(0.0, 0.0),
    WeightPair::from_const(1.0, 0.0),
    WeightPair::from_const(0.0, 1.0),
    WeightPair::from_const(0.5, 0.5),
    WeightPair::from_const(0.75, 0.25),
    WeightPair::from_const(0.25, 0.75),
    WeightPair::from_const(0.8, 0.2),
    WeightPair::from_const(0.2, 0.8),
    WeightPair::from_const(0.25, 0.25),
];

const ABLATION_WEIGHTS: WeightPair = WeightPair::from_const(0.5, 0.5);

/// Cartesian product in variant-major order: every pair for the first
/// variant, then every pair for the second, and so on.
pub fn build_matrix(
    run_type: RunType,
    cancer: Cancer,
    variants: &[AblationVariant],
    pairs: &[WeightPair],
    restart_probability: RestartProbability,
) -> Vec<ExperimentConfig> {
    variants
        .iter()
        .flat_map(|&variant| {
            pairs.iter().map(move |&weights| {
                ExperimentConfig::new(run_type, cancer, variant, weights, restart_probability)
            })
        })
        .collect()
}

/// The full study: per cancer, every canonical variant at (0.5, 0.5) tagged
/// by variant name, followed by FULL over the tuning grid.
pub fn standard_sweep(
    cancers: &[Cancer],
    restart_probability: RestartProbability,
) -> Vec<ExperimentConfig> {
    let mut configs = Vec::with_capacity(
        cancers.len() * (AblationVariant::CANONICAL.len() + TUNING_GRID.len()),
    );

    for &cancer in cancers {
        configs.extend(AblationVariant::CANONICAL.into_iter().map(|variant| {
            ExperimentConfig::new(
                RunType::Ablation,
                cancer,
                variant,
                ABLATION_WEIGHTS,
                restart_probability,
            )
            .with_tag(variant.name())
        }));
        configs.extend(build_matrix(
            RunType::Tuning,
            cancer,
            &[AblationVariant::Full],
            &TUNING_GRID,
            restart_probability,
        ));
    }

    configs
}

/// Caller-supplied grid loaded from JSON. Omitted fields fall back to the
/// canonical variants, the default pairs, and the default restart probability.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepPlan {
    pub cancers: Vec<Cancer>,
    #[serde(default)]
    pub variants: Option<Vec<AblationVariant>>,
    #[serde(default)]
    pub pairs: Option<Vec<WeightPair>>,
    #[serde(default)]
    pub restart_probability: Option<RestartProbability>,
    #[serde(default)]
    pub run_type: RunType,
}

impl SweepPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let plan: SweepPlan = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        if plan.cancers.is_empty() {
            bail!("sweep plan {} lists no cancers", path.display());
        }
        Ok(plan)
    }

    pub fn configs(&self) -> Vec<ExperimentConfig> {
        let variants = self
            .variants
            .as_deref()
            .unwrap_or(&AblationVariant::CANONICAL);
        let pairs = self.pairs.as_deref().unwrap_or(&DEFAULT_PAIRS);
        let restart = self.restart_probability.unwrap_or_default();

        self.cancers
            .iter()
            .flat_map(|&cancer| build_matrix(self.run_type, cancer, variants, pairs, restart))
            .collect()
    }
}
