use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParameterError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cancer {
    Brca,
    Coad,
    Luad,
    Thca,
    Blca,
    Prad,
    Stad,
}

impl Cancer {
    pub const ALL: [Cancer; 7] = [
        Cancer::Brca,
        Cancer::Coad,
        Cancer::Luad,
        Cancer::Thca,
        Cancer::Blca,
        Cancer::Prad,
        Cancer::Stad,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Self::Brca => "BRCA",
            Self::Coad => "COAD",
            Self::Luad => "LUAD",
            Self::Thca => "THCA",
            Self::Blca => "BLCA",
            Self::Prad => "PRAD",
            Self::Stad => "STAD",
        }
    }
}

impl fmt::Display for Cancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Cancer {
    type Err = ParameterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|cancer| cancer.code().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParameterError::UnknownName {
                kind: "cancer type",
                value: value.to_string(),
                expected: Self::ALL.map(Cancer::code).join(", "),
            })
    }
}

/// Which auxiliary data sources an engine run may consume.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SourceFlags {
    pub use_coexpression: bool,
    pub use_differential_expression: bool,
    pub use_ontology: bool,
}

/// Named ablation of the engine's auxiliary inputs.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AblationVariant {
    #[serde(rename = "FULL")]
    Full,
    #[serde(rename = "noCOEXP")]
    NoCoexpression,
    #[serde(rename = "noDE")]
    NoDifferentialExpression,
    #[serde(rename = "noONTO")]
    NoOntology,
    #[serde(rename = "PPI_only")]
    PpiOnly,
}

impl AblationVariant {
    pub const CANONICAL: [AblationVariant; 5] = [
        AblationVariant::Full,
        AblationVariant::NoCoexpression,
        AblationVariant::NoDifferentialExpression,
        AblationVariant::NoOntology,
        AblationVariant::PpiOnly,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::NoCoexpression => "noCOEXP",
            Self::NoDifferentialExpression => "noDE",
            Self::NoOntology => "noONTO",
            Self::PpiOnly => "PPI_only",
        }
    }

    pub fn flags(self) -> SourceFlags {
        let (use_coexpression, use_differential_expression, use_ontology) = match self {
            Self::Full => (true, true, true),
            Self::NoCoexpression => (false, true, true),
            Self::NoDifferentialExpression => (true, false, true),
            Self::NoOntology => (true, true, false),
            Self::PpiOnly => (false, false, false),
        };
        SourceFlags {
            use_coexpression,
            use_differential_expression,
            use_ontology,
        }
    }
}

impl fmt::Display for AblationVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AblationVariant {
    type Err = ParameterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        Self::CANONICAL
            .into_iter()
            .find(|variant| variant.name() == trimmed)
            .or_else(|| {
                Self::CANONICAL
                    .into_iter()
                    .find(|variant| variant.name().eq_ignore_ascii_case(trimmed))
            })
            .ok_or_else(|| ParameterError::UnknownName {
                kind: "ablation variant",
                value: value.to_string(),
                expected: Self::CANONICAL.map(AblationVariant::name).join(", "),
            })
    }
}

/// `(alpha, beta)` matrix weights, both within `[0, 1]`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(f64, f64)", into = "(f64, f64)")]
pub struct WeightPair {
    alpha: f64,
    beta: f64,
}

impl WeightPair {
    pub fn new(alpha: f64, beta: f64) -> Result<Self, ParameterError> {
        check_unit_interval("alpha", alpha)?;
        check_unit_interval("beta", beta)?;
        Ok(Self { alpha, beta })
    }

    /// For compile-time constant grids that are known to be in range.
    pub(crate) const fn from_const(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    pub fn alpha(self) -> f64 {
        self.alpha
    }

    pub fn beta(self) -> f64 {
        self.beta
    }
}

fn check_unit_interval(name: &'static str, value: f64) -> Result<(), ParameterError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ParameterError::WeightOutOfRange { name, value })
    }
}

impl TryFrom<(f64, f64)> for WeightPair {
    type Error = ParameterError;

    fn try_from((alpha, beta): (f64, f64)) -> Result<Self, Self::Error> {
        Self::new(alpha, beta)
    }
}

impl From<WeightPair> for (f64, f64) {
    fn from(pair: WeightPair) -> Self {
        (pair.alpha, pair.beta)
    }
}

impl FromStr for WeightPair {
    type Err = ParameterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let malformed = || ParameterError::MalformedPair(value.to_string());
        let (alpha, beta) = value.split_once(',').ok_or_else(malformed)?;
        let alpha = alpha.trim().parse::<f64>().map_err(|_| malformed())?;
        let beta = beta.trim().parse::<f64>().map_err(|_| malformed())?;
        Self::new(alpha, beta)
    }
}

impl fmt::Display for WeightPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "alpha={}, beta={}",
            format_weight(self.alpha),
            format_weight(self.beta)
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct RestartProbability(f64);

impl RestartProbability {
    pub const DEFAULT: RestartProbability = RestartProbability(0.9);

    pub fn new(value: f64) -> Result<Self, ParameterError> {
        if value > 0.0 && value < 1.0 {
            Ok(Self(value))
        } else {
            Err(ParameterError::RestartOutOfRange(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for RestartProbability {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<f64> for RestartProbability {
    type Error = ParameterError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RestartProbability> for f64 {
    fn from(value: RestartProbability) -> Self {
        value.0
    }
}

impl fmt::Display for RestartProbability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RestartProbability {
    type Err = ParameterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = value
            .trim()
            .parse::<f64>()
            .map_err(|_| ParameterError::RestartOutOfRange(f64::NAN))?;
        Self::new(parsed)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
pub enum RunType {
    #[default]
    #[serde(rename = "ABL")]
    Ablation,
    #[serde(rename = "Tuning(alpha,beta)")]
    Tuning,
}

impl RunType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Ablation => "ABL",
            Self::Tuning => "Tuning(alpha,beta)",
        }
    }
}

/// Renders a weight the way tags and summary cells expect it: integral values
/// keep one decimal (`1.0`), everything else uses the shortest form (`0.25`).
pub fn format_weight(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// One engine run to perform. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentConfig {
    run_type: RunType,
    cancer: Cancer,
    variant: AblationVariant,
    weights: WeightPair,
    restart_probability: RestartProbability,
    custom_tag: Option<String>,
}

impl ExperimentConfig {
    pub fn new(
        run_type: RunType,
        cancer: Cancer,
        variant: AblationVariant,
        weights: WeightPair,
        restart_probability: RestartProbability,
    ) -> Self {
        Self {
            run_type,
            cancer,
            variant,
            weights,
            restart_probability,
            custom_tag: None,
        }
    }

    /// Replaces the derived tag. Blank tags are ignored.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        let tag = tag.trim();
        self.custom_tag = (!tag.is_empty()).then(|| tag.to_string());
        self
    }

    pub fn run_type(&self) -> RunType {
        self.run_type
    }

    pub fn cancer(&self) -> Cancer {
        self.cancer
    }

    pub fn variant(&self) -> AblationVariant {
        self.variant
    }

    pub fn weights(&self) -> WeightPair {
        self.weights
    }

    pub fn restart_probability(&self) -> RestartProbability {
        self.restart_probability
    }

    pub fn tag(&self) -> String {
        match &self.custom_tag {
            Some(tag) => tag.clone(),
            None => format!(
                "{}_A{}_B{}",
                self.variant.name(),
                format_weight(self.weights.alpha()),
                format_weight(self.weights.beta())
            ),
        }
    }

    /// `(cancer, tag)`; the tag already encodes variant or label plus weights.
    pub fn identity(&self) -> (Cancer, String) {
        (self.cancer, self.tag())
    }
}

impl fmt::Display for ExperimentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cancer, self.tag())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunArtifact {
    pub config: ExperimentConfig,
    pub ranked_gene_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneScoreRow {
    pub identifier: String,
    pub score: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedGeneRow {
    pub identifier: String,
    pub score: f64,
    pub rank: usize,
    pub symbol: Option<String>,
}

impl ResolvedGeneRow {
    pub fn new(row: GeneScoreRow, symbol: Option<String>) -> Self {
        Self {
            identifier: row.identifier,
            score: row.score,
            rank: row.rank,
            symbol,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Classification {
    Matched,
    Unmatched,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Matched => "Yes",
            Self::Unmatched => "No",
        }
    }

    pub fn is_match(self) -> bool {
        self == Self::Matched
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedGeneRow {
    pub gene: ResolvedGeneRow,
    pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEntry {
    pub canonical_symbol: String,
    pub aliases: Vec<String>,
    pub is_drug_target: bool,
}

/// One line of the summary table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub run_type: String,
    pub cancer: String,
    pub tag: String,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub restart_probability: Option<f64>,
    pub reference_hits: u32,
}

impl SummaryRow {
    pub fn for_config(config: &ExperimentConfig, reference_hits: u32) -> Self {
        Self {
            run_type: config.run_type().label().to_string(),
            cancer: config.cancer().code().to_string(),
            tag: config.tag(),
            alpha: Some(config.weights().alpha()),
            beta: Some(config.weights().beta()),
            restart_probability: Some(config.restart_probability().value()),
            reference_hits,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchPaths {
    pub data_root: String,
    pub output_root: String,
    pub reference_path: String,
    pub summary_path: String,
    pub manifest_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchCounts {
    pub configured: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub reference_entries: usize,
    pub reference_rows_skipped: usize,
    pub match_set_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputHash {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunFailureRecord {
    pub cancer: String,
    pub tag: String,
    pub error_kind: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub jobs: usize,
    pub paths: BatchPaths,
    pub counts: BatchCounts,
    pub input_hashes: Vec<InputHash>,
    pub results: Vec<SummaryRow>,
    pub failures: Vec<RunFailureRecord>,
    pub cancelled_tags: Vec<String>,
    pub warnings: Vec<String>,
}
