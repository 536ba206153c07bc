use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Input files the engine may consume, named the way they show up in logs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InputKind {
    InteractionNetwork,
    SeedSet,
    CoExpressionNetwork,
    DifferentialExpression,
    OntologyGraph,
    DiseaseOntology,
}

impl InputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InteractionNetwork => "interaction network",
            Self::SeedSet => "seed set",
            Self::CoExpressionNetwork => "co-expression network",
            Self::DifferentialExpression => "differential-expression table",
            Self::OntologyGraph => "ontology graph",
            Self::DiseaseOntology => "disease-specific ontology",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single configuration. None of these abort a batch.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("missing {kind}: {}", .path.display())]
    MissingInput { kind: InputKind, path: PathBuf },

    #[error("engine failed ({status}){}", render_captured(.stderr, .stdout))]
    EngineFailure {
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("invalid engine output {}: {reason}", .path.display())]
    InvalidEngineOutput { path: PathBuf, reason: String },

    #[error("identifier resolution failed: {0}")]
    Resolution(#[from] LookupError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write validated table: {0:#}")]
    Output(anyhow::Error),

    #[error("summary table write failed: {0:#}")]
    Summary(anyhow::Error),
}

impl RunError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Short machine-friendly label used in manifests.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingInput { .. } => "missing_input",
            Self::EngineFailure { .. } => "engine_failure",
            Self::InvalidEngineOutput { .. } => "invalid_engine_output",
            Self::Resolution(_) => "resolution",
            Self::Io { .. } => "io",
            Self::Output(_) => "output",
            Self::Summary(_) => "summary",
        }
    }
}

fn render_captured(stderr: &str, stdout: &str) -> String {
    let stderr = stderr.trim();
    let stdout = stdout.trim();
    match (stderr.is_empty(), stdout.is_empty()) {
        (false, _) => format!(": {stderr}"),
        (true, false) => format!(": {stdout}"),
        (true, true) => String::new(),
    }
}

/// Failure of the external identifier lookup service.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup request failed: {0}")]
    Transport(String),

    #[error("lookup service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed lookup response: {0}")]
    Malformed(String),
}

/// A reference-table row that could not be turned into an entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("reference row {line}: {reason}")]
pub struct MalformedReferenceRow {
    pub line: u64,
    pub reason: String,
}

/// Rejected experiment parameter or name.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParameterError {
    #[error("{name} must be within [0, 1], got {value}")]
    WeightOutOfRange { name: &'static str, value: f64 },

    #[error("restart probability must be within (0, 1), got {0}")]
    RestartOutOfRange(f64),

    #[error("unknown {kind} `{value}` (expected one of: {expected})")]
    UnknownName {
        kind: &'static str,
        value: String,
        expected: String,
    },

    #[error("invalid weight pair `{0}` (expected ALPHA,BETA)")]
    MalformedPair(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_failure_message_prefers_stderr() {
        let err = RunError::EngineFailure {
            status: "exit status: 2".to_string(),
            stdout: "progress".to_string(),
            stderr: "  seed file empty \n".to_string(),
        };
        assert_eq!(err.to_string(), "engine failed (exit status: 2): seed file empty");
        assert_eq!(err.kind(), "engine_failure");
    }

    #[test]
    fn missing_input_message_names_kind_and_path() {
        let err = RunError::MissingInput {
            kind: InputKind::CoExpressionNetwork,
            path: PathBuf::from("data_set/co-expression_networks/x.tsv"),
        };
        assert_eq!(
            err.to_string(),
            "missing co-expression network: data_set/co-expression_networks/x.tsv"
        );
    }
}
