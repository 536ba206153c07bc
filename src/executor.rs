use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::engine::{Engine, EngineInvocation, OntologyInputs};
use crate::error::RunError;
use crate::layout::DataLayout;
use crate::model::{ExperimentConfig, RunArtifact};

/// Turns one configuration into one ranked-gene file.
#[derive(Clone)]
pub struct RunExecutor {
    layout: DataLayout,
    output_root: PathBuf,
    engine: Arc<dyn Engine>,
}

impl RunExecutor {
    pub fn new(layout: DataLayout, output_root: impl Into<PathBuf>, engine: Arc<dyn Engine>) -> Self {
        Self {
            layout,
            output_root: output_root.into(),
            engine,
        }
    }

    pub fn output_dir(&self, config: &ExperimentConfig) -> PathBuf {
        self.output_root.join(config.cancer().code())
    }

    pub fn ranked_output_path(&self, config: &ExperimentConfig) -> PathBuf {
        self.output_dir(config)
            .join(format!("results_{}.txt", config.tag()))
    }

    /// Checks every input the configuration's flags require, then builds the
    /// engine invocation. Nothing is executed.
    pub fn prepare(&self, config: &ExperimentConfig) -> Result<EngineInvocation, RunError> {
        let cancer = config.cancer();
        let flags = config.variant().flags();

        for (kind, path) in self.layout.required_inputs(cancer, flags) {
            if !path.is_file() {
                return Err(RunError::MissingInput { kind, path });
            }
            debug!(kind = %kind, path = %path.display(), "input present");
        }

        let coexpression = existing(flags.use_coexpression, self.layout.coexpression_network(cancer));
        let differential_expression = existing(
            flags.use_differential_expression,
            self.layout.differential_expression(cancer),
        );
        let ontology = match (
            existing(flags.use_ontology, self.layout.ontology_graph()),
            existing(flags.use_ontology, self.layout.disease_ontology(cancer)),
        ) {
            (Some(graph), Some(disease)) => Some(OntologyInputs { graph, disease }),
            _ => None,
        };

        let weights = config.weights();
        Ok(EngineInvocation {
            network: self.layout.interaction_network(),
            seeds: self.layout.seed_set(cancer),
            alpha: weights.alpha(),
            beta: weights.beta(),
            restart_probability: config.restart_probability().value(),
            output: self.ranked_output_path(config),
            coexpression,
            differential_expression,
            ontology,
        })
    }

    pub fn execute(&self, config: &ExperimentConfig) -> Result<RunArtifact, RunError> {
        let invocation = self.prepare(config)?;

        let output_dir = self.output_dir(config);
        fs::create_dir_all(&output_dir).map_err(|err| {
            RunError::io(
                format!("failed to create output directory {}", output_dir.display()),
                err,
            )
        })?;

        remove_stale_output(&invocation.output)?;

        info!(
            cancer = %config.cancer(),
            tag = %config.tag(),
            variant = %config.variant(),
            restart_probability = config.restart_probability().value(),
            "running engine"
        );
        self.engine.run(&invocation)?;

        if !invocation.output.is_file() {
            return Err(RunError::EngineFailure {
                status: format!(
                    "exited successfully but wrote no output at {}",
                    invocation.output.display()
                ),
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        Ok(RunArtifact {
            config: config.clone(),
            ranked_gene_path: invocation.output,
        })
    }
}

/// A file left by an earlier run with the same tag must not pass as fresh output.
fn remove_stale_output(path: &Path) -> Result<(), RunError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed previous engine output");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(RunError::io(
            format!("failed to remove previous output {}", path.display()),
            err,
        )),
    }
}

fn existing(enabled: bool, path: PathBuf) -> Option<PathBuf> {
    (enabled && path.is_file()).then_some(path)
}
