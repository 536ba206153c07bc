use std::path::{Path, PathBuf};

use crate::error::InputKind;
use crate::model::{Cancer, SourceFlags};

/// Paths of every engine input, derived from the data root and a cancer code.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn interaction_network(&self) -> PathBuf {
        self.root.join("ppi_network").join("HIPPIE.tsv")
    }

    pub fn ontology_graph(&self) -> PathBuf {
        self.root.join("ontology").join("ontology_graph.txt")
    }

    pub fn seed_set(&self, cancer: Cancer) -> PathBuf {
        self.root
            .join("seed_set")
            .join(format!("TCGA-{cancer}_seed.txt"))
    }

    pub fn differential_expression(&self, cancer: Cancer) -> PathBuf {
        self.root
            .join("differentially_expressed_genes")
            .join(format!("TCGA-{cancer}_de_genes.tsv"))
    }

    pub fn coexpression_network(&self, cancer: Cancer) -> PathBuf {
        self.root
            .join("co-expression_networks")
            .join(format!("TCGA-{cancer}__co_expression__t_70%.tsv"))
    }

    pub fn disease_ontology(&self, cancer: Cancer) -> PathBuf {
        self.root
            .join("disease_specific_ontologies")
            .join(format!("TCGA-{cancer}_disease_ontologies.txt"))
    }

    /// Files a run with these flags cannot start without, in check order.
    pub fn required_inputs(&self, cancer: Cancer, flags: SourceFlags) -> Vec<(InputKind, PathBuf)> {
        let mut inputs = vec![
            (InputKind::InteractionNetwork, self.interaction_network()),
            (InputKind::SeedSet, self.seed_set(cancer)),
        ];
        if flags.use_coexpression {
            inputs.push((
                InputKind::CoExpressionNetwork,
                self.coexpression_network(cancer),
            ));
        }
        if flags.use_differential_expression {
            inputs.push((
                InputKind::DifferentialExpression,
                self.differential_expression(cancer),
            ));
        }
        if flags.use_ontology {
            inputs.push((InputKind::OntologyGraph, self.ontology_graph()));
            inputs.push((InputKind::DiseaseOntology, self.disease_ontology(cancer)));
        }
        inputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AblationVariant;

    #[test]
    fn paths_are_templated_from_cancer_code() {
        let layout = DataLayout::new("data_set");
        assert_eq!(
            layout.seed_set(Cancer::Brca),
            PathBuf::from("data_set/seed_set/TCGA-BRCA_seed.txt")
        );
        assert_eq!(
            layout.coexpression_network(Cancer::Coad),
            PathBuf::from("data_set/co-expression_networks/TCGA-COAD__co_expression__t_70%.tsv")
        );
        assert_eq!(
            layout.disease_ontology(Cancer::Stad),
            PathBuf::from("data_set/disease_specific_ontologies/TCGA-STAD_disease_ontologies.txt")
        );
    }

    #[test]
    fn required_inputs_follow_enabled_flags_only() {
        let layout = DataLayout::new("data_set");

        let ppi_only = layout.required_inputs(Cancer::Brca, AblationVariant::PpiOnly.flags());
        let kinds: Vec<InputKind> = ppi_only.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(kinds, vec![InputKind::InteractionNetwork, InputKind::SeedSet]);

        let no_coexp = layout.required_inputs(Cancer::Brca, AblationVariant::NoCoexpression.flags());
        assert!(
            no_coexp
                .iter()
                .all(|(kind, _)| *kind != InputKind::CoExpressionNetwork)
        );
        assert_eq!(no_coexp.len(), 5);

        let full = layout.required_inputs(Cancer::Brca, AblationVariant::Full.flags());
        assert_eq!(full.len(), 6);
    }
}
