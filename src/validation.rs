use std::path::Path;

use tracing::info;

use crate::aggregator::{count_hits, write_validated_table};
use crate::error::RunError;
use crate::model::{ResolvedGeneRow, ValidatedGeneRow};
use crate::reference::{MatchSet, classify};
use crate::resolver::{GeneLookup, IdentityResolver, TOP_GENES, read_gene_scores};

/// Engine output in, annotated top-N table out.
pub struct RunValidator<'a> {
    resolver: IdentityResolver<'a>,
    match_set: &'a MatchSet,
    top_n: usize,
}

impl<'a> RunValidator<'a> {
    pub fn new(lookup: &'a dyn GeneLookup, match_set: &'a MatchSet) -> Self {
        Self {
            resolver: IdentityResolver::new(lookup),
            match_set,
            top_n: TOP_GENES,
        }
    }

    pub fn annotate(&self, rows: Vec<ResolvedGeneRow>) -> Vec<ValidatedGeneRow> {
        rows.into_iter()
            .map(|gene| {
                let classification = classify(&gene, self.match_set);
                ValidatedGeneRow {
                    gene,
                    classification,
                }
            })
            .collect()
    }

    /// Reads `ranked_gene_path`, resolves and classifies the top rows, and
    /// writes them to `validated_path`.
    pub fn validate(
        &self,
        ranked_gene_path: &Path,
        validated_path: &Path,
    ) -> Result<Vec<ValidatedGeneRow>, RunError> {
        let scores = read_gene_scores(ranked_gene_path, self.top_n)?;
        let resolved = self.resolver.resolve(scores)?;
        let validated = self.annotate(resolved);

        write_validated_table(validated_path, &validated).map_err(RunError::Output)?;
        info!(
            path = %validated_path.display(),
            genes = validated.len(),
            hits = count_hits(&validated),
            "wrote validated table"
        );

        Ok(validated)
    }
}
