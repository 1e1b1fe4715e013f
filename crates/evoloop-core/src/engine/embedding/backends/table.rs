use crate::core::io::IoError;
use crate::core::io::table::read_table;
use crate::core::models::sequence::Sequence;
use crate::core::mutants::MutantUniverse;
use crate::engine::embedding::backend::{InferenceBackend, InferenceError};
use crate::engine::embedding::{Representation, RepresentationMode};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Serves precomputed representations, such as the concatenated CSV output of an
/// external language-model extraction run.
///
/// The table holds one representation mode; requests for any other mode are rejected.
#[derive(Debug, Clone)]
pub struct TableBackend {
    model_id: String,
    mode: RepresentationMode,
    vectors: HashMap<Sequence, Vec<f32>>,
}

impl TableBackend {
    pub fn from_vectors(
        model_id: impl Into<String>,
        mode: RepresentationMode,
        vectors: impl IntoIterator<Item = (Sequence, Vec<f32>)>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            mode,
            vectors: vectors.into_iter().collect(),
        }
    }

    /// Loads a table whose first column holds variant descriptors or full sequences.
    ///
    /// Rows that do not resolve to a member of `universe` are skipped with a warning.
    pub fn load(
        path: &Path,
        model_id: impl Into<String>,
        mode: RepresentationMode,
        universe: &MutantUniverse,
    ) -> Result<Self, IoError> {
        let rows = read_table(path)?;
        let total = rows.len();
        let mut vectors = HashMap::with_capacity(total);
        let mut skipped = 0;
        for row in rows {
            match universe.resolve_key(&row.key) {
                Ok(id) => {
                    if let Some(variant) = universe.get(id) {
                        vectors.insert(variant.sequence().clone(), row.values);
                    }
                }
                Err(e) => {
                    skipped += 1;
                    warn!(key = %row.key, error = %e, "Skipping representation row.");
                }
            }
        }
        info!(
            path = %path.display(),
            loaded = vectors.len(),
            skipped,
            "Loaded precomputed representations."
        );
        Ok(Self {
            model_id: model_id.into(),
            mode,
            vectors,
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

impl InferenceBackend for TableBackend {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn max_sequence_length(&self) -> usize {
        usize::MAX
    }

    fn supports_mode(&self, mode: RepresentationMode) -> bool {
        mode == self.mode
    }

    fn infer(
        &self,
        sequences: &[&Sequence],
        mode: RepresentationMode,
    ) -> Vec<Result<Representation, InferenceError>> {
        sequences
            .iter()
            .map(|sequence| {
                if mode != self.mode {
                    return Err(InferenceError::UnsupportedMode {
                        model_id: self.model_id.clone(),
                        mode,
                    });
                }
                self.vectors
                    .get(*sequence)
                    .map(|values| Representation::Pooled(values.clone()))
                    .ok_or_else(|| InferenceError::Backend {
                        model_id: self.model_id.clone(),
                        message: format!("no precomputed representation for {sequence}"),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mutants::{MutationPolicy, enumerate};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn loads_descriptor_and_sequence_keys() {
        let wt = Sequence::parse("ACD").unwrap();
        let universe = enumerate(&wt, &MutationPolicy::saturation()).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("reps.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "variant,0,1\nC2E,1,2\nAAD,3,4\nQ9Z,5,6").unwrap();

        let backend = TableBackend::load(&path, "esm-table", RepresentationMode::Mean, &universe).unwrap();
        assert_eq!(backend.len(), 2);

        let aed = Sequence::parse("AED").unwrap();
        let missing = Sequence::parse("GCD").unwrap();
        let out = backend.infer(&[&aed, &missing], RepresentationMode::Mean);
        assert_eq!(out[0], Ok(Representation::Pooled(vec![1.0, 2.0])));
        assert!(matches!(out[1], Err(InferenceError::Backend { .. })));
    }

    #[test]
    fn only_the_stored_mode_is_served() {
        let seq = Sequence::parse("ACD").unwrap();
        let backend = TableBackend::from_vectors("t", RepresentationMode::Bos, [(seq.clone(), vec![1.0])]);
        assert!(backend.supports_mode(RepresentationMode::Bos));
        assert!(!backend.supports_mode(RepresentationMode::Mean));
        assert!(matches!(
            backend.infer(&[&seq], RepresentationMode::Mean)[0],
            Err(InferenceError::UnsupportedMode { .. })
        ));
    }
}
