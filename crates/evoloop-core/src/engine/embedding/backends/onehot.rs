use crate::core::models::residue::AminoAcid;
use crate::core::models::sequence::Sequence;
use crate::engine::embedding::backend::{InferenceBackend, InferenceError};
use crate::engine::embedding::{Representation, RepresentationMode};
use nalgebra::DMatrix;

const ALPHABET_SIZE: usize = 20;

/// Deterministic one-hot residue encoding.
///
/// `Mean` mode returns the flattened `length x 20` one-hot matrix, which keeps positional
/// information for equal-length variants. `PerResidue` returns the matrix itself. Gap
/// and unknown residues encode as all-zero rows. There is no BOS token.
#[derive(Debug, Clone)]
pub struct OneHotBackend {
    model_id: String,
    max_length: usize,
}

impl OneHotBackend {
    pub const DEFAULT_MODEL_ID: &'static str = "one-hot";
    pub const DEFAULT_MAX_LENGTH: usize = 1022;

    pub fn new(max_length: usize) -> Self {
        Self {
            model_id: Self::DEFAULT_MODEL_ID.to_string(),
            max_length,
        }
    }

    fn encode(sequence: &Sequence) -> DMatrix<f32> {
        let mut matrix = DMatrix::zeros(sequence.len(), ALPHABET_SIZE);
        for (row, symbol) in sequence.as_str().chars().enumerate() {
            if let Some(residue) = AminoAcid::from_code(symbol) {
                matrix[(row, residue.index())] = 1.0;
            }
        }
        matrix
    }
}

impl Default for OneHotBackend {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_LENGTH)
    }
}

impl InferenceBackend for OneHotBackend {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn max_sequence_length(&self) -> usize {
        self.max_length
    }

    fn supports_mode(&self, mode: RepresentationMode) -> bool {
        mode != RepresentationMode::Bos
    }

    fn infer(
        &self,
        sequences: &[&Sequence],
        mode: RepresentationMode,
    ) -> Vec<Result<Representation, InferenceError>> {
        sequences
            .iter()
            .map(|sequence| {
                if sequence.len() > self.max_length {
                    return Err(InferenceError::SequenceTooLong {
                        length: sequence.len(),
                        limit: self.max_length,
                    });
                }
                let matrix = Self::encode(sequence);
                match mode {
                    RepresentationMode::Mean => {
                        // row-major flattening: residue by residue
                        Ok(Representation::Pooled(matrix.transpose().as_slice().to_vec()))
                    }
                    RepresentationMode::PerResidue => Ok(Representation::PerResidue(matrix)),
                    RepresentationMode::Bos => Err(InferenceError::UnsupportedMode {
                        model_id: self.model_id.clone(),
                        mode,
                    }),
                }
            })
            .collect()
    }
}
