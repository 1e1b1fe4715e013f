//! Sequence representations and the provider that computes them.
//!
//! A [`backend::InferenceBackend`] turns sequences into [`Representation`]s; the
//! [`provider::EmbeddingProvider`] batches requests, pools per-residue output, and routes
//! everything through the [`crate::engine::cache::RepresentationCache`].

pub mod backend;
pub mod backends;
pub mod provider;

pub use backend::{CancelFlag, InferenceBackend, InferenceError};
pub use provider::{EmbedReport, EmbeddingProvider, export_embeddings_csv};

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Fixed-length representation of one sequence. Cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Arc<[f32]>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values.into())
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Little-endian `f32` encoding used by the persistent cache.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Decodes a little-endian blob; `None` if its length is not a multiple of 4.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect::<Vec<_>>();
        Some(Self::new(values))
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Which view of a sequence the backend should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RepresentationMode {
    /// Mean over the per-residue representations.
    #[default]
    Mean,
    /// The beginning-of-sequence token.
    Bos,
    /// Per-residue matrix, mean-reduced by the provider.
    PerResidue,
}

impl RepresentationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RepresentationMode::Mean => "mean",
            RepresentationMode::Bos => "bos",
            RepresentationMode::PerResidue => "per-residue",
        }
    }
}

impl fmt::Display for RepresentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepresentationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(RepresentationMode::Mean),
            "bos" => Ok(RepresentationMode::Bos),
            "per-residue" | "per_residue" | "per_tok" => Ok(RepresentationMode::PerResidue),
            other => Err(format!(
                "unknown representation mode '{other}' (expected mean, bos or per-residue)"
            )),
        }
    }
}

/// Raw backend output.
#[derive(Debug, Clone, PartialEq)]
pub enum Representation {
    Pooled(Vec<f32>),
    /// One row per residue.
    PerResidue(DMatrix<f32>),
}

impl Representation {
    /// Reduces the representation to a single vector, averaging per-residue rows.
    pub fn into_pooled(self) -> Result<Embedding, InferenceError> {
        match self {
            Representation::Pooled(values) if values.is_empty() => {
                Err(InferenceError::EmptyRepresentation)
            }
            Representation::Pooled(values) => Ok(Embedding::new(values)),
            Representation::PerResidue(matrix) => {
                if matrix.nrows() == 0 || matrix.ncols() == 0 {
                    return Err(InferenceError::EmptyRepresentation);
                }
                let mean = matrix.row_mean();
                Ok(Embedding::new(mean.iter().copied().collect()))
            }
        }
    }
}
