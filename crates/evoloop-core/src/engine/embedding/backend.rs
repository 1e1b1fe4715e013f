use super::{Representation, RepresentationMode};
use crate::core::models::sequence::Sequence;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Failure to produce a representation for one sequence. Never aborts a whole batch.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Sequence of length {length} exceeds the model limit of {limit}")]
    SequenceTooLong { length: usize, limit: usize },

    #[error("Backend '{model_id}' failed: {message}")]
    Backend { model_id: String, message: String },

    #[error("Representation has dimension {found}, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Backend returned an empty representation")]
    EmptyRepresentation,

    #[error("Backend '{model_id}' does not support representation mode '{mode}'")]
    UnsupportedMode {
        model_id: String,
        mode: RepresentationMode,
    },

    #[error("Embedding was cancelled before this sequence was processed")]
    Cancelled,
}

/// A sequence-to-vector model.
///
/// Implementations must return exactly one result per input sequence, in input order.
pub trait InferenceBackend: Send + Sync {
    /// Identity of the model weights; part of every cache key.
    fn model_id(&self) -> &str;

    /// Longest sequence the model accepts, in residues.
    fn max_sequence_length(&self) -> usize;

    fn supports_mode(&self, _mode: RepresentationMode) -> bool {
        true
    }

    fn infer(
        &self,
        sequences: &[&Sequence],
        mode: RepresentationMode,
    ) -> Vec<Result<Representation, InferenceError>>;
}

/// Shared cancellation signal, checked between embedding batches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
