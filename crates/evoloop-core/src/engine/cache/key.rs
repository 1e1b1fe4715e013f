use crate::core::models::sequence::Sequence;
use crate::engine::embedding::RepresentationMode;
use std::fmt;

/// Composite cache key. The sequence is addressed by the BLAKE3 hash of its canonical text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub model_id: String,
    pub mode: RepresentationMode,
    pub sequence_hash: String,
}

impl CacheKey {
    pub fn new(model_id: &str, mode: RepresentationMode, sequence: &Sequence) -> Self {
        Self {
            model_id: model_id.to_string(),
            mode,
            sequence_hash: sequence_hash(sequence),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = &self.sequence_hash[..12.min(self.sequence_hash.len())];
        write!(f, "{}/{}/{}", self.model_id, self.mode, short)
    }
}

pub fn sequence_hash(sequence: &Sequence) -> String {
    blake3::hash(sequence.as_bytes()).to_hex().to_string()
}
