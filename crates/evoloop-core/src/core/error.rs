use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Sequence is empty")]
    EmptySequence,

    #[error("Invalid residue '{residue}' at position {position}")]
    InvalidResidue { position: usize, residue: char },

    #[error("Residue '{0}' is not one of the 20 standard amino acids")]
    UnsupportedResidue(char),

    #[error("Malformed mutation descriptor '{descriptor}': {reason}")]
    MalformedDescriptor { descriptor: String, reason: String },

    #[error("Position {position} is outside the wild-type sequence (length {length})")]
    PositionOutOfRange { position: usize, length: usize },

    #[error("Wild-type residue at position {position} is '{expected}', descriptor says '{found}'")]
    WildTypeMismatch {
        position: usize,
        expected: char,
        found: char,
    },

    #[error("Sequence length {found} does not match the wild-type length {expected}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("Position {0} is mutated more than once")]
    DuplicatePosition(usize),

    #[error("Invalid mutation policy: {0}")]
    InvalidPolicy(String),

    #[error("Variant '{0}' is not part of the mutant universe")]
    UnknownVariant(String),
}
