//! # Core Module
//!
//! Fundamental, stateless building blocks of evoloop.
//!
//! ## Architecture
//!
//! - **Sequence Representation** ([`models`]) - Amino acids, validated sequences, mutation
//!   descriptors and variants
//! - **Mutant Space** ([`mutants`]) - Deterministic, exhaustive enumeration of candidate
//!   variants under a mutation policy
//! - **File I/O** ([`io`]) - Label tables, embedding tables and universe export
//! - **Utilities** ([`utils`]) - Rank statistics used for model evaluation
//!
//! Validation failures anywhere in this layer are reported as [`error::ValidationError`]
//! and are always surfaced to the caller.

pub mod error;
pub mod io;
pub mod models;
pub mod mutants;
pub mod utils;
