//! # Core Models Module
//!
//! Data structures used to describe protein variants throughout evoloop.
//!
//! ## Key Components
//!
//! - [`residue`] - The 20 standard amino acids and substitution alphabets
//! - [`sequence`] - Validated, canonicalized protein sequences
//! - [`variant`] - Point mutations, combinatorial mutation sets and variants with provenance
//! - [`ids`] - Stable identifiers for variants inside a mutant universe
//!
//! ## Usage
//!
//! ```ignore
//! use evoloop::core::models::{sequence::Sequence, variant::{MutationSet, Variant}};
//!
//! let wild_type = Sequence::parse("ACD")?;
//! let mutations: MutationSet = "C2E".parse()?;
//! let variant = Variant::from_mutations(&wild_type, mutations)?;
//! assert_eq!(variant.sequence().as_str(), "AED");
//! ```

pub mod ids;
pub mod residue;
pub mod sequence;
pub mod variant;
