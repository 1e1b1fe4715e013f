use crate::core::models::residue::Alphabet;
use crate::core::models::variant::MutationSet;

/// Allowed substitutions at one site of a combinatorial library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSubstitutions {
    /// 1-based position in the wild type.
    pub position: usize,
    pub residues: Alphabet,
}

/// An externally supplied candidate, given either as a mutation descriptor or as a full
/// sequence to be diffed against the wild type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Descriptor(String),
    Sequence(String),
}

impl Candidate {
    /// Treats `key` as a descriptor when it parses as one, otherwise as a full sequence.
    pub fn infer(key: &str) -> Self {
        let key = key.trim();
        if key.parse::<MutationSet>().is_ok() {
            Candidate::Descriptor(key.to_string())
        } else {
            Candidate::Sequence(key.to_string())
        }
    }
}

/// Rule describing which variants make up the candidate universe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationPolicy {
    /// Every listed position (all positions when `None`) substituted with every
    /// non-identical residue of the alphabet.
    SingleSite {
        positions: Option<Vec<usize>>,
        alphabet: Alphabet,
    },
    /// All combinations of 1..=`max_order` sites, taking the Cartesian product of each
    /// chosen site's substitutions.
    Combinatorial {
        sites: Vec<SiteSubstitutions>,
        max_order: usize,
    },
    ExplicitList { candidates: Vec<Candidate> },
}

impl MutationPolicy {
    /// Single-site saturation mutagenesis over the 20 standard amino acids.
    pub fn saturation() -> Self {
        MutationPolicy::SingleSite {
            positions: None,
            alphabet: Alphabet::standard(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MutationPolicy::SingleSite { .. } => "single-site",
            MutationPolicy::Combinatorial { .. } => "combinatorial",
            MutationPolicy::ExplicitList { .. } => "explicit-list",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_classified_by_shape() {
        assert_eq!(Candidate::infer(" C2A:D3E "), Candidate::Descriptor("C2A:D3E".into()));
        assert_eq!(Candidate::infer("wt"), Candidate::Descriptor("wt".into()));
        assert_eq!(Candidate::infer("ACDE"), Candidate::Sequence("ACDE".into()));
    }
}
