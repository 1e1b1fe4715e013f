use super::residue::{AminoAcid, is_sequence_symbol};
use super::sequence::Sequence;
use crate::core::error::ValidationError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Descriptor used for the unmutated wild type.
pub const WILD_TYPE_DESCRIPTOR: &str = "WT";

const SEPARATORS: [char; 3] = [':', '_', '/'];

/// A single substitution, e.g. `C2A`: wild-type symbol, 1-based position, new residue.
///
/// Ordering is by position first, so a sorted list of mutations follows the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mutation {
    pub position: usize,
    pub from: char,
    pub to: AminoAcid,
}

impl Mutation {
    pub fn new(position: usize, from: char, to: AminoAcid) -> Self {
        Self { position, from, to }
    }

    /// Checks the mutation against a wild type: in range, matching wild-type residue, and
    /// not an identity substitution.
    pub fn validate_against(&self, wild_type: &Sequence) -> Result<(), ValidationError> {
        let found = wild_type
            .residue_at(self.position)
            .ok_or(ValidationError::PositionOutOfRange {
                position: self.position,
                length: wild_type.len(),
            })?;
        if found != self.from {
            return Err(ValidationError::WildTypeMismatch {
                position: self.position,
                expected: found,
                found: self.from,
            });
        }
        if self.from == self.to.code() {
            return Err(ValidationError::MalformedDescriptor {
                descriptor: self.to_string(),
                reason: "substitution does not change the residue".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.from, self.position, self.to.code())
    }
}

impl FromStr for Mutation {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| ValidationError::MalformedDescriptor {
            descriptor: s.to_string(),
            reason: reason.to_string(),
        };

        let token = s.trim().to_ascii_uppercase();
        let mut chars = token.chars();
        let from = chars.next().ok_or_else(|| malformed("empty mutation"))?;
        let to = chars.next_back().ok_or_else(|| malformed("too short"))?;
        let digits = chars.as_str();

        if !is_sequence_symbol(from) {
            return Err(malformed("wild-type residue is not a sequence symbol"));
        }
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed("expected <from><position><to>, e.g. C2A"));
        }
        let position: usize = digits
            .parse()
            .map_err(|_| malformed("position does not fit in an integer"))?;
        if position == 0 {
            return Err(malformed("positions are 1-based"));
        }
        let to = AminoAcid::from_code(to).ok_or(ValidationError::UnsupportedResidue(to))?;

        Ok(Self { position, from, to })
    }
}

/// A set of substitutions at distinct positions, kept sorted by position.
///
/// The empty set describes the wild type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationSet(Vec<Mutation>);

impl MutationSet {
    pub fn new(mut mutations: Vec<Mutation>) -> Result<Self, ValidationError> {
        mutations.sort();
        if let Some(pair) = mutations.windows(2).find(|w| w[0].position == w[1].position) {
            return Err(ValidationError::DuplicatePosition(pair[0].position));
        }
        Ok(Self(mutations))
    }

    pub fn wild_type() -> Self {
        Self(Vec::new())
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.0
    }

    /// Number of substitutions (the mutational order).
    pub fn order(&self) -> usize {
        self.0.len()
    }

    pub fn is_wild_type(&self) -> bool {
        self.0.is_empty()
    }

    /// Applies the substitutions to `wild_type`, validating each one.
    pub fn apply_to(&self, wild_type: &Sequence) -> Result<Sequence, ValidationError> {
        let mut residues: Vec<char> = wild_type.as_str().chars().collect();
        for mutation in &self.0 {
            mutation.validate_against(wild_type)?;
            residues[mutation.position - 1] = mutation.to.code();
        }
        Ok(Sequence::from_canonical(residues.into_iter().collect()))
    }
}

impl fmt::Display for MutationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str(WILD_TYPE_DESCRIPTOR);
        }
        for (i, mutation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{mutation}")?;
        }
        Ok(())
    }
}

impl FromStr for MutationSet {
    type Err = ValidationError;

    /// Accepts `WT`, a single mutation such as `C2A`, or a combination joined by `:`,
    /// `_` or `/` such as `C2A:D3E`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MalformedDescriptor {
                descriptor: s.to_string(),
                reason: "empty descriptor".to_string(),
            });
        }
        if trimmed.eq_ignore_ascii_case(WILD_TYPE_DESCRIPTOR) {
            return Ok(Self::wild_type());
        }
        let mutations = trimmed
            .split(SEPARATORS)
            .map(str::parse::<Mutation>)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(mutations)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    WildType,
    Mutant(MutationSet),
}

/// A candidate protein: its resulting sequence plus how it was derived from the wild type.
///
/// Equality and hashing consider only the sequence, so two provenances that produce the
/// same protein are the same variant.
#[derive(Debug, Clone)]
pub struct Variant {
    sequence: Sequence,
    provenance: Provenance,
}

impl Variant {
    pub fn wild_type(wild_type: &Sequence) -> Self {
        Self {
            sequence: wild_type.clone(),
            provenance: Provenance::WildType,
        }
    }

    pub fn from_mutations(wild_type: &Sequence, mutations: MutationSet) -> Result<Self, ValidationError> {
        if mutations.is_wild_type() {
            return Ok(Self::wild_type(wild_type));
        }
        let sequence = mutations.apply_to(wild_type)?;
        Ok(Self {
            sequence,
            provenance: Provenance::Mutant(mutations),
        })
    }

    /// Resolves a textual descriptor (`WT`, `C2A`, `C2A:D3E`) against the wild type.
    pub fn from_descriptor(wild_type: &Sequence, descriptor: &str) -> Result<Self, ValidationError> {
        Self::from_mutations(wild_type, descriptor.parse()?)
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn mutations(&self) -> &[Mutation] {
        match &self.provenance {
            Provenance::WildType => &[],
            Provenance::Mutant(set) => set.mutations(),
        }
    }

    pub fn is_wild_type(&self) -> bool {
        matches!(self.provenance, Provenance::WildType)
    }

    pub fn descriptor(&self) -> String {
        match &self.provenance {
            Provenance::WildType => WILD_TYPE_DESCRIPTOR.to_string(),
            Provenance::Mutant(set) => set.to_string(),
        }
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for Variant {}

impl Hash for Variant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sequence.hash(state);
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wt() -> Sequence {
        Sequence::parse("ACD").unwrap()
    }

    #[test]
    fn mutation_parses_and_displays() {
        let m: Mutation = "c2a".parse().unwrap();
        assert_eq!(m, Mutation::new(2, 'C', AminoAcid::Alanine));
        assert_eq!(m.to_string(), "C2A");
    }

    #[test]
    fn mutation_rejects_malformed_tokens() {
        assert!(matches!(
            "C0A".parse::<Mutation>(),
            Err(ValidationError::MalformedDescriptor { .. })
        ));
        assert!(matches!(
            "CA".parse::<Mutation>(),
            Err(ValidationError::MalformedDescriptor { .. })
        ));
        assert!(matches!(
            "C2".parse::<Mutation>(),
            Err(ValidationError::MalformedDescriptor { .. })
        ));
        assert_eq!(
            "C2X".parse::<Mutation>(),
            Err(ValidationError::UnsupportedResidue('X'))
        );
    }

    #[test]
    fn mutation_set_accepts_all_separators_and_sorts() {
        for text in ["D3E:C2A", "D3E_C2A", "D3E/C2A"] {
            let set: MutationSet = text.parse().unwrap();
            assert_eq!(set.to_string(), "C2A:D3E");
            assert_eq!(set.order(), 2);
        }
    }

    #[test]
    fn mutation_set_wild_type_round_trips() {
        let set: MutationSet = "wt".parse().unwrap();
        assert!(set.is_wild_type());
        assert_eq!(set.to_string(), "WT");
    }

    #[test]
    fn mutation_set_rejects_duplicate_positions() {
        assert_eq!(
            "C2A:C2E".parse::<MutationSet>(),
            Err(ValidationError::DuplicatePosition(2))
        );
    }

    #[test]
    fn apply_validates_against_wild_type() {
        let ok: MutationSet = "C2E".parse().unwrap();
        assert_eq!(ok.apply_to(&wt()).unwrap().as_str(), "AED");

        let mismatch: MutationSet = "G2E".parse().unwrap();
        assert_eq!(
            mismatch.apply_to(&wt()),
            Err(ValidationError::WildTypeMismatch {
                position: 2,
                expected: 'C',
                found: 'G'
            })
        );

        let out_of_range: MutationSet = "A9E".parse().unwrap();
        assert_eq!(
            out_of_range.apply_to(&wt()),
            Err(ValidationError::PositionOutOfRange {
                position: 9,
                length: 3
            })
        );

        let identity: MutationSet = "C2C".parse().unwrap();
        assert!(identity.apply_to(&wt()).is_err());
    }

    #[test]
    fn variants_compare_by_sequence_only() {
        let via_mutation = Variant::from_descriptor(&wt(), "C2E").unwrap();
        let via_sequence = Variant {
            sequence: Sequence::parse("AED").unwrap(),
            provenance: Provenance::WildType,
        };
        assert_eq!(via_mutation, via_sequence);
        assert_eq!(via_mutation.descriptor(), "C2E");
        assert_eq!(Variant::wild_type(&wt()).descriptor(), "WT");
    }
}
