use super::residue::is_sequence_symbol;
use crate::core::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A canonical protein sequence: uppercase, trimmed, and restricted to the 20 standard
/// amino acids plus the gap (`-`) and unknown (`X`) symbols.
///
/// Sequences are identified by their exact content; two sequences with the same
/// residues are the same sequence regardless of how they were produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sequence(String);

impl Sequence {
    /// Canonicalizes and validates raw sequence text.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptySequence`] for blank input, or
    /// [`ValidationError::InvalidResidue`] naming the first offending 1-based position.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let canonical = raw.trim().to_ascii_uppercase();
        if canonical.is_empty() {
            return Err(ValidationError::EmptySequence);
        }
        if let Some((index, residue)) = canonical
            .chars()
            .enumerate()
            .find(|(_, c)| !is_sequence_symbol(*c))
        {
            return Err(ValidationError::InvalidResidue {
                position: index + 1,
                residue,
            });
        }
        Ok(Self(canonical))
    }

    /// Wraps text that is already known to be canonical.
    pub(crate) fn from_canonical(canonical: String) -> Self {
        debug_assert!(canonical.chars().all(is_sequence_symbol));
        Self(canonical)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Number of residues. All symbols are ASCII, so this is also the byte length.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Residue symbol at a 1-based position.
    pub fn residue_at(&self, position: usize) -> Option<char> {
        if position == 0 {
            return None;
        }
        self.0.as_bytes().get(position - 1).map(|b| *b as char)
    }

    /// Number of positions at which two sequences differ, or `None` when their lengths differ.
    pub fn hamming_distance(&self, other: &Sequence) -> Option<usize> {
        if self.len() != other.len() {
            return None;
        }
        Some(
            self.as_bytes()
                .iter()
                .zip(other.as_bytes())
                .filter(|(a, b)| a != b)
                .count(),
        )
    }

    /// Returns the 1-based positions and symbols where `other` differs from `self`.
    pub fn differences(&self, other: &Sequence) -> Result<Vec<(usize, char, char)>, ValidationError> {
        if self.len() != other.len() {
            return Err(ValidationError::LengthMismatch {
                expected: self.len(),
                found: other.len(),
            });
        }
        Ok(self
            .as_bytes()
            .iter()
            .zip(other.as_bytes())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, (a, b))| (i + 1, *a as char, *b as char))
            .collect())
    }
}

impl FromStr for Sequence {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Sequence {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Sequence> for String {
    fn from(value: Sequence) -> Self {
        value.0
    }
}

impl AsRef<str> for Sequence {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonicalizes_case_and_whitespace() {
        let seq = Sequence::parse("  acdX-\n").unwrap();
        assert_eq!(seq.as_str(), "ACDX-");
        assert_eq!(seq.len(), 5);
    }

    #[test]
    fn parse_rejects_empty_input() {
        assert_eq!(Sequence::parse("   "), Err(ValidationError::EmptySequence));
    }

    #[test]
    fn parse_reports_one_based_position_of_invalid_residue() {
        assert_eq!(
            Sequence::parse("ACBD"),
            Err(ValidationError::InvalidResidue {
                position: 3,
                residue: 'B'
            })
        );
        assert_eq!(
            Sequence::parse("AC D"),
            Err(ValidationError::InvalidResidue {
                position: 3,
                residue: ' '
            })
        );
    }

    #[test]
    fn residue_at_uses_one_based_positions() {
        let seq = Sequence::parse("ACD").unwrap();
        assert_eq!(seq.residue_at(0), None);
        assert_eq!(seq.residue_at(1), Some('A'));
        assert_eq!(seq.residue_at(3), Some('D'));
        assert_eq!(seq.residue_at(4), None);
    }

    #[test]
    fn hamming_distance_counts_differing_positions() {
        let a = Sequence::parse("ACDE").unwrap();
        let b = Sequence::parse("AEDF").unwrap();
        assert_eq!(a.hamming_distance(&b), Some(2));
        assert_eq!(a.hamming_distance(&a), Some(0));
        assert_eq!(a.hamming_distance(&Sequence::parse("AC").unwrap()), None);
    }

    #[test]
    fn differences_lists_substitutions_in_position_order() {
        let wt = Sequence::parse("ACDE").unwrap();
        let other = Sequence::parse("GCDW").unwrap();
        assert_eq!(
            wt.differences(&other).unwrap(),
            vec![(1, 'A', 'G'), (4, 'E', 'W')]
        );
        assert!(matches!(
            wt.differences(&Sequence::parse("ACD").unwrap()),
            Err(ValidationError::LengthMismatch {
                expected: 4,
                found: 3
            })
        ));
    }

    #[test]
    fn deserializes_through_validation() {
        #[derive(Deserialize)]
        struct Wrapper {
            seq: Sequence,
        }
        let ok: Wrapper = toml::from_str("seq = \"acd\"").unwrap();
        assert_eq!(ok.seq.as_str(), "ACD");
        assert!(toml::from_str::<Wrapper>("seq = \"AZ\"").is_err());
    }
}
