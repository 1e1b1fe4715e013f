use crate::core::error::ValidationError;
use phf::{Map, phf_map};
use std::fmt;
use std::str::FromStr;

/// The 20 standard amino acids, declared in one-letter-code order so that the derived
/// `Ord` matches lexicographic order of their codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AminoAcid {
    Alanine,       // A (ALA)
    Cysteine,      // C (CYS)
    AsparticAcid,  // D (ASP)
    GlutamicAcid,  // E (GLU)
    Phenylalanine, // F (PHE)
    Glycine,       // G (GLY)
    Histidine,     // H (HIS)
    Isoleucine,    // I (ILE)
    Lysine,        // K (LYS)
    Leucine,       // L (LEU)
    Methionine,    // M (MET)
    Asparagine,    // N (ASN)
    Proline,       // P (PRO)
    Glutamine,     // Q (GLN)
    Arginine,      // R (ARG)
    Serine,        // S (SER)
    Threonine,     // T (THR)
    Valine,        // V (VAL)
    Tryptophan,    // W (TRP)
    Tyrosine,      // Y (TYR)
}

static ONE_LETTER_CODES: Map<char, AminoAcid> = phf_map! {
    'A' => AminoAcid::Alanine,
    'C' => AminoAcid::Cysteine,
    'D' => AminoAcid::AsparticAcid,
    'E' => AminoAcid::GlutamicAcid,
    'F' => AminoAcid::Phenylalanine,
    'G' => AminoAcid::Glycine,
    'H' => AminoAcid::Histidine,
    'I' => AminoAcid::Isoleucine,
    'K' => AminoAcid::Lysine,
    'L' => AminoAcid::Leucine,
    'M' => AminoAcid::Methionine,
    'N' => AminoAcid::Asparagine,
    'P' => AminoAcid::Proline,
    'Q' => AminoAcid::Glutamine,
    'R' => AminoAcid::Arginine,
    'S' => AminoAcid::Serine,
    'T' => AminoAcid::Threonine,
    'V' => AminoAcid::Valine,
    'W' => AminoAcid::Tryptophan,
    'Y' => AminoAcid::Tyrosine,
};

/// Gap symbol tolerated in wild-type sequences.
pub const GAP: char = '-';
/// Unknown-residue symbol tolerated in wild-type sequences.
pub const UNKNOWN: char = 'X';

impl AminoAcid {
    pub const ALL: [AminoAcid; 20] = [
        AminoAcid::Alanine,
        AminoAcid::Cysteine,
        AminoAcid::AsparticAcid,
        AminoAcid::GlutamicAcid,
        AminoAcid::Phenylalanine,
        AminoAcid::Glycine,
        AminoAcid::Histidine,
        AminoAcid::Isoleucine,
        AminoAcid::Lysine,
        AminoAcid::Leucine,
        AminoAcid::Methionine,
        AminoAcid::Asparagine,
        AminoAcid::Proline,
        AminoAcid::Glutamine,
        AminoAcid::Arginine,
        AminoAcid::Serine,
        AminoAcid::Threonine,
        AminoAcid::Valine,
        AminoAcid::Tryptophan,
        AminoAcid::Tyrosine,
    ];

    /// Looks up an amino acid by its one-letter code (case-insensitive).
    pub fn from_code(code: char) -> Option<Self> {
        ONE_LETTER_CODES.get(&code.to_ascii_uppercase()).copied()
    }

    pub fn code(self) -> char {
        match self {
            AminoAcid::Alanine => 'A',
            AminoAcid::Cysteine => 'C',
            AminoAcid::AsparticAcid => 'D',
            AminoAcid::GlutamicAcid => 'E',
            AminoAcid::Phenylalanine => 'F',
            AminoAcid::Glycine => 'G',
            AminoAcid::Histidine => 'H',
            AminoAcid::Isoleucine => 'I',
            AminoAcid::Lysine => 'K',
            AminoAcid::Leucine => 'L',
            AminoAcid::Methionine => 'M',
            AminoAcid::Asparagine => 'N',
            AminoAcid::Proline => 'P',
            AminoAcid::Glutamine => 'Q',
            AminoAcid::Arginine => 'R',
            AminoAcid::Serine => 'S',
            AminoAcid::Threonine => 'T',
            AminoAcid::Valine => 'V',
            AminoAcid::Tryptophan => 'W',
            AminoAcid::Tyrosine => 'Y',
        }
    }

    pub fn to_three_letter(self) -> &'static str {
        match self {
            AminoAcid::Alanine => "ALA",
            AminoAcid::Cysteine => "CYS",
            AminoAcid::AsparticAcid => "ASP",
            AminoAcid::GlutamicAcid => "GLU",
            AminoAcid::Phenylalanine => "PHE",
            AminoAcid::Glycine => "GLY",
            AminoAcid::Histidine => "HIS",
            AminoAcid::Isoleucine => "ILE",
            AminoAcid::Lysine => "LYS",
            AminoAcid::Leucine => "LEU",
            AminoAcid::Methionine => "MET",
            AminoAcid::Asparagine => "ASN",
            AminoAcid::Proline => "PRO",
            AminoAcid::Glutamine => "GLN",
            AminoAcid::Arginine => "ARG",
            AminoAcid::Serine => "SER",
            AminoAcid::Threonine => "THR",
            AminoAcid::Valine => "VAL",
            AminoAcid::Tryptophan => "TRP",
            AminoAcid::Tyrosine => "TYR",
        }
    }

    /// Position of this amino acid in [`AminoAcid::ALL`], used for one-hot encodings.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AminoAcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Returns whether `symbol` may appear in a wild-type or variant sequence.
pub fn is_sequence_symbol(symbol: char) -> bool {
    symbol == GAP || symbol == UNKNOWN || AminoAcid::from_code(symbol).is_some()
}

/// An ordered, duplicate-free set of amino acids that substitutions may draw from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Alphabet {
    residues: Vec<AminoAcid>,
}

impl Alphabet {
    /// All 20 standard amino acids.
    pub fn standard() -> Self {
        Self {
            residues: AminoAcid::ALL.to_vec(),
        }
    }

    /// Builds an alphabet from any collection of amino acids, sorting and deduplicating it.
    pub fn from_residues(residues: impl IntoIterator<Item = AminoAcid>) -> Self {
        let mut residues: Vec<AminoAcid> = residues.into_iter().collect();
        residues.sort();
        residues.dedup();
        Self { residues }
    }

    pub fn residues(&self) -> &[AminoAcid] {
        &self.residues
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    pub fn contains(&self, residue: AminoAcid) -> bool {
        self.residues.binary_search(&residue).is_ok()
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::standard()
    }
}

impl FromStr for Alphabet {
    type Err = ValidationError;

    /// Parses a string of one-letter codes such as `"ACDE"`. Whitespace and commas are
    /// ignored; any other non-standard symbol is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut residues = Vec::new();
        for symbol in s.chars().filter(|c| !c.is_whitespace() && *c != ',') {
            let residue =
                AminoAcid::from_code(symbol).ok_or(ValidationError::UnsupportedResidue(symbol))?;
            residues.push(residue);
        }
        if residues.is_empty() {
            return Err(ValidationError::InvalidPolicy(
                "substitution alphabet is empty".to_string(),
            ));
        }
        Ok(Self::from_residues(residues))
    }
}

impl fmt::Display for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for residue in &self.residues {
            write!(f, "{}", residue.code())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_for_all_amino_acids() {
        for residue in AminoAcid::ALL {
            assert_eq!(AminoAcid::from_code(residue.code()), Some(residue));
        }
    }

    #[test]
    fn from_code_is_case_insensitive() {
        assert_eq!(AminoAcid::from_code('w'), Some(AminoAcid::Tryptophan));
        assert_eq!(AminoAcid::from_code('B'), None);
    }

    #[test]
    fn declaration_order_matches_code_order() {
        let codes: Vec<char> = AminoAcid::ALL.iter().map(|a| a.code()).collect();
        let mut sorted = codes.clone();
        sorted.sort();
        assert_eq!(codes, sorted);
        assert_eq!(AminoAcid::Tyrosine.index(), 19);
    }

    #[test]
    fn gap_and_unknown_are_sequence_symbols() {
        assert!(is_sequence_symbol('-'));
        assert!(is_sequence_symbol('X'));
        assert!(!is_sequence_symbol('Z'));
    }

    #[test]
    fn alphabet_parse_sorts_and_deduplicates() {
        let alphabet: Alphabet = "EDCA, A".parse().unwrap();
        assert_eq!(alphabet.to_string(), "ACDE");
        assert_eq!(alphabet.len(), 4);
        assert!(alphabet.contains(AminoAcid::Cysteine));
        assert!(!alphabet.contains(AminoAcid::Glycine));
    }

    #[test]
    fn alphabet_parse_rejects_non_standard_symbols() {
        assert_eq!(
            "ACX".parse::<Alphabet>(),
            Err(ValidationError::UnsupportedResidue('X'))
        );
        assert!("".parse::<Alphabet>().is_err());
    }
}
