//! Candidate universe generation.
//!
//! [`enumerate`] expands a wild type and a [`MutationPolicy`] into a deterministic,
//! exhaustive [`MutantUniverse`]: mutation sets are sorted lexicographically by
//! `(position, residue)` and variants producing an already-seen sequence are dropped.

pub mod policy;
pub mod universe;

pub use policy::{Candidate, MutationPolicy, SiteSubstitutions};
pub use universe::MutantUniverse;

use crate::core::error::ValidationError;
use crate::core::models::residue::{AminoAcid, Alphabet};
use crate::core::models::sequence::Sequence;
use crate::core::models::variant::{Mutation, MutationSet, Variant};
use std::collections::HashSet;
use tracing::debug;

/// Upper bound on the number of mutation sets a policy may expand to.
pub const MAX_UNIVERSE_SIZE: usize = 5_000_000;

pub fn enumerate(
    wild_type: &Sequence,
    policy: &MutationPolicy,
) -> Result<MutantUniverse, ValidationError> {
    let mut sets = match policy {
        MutationPolicy::SingleSite {
            positions,
            alphabet,
        } => single_site(wild_type, positions.as_deref(), alphabet)?,
        MutationPolicy::Combinatorial { sites, max_order } => {
            combinatorial(wild_type, sites, *max_order)?
        }
        MutationPolicy::ExplicitList { candidates } => explicit(wild_type, candidates)?,
    };

    sets.sort();
    sets.dedup();

    let variants = sets
        .into_iter()
        .map(|set| Variant::from_mutations(wild_type, set))
        .collect::<Result<Vec<_>, _>>()?;
    let universe = MutantUniverse::from_ordered(wild_type.clone(), variants);

    debug!(
        policy = policy.name(),
        wild_type_length = wild_type.len(),
        variants = universe.len(),
        "Enumerated mutant universe."
    );
    Ok(universe)
}

fn check_position(wild_type: &Sequence, position: usize) -> Result<char, ValidationError> {
    wild_type
        .residue_at(position)
        .ok_or(ValidationError::PositionOutOfRange {
            position,
            length: wild_type.len(),
        })
}

fn check_distinct(positions: impl IntoIterator<Item = usize>) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for position in positions {
        if !seen.insert(position) {
            return Err(ValidationError::DuplicatePosition(position));
        }
    }
    Ok(())
}

fn substitutions(from: char, alphabet: &Alphabet) -> Vec<AminoAcid> {
    alphabet
        .residues()
        .iter()
        .copied()
        .filter(|aa| aa.code() != from)
        .collect()
}

fn single_site(
    wild_type: &Sequence,
    positions: Option<&[usize]>,
    alphabet: &Alphabet,
) -> Result<Vec<MutationSet>, ValidationError> {
    if alphabet.is_empty() {
        return Err(ValidationError::InvalidPolicy(
            "substitution alphabet is empty".to_string(),
        ));
    }
    let positions: Vec<usize> = match positions {
        Some(list) => {
            check_distinct(list.iter().copied())?;
            list.to_vec()
        }
        None => (1..=wild_type.len()).collect(),
    };

    let mut sets = Vec::with_capacity(positions.len() * alphabet.len());
    for position in positions {
        let from = check_position(wild_type, position)?;
        for to in substitutions(from, alphabet) {
            sets.push(MutationSet::new(vec![Mutation::new(position, from, to)])?);
        }
    }
    Ok(sets)
}

struct Site {
    position: usize,
    from: char,
    residues: Vec<AminoAcid>,
}

fn combinatorial(
    wild_type: &Sequence,
    sites: &[SiteSubstitutions],
    max_order: usize,
) -> Result<Vec<MutationSet>, ValidationError> {
    if max_order == 0 {
        return Err(ValidationError::InvalidPolicy(
            "max_order must be at least 1".to_string(),
        ));
    }
    if sites.is_empty() {
        return Err(ValidationError::InvalidPolicy(
            "combinatorial policy lists no sites".to_string(),
        ));
    }
    check_distinct(sites.iter().map(|s| s.position))?;

    let mut resolved = sites
        .iter()
        .map(|site| {
            let from = check_position(wild_type, site.position)?;
            Ok(Site {
                position: site.position,
                from,
                residues: substitutions(from, &site.residues),
            })
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;
    resolved.sort_by_key(|s| s.position);

    let expected = count_combinations(&resolved, max_order);
    if expected > MAX_UNIVERSE_SIZE {
        return Err(ValidationError::InvalidPolicy(format!(
            "policy expands to more than {MAX_UNIVERSE_SIZE} variants"
        )));
    }

    let mut sets = Vec::with_capacity(expected);
    let mut current = Vec::with_capacity(max_order);
    extend(&resolved, 0, max_order, &mut current, &mut sets)?;
    Ok(sets)
}

/// Number of mutation sets of order 1..=`max_order`, saturating on overflow.
fn count_combinations(sites: &[Site], max_order: usize) -> usize {
    // by_order[k] = number of sets of exactly k mutations over the sites seen so far
    let mut by_order = vec![0usize; max_order + 1];
    by_order[0] = 1;
    for site in sites {
        for k in (1..=max_order).rev() {
            let added = by_order[k - 1].saturating_mul(site.residues.len());
            by_order[k] = by_order[k].saturating_add(added);
        }
    }
    by_order[1..]
        .iter()
        .fold(0usize, |acc, n| acc.saturating_add(*n))
}

fn extend(
    sites: &[Site],
    start: usize,
    remaining: usize,
    current: &mut Vec<Mutation>,
    out: &mut Vec<MutationSet>,
) -> Result<(), ValidationError> {
    for (offset, site) in sites[start..].iter().enumerate() {
        for &to in &site.residues {
            current.push(Mutation::new(site.position, site.from, to));
            out.push(MutationSet::new(current.clone())?);
            if remaining > 1 {
                extend(sites, start + offset + 1, remaining - 1, current, out)?;
            }
            current.pop();
        }
    }
    Ok(())
}

fn explicit(
    wild_type: &Sequence,
    candidates: &[Candidate],
) -> Result<Vec<MutationSet>, ValidationError> {
    candidates
        .iter()
        .map(|candidate| match candidate {
            Candidate::Descriptor(descriptor) => {
                let set: MutationSet = descriptor.parse()?;
                set.apply_to(wild_type)?;
                Ok(set)
            }
            Candidate::Sequence(raw) => {
                let sequence = Sequence::parse(raw)?;
                let mutations = wild_type
                    .differences(&sequence)?
                    .into_iter()
                    .map(|(position, from, to)| {
                        AminoAcid::from_code(to)
                            .map(|aa| Mutation::new(position, from, aa))
                            .ok_or(ValidationError::UnsupportedResidue(to))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                MutationSet::new(mutations)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(s: &str) -> Sequence {
        Sequence::parse(s).unwrap()
    }

    fn sequences(universe: &MutantUniverse) -> Vec<String> {
        universe
            .variants()
            .iter()
            .map(|v| v.sequence().to_string())
            .collect()
    }

    #[test]
    fn single_site_over_custom_alphabet_skips_only_identity_so_c2d_is_kept() {
        let policy = MutationPolicy::SingleSite {
            positions: Some(vec![2]),
            alphabet: "ACDE".parse().unwrap(),
        };
        let universe = enumerate(&seq("ACD"), &policy).unwrap();
        // The two-member {AAD, AED} form of this example drops C2D. ADD differs from the
        // wild type at position 2 like the other two, so it belongs in the universe.
        assert_eq!(sequences(&universe), vec!["AAD", "ADD", "AED"]);
    }

    #[test]
    fn single_site_never_contains_wild_type_sequence() {
        let policy = MutationPolicy::SingleSite {
            positions: Some(vec![2]),
            alphabet: "ACDE".parse().unwrap(),
        };
        let universe = enumerate(&seq("ACD"), &policy).unwrap();
        assert!(universe.id_of(&seq("ACD")).is_none());
        assert!(universe.id_of(&seq("AAD")).is_some());
        assert!(universe.id_of(&seq("AED")).is_some());
    }

    #[test]
    fn saturation_covers_every_position_and_residue() {
        let universe = enumerate(&seq("ACD"), &MutationPolicy::saturation()).unwrap();
        assert_eq!(universe.len(), 3 * 19);
        let first = universe.get(crate::core::models::ids::VariantId(0)).unwrap();
        assert_eq!(first.descriptor(), "A1C");
    }

    #[test]
    fn enumeration_is_deterministic() {
        let policy = MutationPolicy::saturation();
        let a = enumerate(&seq("MKTAYIAK"), &policy).unwrap();
        let b = enumerate(&seq("MKTAYIAK"), &policy).unwrap();
        assert_eq!(sequences(&a), sequences(&b));
    }

    #[test]
    fn single_site_rejects_out_of_range_and_duplicate_positions() {
        let out_of_range = MutationPolicy::SingleSite {
            positions: Some(vec![4]),
            alphabet: Alphabet::standard(),
        };
        assert_eq!(
            enumerate(&seq("ACD"), &out_of_range).unwrap_err(),
            ValidationError::PositionOutOfRange {
                position: 4,
                length: 3
            }
        );
        let duplicated = MutationPolicy::SingleSite {
            positions: Some(vec![1, 1]),
            alphabet: Alphabet::standard(),
        };
        assert_eq!(
            enumerate(&seq("ACD"), &duplicated).unwrap_err(),
            ValidationError::DuplicatePosition(1)
        );
    }

    #[test]
    fn combinatorial_expands_all_orders() {
        let policy = MutationPolicy::Combinatorial {
            sites: vec![
                SiteSubstitutions {
                    position: 3,
                    residues: "DE".parse().unwrap(),
                },
                SiteSubstitutions {
                    position: 1,
                    residues: "AG".parse().unwrap(),
                },
            ],
            max_order: 2,
        };
        let universe = enumerate(&seq("ACD"), &policy).unwrap();
        let descriptors: Vec<String> = universe.variants().iter().map(|v| v.descriptor()).collect();
        assert_eq!(descriptors, vec!["A1G", "A1G:D3E", "D3E"]);
    }

    #[test]
    fn combinatorial_respects_max_order() {
        let sites = (1..=3)
            .map(|position| SiteSubstitutions {
                position,
                residues: "FGW".parse().unwrap(),
            })
            .collect::<Vec<_>>();
        let order_one = MutationPolicy::Combinatorial {
            sites: sites.clone(),
            max_order: 1,
        };
        assert_eq!(enumerate(&seq("ACD"), &order_one).unwrap().len(), 9);

        let order_three = MutationPolicy::Combinatorial {
            sites,
            max_order: 3,
        };
        // 9 singles + 27 doubles + 27 triples
        assert_eq!(enumerate(&seq("ACD"), &order_three).unwrap().len(), 63);
    }

    #[test]
    fn combinatorial_rejects_zero_order_and_duplicate_sites() {
        let site = SiteSubstitutions {
            position: 1,
            residues: "G".parse().unwrap(),
        };
        let zero = MutationPolicy::Combinatorial {
            sites: vec![site.clone()],
            max_order: 0,
        };
        assert!(matches!(
            enumerate(&seq("ACD"), &zero),
            Err(ValidationError::InvalidPolicy(_))
        ));
        let duplicated = MutationPolicy::Combinatorial {
            sites: vec![site.clone(), site],
            max_order: 2,
        };
        assert_eq!(
            enumerate(&seq("ACD"), &duplicated).unwrap_err(),
            ValidationError::DuplicatePosition(1)
        );
    }

    #[test]
    fn explicit_list_accepts_descriptors_and_sequences() {
        let policy = MutationPolicy::ExplicitList {
            candidates: vec![
                Candidate::Sequence("AED".to_string()),
                Candidate::Descriptor("WT".to_string()),
                Candidate::Descriptor("C2E".to_string()),
                Candidate::Descriptor("A1G".to_string()),
            ],
        };
        let universe = enumerate(&seq("ACD"), &policy).unwrap();
        let descriptors: Vec<String> = universe.variants().iter().map(|v| v.descriptor()).collect();
        assert_eq!(descriptors, vec!["WT", "A1G", "C2E"]);
    }

    #[test]
    fn explicit_sequences_must_match_wild_type_length() {
        let policy = MutationPolicy::ExplicitList {
            candidates: vec![Candidate::Sequence("ACDE".to_string())],
        };
        assert_eq!(
            enumerate(&seq("ACD"), &policy).unwrap_err(),
            ValidationError::LengthMismatch {
                expected: 3,
                found: 4
            }
        );
    }

    #[test]
    fn explicit_sequences_report_invalid_positions() {
        let policy = MutationPolicy::ExplicitList {
            candidates: vec![Candidate::Sequence("AZD".to_string())],
        };
        assert_eq!(
            enumerate(&seq("ACD"), &policy).unwrap_err(),
            ValidationError::InvalidResidue {
                position: 2,
                residue: 'Z'
            }
        );
    }
}
