use super::surrogate::{Prediction, UncertaintyKind};
use crate::core::models::ids::VariantId;
use crate::core::mutants::MutantUniverse;
use std::cmp::Ordering;
use std::fmt;
use tracing::warn;

/// Rule for turning predictions into the next batch of variants to test.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionPolicy {
    /// Top-K by predicted mean.
    Exploit,
    /// Top-K by `mean + lambda * uncertainty`.
    UpperConfidenceBound { lambda: f64 },
    /// Greedy top-K by mean, skipping candidates closer than `min_distance` substitutions
    /// to an earlier pick.
    Diverse { min_distance: usize },
}

impl AcquisitionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            AcquisitionPolicy::Exploit => "exploit",
            AcquisitionPolicy::UpperConfidenceBound { .. } => "ucb",
            AcquisitionPolicy::Diverse { .. } => "diverse",
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            AcquisitionPolicy::UpperConfidenceBound { lambda } if !(lambda.is_finite() && *lambda >= 0.0) => {
                Err(format!("ucb lambda must be a non-negative number, got {lambda}"))
            }
            AcquisitionPolicy::Diverse { min_distance: 0 } => {
                Err("diverse min_distance must be at least 1".to_string())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for AcquisitionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionPolicy::Exploit => f.write_str("exploit"),
            AcquisitionPolicy::UpperConfidenceBound { lambda } => write!(f, "ucb(lambda={lambda})"),
            AcquisitionPolicy::Diverse { min_distance } => {
                write!(f, "diverse(min_distance={min_distance})")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub variant: VariantId,
    /// Acquisition score the variant was ranked by.
    pub score: f64,
    pub prediction: Prediction,
}

fn acquisition_score(policy: &AcquisitionPolicy, prediction: &Prediction) -> f64 {
    let raw = match policy {
        AcquisitionPolicy::UpperConfidenceBound { lambda }
            if prediction.kind == UncertaintyKind::EnsembleStd =>
        {
            prediction.mean + lambda * prediction.uncertainty
        }
        _ => prediction.mean,
    };
    if raw.is_nan() { f64::NEG_INFINITY } else { raw }
}

fn by_score_then_rank(a: &Selection, b: &Selection) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.variant.cmp(&b.variant))
}

/// Picks up to `k` candidates under `policy`.
///
/// Equal scores are broken by enumeration order (lower [`VariantId`] first). The result is
/// ordered by rank.
pub fn select(
    candidates: &[(VariantId, Prediction)],
    k: usize,
    policy: &AcquisitionPolicy,
    universe: &MutantUniverse,
) -> Vec<Selection> {
    if k == 0 || candidates.is_empty() {
        return Vec::new();
    }

    if let AcquisitionPolicy::UpperConfidenceBound { .. } = policy {
        if candidates
            .iter()
            .any(|(_, p)| p.kind == UncertaintyKind::Placeholder)
        {
            warn!("Model has no native uncertainty; upper confidence bound falls back to the predicted mean.");
        }
    }

    let mut ranked: Vec<Selection> = candidates
        .iter()
        .map(|&(variant, prediction)| Selection {
            variant,
            score: acquisition_score(policy, &prediction),
            prediction,
        })
        .collect();
    ranked.sort_by(by_score_then_rank);

    match policy {
        AcquisitionPolicy::Diverse { min_distance } => {
            let mut picks: Vec<Selection> = Vec::with_capacity(k);
            for candidate in ranked {
                if picks.len() == k {
                    break;
                }
                let Some(variant) = universe.get(candidate.variant) else {
                    continue;
                };
                let far_enough = picks.iter().all(|pick| {
                    universe
                        .get(pick.variant)
                        .and_then(|other| other.sequence().hamming_distance(variant.sequence()))
                        .is_none_or(|d| d >= *min_distance)
                });
                if far_enough {
                    picks.push(candidate);
                }
            }
            picks
        }
        _ => {
            ranked.truncate(k);
            ranked
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::residue::Alphabet;
    use crate::core::models::sequence::Sequence;
    use crate::core::mutants::{MutationPolicy, enumerate};

    fn universe() -> MutantUniverse {
        let wt = Sequence::parse("ACDE").unwrap();
        let policy = MutationPolicy::SingleSite {
            positions: None,
            alphabet: "ACDEG".parse::<Alphabet>().unwrap(),
        };
        enumerate(&wt, &policy).unwrap()
    }

    fn placeholder(mean: f64) -> Prediction {
        Prediction {
            mean,
            uncertainty: 0.3,
            kind: UncertaintyKind::Placeholder,
        }
    }

    fn ensemble(mean: f64, uncertainty: f64) -> Prediction {
        Prediction {
            mean,
            uncertainty,
            kind: UncertaintyKind::EnsembleStd,
        }
    }

    fn ids(selections: &[Selection]) -> Vec<usize> {
        selections.iter().map(|s| s.variant.index()).collect()
    }

    #[test]
    fn exploit_takes_top_means_with_ties_by_enumeration_order() {
        let u = universe();
        let candidates = vec![
            (VariantId(1), placeholder(0.9)),
            (VariantId(2), placeholder(0.9)),
            (VariantId(3), placeholder(0.5)),
        ];
        let picks = select(&candidates, 2, &AcquisitionPolicy::Exploit, &u);
        assert_eq!(ids(&picks), vec![1, 2]);

        let reversed: Vec<_> = candidates.iter().rev().copied().collect();
        let picks = select(&reversed, 2, &AcquisitionPolicy::Exploit, &u);
        assert_eq!(ids(&picks), vec![1, 2]);
    }

    #[test]
    fn ucb_uses_ensemble_uncertainty() {
        let u = universe();
        let candidates = vec![
            (VariantId(0), ensemble(1.0, 0.0)),
            (VariantId(1), ensemble(0.8, 0.5)),
        ];
        let policy = AcquisitionPolicy::UpperConfidenceBound { lambda: 1.0 };
        let picks = select(&candidates, 1, &policy, &u);
        assert_eq!(ids(&picks), vec![1]);
        assert!((picks[0].score - 1.3).abs() < 1e-12);
    }

    #[test]
    fn ucb_ignores_placeholder_uncertainty() {
        let u = universe();
        let candidates = vec![(VariantId(0), placeholder(1.0)), (VariantId(1), placeholder(0.8))];
        let policy = AcquisitionPolicy::UpperConfidenceBound { lambda: 10.0 };
        let picks = select(&candidates, 2, &policy, &u);
        assert_eq!(ids(&picks), vec![0, 1]);
        assert_eq!(picks[0].score, 1.0);
    }

    #[test]
    fn nan_predictions_rank_last() {
        let u = universe();
        let candidates = vec![(VariantId(0), placeholder(f64::NAN)), (VariantId(1), placeholder(-5.0))];
        let picks = select(&candidates, 1, &AcquisitionPolicy::Exploit, &u);
        assert_eq!(ids(&picks), vec![1]);
    }

    #[test]
    fn diverse_skips_close_variants() {
        let u = universe();
        // single mutants at the same position are one substitution apart, at different
        // positions two apart
        let same_site = u.resolve("A1C").unwrap();
        let same_site_too = u.resolve("A1D").unwrap();
        let other_site = u.resolve("C2G").unwrap();
        let candidates = vec![
            (same_site, placeholder(0.9)),
            (same_site_too, placeholder(0.8)),
            (other_site, placeholder(0.1)),
        ];
        let policy = AcquisitionPolicy::Diverse { min_distance: 2 };
        let picks = select(&candidates, 2, &policy, &u);
        assert_eq!(
            picks.iter().map(|s| s.variant).collect::<Vec<_>>(),
            vec![same_site, other_site]
        );
    }

    #[test]
    fn selection_never_exceeds_k_or_pool() {
        let u = universe();
        let candidates = vec![(VariantId(0), placeholder(1.0))];
        assert_eq!(select(&candidates, 5, &AcquisitionPolicy::Exploit, &u).len(), 1);
        assert!(select(&candidates, 0, &AcquisitionPolicy::Exploit, &u).is_empty());
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(AcquisitionPolicy::UpperConfidenceBound { lambda: -1.0 }.validate().is_err());
        assert!(AcquisitionPolicy::UpperConfidenceBound { lambda: f64::NAN }.validate().is_err());
        assert!(AcquisitionPolicy::Diverse { min_distance: 0 }.validate().is_err());
        assert!(AcquisitionPolicy::Exploit.validate().is_ok());
    }
}
