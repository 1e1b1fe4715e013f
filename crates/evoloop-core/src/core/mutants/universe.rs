use crate::core::error::ValidationError;
use crate::core::models::ids::VariantId;
use crate::core::models::sequence::Sequence;
use crate::core::models::variant::{MutationSet, Variant};
use std::collections::HashMap;

/// The ordered, deduplicated set of candidate variants for one wild type and policy.
///
/// A variant's [`VariantId`] is its index in enumeration order.
#[derive(Debug, Clone)]
pub struct MutantUniverse {
    wild_type: Sequence,
    variants: Vec<Variant>,
    by_sequence: HashMap<Sequence, VariantId>,
}

impl MutantUniverse {
    /// Builds a universe from variants already in enumeration order. Later variants whose
    /// sequence was already seen are dropped.
    pub fn from_ordered(wild_type: Sequence, ordered: impl IntoIterator<Item = Variant>) -> Self {
        let mut variants = Vec::new();
        let mut by_sequence = HashMap::new();
        for variant in ordered {
            if by_sequence.contains_key(variant.sequence()) {
                continue;
            }
            by_sequence.insert(variant.sequence().clone(), VariantId(variants.len()));
            variants.push(variant);
        }
        Self {
            wild_type,
            variants,
            by_sequence,
        }
    }

    pub fn wild_type(&self) -> &Sequence {
        &self.wild_type
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn get(&self, id: VariantId) -> Option<&Variant> {
        self.variants.get(id.0)
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn ids(&self) -> impl Iterator<Item = VariantId> + '_ {
        (0..self.variants.len()).map(VariantId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VariantId, &Variant)> + '_ {
        self.variants
            .iter()
            .enumerate()
            .map(|(i, v)| (VariantId(i), v))
    }

    pub fn id_of(&self, sequence: &Sequence) -> Option<VariantId> {
        self.by_sequence.get(sequence).copied()
    }

    /// Resolves a mutation descriptor (`WT`, `C2A`, `C2A:D3E`) to a member of the universe.
    pub fn resolve(&self, descriptor: &str) -> Result<VariantId, ValidationError> {
        let mutations: MutationSet = descriptor.parse()?;
        let variant = Variant::from_mutations(&self.wild_type, mutations)?;
        self.id_of(variant.sequence())
            .ok_or_else(|| ValidationError::UnknownVariant(descriptor.trim().to_string()))
    }

    /// Resolves either a descriptor or a full sequence. Descriptors take precedence.
    pub fn resolve_key(&self, key: &str) -> Result<VariantId, ValidationError> {
        match self.resolve(key) {
            Ok(id) => Ok(id),
            Err(descriptor_err) => match Sequence::parse(key) {
                Ok(sequence) => self
                    .id_of(&sequence)
                    .ok_or_else(|| ValidationError::UnknownVariant(key.trim().to_string())),
                Err(_) => Err(descriptor_err),
            },
        }
    }

    pub fn descriptor(&self, id: VariantId) -> Option<String> {
        self.get(id).map(Variant::descriptor)
    }
}
