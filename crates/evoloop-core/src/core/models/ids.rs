use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a variant in its universe's enumeration order.
///
/// The index doubles as the deterministic tie-break rank used by acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariantId(pub usize);

impl VariantId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
