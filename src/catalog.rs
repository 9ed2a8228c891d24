//! Reference data shared by every contract.
//!
//! The catalog is built once at start-up (from the scenario's `catalog`
//! section or [`Catalog::default`]) and handed to each
//! [`ContractEngine`](crate::engine::ContractEngine) behind an `Arc`. It is
//! never mutated afterwards and lives until the last engine drops it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::unit::UnitKind;

/// Lookup table for unit-kind exclusion and item tag aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    /// Unit kinds that are never tracking candidates.
    pub excluded_kinds: HashSet<UnitKind>,
    /// Alias -> canonical tag (`scientist` -> `science`).
    pub tag_aliases: HashMap<String, String>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            excluded_kinds: HashSet::from([UnitKind::Debris]),
            tag_aliases: HashMap::new(),
        }
    }
}

impl Catalog {
    /// Returns `true` if units of this kind must never be considered.
    #[must_use]
    pub fn is_excluded(&self, kind: UnitKind) -> bool {
        self.excluded_kinds.contains(&kind)
    }

    /// Resolves a tag through the alias table.
    #[must_use]
    pub fn canonical_tag<'a>(&'a self, tag: &'a str) -> &'a str {
        self.tag_aliases.get(tag).map_or(tag, String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_excludes_debris() {
        let catalog = Catalog::default();
        assert!(catalog.is_excluded(UnitKind::Debris));
        assert!(!catalog.is_excluded(UnitKind::Vessel));
    }

    #[test]
    fn test_tag_alias_resolution() {
        let mut catalog = Catalog::default();
        catalog
            .tag_aliases
            .insert("scientist".to_string(), "science".to_string());
        assert_eq!(catalog.canonical_tag("scientist"), "science");
        assert_eq!(catalog.canonical_tag("pilot"), "pilot");
    }
}
