//! Trackable units and their indivisible fragments.
//!
//! A unit is a physical entity owned by the host (a vehicle, a station, a crew
//! member out on a tether). The engine never owns units: it only keeps their
//! stable [`UnitId`] and asks the host for a fresh [`UnitSnapshot`] whenever it
//! needs to look at one. A snapshot that cannot be produced means the unit is
//! currently absent.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xxhash_rust::xxh3::Xxh3;

/// Stable identity of a unit, preserved across reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub Uuid);

impl UnitId {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self(Uuid::nil())
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for UnitId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Category of a unit. Some categories (debris by default) are never
/// considered as candidates; see [`crate::catalog::Catalog`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Crewed or uncrewed vehicle.
    #[default]
    Vessel,
    /// Orbital station.
    Station,
    /// Surface base.
    Base,
    /// Lander.
    Lander,
    /// Rover.
    Rover,
    /// Probe.
    Probe,
    /// A single crew member outside of any vehicle.
    Eva,
    /// Spent stages and other junk.
    Debris,
}

impl UnitKind {
    /// Returns the lowercase name used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vessel => "vessel",
            Self::Station => "station",
            Self::Base => "base",
            Self::Lander => "lander",
            Self::Rover => "rover",
            Self::Probe => "probe",
            Self::Eva => "eva",
            Self::Debris => "debris",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content hash of a unit's smallest indivisible piece.
///
/// Computed from the set of part identifiers making up the fragment, so the
/// same physical fragment hashes identically no matter which unit currently
/// contains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentKey(pub u64);

impl FragmentKey {
    /// Hashes a fragment from its part identifiers (order-insensitive).
    #[must_use]
    pub fn of_parts<S: AsRef<str>>(parts: &[S]) -> Self {
        let mut sorted: Vec<&str> = parts.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut hasher = Xxh3::new();
        for part in sorted {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        Self(hasher.digest())
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for FragmentKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s.trim(), 16).map(Self)
    }
}

/// A member of a unit's item collection (a crew member, a part).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Display name.
    pub name: String,
    /// Free-form tags (`pilot`, `lab`, ...).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// Numeric attributes (`experience`, `occupants`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, f64>,
}

impl Item {
    /// Creates an item with no tags or values.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Builder: sets a numeric value.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: f64) -> Self {
        self.values.insert(key.into(), value);
        self
    }
}

/// Which item collection of a unit a leaf filters over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Crew aboard the unit.
    Crew,
    /// Structural parts of the unit.
    Parts,
}

impl Collection {
    /// Human-readable collection label used in explanation text.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Crew => "Crew",
            Self::Parts => "Parts",
        }
    }
}

/// Point-in-time view of a live unit, produced by the host on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    /// Stable identity.
    pub id: UnitId,
    /// Display name.
    pub name: String,
    /// Category.
    pub kind: UnitKind,
    /// Indivisible fragments currently making up the unit.
    pub fragments: Vec<FragmentKey>,
    /// Crew aboard.
    pub crew: Vec<Item>,
    /// Structural parts.
    pub parts: Vec<Item>,
    /// Unit-level numeric attributes (`altitude`, `speed`, ...).
    pub values: BTreeMap<String, f64>,
}

impl UnitSnapshot {
    /// Returns the requested item collection.
    #[must_use]
    pub fn items(&self, collection: Collection) -> &[Item] {
        match collection {
            Collection::Crew => &self.crew,
            Collection::Parts => &self.parts,
        }
    }

    /// Looks up a unit-level numeric attribute.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_key_is_order_insensitive() {
        let a = FragmentKey::of_parts(&["pod", "tank", "engine"]);
        let b = FragmentKey::of_parts(&["engine", "pod", "tank"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fragment_key_distinguishes_contents() {
        let a = FragmentKey::of_parts(&["pod", "tank"]);
        let b = FragmentKey::of_parts(&["pod", "tank", "port"]);
        assert_ne!(a, b);
        // Concatenation ambiguity is avoided by the separator
        assert_ne!(
            FragmentKey::of_parts(&["ab", "c"]),
            FragmentKey::of_parts(&["a", "bc"])
        );
    }

    #[test]
    fn test_fragment_key_hex_round_trip() {
        let key = FragmentKey::of_parts(&["hub"]);
        let text = key.to_string();
        assert_eq!(text.len(), 16);
        assert_eq!(text.parse::<FragmentKey>().unwrap(), key);
    }

    #[test]
    fn test_unit_id_round_trip() {
        let id = UnitId::new_v4();
        assert_eq!(id.to_string().parse::<UnitId>().unwrap(), id);
        assert!("not-a-uuid".parse::<UnitId>().is_err());
    }

    #[test]
    fn test_snapshot_items_by_collection() {
        let unit = UnitSnapshot {
            crew: vec![Item::named("Val").with_tag("pilot")],
            parts: vec![Item::named("cupola"), Item::named("hab")],
            ..UnitSnapshot::default()
        };
        assert_eq!(unit.items(Collection::Crew).len(), 1);
        assert_eq!(unit.items(Collection::Parts).len(), 2);
    }
}
