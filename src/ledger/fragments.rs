//! Fragment ledger: completion claims keyed by fragment content hash.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::state::{Confidence, Timestamp};
use crate::unit::FragmentKey;

/// What is known about one fragment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FragmentRecord {
    /// Strongest confidence ever recorded.
    pub confidence: Confidence,
    /// Earliest completion seen, if the fragment ever belonged to a
    /// completed unit.
    pub completion: Option<Timestamp>,
}

/// Map from fragment hash to its record.
///
/// Recording never lowers a stored confidence and never moves a stored
/// completion time later.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentLedger {
    entries: IndexMap<FragmentKey, FragmentRecord>,
}

impl FragmentLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a claim into the fragment's record.
    pub fn record(
        &mut self,
        key: FragmentKey,
        confidence: Confidence,
        completion: Option<Timestamp>,
    ) {
        self.entries
            .entry(key)
            .and_modify(|r| {
                r.confidence = r.confidence.max(confidence);
                r.completion = earliest(r.completion, completion);
            })
            .or_insert(FragmentRecord {
                confidence,
                completion,
            });
    }

    /// Records every fragment of a unit with the same claim.
    pub fn record_all(
        &mut self,
        keys: &[FragmentKey],
        confidence: Confidence,
        completion: Option<Timestamp>,
    ) {
        for key in keys {
            self.record(*key, confidence, completion);
        }
    }

    /// Looks up a fragment.
    #[must_use]
    pub fn get(&self, key: FragmentKey) -> Option<&FragmentRecord> {
        self.entries.get(&key)
    }

    /// All entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&FragmentKey, &FragmentRecord)> {
        self.entries.iter()
    }

    /// Number of recorded fragments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Earlier of two optional times, ignoring `None`.
#[must_use]
pub fn earliest(a: Option<Timestamp>, b: Option<Timestamp>) -> Option<Timestamp> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_strongest_confidence() {
        let key = FragmentKey(7);
        let mut ledger = FragmentLedger::new();
        ledger.record(key, Confidence::Strong, Some(10.0));
        ledger.record(key, Confidence::Weak, None);
        let record = ledger.get(key).unwrap();
        assert_eq!(record.confidence, Confidence::Strong);
        assert_eq!(record.completion, Some(10.0));
    }

    #[test]
    fn test_record_keeps_earliest_completion() {
        let key = FragmentKey(1);
        let mut ledger = FragmentLedger::new();
        ledger.record(key, Confidence::Weak, None);
        ledger.record(key, Confidence::Weak, Some(30.0));
        ledger.record(key, Confidence::Medium, Some(20.0));
        ledger.record(key, Confidence::Weak, Some(25.0));
        let record = ledger.get(key).unwrap();
        assert_eq!(record.confidence, Confidence::Medium);
        assert_eq!(record.completion, Some(20.0));
    }

    #[test]
    fn test_earliest() {
        assert_eq!(earliest(None, None), None);
        assert_eq!(earliest(Some(1.0), None), Some(1.0));
        assert_eq!(earliest(None, Some(2.0)), Some(2.0));
        assert_eq!(earliest(Some(3.0), Some(2.0)), Some(2.0));
    }
}
