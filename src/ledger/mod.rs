//! Per-unit state ledger for a unit leaf.
//!
//! Each unit leaf owns one [`UnitLedger`]. It remembers, for every unit the
//! leaf has ever looked at, whether that unit completed the condition, when,
//! and how confidently. Host topology events (merge, split, crew transfer,
//! new unit) move completion claims between units and through the
//! [`FragmentLedger`] so a claim survives a unit being taken apart and put
//! back together.
//!
//! All operations are total: unknown units are treated as `Incomplete` and
//! inconsistent input is ignored.

pub mod fragments;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::state::{Confidence, ParameterState, Timestamp};
use crate::unit::{FragmentKey, UnitId};

pub use fragments::{FragmentLedger, FragmentRecord, earliest};

/// Per-unit record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Current state for the unit.
    pub state: ParameterState,
    /// When the unit (or the unit it inherited from) completed.
    pub completion: Option<Timestamp>,
    /// How directly the unit earned the claim.
    pub confidence: Confidence,
}

impl Default for UnitRecord {
    fn default() -> Self {
        Self {
            state: ParameterState::Incomplete,
            completion: None,
            confidence: Confidence::Strong,
        }
    }
}

/// State-setting policies of a leaf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeafPolicy {
    /// Once complete or failed, a unit never returns to incomplete.
    pub disable_on_state_change: bool,
    /// An unmet condition counts as failed.
    pub fail_when_unmet: bool,
}

/// Unit state ledger plus its fragment ledger.
#[derive(Debug, Clone, Default)]
pub struct UnitLedger {
    records: IndexMap<UnitId, UnitRecord>,
    fragments: FragmentLedger,
    policy: LeafPolicy,
    has_recorded: bool,
    policy_locked: bool,
}

impl UnitLedger {
    /// Creates an empty ledger with the given policy.
    #[must_use]
    pub fn new(policy: LeafPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Active policy.
    #[must_use]
    pub const fn policy(&self) -> LeafPolicy {
        self.policy
    }

    /// Returns `true` once a state change was forced off by the latch.
    #[must_use]
    pub const fn policy_locked(&self) -> bool {
        self.policy_locked
    }

    /// Turns the "disable on state change" policy on or off.
    ///
    /// Only honoured before any state was recorded. Afterwards the policy is
    /// switched off for good.
    pub fn set_disable_on_state_change(&mut self, enabled: bool) {
        if self.policy_locked {
            return;
        }
        if self.has_recorded {
            debug!(
                requested = enabled,
                "state already recorded, disable_on_state_change latched off"
            );
            self.policy.disable_on_state_change = false;
            self.policy_locked = true;
            return;
        }
        self.policy.disable_on_state_change = enabled;
    }

    /// Records `state` for `unit`. Returns `true` if the stored state
    /// changed.
    pub fn set_state(&mut self, unit: UnitId, state: ParameterState, now: Timestamp) -> bool {
        let state = self.promote_unmet(state);
        self.has_recorded = true;

        let record = self.records.entry(unit).or_default();
        if record.state == state {
            if state.is_complete() {
                record.confidence = Confidence::Strong;
            }
            return false;
        }
        if state == ParameterState::Incomplete
            && self.policy.disable_on_state_change
            && record.state != ParameterState::Incomplete
        {
            trace!(%unit, from = %record.state, "reset refused by disable_on_state_change");
            return false;
        }

        debug!(%unit, from = %record.state, to = %state, "unit state changed");
        record.state = state;
        match state {
            ParameterState::Complete => {
                record.completion = Some(now);
                record.confidence = Confidence::Strong;
            }
            ParameterState::Incomplete => record.completion = None,
            ParameterState::Failed => {}
        }
        true
    }

    const fn promote_unmet(&self, state: ParameterState) -> ParameterState {
        if matches!(state, ParameterState::Incomplete) && self.policy.fail_when_unmet {
            ParameterState::Failed
        } else {
            state
        }
    }

    /// State reported while no unit is attached.
    #[must_use]
    pub const fn unattached_state(&self) -> ParameterState {
        self.promote_unmet(ParameterState::Incomplete)
    }

    /// State `unit` would hold after `set_state(unit, state, _)`, without
    /// recording anything.
    #[must_use]
    pub fn preview(&self, unit: UnitId, state: ParameterState) -> ParameterState {
        let state = self.promote_unmet(state);
        let current = self.state(unit);
        if state == ParameterState::Incomplete
            && self.policy.disable_on_state_change
            && current != ParameterState::Incomplete
        {
            current
        } else {
            state
        }
    }

    /// State of `unit` (`Incomplete` if never seen).
    #[must_use]
    pub fn state(&self, unit: UnitId) -> ParameterState {
        self.records.get(&unit).map_or_else(ParameterState::default, |r| r.state)
    }

    /// Completion time of `unit`.
    #[must_use]
    pub fn completion_time(&self, unit: UnitId) -> Option<Timestamp> {
        self.records.get(&unit).and_then(|r| r.completion)
    }

    /// Confidence of `unit`, if it has a record.
    #[must_use]
    pub fn confidence(&self, unit: UnitId) -> Option<Confidence> {
        self.records.get(&unit).map(|r| r.confidence)
    }

    /// Full record of `unit`.
    #[must_use]
    pub fn record(&self, unit: UnitId) -> Option<&UnitRecord> {
        self.records.get(&unit)
    }

    /// Units currently complete, in first-seen order.
    pub fn completing_units(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.records
            .iter()
            .filter(|(_, r)| r.state.is_complete())
            .map(|(id, _)| *id)
    }

    /// All records in first-seen order.
    pub fn records(&self) -> impl Iterator<Item = (&UnitId, &UnitRecord)> {
        self.records.iter()
    }

    /// Fragment ledger.
    #[must_use]
    pub const fn fragments(&self) -> &FragmentLedger {
        &self.fragments
    }

    /// Restores a persisted unit record.
    pub fn restore_record(&mut self, unit: UnitId, record: UnitRecord) {
        self.has_recorded = true;
        self.records.insert(unit, record);
    }

    /// Restores a persisted fragment record.
    pub fn restore_fragment(&mut self, key: FragmentKey, record: FragmentRecord) {
        self.fragments.record(key, record.confidence, record.completion);
    }

    /// Restores the policy latch.
    pub const fn restore_policy(&mut self, policy: LeafPolicy, locked: bool) {
        self.policy = policy;
        self.policy_locked = locked;
    }

    fn write(&mut self, unit: UnitId, record: UnitRecord) {
        self.has_recorded = true;
        self.records.insert(unit, record);
    }

    // ------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------

    /// Two units are about to join.
    ///
    /// - Neither complete: nothing happens.
    /// - Both complete: both drop to at most `Medium` and share the earlier
    ///   completion time.
    /// - One complete: unless its claim is `Weak`, the other side inherits
    ///   it at `Medium` and the source drops to `Medium` as well.
    ///
    /// Fragments of both sides are recorded first so a later split can
    /// recover the original claims.
    pub fn on_merge(
        &mut self,
        a: UnitId,
        a_fragments: &[FragmentKey],
        b: UnitId,
        b_fragments: &[FragmentKey],
    ) {
        let ra = self.records.get(&a).copied().unwrap_or_default();
        let rb = self.records.get(&b).copied().unwrap_or_default();

        match (ra.state.is_complete(), rb.state.is_complete()) {
            (false, false) => {}
            (true, true) => {
                self.fragments
                    .record_all(a_fragments, ra.confidence.fragment_grade(), ra.completion);
                self.fragments
                    .record_all(b_fragments, rb.confidence.fragment_grade(), rb.completion);
                let merged = UnitRecord {
                    state: ParameterState::Complete,
                    completion: earliest(ra.completion, rb.completion),
                    confidence: ra.confidence.max(rb.confidence).min(Confidence::Medium),
                };
                self.write(a, merged);
                self.write(b, merged);
                debug!(%a, %b, confidence = %merged.confidence, "merge of two completed units");
            }
            (true, false) => self.inherit_on_merge(a, ra, a_fragments, b, rb, b_fragments),
            (false, true) => self.inherit_on_merge(b, rb, b_fragments, a, ra, a_fragments),
        }
    }

    fn inherit_on_merge(
        &mut self,
        source: UnitId,
        source_record: UnitRecord,
        source_fragments: &[FragmentKey],
        partner: UnitId,
        partner_record: UnitRecord,
        partner_fragments: &[FragmentKey],
    ) {
        if source_record.confidence == Confidence::Weak {
            trace!(%source, %partner, "weak claim not inherited on merge");
            return;
        }
        self.fragments.record_all(
            source_fragments,
            source_record.confidence.fragment_grade(),
            source_record.completion,
        );
        self.fragments
            .record_all(partner_fragments, Confidence::Weak, None);

        let inherited = UnitRecord {
            state: ParameterState::Complete,
            completion: source_record.completion,
            confidence: Confidence::Medium,
        };
        if !partner_record.state.is_failed() {
            self.write(partner, inherited);
        }
        self.write(
            source,
            UnitRecord {
                confidence: Confidence::Medium,
                ..source_record
            },
        );
        debug!(%source, %partner, "completion inherited on merge");
    }

    /// A completed unit is about to split into `retained` (stays with the
    /// parent id) and `detached` fragments.
    pub fn on_split(
        &mut self,
        parent: UnitId,
        retained: &[FragmentKey],
        detached: &[FragmentKey],
    ) {
        let Some(record) = self.records.get(&parent).copied() else {
            return;
        };
        if !record.state.is_complete() {
            return;
        }
        match record.confidence {
            Confidence::Strong => {
                self.fragments
                    .record_all(retained, Confidence::Strong, record.completion);
                self.fragments
                    .record_all(detached, Confidence::Strong, record.completion);
            }
            Confidence::Medium => {
                let strong_attached = retained.iter().any(|key| {
                    self.fragments
                        .get(*key)
                        .is_some_and(|f| f.confidence == Confidence::Strong)
                });
                if !strong_attached {
                    debug!(%parent, "strong fragment detached, confidence downgraded");
                    self.write(
                        parent,
                        UnitRecord {
                            confidence: Confidence::Weak,
                            ..record
                        },
                    );
                }
            }
            Confidence::Weak => {}
        }
    }

    /// A unit appeared. Seeds its record from the strongest matching
    /// fragments unless the unit is already known.
    pub fn on_new_unit(&mut self, unit: UnitId, fragments: &[FragmentKey]) {
        if self.records.contains_key(&unit) {
            return;
        }
        let mut found: Option<FragmentRecord> = None;
        for record in fragments.iter().filter_map(|k| self.fragments.get(*k)) {
            found = Some(match found {
                None => *record,
                Some(best) => FragmentRecord {
                    confidence: best.confidence.max(record.confidence),
                    completion: earliest(best.completion, record.completion),
                },
            });
        }
        let Some(found) = found else {
            return;
        };
        let state = if found.completion.is_some() {
            ParameterState::Complete
        } else {
            ParameterState::Incomplete
        };
        debug!(%unit, %state, confidence = %found.confidence, "new unit seeded from fragments");
        self.write(
            unit,
            UnitRecord {
                state,
                completion: found.completion,
                confidence: found.confidence,
            },
        );
    }

    /// A member left `parent` as a unit of its own.
    pub fn on_transfer_out(&mut self, parent: UnitId, member: UnitId) {
        let Some(from) = self.records.get(&parent).copied() else {
            return;
        };
        if !from.state.is_complete() || from.confidence == Confidence::Weak {
            return;
        }
        if self.state(member).is_complete() {
            return;
        }
        debug!(%parent, %member, "departing member inherits weak completion");
        self.write(
            member,
            UnitRecord {
                state: ParameterState::Complete,
                completion: from.completion,
                confidence: Confidence::Weak,
            },
        );
    }

    /// A member is about to rejoin `parent`. A completed member promotes a
    /// parent that is not yet complete, at no more than `Medium`.
    pub fn on_transfer_back(&mut self, member: UnitId, parent: UnitId) {
        let Some(from) = self.records.get(&member).copied() else {
            return;
        };
        if !from.state.is_complete() || self.state(parent).is_complete() {
            return;
        }
        debug!(%parent, %member, "returning member promotes parent");
        self.write(
            parent,
            UnitRecord {
                state: ParameterState::Complete,
                completion: from.completion,
                confidence: from.confidence.min(Confidence::Medium),
            },
        );
    }
}
