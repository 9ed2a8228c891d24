//! Collaborator interfaces supplied by the host.
//!
//! The engine reads unit data through [`UnitWorld`], resolves logical unit
//! names through [`IdentityAssociation`], and pushes human-readable text and
//! visibility toggles into a [`Presentation`] sink. Topology changes arrive
//! as [`HostEvent`]s.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::state::{ParameterState, Timestamp};
use crate::unit::{FragmentKey, UnitId, UnitSnapshot};

// ============================================================================
// Unit World
// ============================================================================

/// Read access to the live units.
pub trait UnitWorld {
    /// Snapshot of a live unit, or `None` if it is gone.
    fn unit(&self, id: UnitId) -> Option<&UnitSnapshot>;

    /// Unit the player is currently controlling.
    fn focused(&self) -> Option<UnitId>;

    /// Every live unit.
    fn unit_ids(&self) -> Vec<UnitId>;
}

// ============================================================================
// Identity Association
// ============================================================================

/// Logical name to unit mapping maintained by the host.
pub trait IdentityAssociation {
    /// Unit currently bound to `name`.
    fn resolve(&self, name: &str) -> Option<UnitId>;

    /// Binds `name` to `unit`, replacing any previous binding.
    fn associate(&mut self, name: &str, unit: UnitId);

    /// Drops the binding for `name`.
    fn disassociate(&mut self, name: &str);
}

/// In-memory [`IdentityAssociation`] that remembers which names changed
/// since the last [`NameTable::take_changes`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameTable {
    names: IndexMap<String, UnitId>,
    #[serde(skip)]
    changed: Vec<String>,
}

impl NameTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names changed since the last call, in change order.
    pub fn take_changes(&mut self) -> Vec<String> {
        std::mem::take(&mut self.changed)
    }

    /// All bindings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &UnitId)> {
        self.names.iter()
    }

    fn mark(&mut self, name: &str) {
        if !self.changed.iter().any(|n| n == name) {
            self.changed.push(name.to_string());
        }
    }
}

impl IdentityAssociation for NameTable {
    fn resolve(&self, name: &str) -> Option<UnitId> {
        self.names.get(name).copied()
    }

    fn associate(&mut self, name: &str, unit: UnitId) {
        if self.names.insert(name.to_string(), unit) != Some(unit) {
            self.mark(name);
        }
    }

    fn disassociate(&mut self, name: &str) {
        if self.names.shift_remove(name).is_some() {
            self.mark(name);
        }
    }
}

// ============================================================================
// Presentation
// ============================================================================

/// Sink for human-readable node text and visibility.
pub trait Presentation {
    /// Sets a node's title.
    fn set_title(&mut self, contract: &str, node: &str, title: &str);

    /// Sets a node's notes.
    fn set_notes(&mut self, contract: &str, node: &str, notes: &str);

    /// Shows or hides a node.
    fn set_visible(&mut self, contract: &str, node: &str, visible: bool);
}

/// Presentation sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPresentation;

impl Presentation for NullPresentation {
    fn set_title(&mut self, _contract: &str, _node: &str, _title: &str) {}
    fn set_notes(&mut self, _contract: &str, _node: &str, _notes: &str) {}
    fn set_visible(&mut self, _contract: &str, _node: &str, _visible: bool) {}
}

/// One recorded presentation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentationCall {
    /// [`Presentation::set_title`]
    Title {
        /// Contract id.
        contract: String,
        /// Node key.
        node: String,
        /// Title text.
        text: String,
    },
    /// [`Presentation::set_notes`]
    Notes {
        /// Contract id.
        contract: String,
        /// Node key.
        node: String,
        /// Notes text.
        text: String,
    },
    /// [`Presentation::set_visible`]
    Visible {
        /// Contract id.
        contract: String,
        /// Node key.
        node: String,
        /// New visibility.
        visible: bool,
    },
}

/// Presentation sink that keeps every call, for inspection and tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingPresentation {
    /// Calls in arrival order.
    pub calls: Vec<PresentationCall>,
}

impl RecordingPresentation {
    /// Latest notes pushed for a node.
    #[must_use]
    pub fn notes(&self, contract: &str, node: &str) -> Option<&str> {
        self.calls.iter().rev().find_map(|call| match call {
            PresentationCall::Notes {
                contract: c,
                node: n,
                text,
            } if c == contract && n == node => Some(text.as_str()),
            _ => None,
        })
    }

    /// Latest title pushed for a node.
    #[must_use]
    pub fn title(&self, contract: &str, node: &str) -> Option<&str> {
        self.calls.iter().rev().find_map(|call| match call {
            PresentationCall::Title {
                contract: c,
                node: n,
                text,
            } if c == contract && n == node => Some(text.as_str()),
            _ => None,
        })
    }

    /// Visibility toggles pushed for a node, in order.
    #[must_use]
    pub fn visibility(&self, contract: &str, node: &str) -> Vec<bool> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                PresentationCall::Visible {
                    contract: c,
                    node: n,
                    visible,
                } if c == contract && n == node => Some(*visible),
                _ => None,
            })
            .collect()
    }
}

impl Presentation for RecordingPresentation {
    fn set_title(&mut self, contract: &str, node: &str, title: &str) {
        self.calls.push(PresentationCall::Title {
            contract: contract.to_string(),
            node: node.to_string(),
            text: title.to_string(),
        });
    }

    fn set_notes(&mut self, contract: &str, node: &str, notes: &str) {
        self.calls.push(PresentationCall::Notes {
            contract: contract.to_string(),
            node: node.to_string(),
            text: notes.to_string(),
        });
    }

    fn set_visible(&mut self, contract: &str, node: &str, visible: bool) {
        self.calls.push(PresentationCall::Visible {
            contract: contract.to_string(),
            node: node.to_string(),
            visible,
        });
    }
}

// ============================================================================
// Host Events
// ============================================================================

/// Host-pushed state of a flag node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagUpdate {
    /// Flag node key.
    pub key: String,
    /// New state.
    pub state: ParameterState,
}

/// Notification from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    /// A unit appeared (spawned, split off, or loaded).
    UnitCreated {
        /// New unit.
        unit: UnitId,
    },
    /// A unit is about to be removed.
    UnitDestroyed {
        /// Departing unit.
        unit: UnitId,
    },
    /// A unit's data changed.
    UnitChanged {
        /// Changed unit.
        unit: UnitId,
    },
    /// Two units are about to join; `target` will be absorbed into `host`.
    UnitsMerging {
        /// Surviving unit.
        host: UnitId,
        /// Absorbed unit.
        target: UnitId,
    },
    /// `parent` is about to lose `detaching` fragments to a new unit.
    UnitSplitting {
        /// Unit being split.
        parent: UnitId,
        /// Fragments leaving with the new unit.
        detaching: Vec<FragmentKey>,
    },
    /// A member left `parent` and now exists as `member`.
    MemberLeft {
        /// Unit the member left.
        parent: UnitId,
        /// Unit representing the member.
        member: UnitId,
    },
    /// `member` is about to rejoin `parent`.
    MemberReturned {
        /// Returning member unit.
        member: UnitId,
        /// Unit the member boards.
        parent: UnitId,
    },
    /// The player switched units.
    FocusChanged {
        /// Newly focused unit.
        unit: Option<UnitId>,
    },
    /// Something about a contract changed (all contracts when `None`).
    ConditionChanged {
        /// Contract id.
        contract: Option<String>,
        /// Flag pushed with the change.
        flag: Option<FlagUpdate>,
    },
    /// A logical unit name was rebound.
    AssociationChanged {
        /// Rebound name.
        name: String,
    },
}

impl HostEvent {
    /// Bus topic the event is published on.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::UnitCreated { .. } => "unit.created",
            Self::UnitDestroyed { .. } => "unit.destroyed",
            Self::UnitChanged { .. } => "unit.changed",
            Self::UnitsMerging { .. } => "unit.merging",
            Self::UnitSplitting { .. } => "unit.splitting",
            Self::MemberLeft { .. } => "member.left",
            Self::MemberReturned { .. } => "member.returned",
            Self::FocusChanged { .. } => "focus.changed",
            Self::ConditionChanged { .. } => "condition.changed",
            Self::AssociationChanged { .. } => "association.changed",
        }
    }

    /// Every topic a contract engine subscribes to.
    pub const TOPICS: [&'static str; 10] = [
        "unit.created",
        "unit.destroyed",
        "unit.changed",
        "unit.merging",
        "unit.splitting",
        "member.left",
        "member.returned",
        "focus.changed",
        "condition.changed",
        "association.changed",
    ];
}

// ============================================================================
// Context
// ============================================================================

/// Everything an engine may touch while handling one event.
pub struct HostContext<'a> {
    /// Live units.
    pub world: &'a dyn UnitWorld,
    /// Logical unit names.
    pub names: &'a mut dyn IdentityAssociation,
    /// Text and visibility sink.
    pub presentation: &'a mut dyn Presentation,
    /// Current simulation time.
    pub now: Timestamp,
    /// Units claimed by exclusive groups of other contracts.
    pub claimed_elsewhere: &'a HashSet<UnitId>,
}

/// Collaborators shared by every contract of a tracker.
pub struct HostServices<'a> {
    /// Live units.
    pub world: &'a dyn UnitWorld,
    /// Logical unit names.
    pub names: &'a mut dyn IdentityAssociation,
    /// Text and visibility sink.
    pub presentation: &'a mut dyn Presentation,
}

impl HostServices<'_> {
    /// Per-contract view with the other contracts' exclusive claims.
    pub fn context<'b>(
        &'b mut self,
        now: Timestamp,
        claimed_elsewhere: &'b HashSet<UnitId>,
    ) -> HostContext<'b> {
        HostContext {
            world: self.world,
            names: &mut *self.names,
            presentation: &mut *self.presentation,
            now,
            claimed_elsewhere,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> UnitId {
        UnitId(uuid::Uuid::from_u128(n))
    }

    #[test]
    fn test_name_table_tracks_changes() {
        let mut names = NameTable::new();
        names.associate("Relay", id(1));
        names.associate("Relay", id(1));
        names.associate("Base", id(2));
        assert_eq!(names.resolve("Relay"), Some(id(1)));
        assert_eq!(names.take_changes(), vec!["Relay", "Base"]);
        assert!(names.take_changes().is_empty());

        names.disassociate("Relay");
        names.disassociate("Relay");
        assert_eq!(names.resolve("Relay"), None);
        assert_eq!(names.take_changes(), vec!["Relay"]);
    }

    #[test]
    fn test_recording_presentation_queries() {
        let mut sink = RecordingPresentation::default();
        sink.set_notes("c", "n", "first");
        sink.set_notes("c", "n", "second");
        sink.set_visible("c", "n", false);
        sink.set_visible("c", "n", true);
        sink.set_title("c", "g", "Tracking");
        assert_eq!(sink.notes("c", "n"), Some("second"));
        assert_eq!(sink.visibility("c", "n"), vec![false, true]);
        assert_eq!(sink.title("c", "g"), Some("Tracking"));
        assert_eq!(sink.title("other", "g"), None);
    }

    #[test]
    fn test_topics_cover_every_event() {
        let events = [
            HostEvent::UnitCreated { unit: id(1) },
            HostEvent::UnitDestroyed { unit: id(1) },
            HostEvent::UnitChanged { unit: id(1) },
            HostEvent::UnitsMerging {
                host: id(1),
                target: id(2),
            },
            HostEvent::UnitSplitting {
                parent: id(1),
                detaching: Vec::new(),
            },
            HostEvent::MemberLeft {
                parent: id(1),
                member: id(2),
            },
            HostEvent::MemberReturned {
                member: id(2),
                parent: id(1),
            },
            HostEvent::FocusChanged { unit: None },
            HostEvent::ConditionChanged {
                contract: None,
                flag: None,
            },
            HostEvent::AssociationChanged {
                name: "x".to_string(),
            },
        ];
        for event in &events {
            assert!(HostEvent::TOPICS.contains(&event.topic()));
        }
    }
}
