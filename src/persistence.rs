//! Mid-flight save and load.
//!
//! The tracker is written to a [`SaveNode`] tree: a named node holding
//! string values and child nodes. The tree only carries state. Contract
//! structure comes from configuration, so loading expects a tracker already
//! rebuilt from the same scenario and restores into it.
//!
//! ```text
//! TRACKER
//! ├── CONTRACT id, status
//! │   └── NODE key, state, visible, [failed]
//! │       ├── LEDGER disable_on_state_change, fail_when_unmet, locked, [current]
//! │       │   ├── UNIT id, state, confidence, [completion]
//! │       │   └── FRAGMENT key, confidence, [completion]
//! │       └── GROUP phase, [unit], [deadline]
//! └── NAMES
//!     └── NAME name, unit
//! ```
//!
//! Records naming units that no longer exist are kept: a unit may be
//! unloaded without being gone. Records that cannot be parsed are dropped
//! with a [`LoadWarning`]. Only a wrong root or a contract without an id
//! abandons the load.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::{ContractEngine, ContractStatus};
use crate::error::PersistenceError;
use crate::group::TrackingPhase;
use crate::host::{IdentityAssociation, NameTable};
use crate::ledger::{FragmentRecord, LeafPolicy, UnitLedger, UnitRecord};
use crate::state::{Confidence, ParameterState};
use crate::tracker::ContractTracker;
use crate::tree::{NodeId, NodeKind};
use crate::unit::{FragmentKey, UnitId};

// ============================================================================
// Document
// ============================================================================

/// One node of a hierarchical key/value save document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveNode {
    /// Node name.
    pub name: String,
    /// Values in insertion order.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub values: IndexMap<String, String>,
    /// Child nodes in insertion order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<Self>,
}

impl SaveNode {
    /// Creates an empty node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: adds a value.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a value, replacing any previous one.
    pub fn set(&mut self, key: &str, value: impl fmt::Display) {
        self.values.insert(key.to_string(), value.to_string());
    }

    /// Value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Appends a child node and returns it.
    pub fn push(&mut self, node: Self) -> &mut Self {
        self.nodes.push(node);
        let last = self.nodes.len() - 1;
        &mut self.nodes[last]
    }

    /// Children with the given name.
    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Self> + 'a {
        self.nodes.iter().filter(move |n| n.name == name)
    }

    /// First child with the given name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Self> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Encodes the document as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Encoding`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String, PersistenceError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Decodes a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Encoding`] for malformed input.
    pub fn from_yaml(text: &str) -> Result<Self, PersistenceError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Writes the document to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] on encoding or I/O failure.
    pub fn write(&self, path: &Path) -> Result<(), PersistenceError> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Reads a document from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] on I/O or decoding failure.
    pub fn read(path: &Path) -> Result<Self, PersistenceError> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }
}

/// A record dropped while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    /// What was wrong.
    pub message: String,
    /// Where in the document (`contract/node/UNIT`).
    pub location: String,
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.location)
    }
}

// ============================================================================
// Save
// ============================================================================

const TRACKER: &str = "TRACKER";
const CONTRACT: &str = "CONTRACT";
const NODE: &str = "NODE";
const LEDGER: &str = "LEDGER";
const UNIT: &str = "UNIT";
const FRAGMENT: &str = "FRAGMENT";
const GROUP: &str = "GROUP";
const NAMES: &str = "NAMES";
const NAME: &str = "NAME";

/// Saves every contract of `tracker` plus the name table.
#[must_use]
pub fn save(tracker: &ContractTracker, names: &NameTable) -> SaveNode {
    let mut root = SaveNode::new(TRACKER);
    for engine in tracker.contracts() {
        root.push(save_contract(engine));
    }
    let table = root.push(SaveNode::new(NAMES));
    for (name, unit) in names.iter() {
        table.push(SaveNode::new(NAME).with("name", name).with("unit", unit));
    }
    root
}

fn save_contract(engine: &ContractEngine) -> SaveNode {
    let mut node = SaveNode::new(CONTRACT)
        .with("id", engine.id())
        .with("status", engine.status().as_str());
    for (_, tree_node) in engine.tree().iter() {
        let mut saved = SaveNode::new(NODE)
            .with("key", &tree_node.key)
            .with("state", tree_node.state)
            .with("visible", tree_node.visible);
        match &tree_node.kind {
            NodeKind::Leaf(leaf) => {
                let ledger = save_ledger(leaf.ledger());
                let ledger = match leaf.current() {
                    Some(unit) => ledger.with("current", unit),
                    None => ledger,
                };
                saved.push(ledger);
            }
            NodeKind::Sequence(seq) => saved.set("failed", seq.has_failed()),
            NodeKind::Group(group) => {
                saved.push(save_phase(group.phase()));
            }
            _ => {}
        }
        node.push(saved);
    }
    node
}

fn save_ledger(ledger: &UnitLedger) -> SaveNode {
    let policy = ledger.policy();
    let mut node = SaveNode::new(LEDGER)
        .with("disable_on_state_change", policy.disable_on_state_change)
        .with("fail_when_unmet", policy.fail_when_unmet)
        .with("locked", ledger.policy_locked());
    for (unit, record) in ledger.records() {
        let mut saved = SaveNode::new(UNIT)
            .with("id", unit)
            .with("state", record.state)
            .with("confidence", record.confidence);
        if let Some(t) = record.completion {
            saved.set("completion", t);
        }
        node.push(saved);
    }
    for (key, record) in ledger.fragments().iter() {
        let mut saved = SaveNode::new(FRAGMENT)
            .with("key", key)
            .with("confidence", record.confidence);
        if let Some(t) = record.completion {
            saved.set("completion", t);
        }
        node.push(saved);
    }
    node
}

fn save_phase(phase: TrackingPhase) -> SaveNode {
    let node = SaveNode::new(GROUP).with("phase", phase.as_str());
    match phase {
        TrackingPhase::NoCandidate => node,
        TrackingPhase::Tracking { unit } | TrackingPhase::Done { unit } => node.with("unit", unit),
        TrackingPhase::Waiting { unit, deadline } => {
            node.with("unit", unit).with("deadline", deadline)
        }
    }
}

// ============================================================================
// Load
// ============================================================================

struct Loader {
    warnings: Vec<LoadWarning>,
}

impl Loader {
    fn drop_record(&mut self, location: &str, message: impl Into<String>) {
        let warning = LoadWarning {
            message: message.into(),
            location: location.to_string(),
        };
        warn!(location = %warning.location, "dropping save record: {}", warning.message);
        self.warnings.push(warning);
    }

    /// Parses an optional value; a present but malformed value is dropped
    /// with a warning and yields `Err(())`.
    fn optional<T>(&mut self, node: &SaveNode, key: &str, location: &str) -> Result<Option<T>, ()>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match node.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|e: T::Err| {
                self.drop_record(location, format!("bad '{key}' value '{raw}': {e}"));
            }),
        }
    }

    fn required<T>(&mut self, node: &SaveNode, key: &str, location: &str) -> Result<T, ()>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(node, key, location)? {
            Some(value) => Ok(value),
            None => {
                self.drop_record(location, format!("missing '{key}'"));
                Err(())
            }
        }
    }
}

/// Restores a save into a tracker rebuilt from the same scenario, and the
/// saved names into `names`.
///
/// # Errors
///
/// Returns [`PersistenceError`] if the root is not a tracker or a contract
/// node has no id.
pub fn load(
    tracker: &mut ContractTracker,
    names: &mut NameTable,
    doc: &SaveNode,
) -> Result<Vec<LoadWarning>, PersistenceError> {
    if doc.name != TRACKER {
        return Err(PersistenceError::UnexpectedNode {
            expected: TRACKER,
            found: doc.name.clone(),
        });
    }
    let mut loader = Loader {
        warnings: Vec::new(),
    };

    for contract in doc.children(CONTRACT) {
        let id = contract
            .get("id")
            .ok_or_else(|| PersistenceError::MissingValue {
                node: CONTRACT.to_string(),
                key: "id",
            })?;
        let Some(engine) = tracker.get_mut(id) else {
            loader.drop_record(id, "contract not in scenario");
            continue;
        };
        load_contract(&mut loader, engine, contract);
    }
    tracker.sync_subscriptions();

    if let Some(table) = doc.child(NAMES) {
        for entry in table.children(NAME) {
            let location = format!("{NAMES}/{NAME}");
            let Ok(name) = loader.required::<String>(entry, "name", &location) else {
                continue;
            };
            let Ok(unit) = loader.required::<UnitId>(entry, "unit", &location) else {
                continue;
            };
            names.associate(&name, unit);
        }
    }

    debug!(warnings = loader.warnings.len(), "save loaded");
    Ok(loader.warnings)
}

fn load_contract(loader: &mut Loader, engine: &mut ContractEngine, doc: &SaveNode) {
    let id = engine.id().to_string();
    if let Ok(Some(status)) = loader.optional::<ContractStatus>(doc, "status", &id) {
        engine.restore_status(status);
    }

    for saved in doc.children(NODE) {
        let Ok(key) = loader.required::<String>(saved, "key", &id) else {
            continue;
        };
        let location = format!("{id}/{key}");
        let Ok(node_id) = engine.tree().find(&key) else {
            loader.drop_record(&location, "node not in contract");
            continue;
        };
        let tree = engine.tree_mut();

        if let Ok(Some(state)) = loader.optional::<ParameterState>(saved, "state", &location) {
            tree.set_state(node_id, state);
        }
        if let Ok(Some(visible)) = loader.optional::<bool>(saved, "visible", &location)
            && let Ok(node) = tree.node_mut(node_id)
        {
            node.visible = visible;
        }
        if let Ok(Some(failed)) = loader.optional::<bool>(saved, "failed", &location)
            && let Some(seq) = tree.as_sequence_mut(node_id)
        {
            seq.restore_failed(failed);
        }
        if let Some(ledger) = saved.child(LEDGER) {
            load_ledger(loader, tree, node_id, ledger, &location);
        }
        if let Some(group) = saved.child(GROUP)
            && let Some(phase) = load_phase(loader, group, &location)
            && let Some(coordinator) = tree.as_group_mut(node_id)
        {
            coordinator.restore_phase(phase);
        }
    }
}

fn load_ledger(
    loader: &mut Loader,
    tree: &mut crate::tree::ConditionTree,
    node_id: NodeId,
    doc: &SaveNode,
    location: &str,
) {
    let Some(leaf) = tree.as_leaf_mut(node_id) else {
        loader.drop_record(location, "ledger on a node that is not a unit leaf");
        return;
    };
    let policy = LeafPolicy {
        disable_on_state_change: loader
            .optional(doc, "disable_on_state_change", location)
            .ok()
            .flatten()
            .unwrap_or(false),
        fail_when_unmet: loader
            .optional(doc, "fail_when_unmet", location)
            .ok()
            .flatten()
            .unwrap_or(false),
    };
    let locked = loader
        .optional(doc, "locked", location)
        .ok()
        .flatten()
        .unwrap_or(false);
    if let Ok(current) = loader.optional::<UnitId>(doc, "current", location) {
        leaf.set_current(current);
    }
    let ledger = leaf.ledger_mut();
    ledger.restore_policy(policy, locked);

    let unit_location = format!("{location}/{UNIT}");
    for saved in doc.children(UNIT) {
        let Ok(unit) = loader.required::<UnitId>(saved, "id", &unit_location) else {
            continue;
        };
        let (Ok(state), Ok(confidence), Ok(completion)) = (
            loader.required::<ParameterState>(saved, "state", &unit_location),
            loader.required::<Confidence>(saved, "confidence", &unit_location),
            loader.optional::<f64>(saved, "completion", &unit_location),
        ) else {
            continue;
        };
        ledger.restore_record(
            unit,
            UnitRecord {
                state,
                completion,
                confidence,
            },
        );
    }

    let fragment_location = format!("{location}/{FRAGMENT}");
    for saved in doc.children(FRAGMENT) {
        let (Ok(key), Ok(confidence), Ok(completion)) = (
            loader.required::<FragmentKey>(saved, "key", &fragment_location),
            loader.required::<Confidence>(saved, "confidence", &fragment_location),
            loader.optional::<f64>(saved, "completion", &fragment_location),
        ) else {
            continue;
        };
        ledger.restore_fragment(
            key,
            FragmentRecord {
                confidence,
                completion,
            },
        );
    }
}

fn load_phase(loader: &mut Loader, doc: &SaveNode, location: &str) -> Option<TrackingPhase> {
    let location = format!("{location}/{GROUP}");
    let phase = loader.required::<String>(doc, "phase", &location).ok()?;
    if phase == "no_candidate" {
        return Some(TrackingPhase::NoCandidate);
    }
    let unit = loader.required::<UnitId>(doc, "unit", &location).ok()?;
    match phase.as_str() {
        "tracking" => Some(TrackingPhase::Tracking { unit }),
        "done" => Some(TrackingPhase::Done { unit }),
        "waiting" => {
            let deadline = loader.required::<f64>(doc, "deadline", &location).ok()?;
            Some(TrackingPhase::Waiting { unit, deadline })
        }
        other => {
            loader.drop_record(&location, format!("unknown phase '{other}'"));
            None
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
    fn test_save_node_yaml_shape() {
        let mut root = SaveNode::new("ROOT").with("a", 1);
        root.push(SaveNode::new("CHILD").with("b", "two"));
        let yaml = root.to_yaml().unwrap();
        let back = SaveNode::from_yaml(&yaml).unwrap();
        assert_eq!(back, root);
        assert_eq!(back.child("CHILD").and_then(|c| c.get("b")), Some("two"));
        assert!(!yaml.contains("nodes: []"));
    }

    #[test]
    fn test_phase_round_trip() {
        let phases = [
            TrackingPhase::NoCandidate,
            TrackingPhase::Tracking { unit: id(1) },
            TrackingPhase::Waiting {
                unit: id(2),
                deadline: 60.5,
            },
            TrackingPhase::Done { unit: id(3) },
        ];
        let mut loader = Loader {
            warnings: Vec::new(),
        };
        for phase in phases {
            let saved = save_phase(phase);
            assert_eq!(load_phase(&mut loader, &saved, "c/g"), Some(phase));
        }
        assert!(loader.warnings.is_empty());
    }

    #[test]
    fn test_bad_phase_is_dropped_with_warning() {
        let saved = SaveNode::new(GROUP)
            .with("phase", "hovering")
            .with("unit", id(1));
        let mut loader = Loader {
            warnings: Vec::new(),
        };
        assert_eq!(load_phase(&mut loader, &saved, "c/g"), None);
        assert_eq!(loader.warnings.len(), 1);
        assert_eq!(loader.warnings[0].location, "c/g/GROUP");
    }

    #[test]
    fn test_wrong_root_rejected() {
        let mut tracker = ContractTracker::new(std::sync::Arc::default());
        let mut names = NameTable::new();
        let err = load(&mut tracker, &mut names, &SaveNode::new("OTHER")).unwrap_err();
        assert!(matches!(err, PersistenceError::UnexpectedNode { .. }));
    }

    #[test]
    fn test_contract_without_id_rejected() {
        let mut doc = SaveNode::new(TRACKER);
        doc.push(SaveNode::new(CONTRACT));
        let mut tracker = ContractTracker::new(std::sync::Arc::default());
        let mut names = NameTable::new();
        let err = load(&mut tracker, &mut names, &doc).unwrap_err();
        assert!(matches!(err, PersistenceError::MissingValue { key: "id", .. }));
    }

    #[test]
    fn test_unknown_contract_and_bad_name_are_warnings() {
        let mut doc = SaveNode::new(TRACKER);
        doc.push(SaveNode::new(CONTRACT).with("id", "gone"));
        let table = doc.push(SaveNode::new(NAMES));
        table.push(SaveNode::new(NAME).with("name", "Relay").with("unit", "nope"));
        table.push(SaveNode::new(NAME).with("name", "Base").with("unit", id(7)));

        let mut tracker = ContractTracker::new(std::sync::Arc::default());
        let mut names = NameTable::new();
        let warnings = load(&mut tracker, &mut names, &doc).unwrap();
        assert_eq!(warnings.len(), 2);
        assert_eq!(names.resolve("Base"), Some(id(7)));
        assert_eq!(names.resolve("Relay"), None);
    }

    #[test]
    fn test_load_warning_display() {
        let warning = LoadWarning {
            message: "missing 'id'".to_string(),
            location: "c/leaf/UNIT".to_string(),
        };
        assert_eq!(warning.to_string(), "missing 'id' at c/leaf/UNIT");
    }
}
