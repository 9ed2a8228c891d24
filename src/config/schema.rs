//! Scenario file schema.
//!
//! A scenario file declares the reference catalog, the contracts to track,
//! the initial simulated units and a script of host actions:
//!
//! ```yaml
//! scenario:
//!   name: Relay satellite
//! contracts:
//!   - id: relay
//!     root:
//!       - type: group
//!         key: relay_sat
//!         duration: 1m
//!         children:
//!           - type: unit
//!             key: high_orbit
//!             values: [{ key: altitude, op: ge, target: 70000 }]
//! units:
//!   - name: Relay
//!     values: { altitude: 0 }
//! steps:
//!   - at: 10
//!     action: update
//!     unit: Relay
//!     values: { altitude: 80000 }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::filter::{MatchPolicy, ValueCheck};
use crate::state::ParameterState;
use crate::unit::{Collection, Item, UnitKind};

// ============================================================================
// Top-Level Configuration
// ============================================================================

/// Root of a scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScenarioConfig {
    /// Scenario metadata (required)
    pub scenario: ScenarioMetadata,

    /// Reference data shared by every contract
    #[serde(default)]
    pub catalog: Catalog,

    /// Contracts to track
    pub contracts: Vec<ContractConfig>,

    /// Units alive at the start
    #[serde(default)]
    pub units: Vec<UnitConfig>,

    /// Unit focused at the start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,

    /// Scripted host actions in time order
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// Scenario metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioMetadata {
    /// Scenario name
    pub name: String,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Unique contract id (also the root node key)
    pub id: String,

    /// Human title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Top-level conditions, all of which must complete
    pub root: Vec<NodeConfig>,
}

// ============================================================================
// Condition Nodes
// ============================================================================

/// A condition node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Every child complete
    All(CompositeConfig),
    /// At least one child complete
    Any(CompositeConfig),
    /// No child complete
    None(CompositeConfig),
    /// Single child not complete
    Not(CompositeConfig),
    /// At most `n` children complete
    AtMost(CountedConfig),
    /// At least `n` children complete
    AtLeast(CountedConfig),
    /// Children complete in order
    Sequence(SequenceConfig),
    /// Conditions judged against one tracked unit
    Group(GroupConfig),
    /// Condition over a unit
    Unit(UnitLeafConfig),
    /// State pushed by the host
    Flag(FlagConfig),
}

impl NodeConfig {
    /// Node key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::All(c) | Self::Any(c) | Self::None(c) | Self::Not(c) => &c.key,
            Self::AtMost(c) | Self::AtLeast(c) => &c.key,
            Self::Sequence(c) => &c.key,
            Self::Group(c) => &c.key,
            Self::Unit(c) => &c.key,
            Self::Flag(c) => &c.key,
        }
    }

    /// Node title.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::All(c) | Self::Any(c) | Self::None(c) | Self::Not(c) => c.title.as_deref(),
            Self::AtMost(c) | Self::AtLeast(c) => c.title.as_deref(),
            Self::Sequence(c) => c.title.as_deref(),
            Self::Group(c) => c.title.as_deref(),
            Self::Unit(c) => c.title.as_deref(),
            Self::Flag(c) => c.title.as_deref(),
        }
    }

    /// Child nodes (empty for leaves).
    #[must_use]
    pub fn children(&self) -> &[Self] {
        match self {
            Self::All(c) | Self::Any(c) | Self::None(c) | Self::Not(c) => &c.children,
            Self::AtMost(c) | Self::AtLeast(c) => &c.children,
            Self::Sequence(c) => &c.children,
            Self::Group(c) => &c.children,
            Self::Unit(_) | Self::Flag(_) => &[],
        }
    }

    /// Type name as written in the file.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::All(_) => "all",
            Self::Any(_) => "any",
            Self::None(_) => "none",
            Self::Not(_) => "not",
            Self::AtMost(_) => "at_most",
            Self::AtLeast(_) => "at_least",
            Self::Sequence(_) => "sequence",
            Self::Group(_) => "group",
            Self::Unit(_) => "unit",
            Self::Flag(_) => "flag",
        }
    }
}

/// Boolean combinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeConfig {
    /// Unique key within the contract
    pub key: String,
    /// Human title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Child nodes
    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

/// Counting combinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountedConfig {
    /// Unique key within the contract
    pub key: String,
    /// Human title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Count threshold
    pub n: usize,
    /// Child nodes
    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

/// Ordered combinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Unique key within the contract
    pub key: String,
    /// Human title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Fail when a later child completes before an earlier one
    #[serde(default)]
    pub strict: bool,
    /// Keys of children hidden until the step before them completes
    #[serde(default)]
    pub hidden: Vec<String>,
    /// Child nodes in required order
    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

/// Group with unit selection and dwell timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Unique key within the contract
    pub key: String,
    /// Human title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Name to associate with the winning unit on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub define: Option<String>,
    /// Allow-list of associated unit names
    #[serde(default)]
    pub units: Vec<String>,
    /// Claim the tracked unit so other groups skip it
    #[serde(default)]
    pub exclusive: bool,
    /// Dwell time once every child is complete
    #[serde(default)]
    pub duration: DurationValue,
    /// Child nodes
    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

/// Unit leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitLeafConfig {
    /// Unique key within the contract
    pub key: String,
    /// Human title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Accepted unit kinds (any when empty)
    #[serde(default)]
    pub kinds: Vec<UnitKind>,
    /// Unit-level value checks
    #[serde(default)]
    pub values: Vec<ValueCheck>,
    /// Item collection the filters run over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<Collection>,
    /// Filter steps in order
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    /// Once complete or failed, a unit never returns to incomplete
    #[serde(default)]
    pub disable_on_state_change: bool,
    /// An unmet condition counts as failed
    #[serde(default)]
    pub fail_when_unmet: bool,
}

/// One filter step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Match policy
    #[serde(default)]
    pub policy: MatchPolicy,
    /// Override of the explanation-text suppression flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trivial: Option<bool>,
    /// Item name must equal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Item must carry tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Item value check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ValueCheck>,
    /// Eligible item count bounds (exclusive with the item predicate)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<CountBounds>,
}

impl FilterConfig {
    /// Returns `true` if any per-item predicate field is set.
    #[must_use]
    pub const fn has_predicate(&self) -> bool {
        self.name.is_some() || self.tag.is_some() || self.value.is_some()
    }
}

/// Inclusive count range.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CountBounds {
    /// Minimum
    #[serde(default)]
    pub min: usize,
    /// Maximum (unbounded when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,
}

/// Host-driven flag leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagConfig {
    /// Unique key within the contract
    pub key: String,
    /// Human title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Duration as seconds or a `humantime` string (`"1m 30s"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    /// Abstract seconds
    Seconds(f64),
    /// Human-readable duration
    Text(String),
}

impl Default for DurationValue {
    fn default() -> Self {
        Self::Seconds(0.0)
    }
}

impl DurationValue {
    /// Duration in seconds.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem for negative, non-finite or
    /// unparseable values.
    pub fn seconds(&self) -> Result<f64, String> {
        match self {
            Self::Seconds(s) if s.is_finite() && *s >= 0.0 => Ok(*s),
            Self::Seconds(s) => Err(format!("{s} is not a non-negative number of seconds")),
            Self::Text(text) => humantime::parse_duration(text)
                .as_ref()
                .map(Duration::as_secs_f64)
                .map_err(ToString::to_string),
        }
    }
}

// ============================================================================
// Simulated World
// ============================================================================

/// A simulated unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Unique name; also associated as a logical unit name
    pub name: String,
    /// Category
    #[serde(default)]
    pub kind: UnitKind,
    /// Part names per indivisible fragment. Defaults to one fragment per
    /// part, or a single fragment named after the unit when it has no parts.
    #[serde(default)]
    pub fragments: Vec<Vec<String>>,
    /// Crew aboard
    #[serde(default)]
    pub crew: Vec<Item>,
    /// Structural parts
    #[serde(default)]
    pub parts: Vec<Item>,
    /// Unit-level values
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

impl UnitConfig {
    /// Fragment layout with defaults applied.
    #[must_use]
    pub fn fragment_parts(&self) -> Vec<Vec<String>> {
        if !self.fragments.is_empty() {
            self.fragments.clone()
        } else if self.parts.is_empty() {
            vec![vec![self.name.clone()]]
        } else {
            self.parts.iter().map(|p| vec![p.name.clone()]).collect()
        }
    }
}

/// One scripted action at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Simulation time of the action
    pub at: f64,
    /// What happens
    #[serde(flatten)]
    pub action: StepAction,
}

/// Scripted host action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// A new unit appears
    Spawn {
        /// Unit definition
        unit: UnitConfig,
    },
    /// A unit is removed
    Destroy {
        /// Unit name
        unit: String,
    },
    /// A unit's data changes
    Update {
        /// Unit name
        unit: String,
        /// Values to set
        #[serde(default)]
        values: BTreeMap<String, f64>,
        /// Replacement crew list
        #[serde(default, skip_serializing_if = "Option::is_none")]
        crew: Option<Vec<Item>>,
        /// Replacement kind
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<UnitKind>,
    },
    /// `target` docks into `host`
    Dock {
        /// Surviving unit
        host: String,
        /// Absorbed unit
        target: String,
    },
    /// Fragments of `unit` break off as a new unit
    Undock {
        /// Unit being split
        unit: String,
        /// Indices into the unit's fragment list
        fragments: Vec<usize>,
        /// Name of the new unit
        name: String,
        /// Kind of the new unit (the parent's when absent)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<UnitKind>,
    },
    /// A crew member leaves `unit` on foot
    Eva {
        /// Unit left behind
        unit: String,
        /// Crew member name
        crew: String,
    },
    /// A crew member on foot boards `unit`
    Board {
        /// Crew member unit name
        member: String,
        /// Unit boarded
        unit: String,
    },
    /// Focus moves to another unit
    Focus {
        /// Unit name (none to clear)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    /// A flag node is set
    Flag {
        /// Contract id (every contract when absent)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contract: Option<String>,
        /// Flag node key
        key: String,
        /// New state
        state: ParameterState,
    },
    /// A logical name is bound to a unit
    Associate {
        /// Logical name
        name: String,
        /// Unit name
        unit: String,
    },
    /// Time passes
    Tick,
    /// Save, rebuild and load the tracker
    Reload,
}

impl StepAction {
    /// Action name as written in the file.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Destroy { .. } => "destroy",
            Self::Update { .. } => "update",
            Self::Dock { .. } => "dock",
            Self::Undock { .. } => "undock",
            Self::Eva { .. } => "eva",
            Self::Board { .. } => "board",
            Self::Focus { .. } => "focus",
            Self::Flag { .. } => "flag",
            Self::Associate { .. } => "associate",
            Self::Tick => "tick",
            Self::Reload => "reload",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_tree_deserializes() {
        let yaml = r"
type: sequence
key: steps
strict: true
hidden: [b]
children:
  - type: flag
    key: a
  - type: unit
    key: b
    kinds: [station]
    collection: crew
    filters:
      - tag: scientist
      - count: { min: 2 }
";
        let node: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(node.type_name(), "sequence");
        assert_eq!(node.children().len(), 2);
        let NodeConfig::Unit(leaf) = &node.children()[1] else {
            panic!("expected unit leaf");
        };
        assert_eq!(leaf.filters.len(), 2);
        assert!(leaf.filters[0].has_predicate());
        assert_eq!(leaf.filters[1].count.map(|c| c.min), Some(2));
    }

    #[test]
    fn test_duration_forms() {
        assert_eq!(DurationValue::Seconds(60.0).seconds(), Ok(60.0));
        assert_eq!(DurationValue::Text("1m 30s".to_string()).seconds(), Ok(90.0));
        assert!(DurationValue::Seconds(-1.0).seconds().is_err());
        assert!(DurationValue::Text("soon".to_string()).seconds().is_err());
    }

    #[test]
    fn test_step_actions_deserialize() {
        let yaml = r"
- at: 0
  action: dock
  host: Station
  target: Tug
- at: 5
  action: tick
- at: 6
  action: flag
  key: briefed
  state: complete
";
        let steps: Vec<StepConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].action.name(), "dock");
        assert!(matches!(steps[1].action, StepAction::Tick));
        assert!((steps[2].at - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_fragments() {
        let bare = UnitConfig {
            name: "Probe".to_string(),
            kind: UnitKind::Probe,
            fragments: Vec::new(),
            crew: Vec::new(),
            parts: Vec::new(),
            values: BTreeMap::new(),
        };
        assert_eq!(bare.fragment_parts(), vec![vec!["Probe".to_string()]]);

        let built = UnitConfig {
            parts: vec![Item::named("pod"), Item::named("tank")],
            ..bare
        };
        assert_eq!(built.fragment_parts().len(), 2);
    }
}
