//! Unit leaves: conditions judged against one unit at a time.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::NodeId;
use crate::catalog::Catalog;
use crate::filter::{FilterChain, ValueCheck, chain_state};
use crate::ledger::{LeafPolicy, UnitLedger};
use crate::state::{ParameterState, Timestamp};
use crate::unit::{UnitId, UnitKind, UnitSnapshot};

/// Unit-level test of a leaf, applied before its item filters.
pub trait UnitCondition: fmt::Debug {
    /// Returns `true` if the unit satisfies the condition.
    fn is_met(&self, unit: &UnitSnapshot, catalog: &Catalog) -> bool;

    /// Explanation lines.
    fn describe(&self) -> Vec<String>;
}

/// Built-in unit condition: allowed kinds plus unit-level value checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitRequirement {
    /// Accepted kinds. Empty accepts any kind.
    pub kinds: Vec<UnitKind>,
    /// Checks against [`UnitSnapshot::values`].
    pub values: Vec<ValueCheck>,
}

impl UnitCondition for UnitRequirement {
    fn is_met(&self, unit: &UnitSnapshot, _catalog: &Catalog) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&unit.kind))
            && self.values.iter().all(|c| c.check(unit.value(&c.key)))
    }

    fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if !self.kinds.is_empty() {
            let kinds: Vec<&str> = self.kinds.iter().map(|k| k.as_str()).collect();
            lines.push(format!("Type: {}", kinds.join(" or ")));
        }
        for check in &self.values {
            lines.push(format!(
                "{} {} {}",
                check.key,
                check.op.symbol(),
                check.target
            ));
        }
        lines
    }
}

/// Result of a real leaf evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEvaluation {
    /// State computed for the unit before ledger policies.
    pub state: ParameterState,
    /// One state per filter step.
    pub steps: Vec<ParameterState>,
    /// Whether the ledger record changed.
    pub changed: bool,
}

/// Leaf that evaluates a condition against units and keeps a ledger of the
/// outcomes.
#[derive(Debug)]
pub struct UnitLeaf {
    condition: Box<dyn UnitCondition>,
    chain: Option<FilterChain>,
    filter_nodes: Vec<NodeId>,
    ledger: UnitLedger,
    current: Option<UnitId>,
}

impl UnitLeaf {
    /// Creates a leaf without item filters.
    #[must_use]
    pub fn new(condition: impl UnitCondition + 'static, policy: LeafPolicy) -> Self {
        Self {
            condition: Box::new(condition),
            chain: None,
            filter_nodes: Vec::new(),
            ledger: UnitLedger::new(policy),
            current: None,
        }
    }

    /// Builder: attaches an item filter chain.
    #[must_use]
    pub fn with_chain(mut self, chain: FilterChain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Item filter chain, if any.
    #[must_use]
    pub const fn chain(&self) -> Option<&FilterChain> {
        self.chain.as_ref()
    }

    /// Number of filter steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.chain.as_ref().map_or(0, FilterChain::len)
    }

    /// Tree nodes mirroring the filter steps, in step order.
    #[must_use]
    pub fn filter_nodes(&self) -> &[NodeId] {
        &self.filter_nodes
    }

    pub(super) fn push_filter_node(&mut self, id: NodeId) {
        self.filter_nodes.push(id);
    }

    /// Ledger of per-unit outcomes.
    #[must_use]
    pub const fn ledger(&self) -> &UnitLedger {
        &self.ledger
    }

    /// Mutable ledger access.
    pub const fn ledger_mut(&mut self) -> &mut UnitLedger {
        &mut self.ledger
    }

    /// Unit whose state the leaf currently reports.
    #[must_use]
    pub const fn current(&self) -> Option<UnitId> {
        self.current
    }

    /// Points the leaf at a unit (or none).
    pub const fn set_current(&mut self, unit: Option<UnitId>) {
        self.current = unit;
    }

    /// State this leaf reports for its current unit.
    #[must_use]
    pub fn reported_state(&self) -> ParameterState {
        self.current
            .map_or_else(|| self.ledger.unattached_state(), |u| self.ledger.state(u))
    }

    fn fold(&self, unit: &UnitSnapshot, catalog: &Catalog, steps: &[ParameterState]) -> ParameterState {
        if self.condition.is_met(unit, catalog) {
            chain_state(steps)
        } else {
            ParameterState::Incomplete
        }
    }

    /// Check-only evaluation: the state `unit` would be recorded with,
    /// leaving buffers and ledger untouched.
    #[must_use]
    pub fn speculate(&self, unit: &UnitSnapshot, catalog: &Catalog) -> ParameterState {
        let steps = self
            .chain
            .as_ref()
            .map_or_else(Vec::new, |c| c.check(unit.items(c.collection()), catalog));
        let raw = self.fold(unit, catalog, &steps);
        self.ledger.preview(unit.id, raw)
    }

    /// Real evaluation: fills the filter buffers and records the outcome.
    pub fn evaluate(
        &mut self,
        unit: &UnitSnapshot,
        catalog: &Catalog,
        now: Timestamp,
    ) -> LeafEvaluation {
        let steps = match self.chain.as_mut() {
            Some(chain) => {
                let collection = chain.collection();
                chain.evaluate(unit.items(collection), catalog)
            }
            None => Vec::new(),
        };
        let state = self.fold(unit, catalog, &steps);
        let changed = self.ledger.set_state(unit.id, state, now);
        LeafEvaluation {
            state,
            steps,
            changed,
        }
    }

    /// Explanation lines for the presentation sink.
    #[must_use]
    pub fn explanation(&self) -> Vec<String> {
        let mut lines = self.condition.describe();
        if let Some(chain) = &self.chain {
            lines.extend(chain.describe());
        }
        lines
    }
}
