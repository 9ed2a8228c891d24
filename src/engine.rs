//! Per-contract event handling.
//!
//! A [`ContractEngine`] owns one condition tree and reacts to host events.
//! Every event is handled in a single synchronous settle pass:
//!
//! 1. topology events update every leaf's ledger (merge, split, transfer,
//!    new unit);
//! 2. units named by the event are evaluated against every leaf;
//! 3. each group picks its unit and its leaves are evaluated against it,
//!    leaves outside any group follow the focused unit;
//! 4. node states are recomputed children-first and groups advance their
//!    dwell timers;
//! 5. if any group saw a child change during the pass, steps 3 and 4 run
//!    once more, then every child-changed flag is cleared.
//!
//! Handling an event never fails. Missing units, unknown flags and
//! inconsistent topology degrade to `Incomplete` and are logged.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::catalog::Catalog;
use crate::group::{Selection, TrackingPhase, select_winner};
use crate::host::{HostContext, HostEvent, IdentityAssociation, Presentation, UnitWorld};
use crate::observability::metrics;
use crate::state::{ParameterState, Timestamp};
use crate::tree::{CombineOp, ConditionTree, NodeId, NodeKind, combine};
use crate::unit::{UnitId, UnitSnapshot};

/// Lifecycle of a contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    /// Still listening for events.
    #[default]
    Active,
    /// Root completed.
    Completed,
    /// Root failed.
    Failed,
}

impl ContractStatus {
    /// Returns the lowercase name used in logs and save documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` once the contract stopped listening.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::str::FromStr for ContractStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown contract status '{other}'")),
        }
    }
}

/// Something observable that happened while handling an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A node changed state.
    StateChanged {
        /// Contract id.
        contract: String,
        /// Node key.
        node: String,
        /// Previous state.
        from: ParameterState,
        /// New state.
        to: ParameterState,
    },
    /// A group switched units.
    TrackingChanged {
        /// Contract id.
        contract: String,
        /// Group key.
        group: String,
        /// Newly tracked unit.
        unit: Option<UnitId>,
    },
    /// The contract completed or failed.
    ContractFinished {
        /// Contract id.
        contract: String,
        /// Final status.
        status: ContractStatus,
    },
}

/// Condition tree plus the machinery to keep it current.
#[derive(Debug)]
pub struct ContractEngine {
    id: String,
    title: Option<String>,
    tree: ConditionTree,
    catalog: Arc<Catalog>,
    status: ContractStatus,
    outbox: Vec<Notification>,
}

impl ContractEngine {
    /// Wraps a built tree.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        title: Option<String>,
        tree: ConditionTree,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self {
            id: id.into(),
            title,
            tree,
            catalog,
            status: ContractStatus::Active,
            outbox: Vec::new(),
        }
    }

    /// Contract id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Contract title.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Lifecycle status.
    #[must_use]
    pub const fn status(&self) -> ContractStatus {
        self.status
    }

    /// Restores a persisted status.
    pub const fn restore_status(&mut self, status: ContractStatus) {
        self.status = status;
    }

    /// Condition tree.
    #[must_use]
    pub const fn tree(&self) -> &ConditionTree {
        &self.tree
    }

    /// Mutable condition tree.
    pub const fn tree_mut(&mut self) -> &mut ConditionTree {
        &mut self.tree
    }

    /// Shared reference data.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Units tracked by this contract's exclusive groups.
    #[must_use]
    pub fn exclusive_claims(&self) -> HashSet<UnitId> {
        self.tree
            .groups()
            .into_iter()
            .filter_map(|id| self.tree.as_group(id))
            .filter(|g| g.is_exclusive())
            .filter_map(crate::group::Coordinator::tracked)
            .collect()
    }

    /// Number of groups currently tracking a unit.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.tree
            .groups()
            .into_iter()
            .filter_map(|id| self.tree.as_group(id))
            .filter(|g| g.tracked().is_some())
            .count()
    }

    /// Pushes titles and explanation text for every leaf.
    pub fn publish_text(&self, presentation: &mut dyn Presentation) {
        if let Some(title) = &self.title {
            presentation.set_title(&self.id, &self.tree.node_key(self.tree.root()), title);
        }
        for id in self.tree.leaves() {
            let (Ok(node), Some(leaf)) = (self.tree.node(id), self.tree.as_leaf(id)) else {
                continue;
            };
            if let Some(title) = &node.title {
                presentation.set_title(&self.id, &node.key, title);
            }
            let lines = leaf.explanation();
            if !lines.is_empty() {
                presentation.set_notes(&self.id, &node.key, &lines.join("\n"));
            }
        }
    }

    /// Handles one host event and returns what changed.
    pub fn handle(&mut self, event: &HostEvent, ctx: &mut HostContext<'_>) -> Vec<Notification> {
        if self.status.is_finished() {
            return Vec::new();
        }
        trace!(contract = %self.id, topic = event.topic(), "handling host event");

        let mut touched = Vec::new();
        match event {
            HostEvent::UnitCreated { unit } => {
                if let Some(snapshot) = ctx.world.unit(*unit) {
                    self.for_each_ledger(|l| l.on_new_unit(*unit, &snapshot.fragments));
                }
                touched.push(*unit);
            }
            HostEvent::UnitDestroyed { unit } => {
                trace!(contract = %self.id, %unit, "unit destroyed");
            }
            HostEvent::UnitChanged { unit } => touched.push(*unit),
            HostEvent::UnitsMerging { host, target } => {
                match (ctx.world.unit(*host), ctx.world.unit(*target)) {
                    (Some(h), Some(t)) => self.for_each_ledger(|l| {
                        l.on_merge(*host, &h.fragments, *target, &t.fragments);
                    }),
                    _ => debug!(contract = %self.id, %host, %target, "merge of unknown unit ignored"),
                }
            }
            HostEvent::UnitSplitting { parent, detaching } => {
                if let Some(p) = ctx.world.unit(*parent) {
                    let retained: Vec<_> = p
                        .fragments
                        .iter()
                        .filter(|f| !detaching.contains(f))
                        .copied()
                        .collect();
                    self.for_each_ledger(|l| l.on_split(*parent, &retained, detaching));
                } else {
                    debug!(contract = %self.id, %parent, "split of unknown unit ignored");
                }
            }
            HostEvent::MemberLeft { parent, member } => {
                self.for_each_ledger(|l| l.on_transfer_out(*parent, *member));
            }
            HostEvent::MemberReturned { member, parent } => {
                self.for_each_ledger(|l| l.on_transfer_back(*member, *parent));
            }
            HostEvent::FocusChanged { unit } => touched.extend(*unit),
            HostEvent::ConditionChanged { contract, flag } => {
                if contract.as_ref().is_some_and(|c| *c != self.id) {
                    return Vec::new();
                }
                if let Some(flag) = flag {
                    self.apply_flag(&flag.key, flag.state);
                }
            }
            HostEvent::AssociationChanged { name } => {
                trace!(contract = %self.id, name, "association changed");
            }
        }

        self.settle(&touched, ctx);
        std::mem::take(&mut self.outbox)
    }

    /// Re-runs selection and recomputation without an event (dwell timers,
    /// contract acceptance, after a load). Every live unit is evaluated.
    pub fn refresh(&mut self, ctx: &mut HostContext<'_>) -> Vec<Notification> {
        if self.status.is_finished() {
            return Vec::new();
        }
        let units = ctx.world.unit_ids();
        self.settle(&units, ctx);
        std::mem::take(&mut self.outbox)
    }

    /// Advances time only.
    pub fn tick(&mut self, ctx: &mut HostContext<'_>) -> Vec<Notification> {
        if self.status.is_finished() {
            return Vec::new();
        }
        self.settle(&[], ctx);
        std::mem::take(&mut self.outbox)
    }

    fn for_each_ledger(&mut self, mut f: impl FnMut(&mut crate::ledger::UnitLedger)) {
        for id in self.tree.leaves() {
            if let Some(leaf) = self.tree.as_leaf_mut(id) {
                f(leaf.ledger_mut());
            }
        }
    }

    fn apply_flag(&mut self, key: &str, state: ParameterState) {
        match self.tree.set_flag(key, state) {
            Ok(Some(from)) => {
                if let Ok(id) = self.tree.find(key) {
                    self.record_change(id, from, state);
                }
            }
            Ok(None) => {}
            Err(e) => debug!(contract = %self.id, error = %e, "flag update ignored"),
        }
    }

    // ------------------------------------------------------------------
    // Settle pass
    // ------------------------------------------------------------------

    fn settle(&mut self, touched: &[UnitId], ctx: &mut HostContext<'_>) {
        let leaves = self.tree.leaves();
        for unit in touched {
            let Some(snapshot) = ctx.world.unit(*unit) else {
                continue;
            };
            for leaf in &leaves {
                self.evaluate_leaf(*leaf, snapshot, ctx.now);
            }
        }

        self.select_and_recompute(ctx);
        let groups_changed = self
            .tree
            .pending_child_changes()
            .iter()
            .any(|id| self.tree.as_group(*id).is_some());
        if groups_changed {
            trace!(contract = %self.id, "group child changed, running one more pass");
            self.select_and_recompute(ctx);
        }
        self.tree.drain_child_changed();
        self.update_status();
    }

    /// Real evaluation of `unit` on one leaf. Filter node states are only
    /// published when `unit` is the leaf's current unit.
    fn evaluate_leaf(&mut self, leaf_id: NodeId, unit: &UnitSnapshot, now: Timestamp) {
        let catalog = Arc::clone(&self.catalog);
        let Some(leaf) = self.tree.as_leaf_mut(leaf_id) else {
            return;
        };
        let publish = leaf.current() == Some(unit.id);
        let evaluation = leaf.evaluate(unit, &catalog, now);
        let filter_nodes = leaf.filter_nodes().to_vec();

        if evaluation.changed {
            self.tree.notify_child_changed(leaf_id);
        }
        if publish {
            for (node, state) in filter_nodes.into_iter().zip(evaluation.steps) {
                if let Some(from) = self.tree.set_state(node, state) {
                    self.record_change(node, from, state);
                }
            }
        }
    }

    fn clear_filters(&mut self, leaf_id: NodeId) {
        let filter_nodes = self
            .tree
            .as_leaf(leaf_id)
            .map(|l| l.filter_nodes().to_vec())
            .unwrap_or_default();
        for node in filter_nodes {
            if let Some(from) = self.tree.set_state(node, ParameterState::Incomplete) {
                self.record_change(node, from, ParameterState::Incomplete);
            }
        }
    }

    fn select_and_recompute(&mut self, ctx: &mut HostContext<'_>) {
        let mut selected = HashMap::new();
        let order = self.tree.post_order();

        for id in order.iter().copied() {
            if self.tree.as_group(id).is_some() {
                let unit = self.select_for_group(id, ctx);
                selected.insert(id, unit);
            }
        }

        let focused = ctx
            .world
            .focused()
            .filter(|u| self.is_live_candidate(ctx.world, *u));
        for leaf in self.tree.leaves() {
            if self.tree.enclosing_group(leaf).is_none() {
                self.point_leaf(leaf, focused, ctx);
            }
        }

        for id in order {
            self.recompute(id, &selected, ctx);
        }
    }

    fn is_live_candidate(&self, world: &dyn UnitWorld, unit: UnitId) -> bool {
        world
            .unit(unit)
            .is_some_and(|s| !self.catalog.is_excluded(s.kind))
    }

    fn point_leaf(&mut self, leaf_id: NodeId, unit: Option<UnitId>, ctx: &HostContext<'_>) {
        if let Some(leaf) = self.tree.as_leaf_mut(leaf_id) {
            leaf.set_current(unit);
        }
        match unit.and_then(|u| ctx.world.unit(u)) {
            Some(snapshot) => self.evaluate_leaf(leaf_id, snapshot, ctx.now),
            None => self.clear_filters(leaf_id),
        }
    }

    fn select_for_group(&mut self, group_id: NodeId, ctx: &mut HostContext<'_>) -> Option<UnitId> {
        let group = self.tree.as_group(group_id)?;
        let previous = group.tracked();
        let allowed = group.allowed().to_vec();

        let mut local_claims = HashSet::new();
        for other in self.tree.groups() {
            if other == group_id {
                continue;
            }
            if let Some(g) = self.tree.as_group(other)
                && g.is_exclusive()
                && let Some(u) = g.tracked()
            {
                local_claims.insert(u);
            }
        }

        let descendants = self.tree.descendants(group_id);
        let mut candidates: Vec<UnitId> = Vec::new();
        for id in &descendants {
            if let Some(leaf) = self.tree.as_leaf(*id) {
                for unit in leaf.ledger().completing_units() {
                    if !candidates.contains(&unit) {
                        candidates.push(unit);
                    }
                }
            }
        }

        let world = ctx.world;
        let names: &dyn IdentityAssociation = &*ctx.names;
        let claimed_elsewhere = ctx.claimed_elsewhere;
        let eligible = |unit: UnitId| {
            if !self.is_live_candidate(world, unit) {
                return false;
            }
            if allowed.is_empty() {
                !claimed_elsewhere.contains(&unit) && !local_claims.contains(&unit)
            } else {
                allowed.iter().any(|name| names.resolve(name) == Some(unit))
            }
        };
        let satisfies = |unit: UnitId| {
            world.unit(unit).is_some_and(|snapshot| {
                self.tree
                    .children(group_id)
                    .iter()
                    .all(|c| speculate(&self.tree, *c, snapshot, &self.catalog).is_complete())
            })
        };

        let selection = select_winner(previous, candidates, world.focused(), eligible, satisfies);
        let unit = selection.unit();
        trace!(contract = %self.id, group = %self.tree.node_key(group_id), ?selection, "winner selection");

        if unit != previous {
            let key = self.tree.node_key(group_id);
            match selection {
                Selection::None => info!(contract = %self.id, group = %key, "group lost its unit"),
                _ => info!(contract = %self.id, group = %key, unit = ?unit, "group tracking unit"),
            }
            let title = unit
                .and_then(|u| world.unit(u))
                .map_or_else(|| "No unit".to_string(), |s| format!("Tracking: {}", s.name));
            ctx.presentation.set_title(&self.id, &key, &title);
            self.outbox.push(Notification::TrackingChanged {
                contract: self.id.clone(),
                group: key,
                unit,
            });
        }

        for id in descendants {
            if self.tree.as_leaf(id).is_some() && self.tree.enclosing_group(id) == Some(group_id) {
                self.point_leaf(id, unit, ctx);
            }
        }
        unit
    }

    fn recompute(
        &mut self,
        id: NodeId,
        selected: &HashMap<NodeId, Option<UnitId>>,
        ctx: &mut HostContext<'_>,
    ) {
        let children = self.tree.child_states(id);
        let next = if let Some(leaf) = self.tree.as_leaf(id) {
            leaf.reported_state()
        } else if let Some(seq) = self.tree.as_sequence_mut(id) {
            let walk = seq.advance(&children);
            let visibility: Vec<bool> = (0..children.len())
                .map(|i| seq.is_visible(i, walk.pending))
                .collect();
            self.apply_visibility(id, &visibility, ctx);
            walk.state
        } else if self.tree.as_group(id).is_some() {
            self.recompute_group(id, &children, selected.get(&id).copied(), ctx)
        } else {
            match self.tree.node(id).map(|n| &n.kind) {
                Ok(NodeKind::Root) => combine(CombineOp::All, &children),
                Ok(NodeKind::Combinator(op)) => combine(*op, &children),
                _ => return,
            }
        };
        if let Some(from) = self.tree.set_state(id, next) {
            self.record_change(id, from, next);
        }
    }

    fn recompute_group(
        &mut self,
        id: NodeId,
        children: &[ParameterState],
        selected: Option<Option<UnitId>>,
        ctx: &mut HostContext<'_>,
    ) -> ParameterState {
        let key = self.tree.node_key(id);
        let Some(group) = self.tree.as_group_mut(id) else {
            return ParameterState::Incomplete;
        };
        let unit = selected.unwrap_or_else(|| group.tracked());
        let all_complete = children.iter().all(|s| s.is_complete());
        let before = group.phase();
        if group.advance(unit, all_complete, ctx.now) {
            let after = group.phase();
            debug!(
                contract = %self.id,
                group = %key,
                from = before.as_str(),
                to = after.as_str(),
                "group phase changed"
            );
            if let (TrackingPhase::Done { unit }, Some(name)) = (after, group.define()) {
                info!(contract = %self.id, group = %key, name, %unit, "unit associated");
                ctx.names.associate(name, unit);
            }
        }
        let remaining = group.remaining(ctx.now);
        let state = group.node_state(children);
        if let Some(remaining) = remaining {
            let notes = format!("Time remaining: {}", format_remaining(remaining));
            ctx.presentation.set_notes(&self.id, &key, &notes);
        }
        state
    }

    fn apply_visibility(&mut self, seq_id: NodeId, visibility: &[bool], ctx: &mut HostContext<'_>) {
        let children = self.tree.children(seq_id).to_vec();
        for (child, visible) in children.into_iter().zip(visibility.iter().copied()) {
            let Ok(node) = self.tree.node_mut(child) else {
                continue;
            };
            if node.visible != visible {
                node.visible = visible;
                ctx.presentation.set_visible(&self.id, &node.key, visible);
            }
        }
    }

    fn record_change(&mut self, id: NodeId, from: ParameterState, to: ParameterState) {
        let key = self.tree.node_key(id);
        debug!(contract = %self.id, node = %key, %from, %to, "node state changed");
        metrics::record_node_transition(to);
        self.tree.notify_child_changed(id);
        self.outbox.push(Notification::StateChanged {
            contract: self.id.clone(),
            node: key,
            from,
            to,
        });
    }

    fn update_status(&mut self) {
        let status = match self.tree.state(self.tree.root()) {
            ParameterState::Complete => ContractStatus::Completed,
            ParameterState::Failed => ContractStatus::Failed,
            ParameterState::Incomplete => return,
        };
        self.status = status;
        info!(contract = %self.id, status = status.as_str(), "contract finished");
        metrics::record_contract_finished(status.as_str());
        self.outbox.push(Notification::ContractFinished {
            contract: self.id.clone(),
            status,
        });
    }
}

/// Check-only state of the subtree at `id` if it were judged against
/// `unit`. Nested groups and flags report their current state.
#[must_use]
pub fn speculate(
    tree: &ConditionTree,
    id: NodeId,
    unit: &UnitSnapshot,
    catalog: &Catalog,
) -> ParameterState {
    let Ok(node) = tree.node(id) else {
        return ParameterState::Incomplete;
    };
    let children = || -> Vec<ParameterState> {
        node.children
            .iter()
            .map(|c| speculate(tree, *c, unit, catalog))
            .collect()
    };
    match &node.kind {
        NodeKind::Leaf(leaf) => leaf.speculate(unit, catalog),
        NodeKind::Combinator(op) => combine(*op, &children()),
        NodeKind::Root => combine(CombineOp::All, &children()),
        NodeKind::Sequence(seq) => seq.walk(&children()).state,
        NodeKind::Group(_) | NodeKind::Flag | NodeKind::Filter { .. } => node.state,
    }
}

fn format_remaining(seconds: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = seconds.ceil().max(0.0) as u64;
    humantime::format_duration(std::time::Duration::from_secs(whole)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Coordinator;
    use crate::host::{NameTable, RecordingPresentation};
    use crate::ledger::LeafPolicy;
    use crate::tree::{UnitLeaf, UnitRequirement};
    use crate::unit::UnitKind;
    use crate::filter::{ComparisonOp, ValueCheck};
    use indexmap::IndexMap;

    #[derive(Default)]
    struct World {
        units: IndexMap<UnitId, UnitSnapshot>,
        focus: Option<UnitId>,
    }

    impl UnitWorld for World {
        fn unit(&self, id: UnitId) -> Option<&UnitSnapshot> {
            self.units.get(&id)
        }
        fn focused(&self) -> Option<UnitId> {
            self.focus
        }
        fn unit_ids(&self) -> Vec<UnitId> {
            self.units.keys().copied().collect()
        }
    }

    impl World {
        fn spawn(&mut self, name: &str, altitude: f64) -> UnitId {
            let unit = UnitSnapshot {
                id: UnitId::new_v4(),
                name: name.to_string(),
                kind: UnitKind::Vessel,
                values: [("altitude".to_string(), altitude)].into_iter().collect(),
                ..UnitSnapshot::default()
            };
            let id = unit.id;
            self.units.insert(id, unit);
            id
        }

        fn set_altitude(&mut self, id: UnitId, altitude: f64) {
            if let Some(u) = self.units.get_mut(&id) {
                u.values.insert("altitude".to_string(), altitude);
            }
        }
    }

    fn above(key: &str, target: f64) -> NodeKind {
        NodeKind::Leaf(UnitLeaf::new(
            UnitRequirement {
                kinds: Vec::new(),
                values: vec![ValueCheck {
                    key: key.to_string(),
                    op: ComparisonOp::Ge,
                    target,
                }],
            },
            LeafPolicy::default(),
        ))
    }

    fn grouped_engine(duration: f64) -> ContractEngine {
        let mut tree = ConditionTree::new("orbit");
        let group = tree
            .add(tree.root(), "group", None, NodeKind::Group(Coordinator::new(duration)))
            .unwrap();
        tree.add(group, "high", None, above("altitude", 70_000.0)).unwrap();
        ContractEngine::new("orbit", None, tree, Arc::new(Catalog::default()))
    }

    struct Harness {
        names: NameTable,
        sink: RecordingPresentation,
        claims: HashSet<UnitId>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                names: NameTable::new(),
                sink: RecordingPresentation::default(),
                claims: HashSet::new(),
            }
        }

        fn handle(
            &mut self,
            engine: &mut ContractEngine,
            world: &World,
            event: HostEvent,
            now: f64,
        ) -> Vec<Notification> {
            let mut ctx = HostContext {
                world,
                names: &mut self.names,
                presentation: &mut self.sink,
                now,
                claimed_elsewhere: &self.claims,
            };
            engine.handle(&event, &mut ctx)
        }

        fn tick(&mut self, engine: &mut ContractEngine, world: &World, now: f64) {
            let mut ctx = HostContext {
                world,
                names: &mut self.names,
                presentation: &mut self.sink,
                now,
                claimed_elsewhere: &self.claims,
            };
            engine.tick(&mut ctx);
        }
    }

    #[test]
    fn test_group_completes_immediately_without_dwell() {
        let mut world = World::default();
        let unit = world.spawn("Relay", 80_000.0);
        let mut engine = grouped_engine(0.0);
        let mut h = Harness::new();

        let out = h.handle(&mut engine, &world, HostEvent::UnitChanged { unit }, 1.0);
        assert_eq!(engine.status(), ContractStatus::Completed);
        assert!(out.contains(&Notification::ContractFinished {
            contract: "orbit".to_string(),
            status: ContractStatus::Completed,
        }));
        assert!(out.contains(&Notification::TrackingChanged {
            contract: "orbit".to_string(),
            group: "group".to_string(),
            unit: Some(unit),
        }));
    }

    #[test]
    fn test_finished_contract_ignores_events() {
        let mut world = World::default();
        let unit = world.spawn("Relay", 80_000.0);
        let mut engine = grouped_engine(0.0);
        let mut h = Harness::new();
        h.handle(&mut engine, &world, HostEvent::UnitChanged { unit }, 1.0);
        world.set_altitude(unit, 0.0);
        let out = h.handle(&mut engine, &world, HostEvent::UnitChanged { unit }, 2.0);
        assert!(out.is_empty());
        assert_eq!(engine.status(), ContractStatus::Completed);
    }

    #[test]
    fn test_dwell_regression_cancels_completion() {
        let mut world = World::default();
        let unit = world.spawn("Relay", 80_000.0);
        world.focus = Some(unit);
        let mut engine = grouped_engine(60.0);
        let mut h = Harness::new();

        h.handle(&mut engine, &world, HostEvent::UnitChanged { unit }, 0.0);
        let group = engine.tree().find("group").unwrap();
        assert!(matches!(
            engine.tree().as_group(group).unwrap().phase(),
            TrackingPhase::Waiting { .. }
        ));

        world.set_altitude(unit, 1_000.0);
        h.handle(&mut engine, &world, HostEvent::UnitChanged { unit }, 59.0);
        h.tick(&mut engine, &world, 60.0);
        assert_eq!(
            engine.tree().as_group(group).unwrap().phase(),
            TrackingPhase::Tracking { unit }
        );
        assert_eq!(engine.status(), ContractStatus::Active);
    }

    #[test]
    fn test_dwell_completes_on_tick() {
        let mut world = World::default();
        let unit = world.spawn("Relay", 80_000.0);
        let mut engine = grouped_engine(60.0);
        let mut h = Harness::new();

        h.handle(&mut engine, &world, HostEvent::UnitChanged { unit }, 0.0);
        assert_eq!(h.sink.notes("orbit", "group"), Some("Time remaining: 1m"));
        h.tick(&mut engine, &world, 30.0);
        assert_eq!(engine.status(), ContractStatus::Active);
        h.tick(&mut engine, &world, 60.0);
        assert_eq!(engine.status(), ContractStatus::Completed);
    }

    #[test]
    fn test_group_keeps_tracked_unit() {
        let mut world = World::default();
        let first = world.spawn("First", 80_000.0);
        let second = world.spawn("Second", 90_000.0);
        let mut engine = grouped_engine(600.0);
        let mut h = Harness::new();

        h.handle(&mut engine, &world, HostEvent::UnitChanged { unit: first }, 0.0);
        for t in 1..4 {
            h.handle(
                &mut engine,
                &world,
                HostEvent::UnitChanged { unit: second },
                f64::from(t),
            );
        }
        let group = engine.tree().find("group").unwrap();
        assert_eq!(engine.tree().as_group(group).unwrap().tracked(), Some(first));
    }

    #[test]
    fn test_leaf_outside_group_follows_focus() {
        let mut world = World::default();
        let low = world.spawn("Low", 10.0);
        let high = world.spawn("High", 80_000.0);
        let mut tree = ConditionTree::new("c");
        tree.add(tree.root(), "high", None, above("altitude", 70_000.0))
            .unwrap();
        let mut engine = ContractEngine::new("c", None, tree, Arc::new(Catalog::default()));
        let mut h = Harness::new();

        world.focus = Some(low);
        h.handle(&mut engine, &world, HostEvent::FocusChanged { unit: Some(low) }, 0.0);
        assert_eq!(engine.status(), ContractStatus::Active);

        world.focus = Some(high);
        h.handle(&mut engine, &world, HostEvent::FocusChanged { unit: Some(high) }, 1.0);
        assert_eq!(engine.status(), ContractStatus::Completed);
    }

    #[test]
    fn test_flag_update_for_other_contract_ignored() {
        let world = World::default();
        let mut tree = ConditionTree::new("c");
        tree.add(tree.root(), "briefed", None, NodeKind::Flag).unwrap();
        let mut engine = ContractEngine::new("c", None, tree, Arc::new(Catalog::default()));
        let mut h = Harness::new();

        let flag = Some(crate::host::FlagUpdate {
            key: "briefed".to_string(),
            state: ParameterState::Complete,
        });
        h.handle(
            &mut engine,
            &world,
            HostEvent::ConditionChanged {
                contract: Some("other".to_string()),
                flag: flag.clone(),
            },
            0.0,
        );
        assert_eq!(engine.status(), ContractStatus::Active);
        h.handle(
            &mut engine,
            &world,
            HostEvent::ConditionChanged {
                contract: Some("c".to_string()),
                flag,
            },
            0.0,
        );
        assert_eq!(engine.status(), ContractStatus::Completed);
    }

    #[test]
    fn test_define_associates_winner() {
        let mut world = World::default();
        let unit = world.spawn("Relay", 80_000.0);
        let mut tree = ConditionTree::new("c");
        let group = tree
            .add(
                tree.root(),
                "group",
                None,
                NodeKind::Group(Coordinator::new(0.0).with_define("RelaySat")),
            )
            .unwrap();
        tree.add(group, "high", None, above("altitude", 70_000.0)).unwrap();
        let mut engine = ContractEngine::new("c", None, tree, Arc::new(Catalog::default()));
        let mut h = Harness::new();
        h.handle(&mut engine, &world, HostEvent::UnitChanged { unit }, 0.0);
        assert_eq!(h.names.resolve("RelaySat"), Some(unit));
    }

    #[test]
    fn test_allow_list_restricts_candidates() {
        let mut world = World::default();
        let named = world.spawn("Named", 80_000.0);
        let other = world.spawn("Other", 80_000.0);
        let mut tree = ConditionTree::new("c");
        let group = tree
            .add(
                tree.root(),
                "group",
                None,
                NodeKind::Group(Coordinator::new(0.0).with_allowed(vec!["Target".to_string()])),
            )
            .unwrap();
        tree.add(group, "high", None, above("altitude", 70_000.0)).unwrap();
        let mut engine = ContractEngine::new("c", None, tree, Arc::new(Catalog::default()));
        let mut h = Harness::new();

        h.handle(&mut engine, &world, HostEvent::UnitChanged { unit: other }, 0.0);
        assert_eq!(engine.status(), ContractStatus::Active);

        h.names.associate("Target", named);
        h.handle(
            &mut engine,
            &world,
            HostEvent::UnitChanged { unit: named },
            1.0,
        );
        assert_eq!(engine.status(), ContractStatus::Completed);
    }

    #[test]
    fn test_speculate_does_not_touch_ledgers() {
        let mut world = World::default();
        let unit = world.spawn("Relay", 80_000.0);
        let engine = grouped_engine(0.0);
        let group = engine.tree().find("group").unwrap();
        let snapshot = world.unit(unit).unwrap();
        assert_eq!(
            speculate(engine.tree(), group, snapshot, engine.catalog()),
            ParameterState::Incomplete
        );
        let high = engine.tree().find("high").unwrap();
        assert_eq!(
            speculate(engine.tree(), high, snapshot, engine.catalog()),
            ParameterState::Complete
        );
        assert_eq!(
            engine.tree().as_leaf(high).unwrap().ledger().records().count(),
            0
        );
    }

    #[test]
    fn test_group_without_candidate_fails_strict_leaf() {
        let mut tree = ConditionTree::new("orbit");
        let group = tree
            .add(tree.root(), "group", None, NodeKind::Group(Coordinator::new(0.0)))
            .unwrap();
        let strict = NodeKind::Leaf(UnitLeaf::new(
            UnitRequirement::default(),
            LeafPolicy {
                fail_when_unmet: true,
                ..LeafPolicy::default()
            },
        ));
        tree.add(group, "crewed", None, strict).unwrap();
        let mut engine = ContractEngine::new("orbit", None, tree, Arc::new(Catalog::default()));

        let world = World::default();
        let mut h = Harness::new();
        h.handle(&mut engine, &world, HostEvent::FocusChanged { unit: None }, 1.0);

        let group = engine.tree().find("group").unwrap();
        assert_eq!(
            engine.tree().as_group(group).unwrap().phase(),
            TrackingPhase::NoCandidate
        );
        let crewed = engine.tree().find("crewed").unwrap();
        assert_eq!(engine.tree().state(crewed), ParameterState::Failed);
        assert_eq!(engine.status(), ContractStatus::Failed);
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(59.2), "1m");
        assert_eq!(format_remaining(0.0), "0s");
    }
}
