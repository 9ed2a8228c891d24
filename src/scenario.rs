//! Scripted scenario replay.
//!
//! [`SimWorld`] is a small in-memory host: units made of fragments, crew
//! that can walk between units, and a focused unit. [`ScenarioRunner`]
//! replays a scenario's steps against it and publishes the host events a
//! real host would publish, in the same order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_128;

use crate::config::build_tracker;
use crate::config::schema::{ScenarioConfig, StepAction, UnitConfig};
use crate::engine::{ContractStatus, Notification};
use crate::error::{GoalTrackError, PersistenceError, ScenarioError};
use crate::host::{
    FlagUpdate, HostEvent, HostServices, IdentityAssociation, NameTable, RecordingPresentation,
    UnitWorld,
};
use crate::observability::events::{Event, EventEmitter, RunSummary};
use crate::persistence::{self, LoadWarning, SaveNode};
use crate::state::{ParameterState, Timestamp};
use crate::tracker::ContractTracker;
use crate::unit::{FragmentKey, Item, UnitId, UnitKind, UnitSnapshot};

/// Rounds of association fan-out handled after one step.
const MAX_ASSOCIATION_ROUNDS: usize = 8;

const RUN: &str = "RUN";

// ============================================================================
// Simulated World
// ============================================================================

/// A live simulated unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SimUnit {
    /// What the engine sees.
    pub snapshot: UnitSnapshot,
    /// Part names of each fragment, parallel to `snapshot.fragments`.
    pub fragment_parts: Vec<Vec<String>>,
}

/// In-memory [`UnitWorld`].
///
/// Unit ids are derived from the unit name and how many units of that name
/// were created before, so replaying the same steps yields the same ids.
#[derive(Debug, Clone, Default)]
pub struct SimWorld {
    units: IndexMap<UnitId, SimUnit>,
    focus: Option<UnitId>,
    generations: HashMap<String, u32>,
}

impl UnitWorld for SimWorld {
    fn unit(&self, id: UnitId) -> Option<&UnitSnapshot> {
        self.units.get(&id).map(|u| &u.snapshot)
    }

    fn focused(&self) -> Option<UnitId> {
        self.focus
    }

    fn unit_ids(&self) -> Vec<UnitId> {
        self.units.keys().copied().collect()
    }
}

impl SimWorld {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live unit with the given name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<UnitId> {
        self.units
            .values()
            .find(|u| u.snapshot.name == name)
            .map(|u| u.snapshot.id)
    }

    /// Live unit by id.
    #[must_use]
    pub fn get(&self, id: UnitId) -> Option<&SimUnit> {
        self.units.get(&id)
    }

    /// Number of live units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns `true` when no unit is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Moves focus.
    pub const fn set_focus(&mut self, unit: Option<UnitId>) {
        self.focus = unit;
    }

    /// Creates a unit from its definition.
    pub fn spawn(&mut self, config: &UnitConfig) -> UnitId {
        let id = self.allocate(&config.name);
        let fragment_parts = config.fragment_parts();
        let snapshot = UnitSnapshot {
            id,
            name: config.name.clone(),
            kind: config.kind,
            fragments: fragment_parts
                .iter()
                .map(|p| FragmentKey::of_parts(p))
                .collect(),
            crew: config.crew.clone(),
            parts: config.parts.clone(),
            values: config.values.clone(),
        };
        self.units.insert(
            id,
            SimUnit {
                snapshot,
                fragment_parts,
            },
        );
        id
    }

    /// Removes a unit, clearing focus if it was focused.
    pub fn remove(&mut self, id: UnitId) -> Option<SimUnit> {
        if self.focus == Some(id) {
            self.focus = None;
        }
        self.units.shift_remove(&id)
    }

    /// Overwrites values, crew and kind of a unit.
    pub fn update(
        &mut self,
        id: UnitId,
        values: &BTreeMap<String, f64>,
        crew: Option<&[Item]>,
        kind: Option<UnitKind>,
    ) -> bool {
        let Some(unit) = self.units.get_mut(&id) else {
            return false;
        };
        let snapshot = &mut unit.snapshot;
        snapshot
            .values
            .extend(values.iter().map(|(k, v)| (k.clone(), *v)));
        if let Some(crew) = crew {
            snapshot.crew = crew.to_vec();
        }
        if let Some(kind) = kind {
            snapshot.kind = kind;
        }
        true
    }

    /// Absorbs `target` into `host`. Values of `host` win.
    pub fn merge(&mut self, host: UnitId, target: UnitId) -> bool {
        if host == target || !self.units.contains_key(&host) {
            return false;
        }
        let Some(absorbed) = self.remove(target) else {
            return false;
        };
        let Some(unit) = self.units.get_mut(&host) else {
            return false;
        };
        let snapshot = &mut unit.snapshot;
        snapshot.fragments.extend(absorbed.snapshot.fragments);
        snapshot.crew.extend(absorbed.snapshot.crew);
        snapshot.parts.extend(absorbed.snapshot.parts);
        for (key, value) in absorbed.snapshot.values {
            snapshot.values.entry(key).or_insert(value);
        }
        unit.fragment_parts.extend(absorbed.fragment_parts);
        true
    }

    /// Fragment keys at `indices` of `unit`.
    ///
    /// # Errors
    ///
    /// Returns the first index the unit does not have.
    pub fn fragment_keys(&self, unit: UnitId, indices: &[usize]) -> Result<Vec<FragmentKey>, usize> {
        let fragments = self
            .units
            .get(&unit)
            .map(|u| u.snapshot.fragments.as_slice())
            .unwrap_or_default();
        indices
            .iter()
            .map(|&i| fragments.get(i).copied().ok_or(i))
            .collect()
    }

    /// Splits the fragments at `indices` off `parent` into a new unit named
    /// `name`. Parts follow their fragment; crew stays with the parent.
    ///
    /// # Errors
    ///
    /// Returns the first index the parent does not have.
    pub fn split(
        &mut self,
        parent: UnitId,
        indices: &[usize],
        name: &str,
        kind: Option<UnitKind>,
    ) -> Result<UnitId, usize> {
        self.fragment_keys(parent, indices)?;
        let id = self.allocate(name);
        let Some(source) = self.units.get_mut(&parent) else {
            return Err(indices.first().copied().unwrap_or_default());
        };

        let mut fragments = Vec::new();
        let mut fragment_parts = Vec::new();
        let mut keep_fragments = Vec::new();
        let mut keep_parts = Vec::new();
        for (i, (key, parts)) in source
            .snapshot
            .fragments
            .drain(..)
            .zip(source.fragment_parts.drain(..))
            .enumerate()
        {
            if indices.contains(&i) {
                fragments.push(key);
                fragment_parts.push(parts);
            } else {
                keep_fragments.push(key);
                keep_parts.push(parts);
            }
        }
        source.snapshot.fragments = keep_fragments;
        source.fragment_parts = keep_parts;

        let (moving, staying): (Vec<Item>, Vec<Item>) =
            source.snapshot.parts.drain(..).partition(|part| {
                fragment_parts
                    .iter()
                    .any(|names| names.iter().any(|n| *n == part.name))
            });
        source.snapshot.parts = staying;

        let snapshot = UnitSnapshot {
            id,
            name: name.to_string(),
            kind: kind.unwrap_or(source.snapshot.kind),
            fragments,
            crew: Vec::new(),
            parts: moving,
            values: source.snapshot.values.clone(),
        };
        self.units.insert(
            id,
            SimUnit {
                snapshot,
                fragment_parts,
            },
        );
        Ok(id)
    }

    /// Moves crew member `crew` out of `parent` into a new on-foot unit.
    pub fn detach_member(&mut self, parent: UnitId, crew: &str) -> Option<UnitId> {
        let source = self.units.get_mut(&parent)?;
        let index = source.snapshot.crew.iter().position(|c| c.name == crew)?;
        let member = source.snapshot.crew.remove(index);
        let values = source.snapshot.values.clone();

        let id = self.allocate(crew);
        let parts = vec![vec![crew.to_string()]];
        let snapshot = UnitSnapshot {
            id,
            name: crew.to_string(),
            kind: UnitKind::Eva,
            fragments: vec![FragmentKey::of_parts(&parts[0])],
            crew: vec![member],
            parts: Vec::new(),
            values,
        };
        self.units.insert(
            id,
            SimUnit {
                snapshot,
                fragment_parts: parts,
            },
        );
        Some(id)
    }

    /// Removes on-foot unit `member` and puts its crew aboard `parent`.
    pub fn attach_member(&mut self, member: UnitId, parent: UnitId) -> bool {
        if member == parent || !self.units.contains_key(&parent) {
            return false;
        }
        let Some(walker) = self.remove(member) else {
            return false;
        };
        if let Some(unit) = self.units.get_mut(&parent) {
            unit.snapshot.crew.extend(walker.snapshot.crew);
        }
        true
    }

    fn allocate(&mut self, name: &str) -> UnitId {
        let generation = self.generations.entry(name.to_string()).or_insert(0);
        let seed = format!("{name}#{generation}");
        *generation += 1;
        UnitId(Uuid::from_u128(xxh3_128(seed.as_bytes())))
    }
}

// ============================================================================
// Run Report
// ============================================================================

/// Final state of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    /// Node key.
    pub key: String,
    /// Title, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Distance from the root.
    pub depth: usize,
    /// Current state.
    pub state: ParameterState,
    /// Whether the node is shown.
    pub visible: bool,
}

/// Final state of one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractReport {
    /// Contract id.
    pub id: String,
    /// Title, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Lifecycle status.
    pub status: ContractStatus,
    /// Nodes in tree order.
    pub nodes: Vec<NodeReport>,
}

/// Result of replaying a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Scenario name.
    pub scenario: String,
    /// Run statistics.
    pub summary: RunSummary,
    /// Per-contract results.
    pub contracts: Vec<ContractReport>,
}

/// What one applied step produced.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Zero-based step index.
    pub index: usize,
    /// Simulation time of the step.
    pub at: Timestamp,
    /// Action name.
    pub action: &'static str,
    /// Engine notifications raised while applying it.
    pub notifications: Vec<Notification>,
}

// ============================================================================
// Runner
// ============================================================================

#[derive(Debug, Default)]
struct SimHost {
    world: SimWorld,
    names: NameTable,
    presentation: RecordingPresentation,
}

impl SimHost {
    fn services(&mut self) -> HostServices<'_> {
        HostServices {
            world: &self.world,
            names: &mut self.names,
            presentation: &mut self.presentation,
        }
    }
}

/// Replays a scenario against a [`SimWorld`].
#[derive(Debug)]
pub struct ScenarioRunner {
    config: Arc<ScenarioConfig>,
    host: SimHost,
    tracker: ContractTracker,
    now: Timestamp,
    next_step: usize,
    notifications: usize,
    pending: Vec<Notification>,
}

impl ScenarioRunner {
    /// Builds the tracker and the initial world, then evaluates every unit.
    ///
    /// # Errors
    ///
    /// Returns an error if a contract cannot be compiled or the initial
    /// focus names an unknown unit.
    pub fn new(config: Arc<ScenarioConfig>) -> Result<Self, GoalTrackError> {
        let tracker = build_tracker(&config)?;
        let mut host = SimHost::default();
        for unit in &config.units {
            if host.world.find(&unit.name).is_some() {
                return Err(ScenarioError::DuplicateUnit {
                    step: 0,
                    name: unit.name.clone(),
                }
                .into());
            }
            let id = host.world.spawn(unit);
            host.names.associate(&unit.name, id);
        }
        if let Some(name) = &config.focus {
            let id = host.world.find(name).ok_or_else(|| ScenarioError::UnknownUnit {
                step: 0,
                name: name.clone(),
            })?;
            host.world.set_focus(Some(id));
        }
        host.names.take_changes();

        let mut runner = Self {
            config,
            host,
            tracker,
            now: 0.0,
            next_step: 0,
            notifications: 0,
            pending: Vec::new(),
        };
        runner.publish_text();
        let initial = runner.tracker.refresh(&mut runner.host.services(), runner.now);
        runner.notifications += initial.len();
        info!(
            scenario = %runner.config.scenario.name,
            contracts = runner.tracker.len(),
            units = runner.host.world.len(),
            "scenario ready"
        );
        Ok(runner)
    }

    /// The tracker being driven.
    #[must_use]
    pub const fn tracker(&self) -> &ContractTracker {
        &self.tracker
    }

    /// The simulated world.
    #[must_use]
    pub const fn world(&self) -> &SimWorld {
        &self.host.world
    }

    /// Logical name bindings.
    #[must_use]
    pub const fn names(&self) -> &NameTable {
        &self.host.names
    }

    /// Everything pushed to the presentation sink so far.
    #[must_use]
    pub const fn presentation(&self) -> &RecordingPresentation {
        &self.host.presentation
    }

    /// Current simulation time.
    #[must_use]
    pub const fn now(&self) -> Timestamp {
        self.now
    }

    /// Index of the next step to apply.
    #[must_use]
    pub const fn next_step(&self) -> usize {
        self.next_step
    }

    /// Returns `true` once every step has been applied.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.next_step >= self.config.steps.len()
    }

    /// Saves the tracker plus the replay position.
    #[must_use]
    pub fn save(&self) -> SaveNode {
        let mut doc = persistence::save(&self.tracker, &self.host.names);
        doc.push(
            SaveNode::new(RUN)
                .with("scenario", &self.config.scenario.name)
                .with("step", self.next_step)
                .with("time", self.now),
        );
        doc
    }

    /// Continues a run saved by [`Self::save`]: replays the world up to the
    /// saved step without notifying the tracker, then restores the tracker.
    ///
    /// # Errors
    ///
    /// Returns an error if the document has no replay position, the position
    /// lies past the end of the scenario, or the tracker cannot be restored.
    pub fn resume(&mut self, doc: &SaveNode) -> Result<Vec<LoadWarning>, GoalTrackError> {
        let run = doc.child(RUN).ok_or_else(|| PersistenceError::MissingValue {
            node: RUN.to_string(),
            key: "step",
        })?;
        let step = parse_run_value::<usize>(run, "step")?;
        let time = parse_run_value::<f64>(run, "time")?;
        if run.get("scenario") != Some(self.config.scenario.name.as_str()) {
            warn!(
                saved = run.get("scenario").unwrap_or("<none>"),
                scenario = %self.config.scenario.name,
                "resuming a save from a different scenario"
            );
        }
        if step < self.next_step || step > self.config.steps.len() {
            return Err(ScenarioError::Invalid {
                step,
                message: format!(
                    "cannot resume at step {step}: runner is at {} of {}",
                    self.next_step,
                    self.config.steps.len()
                ),
            }
            .into());
        }

        let config = Arc::clone(&self.config);
        for (index, step_config) in config.steps.iter().enumerate().take(step).skip(self.next_step) {
            self.apply(index, &step_config.action, false)?;
        }
        self.host.names.take_changes();
        self.now = time;
        self.next_step = step;
        self.restore(doc)
    }

    /// Applies the next step. Returns `None` when the script is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the step references units the world does not
    /// have, or a reload fails.
    pub fn step(&mut self) -> Result<Option<StepOutcome>, GoalTrackError> {
        let config = Arc::clone(&self.config);
        let Some(step) = config.steps.get(self.next_step) else {
            return Ok(None);
        };
        let index = self.next_step;
        self.now = self.now.max(step.at);
        debug!(index, at = step.at, action = step.action.name(), "applying step");

        self.apply(index, &step.action, true)?;
        self.next_step += 1;

        let notifications = std::mem::take(&mut self.pending);
        self.notifications += notifications.len();
        Ok(Some(StepOutcome {
            index,
            at: step.at,
            action: step.action.name(),
            notifications,
        }))
    }

    /// Applies every remaining step, streaming events to `emitter`.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failing step.
    pub fn run(&mut self, emitter: &EventEmitter) -> Result<ScenarioReport, GoalTrackError> {
        emitter.emit(Event::ScenarioStarted {
            timestamp: Utc::now(),
            scenario: self.config.scenario.name.clone(),
            contracts: self.tracker.len(),
            steps: self.config.steps.len(),
        });

        let mut applied = 0;
        while let Some(outcome) = self.step()? {
            applied += 1;
            let timestamp = Utc::now();
            emitter.emit(Event::StepApplied {
                timestamp,
                index: outcome.index,
                at: outcome.at,
                action: outcome.action.to_string(),
            });
            for notification in &outcome.notifications {
                emitter.emit(Event::from_notification(notification, timestamp));
            }
        }

        let report = self.report(applied);
        emitter.emit(Event::ScenarioFinished {
            timestamp: Utc::now(),
            summary: report.summary.clone(),
        });
        emitter.flush();
        info!(summary = %report.summary, "scenario finished");
        Ok(report)
    }

    /// Current state of every contract.
    #[must_use]
    pub fn report(&self, steps_applied: usize) -> ScenarioReport {
        let contracts: Vec<ContractReport> = self
            .tracker
            .contracts()
            .map(|engine| {
                let tree = engine.tree();
                let nodes = tree
                    .iter()
                    .map(|(_, node)| {
                        let mut depth = 0;
                        let mut parent = node.parent;
                        while let Some(p) = parent {
                            depth += 1;
                            parent = tree.node(p).ok().and_then(|n| n.parent);
                        }
                        NodeReport {
                            key: node.key.clone(),
                            title: node.title.clone(),
                            depth,
                            state: node.state,
                            visible: node.visible,
                        }
                    })
                    .collect();
                ContractReport {
                    id: engine.id().to_string(),
                    title: engine.title().map(str::to_string),
                    status: engine.status(),
                    nodes,
                }
            })
            .collect();

        let count = |status| contracts.iter().filter(|c| c.status == status).count();
        ScenarioReport {
            scenario: self.config.scenario.name.clone(),
            summary: RunSummary {
                steps_applied,
                notifications: self.notifications,
                completed: count(ContractStatus::Completed),
                failed: count(ContractStatus::Failed),
                active: count(ContractStatus::Active),
                sim_time: self.now,
            },
            contracts,
        }
    }

    fn publish_text(&mut self) {
        for engine in self.tracker.contracts() {
            engine.publish_text(&mut self.host.presentation);
        }
    }

    /// Rebuilds the tracker from the scenario and loads `doc` into it.
    fn restore(&mut self, doc: &SaveNode) -> Result<Vec<LoadWarning>, GoalTrackError> {
        let mut tracker = build_tracker(&self.config)?;
        let mut names = NameTable::new();
        let warnings = persistence::load(&mut tracker, &mut names, doc)?;
        names.take_changes();
        for warning in &warnings {
            warn!(%warning, "save record dropped");
        }
        self.tracker = tracker;
        self.host.names = names;
        self.publish_text();
        Ok(warnings)
    }

    fn publish(&mut self, live: bool, event: HostEvent) {
        if live {
            let out = self
                .tracker
                .dispatch(&event, &mut self.host.services(), self.now);
            self.pending.extend(out);
        }
    }

    fn resolve(&self, step: usize, name: &str) -> Result<UnitId, ScenarioError> {
        self.host
            .world
            .find(name)
            .ok_or_else(|| ScenarioError::UnknownUnit {
                step,
                name: name.to_string(),
            })
    }

    fn ensure_free(&self, step: usize, name: &str) -> Result<(), ScenarioError> {
        if self.host.world.find(name).is_some() {
            return Err(ScenarioError::DuplicateUnit {
                step,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Drops `name` if it is still bound to `unit`.
    fn release_name(&mut self, name: &str, unit: UnitId) {
        if self.host.names.resolve(name) == Some(unit) {
            self.host.names.disassociate(name);
        }
    }

    fn apply(&mut self, step: usize, action: &StepAction, live: bool) -> Result<(), GoalTrackError> {
        match action {
            StepAction::Spawn { unit } => {
                self.ensure_free(step, &unit.name)?;
                let id = self.host.world.spawn(unit);
                self.host.names.associate(&unit.name, id);
                self.publish(live, HostEvent::UnitCreated { unit: id });
            }
            StepAction::Destroy { unit } => {
                let id = self.resolve(step, unit)?;
                let focused = self.host.world.focused() == Some(id);
                self.publish(live, HostEvent::UnitDestroyed { unit: id });
                self.host.world.remove(id);
                self.release_name(unit, id);
                if focused {
                    self.publish(live, HostEvent::FocusChanged { unit: None });
                }
            }
            StepAction::Update {
                unit,
                values,
                crew,
                kind,
            } => {
                let id = self.resolve(step, unit)?;
                self.host.world.update(id, values, crew.as_deref(), *kind);
                self.publish(live, HostEvent::UnitChanged { unit: id });
            }
            StepAction::Dock { host, target } => {
                let host_id = self.resolve(step, host)?;
                let target_id = self.resolve(step, target)?;
                if host_id == target_id {
                    return Err(ScenarioError::Invalid {
                        step,
                        message: format!("unit '{host}' cannot dock with itself"),
                    }
                    .into());
                }
                let focused = self.host.world.focused() == Some(target_id);
                self.publish(
                    live,
                    HostEvent::UnitsMerging {
                        host: host_id,
                        target: target_id,
                    },
                );
                self.publish(live, HostEvent::UnitDestroyed { unit: target_id });
                self.host.world.merge(host_id, target_id);
                self.release_name(target, target_id);
                self.publish(live, HostEvent::UnitChanged { unit: host_id });
                if focused {
                    self.host.world.set_focus(Some(host_id));
                    self.publish(live, HostEvent::FocusChanged { unit: Some(host_id) });
                }
            }
            StepAction::Undock {
                unit,
                fragments,
                name,
                kind,
            } => {
                let parent = self.resolve(step, unit)?;
                self.ensure_free(step, name)?;
                let bad_index = |index| ScenarioError::BadIndex {
                    step,
                    name: unit.clone(),
                    what: "fragment",
                    index,
                };
                let detaching = self
                    .host
                    .world
                    .fragment_keys(parent, fragments)
                    .map_err(bad_index)?;
                self.publish(live, HostEvent::UnitSplitting { parent, detaching });
                let child = self
                    .host
                    .world
                    .split(parent, fragments, name, *kind)
                    .map_err(bad_index)?;
                self.host.names.associate(name, child);
                self.publish(live, HostEvent::UnitCreated { unit: child });
                self.publish(live, HostEvent::UnitChanged { unit: parent });
            }
            StepAction::Eva { unit, crew } => {
                let parent = self.resolve(step, unit)?;
                self.ensure_free(step, crew)?;
                let member = self.host.world.detach_member(parent, crew).ok_or_else(|| {
                    ScenarioError::Invalid {
                        step,
                        message: format!("unit '{unit}' has no crew member '{crew}'"),
                    }
                })?;
                self.host.names.associate(crew, member);
                self.publish(live, HostEvent::MemberLeft { parent, member });
                self.publish(live, HostEvent::UnitCreated { unit: member });
                self.publish(live, HostEvent::UnitChanged { unit: parent });
            }
            StepAction::Board { member, unit } => {
                let member_id = self.resolve(step, member)?;
                let parent = self.resolve(step, unit)?;
                if member_id == parent {
                    return Err(ScenarioError::Invalid {
                        step,
                        message: format!("unit '{member}' cannot board itself"),
                    }
                    .into());
                }
                let focused = self.host.world.focused() == Some(member_id);
                self.publish(
                    live,
                    HostEvent::MemberReturned {
                        member: member_id,
                        parent,
                    },
                );
                self.publish(live, HostEvent::UnitDestroyed { unit: member_id });
                self.host.world.attach_member(member_id, parent);
                self.release_name(member, member_id);
                self.publish(live, HostEvent::UnitChanged { unit: parent });
                if focused {
                    self.host.world.set_focus(Some(parent));
                    self.publish(live, HostEvent::FocusChanged { unit: Some(parent) });
                }
            }
            StepAction::Focus { unit } => {
                let id = unit
                    .as_deref()
                    .map(|name| self.resolve(step, name))
                    .transpose()?;
                self.host.world.set_focus(id);
                self.publish(live, HostEvent::FocusChanged { unit: id });
            }
            StepAction::Flag {
                contract,
                key,
                state,
            } => {
                self.publish(
                    live,
                    HostEvent::ConditionChanged {
                        contract: contract.clone(),
                        flag: Some(FlagUpdate {
                            key: key.clone(),
                            state: *state,
                        }),
                    },
                );
            }
            StepAction::Associate { name, unit } => {
                let id = self.resolve(step, unit)?;
                self.host.names.associate(name, id);
            }
            StepAction::Tick => {
                if live {
                    let out = self.tracker.tick(&mut self.host.services(), self.now);
                    self.pending.extend(out);
                }
            }
            StepAction::Reload => {
                if live {
                    let doc = self.save();
                    self.restore(&doc)?;
                    info!(step, "tracker reloaded from save");
                }
            }
        }
        if live {
            self.announce_associations();
        }
        Ok(())
    }

    /// Publishes rebound names until the engines stop rebinding them.
    fn announce_associations(&mut self) {
        for _ in 0..MAX_ASSOCIATION_ROUNDS {
            let changed = self.host.names.take_changes();
            if changed.is_empty() {
                return;
            }
            for name in changed {
                self.publish(true, HostEvent::AssociationChanged { name });
            }
        }
        warn!(
            rounds = MAX_ASSOCIATION_ROUNDS,
            "name associations still changing; remaining changes deferred"
        );
    }
}

fn parse_run_value<T: std::str::FromStr>(
    run: &SaveNode,
    key: &'static str,
) -> Result<T, PersistenceError> {
    run.get(key)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| PersistenceError::MissingValue {
            node: RUN.to_string(),
            key,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use std::path::Path;

    fn runner(yaml: &str) -> ScenarioRunner {
        let loaded = ConfigLoader::with_defaults()
            .load_str(yaml, Path::new("test.yaml"))
            .unwrap();
        ScenarioRunner::new(loaded.config).unwrap()
    }

    fn unit(name: &str) -> UnitConfig {
        serde_yaml::from_str(&format!("name: {name}")).unwrap()
    }

    #[test]
    fn test_ids_are_deterministic() {
        let mut a = SimWorld::new();
        let mut b = SimWorld::new();
        let first = a.spawn(&unit("probe"));
        assert_eq!(first, b.spawn(&unit("probe")));
        let again = a.spawn(&unit("probe"));
        assert_ne!(first, again);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_split_moves_parts_with_fragments() {
        let mut world = SimWorld::new();
        let config: UnitConfig = serde_yaml::from_str(
            r"
name: stack
crew: [{ name: jeb }]
parts: [{ name: pod }, { name: tank }, { name: engine }]
fragments: [[pod], [tank, engine]]
",
        )
        .unwrap();
        let parent = world.spawn(&config);
        let child = world.split(parent, &[1], "booster", None).unwrap();

        let parent_unit = world.get(parent).unwrap();
        assert_eq!(parent_unit.snapshot.fragments.len(), 1);
        assert_eq!(parent_unit.snapshot.parts.len(), 1);
        assert_eq!(parent_unit.snapshot.crew.len(), 1);

        let child_unit = world.get(child).unwrap();
        assert_eq!(
            child_unit.snapshot.fragments,
            vec![FragmentKey::of_parts(&["tank", "engine"])]
        );
        assert_eq!(child_unit.snapshot.parts.len(), 2);
        assert!(world.split(parent, &[4], "nope", None).is_err());
    }

    #[test]
    fn test_merge_and_member_moves() {
        let mut world = SimWorld::new();
        let host = world.spawn(&unit("station"));
        let mut crewed: UnitConfig = unit("capsule");
        crewed.crew = vec![Item::named("val")];
        let capsule = world.spawn(&crewed);

        let walker = world.detach_member(capsule, "val").unwrap();
        assert_eq!(world.get(walker).unwrap().snapshot.kind, UnitKind::Eva);
        assert!(world.get(capsule).unwrap().snapshot.crew.is_empty());

        assert!(world.attach_member(walker, host));
        assert!(world.get(walker).is_none());
        assert_eq!(world.get(host).unwrap().snapshot.crew[0].name, "val");

        assert!(world.merge(host, capsule));
        assert_eq!(world.get(host).unwrap().snapshot.fragments.len(), 2);
        assert_eq!(world.len(), 1);
    }

    const DOCKING: &str = r"
scenario: { name: docking }
units:
  - { name: station, kind: station }
  - name: shuttle
    crew: [{ name: bob, tags: [scientist] }]
focus: shuttle
contracts:
  - id: crew-station
    root:
      - type: unit
        key: staffed
        kinds: [station]
        collection: crew
        filters:
          - tag: scientist
steps:
  - { at: 10, action: dock, host: station, target: shuttle }
";

    #[test]
    fn test_dock_completes_contract() {
        let mut runner = runner(DOCKING);
        assert_eq!(
            runner.tracker().get("crew-station").unwrap().status(),
            ContractStatus::Active
        );
        let outcome = runner.step().unwrap().unwrap();
        assert_eq!(outcome.action, "dock");
        assert!(outcome.notifications.iter().any(|n| matches!(
            n,
            Notification::ContractFinished {
                status: ContractStatus::Completed,
                ..
            }
        )));
        assert_eq!(runner.world().focused(), runner.world().find("station"));
        assert!(runner.names().resolve("shuttle").is_none());
        assert!(runner.step().unwrap().is_none());
        assert!(runner.is_finished());
    }

    #[test]
    fn test_unknown_unit_in_step() {
        let yaml = DOCKING.replace("target: shuttle", "target: ghost");
        let mut runner = runner(&yaml);
        let err = runner.step().unwrap_err();
        assert!(matches!(
            err,
            GoalTrackError::Scenario(ScenarioError::UnknownUnit { step: 0, .. })
        ));
    }

    #[test]
    fn test_save_records_position() {
        let mut runner = runner(DOCKING);
        runner.step().unwrap();
        let doc = runner.save();
        let run = doc.child(RUN).unwrap();
        assert_eq!(run.get("step"), Some("1"));
        assert_eq!(run.get("scenario"), Some("docking"));
    }

    #[test]
    fn test_resume_rejects_missing_position() {
        let mut runner = runner(DOCKING);
        let doc = persistence::save(runner.tracker(), runner.names());
        assert!(matches!(
            runner.resume(&doc),
            Err(GoalTrackError::Persistence(PersistenceError::MissingValue { .. }))
        ));
    }
}
