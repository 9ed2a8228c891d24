//! Multi-contract tracker.
//!
//! Owns every accepted [`ContractEngine`], routes host events to them
//! through the [`EventBus`], and shares exclusive unit claims across
//! contracts. A contract is attached to the bus when accepted and detached
//! when it finishes or is withdrawn.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::bus::EventBus;
use crate::catalog::Catalog;
use crate::engine::{ContractEngine, Notification};
use crate::error::TreeError;
use crate::host::{HostEvent, HostServices};
use crate::observability::metrics;
use crate::state::Timestamp;
use crate::unit::UnitId;

/// Every contract known to the host.
#[derive(Debug)]
pub struct ContractTracker {
    catalog: Arc<Catalog>,
    contracts: IndexMap<String, ContractEngine>,
    bus: EventBus,
}

impl ContractTracker {
    /// Creates a tracker sharing `catalog` with its contracts.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            contracts: IndexMap::new(),
            bus: EventBus::new(),
        }
    }

    /// Shared reference data.
    #[must_use]
    pub const fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Subscription registry.
    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Contract by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ContractEngine> {
        self.contracts.get(id)
    }

    /// Mutable contract by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut ContractEngine> {
        self.contracts.get_mut(id)
    }

    /// Contracts in acceptance order.
    pub fn contracts(&self) -> impl Iterator<Item = &ContractEngine> {
        self.contracts.values()
    }

    /// Number of contracts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    /// Returns `true` if no contract was accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Accepts a contract: validates its tree, attaches it to the bus,
    /// publishes its text and evaluates every live unit.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::DuplicateKey`] if a contract with the same id
    /// exists, or the tree's validation error.
    pub fn accept(
        &mut self,
        engine: ContractEngine,
        host: &mut HostServices<'_>,
        now: Timestamp,
    ) -> Result<Vec<Notification>, TreeError> {
        let id = engine.id().to_string();
        self.insert(engine)?;
        info!(contract = %id, "contract accepted");
        if let Some(engine) = self.contracts.get(&id) {
            engine.publish_text(host.presentation);
        }
        Ok(self.refresh_one(&id, host, now))
    }

    /// Adds a contract without evaluating it (used when loading).
    ///
    /// # Errors
    ///
    /// Same as [`Self::accept`].
    pub fn insert(&mut self, engine: ContractEngine) -> Result<(), TreeError> {
        engine.tree().validate()?;
        let id = engine.id().to_string();
        if self.contracts.contains_key(&id) {
            return Err(TreeError::DuplicateKey(id));
        }
        if !engine.status().is_finished() {
            self.bus.attach(&id, &HostEvent::TOPICS);
        }
        self.contracts.insert(id, engine);
        Ok(())
    }

    /// Removes a contract and its subscriptions.
    pub fn withdraw(&mut self, id: &str) -> Option<ContractEngine> {
        let engine = self.contracts.shift_remove(id)?;
        self.bus.detach(id);
        info!(contract = %id, "contract withdrawn");
        Some(engine)
    }

    /// Attaches active contracts and detaches finished ones, after their
    /// status was restored from a save.
    pub fn sync_subscriptions(&mut self) {
        for engine in self.contracts.values() {
            let id = engine.id();
            match (engine.status().is_finished(), self.bus.is_subscribed(id)) {
                (true, true) => {
                    self.bus.detach(id);
                }
                (false, false) => self.bus.attach(id, &HostEvent::TOPICS),
                _ => {}
            }
        }
    }

    /// Routes one host event to every subscribed contract.
    pub fn dispatch(
        &mut self,
        event: &HostEvent,
        host: &mut HostServices<'_>,
        now: Timestamp,
    ) -> Vec<Notification> {
        let topic = event.topic();
        metrics::record_host_event(topic);
        let subscribers = self.bus.subscribers(topic);
        debug!(topic, subscribers = subscribers.len(), "dispatching host event");

        let mut out = Vec::new();
        for id in subscribers {
            let claims = self.claims_except(&id);
            let Some(engine) = self.contracts.get_mut(&id) else {
                continue;
            };
            out.extend(engine.handle(event, &mut host.context(now, &claims)));
            self.detach_if_finished(&id);
        }
        self.publish_gauge();
        out
    }

    /// Advances dwell timers of every active contract.
    pub fn tick(&mut self, host: &mut HostServices<'_>, now: Timestamp) -> Vec<Notification> {
        let ids: Vec<String> = self.active_ids();
        let mut out = Vec::new();
        for id in ids {
            let claims = self.claims_except(&id);
            if let Some(engine) = self.contracts.get_mut(&id) {
                out.extend(engine.tick(&mut host.context(now, &claims)));
            }
            self.detach_if_finished(&id);
        }
        self.publish_gauge();
        out
    }

    /// Re-evaluates every live unit for every active contract.
    pub fn refresh(&mut self, host: &mut HostServices<'_>, now: Timestamp) -> Vec<Notification> {
        let mut out = Vec::new();
        for id in self.active_ids() {
            out.extend(self.refresh_one(&id, host, now));
        }
        self.publish_gauge();
        out
    }

    fn refresh_one(
        &mut self,
        id: &str,
        host: &mut HostServices<'_>,
        now: Timestamp,
    ) -> Vec<Notification> {
        let claims = self.claims_except(id);
        let out = match self.contracts.get_mut(id) {
            Some(engine) => engine.refresh(&mut host.context(now, &claims)),
            None => Vec::new(),
        };
        self.detach_if_finished(id);
        out
    }

    fn active_ids(&self) -> Vec<String> {
        self.contracts
            .values()
            .filter(|e| !e.status().is_finished())
            .map(|e| e.id().to_string())
            .collect()
    }

    /// Units claimed by exclusive groups of every contract but `id`.
    fn claims_except(&self, id: &str) -> HashSet<UnitId> {
        self.contracts
            .values()
            .filter(|e| e.id() != id && !e.status().is_finished())
            .flat_map(ContractEngine::exclusive_claims)
            .collect()
    }

    fn detach_if_finished(&mut self, id: &str) {
        let finished = self
            .contracts
            .get(id)
            .is_some_and(|e| e.status().is_finished());
        if finished && self.bus.is_subscribed(id) {
            self.bus.detach(id);
        }
    }

    fn publish_gauge(&self) {
        let tracked = self.contracts.values().map(ContractEngine::tracked_count).sum();
        metrics::set_tracked_units(tracked);
    }
}
