//! The [`World`] is the top-level container for the runtime. It owns the
//! entity store, the unconditional index, the derived-index cache, the
//! event registry, and the command buffer, and it drives dispatch.
//!
//! # Dispatch ordering guarantee
//!
//! [`emit`](World::emit) runs every system registered for an event to
//! completion, strictly in registration order, and applies the command
//! buffer exactly once afterwards. Structural changes requested by an
//! earlier system are therefore not visible to a later system within the
//! same `emit` call; they become visible at the next flush. Systems observe
//! a stable snapshot for the whole dispatch, which is what makes handing
//! them the indexes' live backing slices safe.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::{debug, trace};

use crate::command::{CommandBuffer, FlushReport};
use crate::entity::{ComponentMap, EntityId, EntityStore};
use crate::index::{canonical_signature, EntityIndex};
use crate::system::{MatchedEntities, Query, System};
use crate::EcsError;

/// Resolve a signature to its index's live entity list. The empty signature
/// denotes the unconditional index.
///
/// Free function (not a `&self` method) so callers can keep disjoint borrows
/// of the world's other fields while the slices are alive.
fn resolved<'w>(
    all: &'w EntityIndex,
    indexes: &'w HashMap<String, EntityIndex>,
    signature: &str,
) -> &'w [EntityId] {
    if signature.is_empty() {
        all.entities()
    } else {
        indexes[signature].entities()
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The root owner of all runtime state.
///
/// Every structural mutation (spawn, despawn, attach, detach) goes through
/// the world's own methods, which keep the unconditional index and every
/// cached derived index consistent transactionally. Systems never touch the
/// indexes directly; during dispatch they mutate only through the command
/// buffer.
pub struct World {
    /// Component records for every created entity.
    store: EntityStore,
    /// The unconditional index: every spawned entity, zero requirements.
    all: EntityIndex,
    /// Derived indexes keyed by canonical query signature. Created lazily,
    /// retained for the world's lifetime.
    indexes: HashMap<String, EntityIndex>,
    /// Event name -> systems, invoked in registration order.
    systems: HashMap<String, Vec<Box<dyn System>>>,
    /// The shared deferred-mutation buffer, flushed once per dispatch.
    commands: CommandBuffer,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.all.len())
            .field("index_count", &self.indexes.len())
            .field("event_count", &self.systems.len())
            .field("pending_commands", &self.commands.len())
            .finish()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a new, empty world.
    pub fn new() -> Self {
        Self {
            store: EntityStore::new(),
            all: EntityIndex::unconditional(),
            indexes: HashMap::new(),
            systems: HashMap::new(),
            commands: CommandBuffer::new(),
        }
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Allocate a new entity holding the given components, without spawning
    /// it. The returned handle can be spawned directly or queued on the
    /// command buffer.
    pub fn create(&mut self, components: ComponentMap) -> EntityId {
        self.store.create(components)
    }

    /// Add an entity to the unconditional index and to every cached derived
    /// index its record currently satisfies.
    ///
    /// Spawning an already-spawned entity is a no-op. A released or
    /// never-created handle is a caller error and fails fast.
    pub fn spawn(&mut self, entity: EntityId) -> Result<(), EcsError> {
        let Some(record) = self.store.record(entity) else {
            return Err(EcsError::StaleEntity { entity });
        };
        if !self.all.contains(entity) {
            self.all.add(entity);
            for index in self.indexes.values_mut() {
                if index.matches(record) {
                    index.add(entity);
                }
            }
        }
        Ok(())
    }

    /// Create and immediately spawn an entity. Convenience for setup code.
    pub fn spawn_with(&mut self, components: ComponentMap) -> EntityId {
        let entity = self.store.create(components);
        self.all.add(entity);
        if let Some(record) = self.store.record(entity) {
            for index in self.indexes.values_mut() {
                if index.matches(record) {
                    index.add(entity);
                }
            }
        }
        entity
    }

    /// Remove an entity from the unconditional index and from every cached
    /// index that currently contains it.
    ///
    /// Despawning a not-spawned entity is a no-op. The component record
    /// survives, so the same handle can be spawned again from scratch.
    pub fn despawn(&mut self, entity: EntityId) -> Result<(), EcsError> {
        if !self.store.contains(entity) {
            return Err(EcsError::StaleEntity { entity });
        }
        if self.all.contains(entity) {
            self.all.remove(entity);
            for index in self.indexes.values_mut() {
                index.remove(entity);
            }
        }
        Ok(())
    }

    /// Despawn an entity, drop its record, and recycle its handle slot.
    /// Outstanding copies of the handle become stale.
    pub fn release(&mut self, entity: EntityId) -> Result<(), EcsError> {
        self.despawn(entity)?;
        self.store.release(entity);
        Ok(())
    }

    // -- component mutation -------------------------------------------------

    /// Write each name -> value pair onto the entity's record, then add the
    /// entity to every cached index it now satisfies.
    ///
    /// Indexes that already contained the entity are left untouched: attach
    /// only ever adds names, so a previously matching index still matches.
    /// An unspawned entity's record is updated without touching any index.
    pub fn attach_components(
        &mut self,
        entity: EntityId,
        components: ComponentMap,
    ) -> Result<(), EcsError> {
        if !self.store.contains(entity) {
            return Err(EcsError::StaleEntity { entity });
        }
        for (name, value) in components {
            self.store.set(entity, name, value)?;
        }
        if self.all.contains(entity) {
            if let Some(record) = self.store.record(entity) {
                for index in self.indexes.values_mut() {
                    if !index.contains(entity) && index.matches(record) {
                        index.add(entity);
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove each named component from the entity's record, then drop the
    /// entity from every cached index it no longer satisfies.
    ///
    /// Detaching an absent component is a no-op. The unconditional index is
    /// unaffected (zero requirements).
    pub fn detach_components<S: AsRef<str>>(
        &mut self,
        entity: EntityId,
        names: &[S],
    ) -> Result<(), EcsError> {
        if !self.store.contains(entity) {
            return Err(EcsError::StaleEntity { entity });
        }
        for name in names {
            self.store.remove(entity, name.as_ref())?;
        }
        if self.all.contains(entity) {
            if let Some(record) = self.store.record(entity) {
                for index in self.indexes.values_mut() {
                    if index.contains(entity) && !index.matches(record) {
                        index.remove(entity);
                    }
                }
            }
        }
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    /// The live entity list for the given component-name query.
    ///
    /// Canonicalizes the query, creating and back-filling the index on first
    /// use by scanning the unconditional index once. The index is cached for
    /// the world's lifetime; there is deliberately no eviction, since system
    /// queries are a small fixed set declared at startup. An empty query
    /// resolves to the unconditional index.
    pub fn query_entities<S: AsRef<str>>(&mut self, names: &[S]) -> &[EntityId] {
        let signature = self.ensure_index(names);
        resolved(&self.all, &self.indexes, &signature)
    }

    /// Find or create the index for a query; returns its canonical
    /// signature. The empty signature stands for the unconditional index and
    /// never creates a cache entry.
    fn ensure_index<S: AsRef<str>>(&mut self, names: &[S]) -> String {
        let signature = canonical_signature(names);
        if signature.is_empty() {
            return signature;
        }
        if let Entry::Vacant(entry) = self.indexes.entry(signature.clone()) {
            let mut index = EntityIndex::new(names);
            for &entity in self.all.entities() {
                if let Some(record) = self.store.record(entity) {
                    if index.matches(record) {
                        index.add(entity);
                    }
                }
            }
            debug!(
                signature = %signature,
                backfilled = index.len(),
                "created derived entity index"
            );
            entry.insert(index);
        }
        signature
    }

    // -- systems and dispatch -----------------------------------------------

    /// Register a single system under an event name. Systems run in
    /// registration order when the event is emitted.
    pub fn add_system(&mut self, event: &str, system: impl System + 'static) {
        self.systems
            .entry(event.to_owned())
            .or_default()
            .push(Box::new(system));
    }

    /// Append several systems to an event's ordered list, creating the list
    /// on first registration.
    pub fn add_systems(&mut self, event: &str, systems: Vec<Box<dyn System>>) {
        self.systems
            .entry(event.to_owned())
            .or_default()
            .extend(systems);
    }

    /// Dispatch an event.
    ///
    /// For each system registered under `event`, in registration order:
    /// resolve its declared [`Query`] into the matching live entity lists,
    /// then invoke its `process` with the resolved entities, the component
    /// store, the shared command buffer, and `args`. After all systems have
    /// run, apply the command buffer exactly once and return its report.
    ///
    /// Emitting an event with no registered systems is a no-op.
    pub fn emit(&mut self, event: &str, args: &[serde_json::Value]) -> Result<FlushReport, EcsError> {
        let Some(mut systems) = self.systems.remove(event) else {
            return Ok(FlushReport::default());
        };
        trace!(event, systems = systems.len(), "dispatching event");

        for system in systems.iter_mut() {
            match system.query() {
                Query::All => {
                    let matched = MatchedEntities::List(self.all.entities());
                    system.process(&matched, &self.store, &mut self.commands, args);
                }
                Query::With(names) => {
                    let signature = self.ensure_index(&names);
                    let matched =
                        MatchedEntities::List(resolved(&self.all, &self.indexes, &signature));
                    system.process(&matched, &self.store, &mut self.commands, args);
                }
                Query::Grouped(groups) => {
                    let signatures: Vec<(String, String)> = groups
                        .into_iter()
                        .map(|(label, names)| {
                            let signature = self.ensure_index(&names);
                            (label, signature)
                        })
                        .collect();
                    let matched = MatchedEntities::Groups(
                        signatures
                            .iter()
                            .map(|(label, signature)| {
                                (
                                    label.clone(),
                                    resolved(&self.all, &self.indexes, signature),
                                )
                            })
                            .collect(),
                    );
                    system.process(&matched, &self.store, &mut self.commands, args);
                }
            }
        }

        // Re-register before flushing so commands see a consistent world.
        match self.systems.entry(event.to_owned()) {
            Entry::Occupied(mut entry) => {
                // A flushed command cannot register systems, but keep the
                // merge total just in case the registry gained an entry.
                systems.append(entry.get_mut());
                *entry.get_mut() = systems;
            }
            Entry::Vacant(entry) => {
                entry.insert(systems);
            }
        }

        self.flush()
    }

    /// Apply every queued command now, outside of dispatch.
    pub fn flush(&mut self) -> Result<FlushReport, EcsError> {
        let mut commands = std::mem::take(&mut self.commands);
        let result = commands.apply(self);
        self.commands = commands;
        result
    }

    // -- accessors ----------------------------------------------------------

    /// Read-only access to the component store.
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Mutable access to the command buffer, for queueing mutations outside
    /// of dispatch.
    pub fn commands(&mut self) -> &mut CommandBuffer {
        &mut self.commands
    }

    /// Whether the entity is currently in the unconditional index.
    pub fn is_spawned(&self, entity: EntityId) -> bool {
        self.all.contains(entity)
    }

    /// Number of spawned entities.
    pub fn entity_count(&self) -> usize {
        self.all.len()
    }

    /// Number of cached derived indexes.
    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    /// Number of systems registered under an event.
    pub fn system_count(&self, event: &str) -> usize {
        self.systems.get(event).map_or(0, Vec::len)
    }

    /// Read one component's payload.
    pub fn component(&self, entity: EntityId, name: &str) -> Option<&serde_json::Value> {
        self.store.get(entity, name)
    }

    /// Whether the entity currently holds the named component.
    pub fn has_component(&self, entity: EntityId, name: &str) -> bool {
        self.store.has(entity, name)
    }

    /// The entity's full component record.
    pub fn components(&self, entity: EntityId) -> Option<&ComponentMap> {
        self.store.record(entity)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn components(pairs: &[(&str, serde_json::Value)]) -> ComponentMap {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    // -- spawn / despawn -----------------------------------------------------

    #[test]
    fn spawn_adds_to_unconditional_index() {
        let mut world = World::new();
        let e = world.create(components(&[("pos", json!(1))]));
        assert!(!world.is_spawned(e));

        world.spawn(e).unwrap();
        assert!(world.is_spawned(e));
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn double_spawn_is_a_noop() {
        let mut world = World::new();
        let e = world.spawn_with(ComponentMap::new());
        world.spawn(e).unwrap();
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn despawn_removes_from_every_index() {
        let mut world = World::new();
        let e = world.spawn_with(components(&[("pos", json!(1))]));
        assert_eq!(world.query_entities(&["pos"]), &[e]);

        world.despawn(e).unwrap();
        assert!(!world.is_spawned(e));
        assert!(world.query_entities(&["pos"]).is_empty());
    }

    #[test]
    fn double_despawn_is_a_noop() {
        let mut world = World::new();
        let e = world.spawn_with(ComponentMap::new());
        world.despawn(e).unwrap();
        world.despawn(e).unwrap();
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn despawned_handle_can_be_spawned_again() {
        let mut world = World::new();
        let e = world.spawn_with(components(&[("pos", json!(1))]));
        world.despawn(e).unwrap();

        // Record survives the despawn; re-spawn re-adds from scratch.
        world.spawn(e).unwrap();
        assert!(world.is_spawned(e));
        assert_eq!(world.query_entities(&["pos"]), &[e]);
    }

    #[test]
    fn operations_on_released_handle_fail_fast() {
        let mut world = World::new();
        let e = world.spawn_with(ComponentMap::new());
        world.release(e).unwrap();

        assert!(matches!(
            world.spawn(e),
            Err(EcsError::StaleEntity { entity }) if entity == e
        ));
        assert!(world.despawn(e).is_err());
        assert!(world
            .attach_components(e, components(&[("hp", json!(1))]))
            .is_err());
        assert!(world.detach_components(e, &["hp"]).is_err());
    }

    // -- attach / detach keep indexes consistent -----------------------------

    #[test]
    fn attach_adds_entity_to_newly_satisfied_indexes() {
        let mut world = World::new();
        let e = world.spawn_with(components(&[("pos", json!(1))]));

        assert!(world.query_entities(&["pos", "vel"]).is_empty());

        world
            .attach_components(e, components(&[("vel", json!(2))]))
            .unwrap();
        assert_eq!(world.query_entities(&["pos", "vel"]), &[e]);
    }

    #[test]
    fn detach_removes_entity_from_unsatisfied_indexes() {
        let mut world = World::new();
        let e = world.spawn_with(components(&[("pos", json!(1)), ("vel", json!(2))]));
        assert_eq!(world.query_entities(&["pos", "vel"]), &[e]);

        world.detach_components(e, &["pos"]).unwrap();
        assert!(world.query_entities(&["pos", "vel"]).is_empty());
        // Still spawned, still in the velocity-only index.
        assert!(world.is_spawned(e));
        assert_eq!(world.query_entities(&["vel"]), &[e]);
    }

    #[test]
    fn attach_to_unspawned_entity_updates_record_only() {
        let mut world = World::new();
        world.spawn_with(components(&[("pos", json!(0))]));
        let unspawned = world.create(ComponentMap::new());

        world
            .attach_components(unspawned, components(&[("pos", json!(1))]))
            .unwrap();
        assert!(world.has_component(unspawned, "pos"));
        // Not spawned, so no index picked it up.
        assert_eq!(world.query_entities(&["pos"]).len(), 1);
    }

    // -- query cache ---------------------------------------------------------

    #[test]
    fn equivalent_queries_share_one_index() {
        let mut world = World::new();
        world.spawn_with(components(&[("a", json!(1)), ("b", json!(2))]));

        world.query_entities(&["a", "b"]);
        world.query_entities(&["b", "a"]);
        world.query_entities(&["a", "b", "a"]);
        assert_eq!(world.index_count(), 1);
    }

    #[test]
    fn empty_query_resolves_to_all_live_entities() {
        let mut world = World::new();
        let e1 = world.spawn_with(ComponentMap::new());
        let e2 = world.spawn_with(components(&[("pos", json!(1))]));

        assert_eq!(world.query_entities::<&str>(&[]), &[e1, e2]);
        // No derived index was created for the empty signature.
        assert_eq!(world.index_count(), 0);
    }

    #[test]
    fn new_index_backfills_from_existing_entities() {
        let mut world = World::new();
        let e1 = world.spawn_with(components(&[("hp", json!(5))]));
        let _e2 = world.spawn_with(ComponentMap::new());
        let e3 = world.spawn_with(components(&[("hp", json!(7))]));

        // Index created after the entities exist; backfill order follows the
        // unconditional index.
        assert_eq!(world.query_entities(&["hp"]), &[e1, e3]);
    }

    #[test]
    fn spawn_populates_already_cached_indexes() {
        let mut world = World::new();
        assert!(world.query_entities(&["hp"]).is_empty());

        let e = world.spawn_with(components(&[("hp", json!(5))]));
        assert_eq!(world.query_entities(&["hp"]), &[e]);
    }

    // -- scenario from the contract ------------------------------------------

    #[test]
    fn attach_detach_scenario_updates_cached_query() {
        let mut world = World::new();
        let e1 = world.spawn_with(components(&[("pos", json!(1))]));

        assert!(world.query_entities(&["pos", "vel"]).is_empty());

        world.commands().attach(e1, components(&[("vel", json!(2))]));
        world.flush().unwrap();
        assert_eq!(world.query_entities(&["pos", "vel"]), &[e1]);

        world.commands().detach(e1, &["pos"]);
        world.flush().unwrap();
        assert!(world.query_entities(&["pos", "vel"]).is_empty());
    }
}
