//! Entity handles and component record storage.
//!
//! An [`EntityId`] is a 64-bit handle that packs a *generation* counter in the
//! high 32 bits and an *index* in the low 32 bits. The generation is bumped
//! every time an index slot is recycled, so a handle held past
//! [`EntityStore::release`] is detectably stale in O(1).
//!
//! Two entities with identical component data are distinct as long as their
//! handles differ; index membership is keyed on the handle, never on the
//! record contents.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::EcsError;

/// A component record: component name -> opaque payload.
///
/// Only the *presence* of a name matters to the index machinery; payloads are
/// never inspected by the core.
pub type ComponentMap = HashMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A generational entity handle.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Construct an `EntityId` from an index and generation.
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// The index portion (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The generation portion (high 32 bits).
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

/// Allocates and recycles [`EntityId`]s with generational tracking.
///
/// Free indices are kept in a FIFO queue so that generations are spread out
/// over time rather than concentrated on a hot index.
#[derive(Debug, Default)]
struct EntityAllocator {
    /// Current generation for each index slot.
    generations: Vec<u32>,
    /// Whether the slot currently backs a live handle.
    live: Vec<bool>,
    /// Free-list of recyclable indices (FIFO queue).
    free_indices: VecDeque<u32>,
}

impl EntityAllocator {
    fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh [`EntityId`], reusing a recycled index if available.
    fn allocate(&mut self) -> EntityId {
        if let Some(index) = self.free_indices.pop_front() {
            // Generation was already bumped on release.
            self.live[index as usize] = true;
            EntityId::new(index, self.generations[index as usize])
        } else {
            let index = self.generations.len() as u32;
            self.generations.push(0);
            self.live.push(true);
            EntityId::new(index, 0)
        }
    }

    /// Free a handle, incrementing the slot's generation so any outstanding
    /// copies of it become stale.
    ///
    /// Returns `false` if the handle was already stale.
    fn deallocate(&mut self, id: EntityId) -> bool {
        let idx = id.index() as usize;
        if idx >= self.generations.len()
            || self.generations[idx] != id.generation()
            || !self.live[idx]
        {
            return false;
        }
        self.live[idx] = false;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free_indices.push_back(id.index());
        true
    }

    /// Whether `id` refers to a currently live handle.
    fn is_live(&self, id: EntityId) -> bool {
        let idx = id.index() as usize;
        idx < self.generations.len() && self.live[idx] && self.generations[idx] == id.generation()
    }
}

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

/// Owns the component record of every created entity.
///
/// Creating an entity allocates a handle and a record; the record persists
/// across despawns (a despawned-but-still-held handle can be spawned again
/// from scratch) and is dropped only on [`release`](Self::release), at which
/// point the handle becomes stale.
///
/// Systems receive a shared reference to the store during dispatch for
/// read-only component access.
#[derive(Debug, Default)]
pub struct EntityStore {
    allocator: EntityAllocator,
    records: HashMap<EntityId, ComponentMap>,
}

impl EntityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new entity holding the given components.
    ///
    /// The entity is *not* spawned into any index; see
    /// [`World::spawn`](crate::world::World::spawn).
    pub fn create(&mut self, components: ComponentMap) -> EntityId {
        let id = self.allocator.allocate();
        self.records.insert(id, components);
        id
    }

    /// Whether `id` is a live (created, not yet released) handle.
    pub fn contains(&self, id: EntityId) -> bool {
        self.allocator.is_live(id)
    }

    /// The full component record of a live entity.
    pub fn record(&self, id: EntityId) -> Option<&ComponentMap> {
        if !self.allocator.is_live(id) {
            return None;
        }
        self.records.get(&id)
    }

    /// Read one component's payload.
    pub fn get(&self, id: EntityId, name: &str) -> Option<&serde_json::Value> {
        self.record(id).and_then(|r| r.get(name))
    }

    /// Whether a live entity currently holds the named component.
    pub fn has(&self, id: EntityId, name: &str) -> bool {
        self.record(id).is_some_and(|r| r.contains_key(name))
    }

    /// Write one component onto an entity's record (insert or overwrite).
    pub fn set(&mut self, id: EntityId, name: String, value: serde_json::Value) -> Result<(), EcsError> {
        if !self.allocator.is_live(id) {
            return Err(EcsError::StaleEntity { entity: id });
        }
        self.records.entry(id).or_default().insert(name, value);
        Ok(())
    }

    /// Remove one component from an entity's record.
    ///
    /// Removing an absent component is a no-op (`Ok(false)`).
    pub fn remove(&mut self, id: EntityId, name: &str) -> Result<bool, EcsError> {
        if !self.allocator.is_live(id) {
            return Err(EcsError::StaleEntity { entity: id });
        }
        Ok(self
            .records
            .get_mut(&id)
            .is_some_and(|r| r.remove(name).is_some()))
    }

    /// Drop an entity's record and recycle its handle slot.
    ///
    /// Returns `false` if the handle was already stale.
    pub fn release(&mut self, id: EntityId) -> bool {
        if !self.allocator.deallocate(id) {
            return false;
        }
        self.records.remove(&id);
        true
    }

    /// Number of live (created) entities.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no entities are currently live.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
