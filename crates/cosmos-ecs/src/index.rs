//! Cached entity indexes keyed by canonical query signature.
//!
//! An [`EntityIndex`] holds the set of entities that all satisfy one fixed
//! list of required component names. The [`World`](crate::world::World) keeps
//! one index per distinct [`canonical_signature`] and updates every cached
//! index transactionally with each structural mutation, so answering "which
//! entities have component set C" never rescans the world.
//!
//! Indexes are dumb on purpose: [`add`](EntityIndex::add) does not verify
//! [`matches`](EntityIndex::matches). The world checks before inserting; the
//! index only guarantees O(1) membership tests and order-preserving removal.

use std::collections::HashSet;

use crate::entity::{ComponentMap, EntityId};

/// Compute the canonical signature of a query: its component names sorted,
/// deduplicated, and pipe-joined.
///
/// Two queries denoting the same name set always produce the same signature,
/// regardless of ordering or duplicates. The empty query yields `""`.
pub fn canonical_signature<S: AsRef<str>>(names: &[S]) -> String {
    let mut sorted: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join("|")
}

// ---------------------------------------------------------------------------
// EntityIndex
// ---------------------------------------------------------------------------

/// A cached collection of entities all satisfying one fixed set of required
/// component names.
///
/// Iteration order is insertion order. Membership tests are O(1) via a
/// secondary hash set; removal is O(n) on the ordered list but preserves the
/// order of the remaining entities.
///
/// An index with zero requirements matches every entity; the world uses one
/// such index as its unconditional "all live entities" index.
#[derive(Debug)]
pub struct EntityIndex {
    /// Required component names, sorted and deduplicated; fixed for the
    /// index's lifetime.
    required: Vec<String>,
    /// Matching entities in insertion order (the live backing list handed to
    /// systems).
    entities: Vec<EntityId>,
    /// O(1) membership set over the same entities.
    members: HashSet<EntityId>,
}

impl EntityIndex {
    /// Create an empty index requiring the given component names.
    ///
    /// Names are sorted and deduplicated; the original ordering does not
    /// matter.
    pub fn new<S: AsRef<str>>(required: &[S]) -> Self {
        let mut required: Vec<String> = required.iter().map(|s| s.as_ref().to_owned()).collect();
        required.sort_unstable();
        required.dedup();
        Self {
            required,
            entities: Vec::new(),
            members: HashSet::new(),
        }
    }

    /// Create the unconditional index: zero requirements, matches everything.
    pub fn unconditional() -> Self {
        Self::new::<&str>(&[])
    }

    /// The fixed requirement list (sorted, deduplicated).
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// The canonical signature of this index's requirements.
    pub fn signature(&self) -> String {
        self.required.join("|")
    }

    /// Whether a component record satisfies every required name.
    ///
    /// Pure function of the record and the requirement list; ignores current
    /// membership.
    pub fn matches(&self, record: &ComponentMap) -> bool {
        self.required.iter().all(|name| record.contains_key(name))
    }

    /// O(1) membership test.
    pub fn contains(&self, entity: EntityId) -> bool {
        self.members.contains(&entity)
    }

    /// Add an entity to the index. No-op if already contained.
    ///
    /// Does not check [`matches`](Self::matches); the caller is responsible
    /// for only adding satisfying entities.
    pub fn add(&mut self, entity: EntityId) {
        if self.members.insert(entity) {
            self.entities.push(entity);
        }
    }

    /// Remove an entity from the index. No-op if not contained.
    ///
    /// The order of the remaining entities is preserved.
    pub fn remove(&mut self, entity: EntityId) {
        if self.members.remove(&entity) {
            if let Some(pos) = self.entities.iter().position(|&e| e == entity) {
                self.entities.remove(pos);
            }
        }
    }

    /// The matching entities, in insertion order.
    ///
    /// This is the index's live backing list, not a copy.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Number of entities currently in the index.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
