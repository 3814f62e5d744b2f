//! Deferred-mutation command buffer.
//!
//! Systems never mutate the world while its indexes are being iterated;
//! instead they queue structural mutations here and the world applies them
//! once, after every system registered for the current event has run. This is
//! the discipline that makes single-threaded dispatch safe without locking:
//! within one dispatch every system observes the same stable snapshot, and
//! read-your-own-writes is deliberately false until the next flush.
//!
//! # Phase order
//!
//! [`CommandBuffer::apply`] runs the four queues in a fixed order:
//!
//! 1. spawns
//! 2. despawns
//! 3. attaches
//! 4. detaches
//!
//! The order is observable: an entity spawned and despawned in the same cycle
//! ends up despawned, and a component both attached and detached in the same
//! cycle ends up absent (detach runs last, unconditionally).

use std::collections::HashSet;

use tracing::warn;

use crate::entity::{ComponentMap, EntityId};
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// FlushReport
// ---------------------------------------------------------------------------

/// Summary of the last [`CommandBuffer::apply`] call.
///
/// `conflicts` counts (entity, component) pairs that were both attached and
/// detached within the same buffering window. Conflicts are warnings, not
/// errors: the phase order makes the outcome well defined (the component ends
/// up detached).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entities spawned (duplicate enqueues of an already-spawned entity
    /// still count; the spawn itself degrades to a no-op).
    pub spawned: usize,
    /// Entities despawned.
    pub despawned: usize,
    /// Entities that received pending component attaches.
    pub attached: usize,
    /// Entities that received pending component detaches.
    pub detached: usize,
    /// (entity, component) pairs both attached and detached this cycle.
    pub conflicts: usize,
}

// ---------------------------------------------------------------------------
// CommandBuffer
// ---------------------------------------------------------------------------

/// Records intended mutations without applying them.
///
/// One buffer exists per [`World`]; it accumulates between flushes and is
/// fully cleared by [`apply`](Self::apply). It is not thread-shared, and
/// collaborators must not enqueue new commands while a flush is in progress.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    /// Entities to spawn, in enqueue order. Duplicates tolerated.
    spawns: Vec<EntityId>,
    /// Entities to despawn, in enqueue order. Duplicates tolerated.
    despawns: Vec<EntityId>,
    /// Pending component writes, one merged map per entity in first-enqueue
    /// order. Last write wins per component name.
    attaches: Vec<(EntityId, ComponentMap)>,
    /// Pending component removals, one name list per entity in first-enqueue
    /// order. Duplicate names accumulate harmlessly.
    detaches: Vec<(EntityId, Vec<String>)>,
}

impl CommandBuffer {
    /// Create a new, empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an entity for spawning at the next flush.
    pub fn spawn(&mut self, entity: EntityId) {
        self.spawns.push(entity);
    }

    /// Enqueue an entity for despawning at the next flush.
    pub fn despawn(&mut self, entity: EntityId) {
        self.despawns.push(entity);
    }

    /// Merge component writes into the entity's pending attach map.
    ///
    /// Later calls overwrite earlier pending values for the same component
    /// name; names not repeated are preserved from earlier calls.
    pub fn attach(&mut self, entity: EntityId, components: ComponentMap) {
        if let Some((_, pending)) = self.attaches.iter_mut().find(|(e, _)| *e == entity) {
            pending.extend(components);
        } else {
            self.attaches.push((entity, components));
        }
    }

    /// Append component names to the entity's pending detach list.
    ///
    /// Duplicates across calls accumulate; detaching an absent component is a
    /// no-op at apply time.
    pub fn detach<S: AsRef<str>>(&mut self, entity: EntityId, names: &[S]) {
        let names = names.iter().map(|n| n.as_ref().to_owned());
        if let Some((_, pending)) = self.detaches.iter_mut().find(|(e, _)| *e == entity) {
            pending.extend(names);
        } else {
            self.detaches.push((entity, names.collect()));
        }
    }

    /// Total number of queued commands across all four queues.
    pub fn len(&self) -> usize {
        self.spawns.len() + self.despawns.len() + self.attaches.len() + self.detaches.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply all queued commands to the world in fixed phase order, then
    /// clear every queue.
    ///
    /// Fail-fast: the first command that errors (a stale entity handle)
    /// aborts the flush and the error propagates. There are no
    /// partial-application semantics; the queues are drained up front either
    /// way, so a failed flush is not retryable.
    pub fn apply(&mut self, world: &mut World) -> Result<FlushReport, EcsError> {
        let spawns = std::mem::take(&mut self.spawns);
        let despawns = std::mem::take(&mut self.despawns);
        let attaches = std::mem::take(&mut self.attaches);
        let detaches = std::mem::take(&mut self.detaches);

        let mut report = FlushReport {
            conflicts: Self::count_conflicts(&attaches, &detaches),
            ..FlushReport::default()
        };

        for entity in spawns {
            world.spawn(entity)?;
            report.spawned += 1;
        }
        for entity in despawns {
            world.despawn(entity)?;
            report.despawned += 1;
        }
        for (entity, components) in attaches {
            world.attach_components(entity, components)?;
            report.attached += 1;
        }
        for (entity, names) in detaches {
            world.detach_components(entity, &names)?;
            report.detached += 1;
        }

        Ok(report)
    }

    /// Count (entity, component) pairs that are both attached and detached in
    /// this window, warning on each. The phase order resolves them (detach
    /// wins), but a system pair producing them is usually a logic bug worth
    /// surfacing.
    fn count_conflicts(attaches: &[(EntityId, ComponentMap)], detaches: &[(EntityId, Vec<String>)]) -> usize {
        let mut conflicts = 0;
        for (entity, names) in detaches {
            let Some((_, pending)) = attaches.iter().find(|(e, _)| e == entity) else {
                continue;
            };
            let mut seen: HashSet<&str> = HashSet::new();
            for name in names {
                if pending.contains_key(name.as_str()) && seen.insert(name.as_str()) {
                    conflicts += 1;
                    warn!(
                        entity = %entity,
                        component = %name,
                        "component both attached and detached in one flush cycle (detach wins)"
                    );
                }
            }
        }
        conflicts
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
