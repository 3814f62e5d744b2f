//! Cosmos ECS -- a minimal entity-component-system runtime.
//!
//! Entities are generational handles over duck-typed component records
//! (component name -> opaque [`serde_json::Value`]). The [`World`] keeps one
//! cached [`EntityIndex`] per distinct query so "which entities have
//! component set C" never rescans the world, and dispatch runs registered
//! systems against those indexes, deferring every structural mutation
//! through a [`CommandBuffer`] that is applied once per event.
//!
//! # Quick Start
//!
//! ```
//! use cosmos_ecs::prelude::*;
//! use serde_json::json;
//!
//! struct Mover;
//!
//! impl System for Mover {
//!     fn query(&self) -> Query {
//!         Query::with(["pos", "vel"])
//!     }
//!
//!     fn process(
//!         &mut self,
//!         matched: &MatchedEntities<'_>,
//!         store: &EntityStore,
//!         commands: &mut CommandBuffer,
//!         _args: &[serde_json::Value],
//!     ) {
//!         for &entity in matched.list() {
//!             let pos = store.get(entity, "pos").and_then(|v| v.as_i64()).unwrap_or(0);
//!             let vel = store.get(entity, "vel").and_then(|v| v.as_i64()).unwrap_or(0);
//!             commands.attach(entity, ComponentMap::from([("pos".to_owned(), json!(pos + vel))]));
//!         }
//!     }
//! }
//!
//! let mut world = World::new();
//! world.add_system("tick", Mover);
//!
//! let e = world.spawn_with(ComponentMap::from([
//!     ("pos".to_owned(), json!(0)),
//!     ("vel".to_owned(), json!(2)),
//! ]));
//!
//! world.emit("tick", &[]).unwrap();
//! assert_eq!(world.component(e, "pos"), Some(&json!(2)));
//! ```
//!
//! [`World`]: world::World
//! [`EntityIndex`]: index::EntityIndex
//! [`CommandBuffer`]: command::CommandBuffer

#![deny(unsafe_code)]

pub mod command;
pub mod entity;
pub mod index;
pub mod system;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by world operations.
///
/// The runtime degrades to no-ops wherever the contract allows (double
/// spawn, double despawn, detaching an absent component, emitting an
/// unregistered event); the remaining failure surface is addressing an
/// entity whose handle is no longer live.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity handle was released or never created.
    #[error("entity {entity} does not exist (released or never created)")]
    StaleEntity {
        entity: entity::EntityId,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::command::{CommandBuffer, FlushReport};
    pub use crate::entity::{ComponentMap, EntityId, EntityStore};
    pub use crate::index::{canonical_signature, EntityIndex};
    pub use crate::system::{MatchedEntities, Query, System};
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use serde_json::json;

    fn components(pairs: &[(&str, serde_json::Value)]) -> ComponentMap {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    // -- query resolution per system -----------------------------------------

    #[test]
    fn queried_and_queryless_systems_see_different_sets() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut world = World::new();
        let e1 = world.spawn_with(components(&[("hp", json!(5))]));
        let e2 = world.spawn_with(ComponentMap::new());

        let hp_seen: Rc<RefCell<Vec<EntityId>>> = Rc::default();
        let all_seen: Rc<RefCell<Vec<EntityId>>> = Rc::default();

        struct Recorder {
            query: Query,
            out: Rc<RefCell<Vec<EntityId>>>,
        }
        impl System for Recorder {
            fn query(&self) -> Query {
                self.query.clone()
            }
            fn process(
                &mut self,
                matched: &MatchedEntities<'_>,
                _store: &EntityStore,
                _commands: &mut CommandBuffer,
                _args: &[serde_json::Value],
            ) {
                *self.out.borrow_mut() = matched.list().to_vec();
            }
        }

        world.add_system(
            "tick",
            Recorder {
                query: Query::with(["hp"]),
                out: Rc::clone(&hp_seen),
            },
        );
        world.add_system(
            "tick",
            Recorder {
                query: Query::All,
                out: Rc::clone(&all_seen),
            },
        );

        world.emit("tick", &[]).unwrap();

        assert_eq!(*hp_seen.borrow(), vec![e1]);
        assert_eq!(*all_seen.borrow(), vec![e1, e2]);
    }

    // -- deferred visibility -------------------------------------------------

    /// Despawns every matched entity through the buffer.
    struct Reaper;

    impl System for Reaper {
        fn process(
            &mut self,
            matched: &MatchedEntities<'_>,
            _store: &EntityStore,
            commands: &mut CommandBuffer,
            _args: &[serde_json::Value],
        ) {
            for &entity in matched.list() {
                commands.despawn(entity);
            }
        }
    }

    #[test]
    fn later_system_still_observes_entity_despawned_by_earlier_system() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut world = World::new();
        let e = world.spawn_with(ComponentMap::new());

        let observed: Rc<RefCell<Vec<usize>>> = Rc::default();

        struct CountObserver {
            out: Rc<RefCell<Vec<usize>>>,
        }
        impl System for CountObserver {
            fn process(
                &mut self,
                matched: &MatchedEntities<'_>,
                _store: &EntityStore,
                _commands: &mut CommandBuffer,
                _args: &[serde_json::Value],
            ) {
                self.out.borrow_mut().push(matched.list().len());
            }
        }

        world.add_system("tick", Reaper);
        world.add_system(
            "tick",
            CountObserver {
                out: Rc::clone(&observed),
            },
        );

        // First emit: the observer (registered after the reaper) still sees
        // the entity; the despawn applies only after all systems ran.
        world.emit("tick", &[]).unwrap();
        assert_eq!(*observed.borrow(), vec![1]);
        assert!(!world.is_spawned(e));

        // Second emit: the entity is gone.
        world.emit("tick", &[]).unwrap();
        assert_eq!(*observed.borrow(), vec![1, 0]);
    }

    // -- grouped queries -----------------------------------------------------

    #[test]
    fn grouped_query_resolves_one_list_per_label() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut world = World::new();
        let mover = world.spawn_with(components(&[("pos", json!(1)), ("vel", json!(2))]));
        let fighter = world.spawn_with(components(&[("hp", json!(10))]));
        let _bystander = world.spawn_with(ComponentMap::new());

        let groups: Rc<RefCell<Vec<(Vec<EntityId>, Vec<EntityId>)>>> = Rc::default();

        struct Grouped {
            out: Rc<RefCell<Vec<(Vec<EntityId>, Vec<EntityId>)>>>,
        }
        impl System for Grouped {
            fn query(&self) -> Query {
                Query::grouped([
                    ("movers", vec!["pos", "vel"]),
                    ("fighters", vec!["hp"]),
                ])
            }
            fn process(
                &mut self,
                matched: &MatchedEntities<'_>,
                _store: &EntityStore,
                _commands: &mut CommandBuffer,
                _args: &[serde_json::Value],
            ) {
                self.out.borrow_mut().push((
                    matched.group("movers").unwrap_or_default().to_vec(),
                    matched.group("fighters").unwrap_or_default().to_vec(),
                ));
            }
        }

        world.add_system("tick", Grouped {
            out: Rc::clone(&groups),
        });
        world.emit("tick", &[]).unwrap();

        let seen = groups.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, vec![mover]);
        assert_eq!(seen[0].1, vec![fighter]);
    }

    // -- event arguments and registry ----------------------------------------

    #[test]
    fn args_are_forwarded_and_unregistered_events_are_noops() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut world = World::new();
        let received: Rc<RefCell<Vec<serde_json::Value>>> = Rc::default();

        struct ArgSink {
            out: Rc<RefCell<Vec<serde_json::Value>>>,
        }
        impl System for ArgSink {
            fn process(
                &mut self,
                _matched: &MatchedEntities<'_>,
                _store: &EntityStore,
                _commands: &mut CommandBuffer,
                args: &[serde_json::Value],
            ) {
                self.out.borrow_mut().extend(args.iter().cloned());
            }
        }

        world.add_system("update", ArgSink {
            out: Rc::clone(&received),
        });

        world.emit("update", &[json!(0.016), json!("frame")]).unwrap();
        assert_eq!(*received.borrow(), vec![json!(0.016), json!("frame")]);

        // Unregistered event: nothing happens, no error.
        let report = world.emit("nobody-home", &[json!(1)]).unwrap();
        assert_eq!(report, FlushReport::default());
    }

    // -- plain functions as systems ------------------------------------------

    fn sweep_everything(
        matched: &MatchedEntities<'_>,
        _store: &EntityStore,
        commands: &mut CommandBuffer,
        _args: &[serde_json::Value],
    ) {
        for &entity in matched.list() {
            commands.despawn(entity);
        }
    }

    #[test]
    fn plain_functions_register_as_queryless_systems() {
        let mut world = World::new();
        world.add_system("reset", sweep_everything);
        assert_eq!(world.system_count("reset"), 1);

        world.spawn_with(components(&[("hp", json!(1))]));
        world.spawn_with(ComponentMap::new());
        assert_eq!(world.entity_count(), 2);

        world.emit("reset", &[]).unwrap();
        assert_eq!(world.entity_count(), 0);
    }

    // -- systems spawning entities through the buffer ------------------------

    #[test]
    fn system_spawn_becomes_visible_next_emit() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut world = World::new();
        let seed = world.create(components(&[("hp", json!(1))]));

        let spawned = Rc::new(Cell::new(false));

        struct Spawner {
            entity: EntityId,
            done: Rc<Cell<bool>>,
        }
        impl System for Spawner {
            fn process(
                &mut self,
                _matched: &MatchedEntities<'_>,
                _store: &EntityStore,
                commands: &mut CommandBuffer,
                _args: &[serde_json::Value],
            ) {
                if !self.done.replace(true) {
                    commands.spawn(self.entity);
                }
            }
        }

        world.add_system("tick", Spawner {
            entity: seed,
            done: Rc::clone(&spawned),
        });

        assert_eq!(world.entity_count(), 0);
        world.emit("tick", &[]).unwrap();
        assert_eq!(world.entity_count(), 1);
        assert_eq!(world.query_entities(&["hp"]), &[seed]);
    }
}
