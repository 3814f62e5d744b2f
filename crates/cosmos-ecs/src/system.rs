//! The system contract: query descriptors and the processing trait.
//!
//! A system is an event handler: it declares which entities it wants to see
//! (its [`Query`]) and exposes a [`process`](System::process) operation. The
//! world resolves the query against its index cache at dispatch time and
//! hands the system the matching entity lists, a read-only view of the
//! component store, the shared [`CommandBuffer`], and the event arguments.
//!
//! Systems must route every structural mutation through the command buffer;
//! the matched lists are the indexes' live backing slices, so mutating the
//! world mid-iteration would invalidate exactly what the system is walking.

use crate::command::CommandBuffer;
use crate::entity::{EntityId, EntityStore};

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// What a system wants resolved before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Every live entity (the unconditional index).
    All,
    /// Entities holding every named component.
    With(Vec<String>),
    /// Several labelled name lists, each resolved independently. The system
    /// receives one entity list per label.
    Grouped(Vec<(String, Vec<String>)>),
}

impl Query {
    /// Build a [`Query::With`] from anything stringy.
    pub fn with<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self::With(names.into_iter().map(Into::into).collect())
    }

    /// Build a [`Query::Grouped`] from `(label, names)` pairs.
    pub fn grouped<L, S>(groups: impl IntoIterator<Item = (L, Vec<S>)>) -> Self
    where
        L: Into<String>,
        S: Into<String>,
    {
        Self::Grouped(
            groups
                .into_iter()
                .map(|(label, names)| {
                    (
                        label.into(),
                        names.into_iter().map(Into::into).collect(),
                    )
                })
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// MatchedEntities
// ---------------------------------------------------------------------------

/// The resolved entity sets a system receives.
///
/// The slices borrow the indexes' live backing lists for the duration of the
/// call; they are read access, not copies.
#[derive(Debug)]
pub enum MatchedEntities<'w> {
    /// One flat list ([`Query::All`] or [`Query::With`]).
    List(&'w [EntityId]),
    /// One list per label ([`Query::Grouped`]), in declaration order.
    Groups(Vec<(String, &'w [EntityId])>),
}

impl<'w> MatchedEntities<'w> {
    /// The flat entity list. Empty for grouped results; use
    /// [`group`](Self::group) there.
    pub fn list(&self) -> &'w [EntityId] {
        match self {
            Self::List(entities) => entities,
            Self::Groups(_) => &[],
        }
    }

    /// The entity list resolved for `label`, if this result is grouped and
    /// the label was declared.
    pub fn group(&self, label: &str) -> Option<&'w [EntityId]> {
        match self {
            Self::List(_) => None,
            Self::Groups(groups) => groups
                .iter()
                .find(|(l, _)| l == label)
                .map(|(_, entities)| *entities),
        }
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// An event handler with an optional query and a processing operation.
///
/// `query` defaults to [`Query::All`]. `process` receives the resolved
/// entities, read-only component access, the world's shared command buffer,
/// and the arguments forwarded from [`World::emit`](crate::world::World::emit).
pub trait System {
    /// The query the world resolves before invoking this system.
    fn query(&self) -> Query {
        Query::All
    }

    /// Handle one dispatch of the event this system is registered under.
    fn process(
        &mut self,
        matched: &MatchedEntities<'_>,
        store: &EntityStore,
        commands: &mut CommandBuffer,
        args: &[serde_json::Value],
    );
}

/// Blanket implementation so plain functions and closures can be registered
/// as query-less systems.
impl<F> System for F
where
    F: for<'w> FnMut(&MatchedEntities<'w>, &EntityStore, &mut CommandBuffer, &[serde_json::Value]),
{
    fn process(
        &mut self,
        matched: &MatchedEntities<'_>,
        store: &EntityStore,
        commands: &mut CommandBuffer,
        args: &[serde_json::Value],
    ) {
        (self)(matched, store, commands, args)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
