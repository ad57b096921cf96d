// hierarchy.rs - Parent and child references
//
// Both components are written only by the hierarchy operations on
// `EntityStore`, which keep them mirrored: `b` lists `a` in its `Children`
// exactly when `a` has `Parent(b)`.

use serde::{Deserialize, Serialize};

use crate::ecs::{Component, ComponentRole, EntityId};

/// Points at the entity's parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parent(EntityId);

impl Parent {
    pub(crate) fn new(id: EntityId) -> Self {
        Self(id)
    }

    pub fn id(&self) -> EntityId {
        self.0
    }
}

impl Component for Parent {
    const KEY: &'static str = "parent";
    const ROLE: ComponentRole = ComponentRole::Parent;
}

/// Ordered list of direct children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Children(Vec<EntityId>);

impl Children {
    pub(crate) fn new(ids: Vec<EntityId>) -> Self {
        Self(ids)
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.0.contains(&id)
    }

    pub(crate) fn push(&mut self, id: EntityId) {
        self.0.push(id);
    }

    /// Insert at `index`, clamped to the current length.
    pub(crate) fn insert(&mut self, index: usize, id: EntityId) {
        let index = index.min(self.0.len());
        self.0.insert(index, id);
    }

    /// Remove `id`, keeping the order of the remaining children.
    pub(crate) fn remove(&mut self, id: EntityId) -> bool {
        match self.0.iter().position(|&child| child == id) {
            Some(pos) => {
                self.0.remove(pos);
                true
            }
            None => false,
        }
    }
}

impl Component for Children {
    const KEY: &'static str = "children";
    const ROLE: ComponentRole = ComponentRole::Children;
}
