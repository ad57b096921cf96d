// unique.rs - Unique key lookup

use std::any::Any;
use std::collections::HashMap;

use crate::ecs::{Entity, EntityId, EntityStore, UniqueEntity};

/// Unique key -> holder.
#[derive(Default)]
pub(crate) struct UniqueIndex {
    holders: HashMap<String, EntityId>,
}

impl UniqueIndex {
    pub fn holder(&self, key: &str) -> Option<EntityId> {
        self.holders.get(key).copied()
    }

    pub fn insert(&mut self, key: &str, id: EntityId) {
        self.holders.insert(key.to_owned(), id);
    }

    /// Drop `key` if `id` still holds it.
    pub fn release(&mut self, key: &str, id: EntityId) {
        if self.holders.get(key) == Some(&id) {
            self.holders.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }
}

/// Key carried by an erased `UniqueEntity` value.
pub(crate) fn key_of(value: &dyn Any) -> Option<&str> {
    value.downcast_ref::<UniqueEntity>().map(|unique| unique.uid.as_str())
}

impl EntityStore {
    /// Entity holding unique key `key`.
    pub fn unique_entity(&self, key: &str) -> Option<Entity> {
        let id = self.uniques.holder(key)?;
        self.index.entity(id)
    }
}
