// entity_list.rs - Ordered list of entity ids

use crate::ecs::{CommandBuffer, EcsResult, Entity, EntityBatch, EntityId, EntityStore};

/// Ordered collection of entity ids, independent of any archetype.
///
/// Ids whose entity has been deleted stay in the list and are skipped when
/// resolving against a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityList {
    ids: Vec<EntityId>,
}

impl EntityList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: EntityId) {
        self.ids.push(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.ids
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Live entities of the list, in list order.
    pub fn iter<'a>(&'a self, store: &'a EntityStore) -> impl Iterator<Item = Entity> + 'a {
        self.ids.iter().filter_map(|&id| store.entity_by_id(id))
    }

    /// Apply `batch` to every live entity of the list.
    ///
    /// All entities change or none do.
    pub fn apply_batch(&self, store: &mut EntityStore, batch: &EntityBatch) -> EcsResult<()> {
        let mut commands = CommandBuffer::new();
        for entity in self.iter(store) {
            commands.apply_batch(entity, batch);
        }
        commands.apply(store)?;
        Ok(())
    }
}

impl FromIterator<EntityId> for EntityList {
    fn from_iter<I: IntoIterator<Item = EntityId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl Extend<EntityId> for EntityList {
    fn extend<I: IntoIterator<Item = EntityId>>(&mut self, iter: I) {
        self.ids.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PidMode, StoreConfig};
    use crate::ecs::EcsError;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Level(u8);
    crate::define_component!(Level, "list-test-level");

    struct Selected;
    crate::define_tag!(Selected);

    #[test]
    fn lists_ids_in_order() {
        let mut store = EntityStore::with_config(StoreConfig::default().with_pid_mode(PidMode::UsePidAsId));
        let mut list = EntityList::new();
        list.add(store.create_entity_with_pid(1).unwrap().id());
        list.add(store.create_entity_with_pid(2).unwrap().id());

        let entities: Vec<Entity> = list.iter(&store).collect();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id(), 1);
        assert_eq!(entities[1].id(), 2);
    }

    #[test]
    fn apply_batch_changes_every_live_entity() {
        let mut store = EntityStore::new();
        let entities: Vec<Entity> = (0..4).map(|_| store.create_entity()).collect();
        let mut list: EntityList = entities.iter().map(|e| e.id()).collect();
        store.delete_entity(entities[3]).unwrap();
        list.add(entities[3].id());

        let batch = EntityBatch::new().add(Level(2)).add_tag::<Selected>();
        list.apply_batch(&mut store, &batch).unwrap();
        assert_eq!(list.iter(&store).count(), 3);
        for entity in list.iter(&store) {
            assert_eq!(store.get::<Level>(entity).unwrap(), &Level(2));
            assert!(store.has_tag::<Selected>(entity));
        }

        let failing = EntityBatch::new().remove_tag::<Selected>().remove::<crate::ecs::EntityName>();
        assert!(matches!(
            list.apply_batch(&mut store, &failing),
            Err(EcsError::ComponentNotFound { .. })
        ));
        assert!(store.has_tag::<Selected>(entities[0]));
    }
}
