// links.rs - Entity relations and their reverse index
//
// A link component on a source entity names one or more target entities.
// The store keeps target -> (source, link type) for every target, so a target
// can enumerate incoming links and deletion can drop links that point at a
// dead entity.

use std::collections::HashMap;
use std::fmt;

use crate::ecs::{marker_meta, ComponentRole, EcsResult, Entity, EntityId, EntityStore, MarkerId};

#[derive(Default)]
pub(crate) struct LinkIndex {
    incoming: HashMap<EntityId, Vec<(EntityId, MarkerId)>>,
}

impl LinkIndex {
    pub fn link(&mut self, target: EntityId, source: EntityId, marker: MarkerId) {
        self.incoming.entry(target).or_default().push((source, marker));
    }

    pub fn unlink(&mut self, target: EntityId, source: EntityId, marker: MarkerId) {
        let Some(sources) = self.incoming.get_mut(&target) else {
            return;
        };
        if let Some(pos) = sources.iter().position(|&entry| entry == (source, marker)) {
            sources.remove(pos);
        }
        if sources.is_empty() {
            self.incoming.remove(&target);
        }
    }

    pub fn incoming(&self, target: EntityId) -> &[(EntityId, MarkerId)] {
        self.incoming.get(&target).map_or(&[], Vec::as_slice)
    }

    pub fn take_incoming(&mut self, target: EntityId) -> Vec<(EntityId, MarkerId)> {
        self.incoming.remove(&target).unwrap_or_default()
    }

    /// Total number of indexed links.
    pub fn len(&self) -> usize {
        self.incoming.values().map(Vec::len).sum()
    }
}

/// One relation: `entity` carries link component `component` pointing at `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLink {
    pub entity: Entity,
    pub component: &'static str,
    pub target: Entity,
}

impl fmt::Display for EntityLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.entity.id(), self.component, self.target.id())
    }
}

/// Ordered collection of links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityLinks {
    links: Vec<EntityLink>,
}

impl EntityLinks {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EntityLink> {
        self.links.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EntityLink> {
        self.links.iter()
    }

    pub fn targets(&self) -> impl Iterator<Item = Entity> + '_ {
        self.links.iter().map(|link| link.target)
    }
}

impl<'a> IntoIterator for &'a EntityLinks {
    type Item = &'a EntityLink;
    type IntoIter = std::slice::Iter<'a, EntityLink>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.iter()
    }
}

impl fmt::Display for EntityLinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityLinks[{}]", self.links.len())
    }
}

impl EntityStore {
    /// Outgoing links of `entity`, in the order their components were attached.
    pub fn links_of(&self, entity: Entity) -> EcsResult<EntityLinks> {
        self.index.resolve(entity)?;
        let links = self
            .outgoing_links(entity.id())
            .into_iter()
            .filter_map(|(marker, target)| {
                Some(EntityLink {
                    entity,
                    component: marker_meta(marker)?.name,
                    target: self.index.entity(target)?,
                })
            })
            .collect();
        Ok(EntityLinks { links })
    }

    /// `(link component, target id)` pairs of a live id, in attachment order
    /// and then in the order the component lists its targets.
    pub(crate) fn outgoing_links(&self, id: EntityId) -> Vec<(MarkerId, EntityId)> {
        let Some(slot) = self.index.slot(id) else {
            return Vec::new();
        };
        let Some(location) = slot.location else {
            return Vec::new();
        };
        let archetype = self.archetypes.get(location.archetype);

        let mut links = Vec::new();
        for &marker in &slot.order {
            let Some(meta) = marker_meta(marker).filter(|meta| meta.role == ComponentRole::Link) else {
                continue;
            };
            let (Some(vtable), Some(column)) = (meta.vtable, archetype.column_index(marker)) else {
                continue;
            };
            let value = archetype.erased_column(column).value_any(location.row);
            links.extend((vtable.link_targets)(value).into_iter().map(|target| (marker, target)));
        }
        links
    }

    /// Links from other entities (or itself) pointing at `entity`.
    pub fn incoming_links(&self, entity: Entity) -> EcsResult<EntityLinks> {
        self.index.resolve(entity)?;
        let links = self
            .links
            .incoming(entity.id())
            .iter()
            .filter_map(|&(source, marker)| {
                Some(EntityLink {
                    entity: self.index.entity(source)?,
                    component: marker_meta(marker)?.name,
                    target: entity,
                })
            })
            .collect();
        Ok(EntityLinks { links })
    }

    /// Number of links pointing at `entity`.
    pub fn incoming_link_count(&self, entity: Entity) -> EcsResult<usize> {
        self.index.resolve(entity)?;
        Ok(self.links.incoming(entity.id()).len())
    }
}
