// hierarchy.rs - Parent/child relations between entities
//
// The tree is stored as two mirrored components: `Parent` on the child and
// `Children` on the parent. An entity without children carries no
// `Children` component.

use tracing::trace;

use crate::ecs::store::Op;
use crate::ecs::{Children, EcsError, EcsResult, Entity, EntityId, EntityStore, Parent};

impl EntityStore {
    /// Append `child` to the children of `parent`.
    ///
    /// A child that already has another parent is moved. Fails with
    /// `CycleDetected` when `child` is `parent` or one of its ancestors.
    pub fn add_child(&mut self, parent: Entity, child: Entity) -> EcsResult<()> {
        self.insert_child_at(parent, child, None)
    }

    /// Insert `child` at `index` in the children of `parent`, clamped to the
    /// current child count.
    pub fn insert_child(&mut self, parent: Entity, child: Entity, index: usize) -> EcsResult<()> {
        self.insert_child_at(parent, child, Some(index))
    }

    fn insert_child_at(&mut self, parent: Entity, child: Entity, index: Option<usize>) -> EcsResult<()> {
        self.index.location(parent)?;
        self.index.location(child)?;
        let (p, c) = (parent.id(), child.id());
        if p == c || self.is_ancestor_id(c, p) {
            return Err(EcsError::CycleDetected { parent: p, child: c });
        }

        match self.component_by_id::<Parent>(c).map(Parent::id) {
            Some(current) if current == p => {
                if let (Some(index), Some(children)) = (index, self.component_mut_unchecked::<Children>(p)) {
                    children.remove(c);
                    children.insert(index, c);
                }
                return Ok(());
            }
            Some(current) => self.unlist_child(current, c)?,
            None => {}
        }

        self.apply_managed(child, vec![Op::add(Parent::new(p))])?;
        match self.component_mut_unchecked::<Children>(p) {
            Some(children) => match index {
                Some(index) => children.insert(index, c),
                None => children.push(c),
            },
            None => {
                self.apply_managed(parent, vec![Op::add(Children::new(vec![c]))])?;
            }
        }
        trace!(parent = %parent, child = %child, "attached child");
        Ok(())
    }

    /// Detach `child` from `parent`. Returns `false` when it was not a child.
    pub fn remove_child(&mut self, parent: Entity, child: Entity) -> EcsResult<bool> {
        self.index.location(parent)?;
        self.index.location(child)?;
        if self.component_by_id::<Parent>(child.id()).map(Parent::id) != Some(parent.id()) {
            return Ok(false);
        }
        self.unlist_child(parent.id(), child.id())?;
        self.apply_managed(child, vec![Op::remove::<Parent>()])?;
        trace!(parent = %parent, child = %child, "detached child");
        Ok(true)
    }

    pub fn parent_of(&self, entity: Entity) -> EcsResult<Option<Entity>> {
        self.index.location(entity)?;
        Ok(self
            .component_by_id::<Parent>(entity.id())
            .and_then(|parent| self.index.entity(parent.id())))
    }

    /// Direct children in order.
    pub fn children_of(&self, entity: Entity) -> EcsResult<Vec<Entity>> {
        self.index.location(entity)?;
        Ok(self
            .component_by_id::<Children>(entity.id())
            .map(|children| children.ids().iter().filter_map(|&id| self.index.entity(id)).collect())
            .unwrap_or_default())
    }

    pub fn child_count(&self, entity: Entity) -> EcsResult<usize> {
        self.index.location(entity)?;
        Ok(self.component_by_id::<Children>(entity.id()).map_or(0, Children::len))
    }

    /// True when `ancestor` is on the parent chain of `entity`.
    pub fn is_ancestor(&self, ancestor: Entity, entity: Entity) -> bool {
        self.is_alive(ancestor) && self.is_alive(entity) && self.is_ancestor_id(ancestor.id(), entity.id())
    }

    pub(crate) fn is_ancestor_id(&self, ancestor: EntityId, entity: EntityId) -> bool {
        let mut current = self.component_by_id::<Parent>(entity).map(Parent::id);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.component_by_id::<Parent>(id).map(Parent::id);
        }
        false
    }

    /// Drop `child` from the child list of `parent`, removing the list once empty.
    fn unlist_child(&mut self, parent: EntityId, child: EntityId) -> EcsResult<()> {
        let now_empty = match self.component_mut_unchecked::<Children>(parent) {
            Some(children) => {
                children.remove(child);
                children.is_empty()
            }
            None => false,
        };
        if now_empty {
            if let Some(parent) = self.index.entity(parent) {
                self.apply_managed(parent, vec![Op::remove::<Children>()])?;
            }
        }
        Ok(())
    }

    /// Cut every hierarchy edge of an entity about to be deleted.
    pub(crate) fn detach_hierarchy(&mut self, entity: Entity) {
        let id = entity.id();
        let children: Vec<EntityId> = self
            .component_by_id::<Children>(id)
            .map(|children| children.ids().to_vec())
            .unwrap_or_default();
        for child in children {
            if let Some(child) = self.index.entity(child) {
                let _ = self.apply_managed(child, vec![Op::remove::<Parent>()]);
            }
        }
        if let Some(parent) = self.component_by_id::<Parent>(id).map(Parent::id) {
            let _ = self.unlist_child(parent, id);
        }
    }

    /// Replace the child list of `parent` with `children`, in that order.
    ///
    /// Callers validate first: every child is alive, distinct, and not an
    /// ancestor of `parent`.
    pub(crate) fn replace_children(&mut self, parent: Entity, children: &[EntityId]) -> EcsResult<()> {
        let current: Vec<EntityId> = self
            .component_by_id::<Children>(parent.id())
            .map(|list| list.ids().to_vec())
            .unwrap_or_default();
        for old in current.iter().filter(|id| !children.contains(id)) {
            if let Some(old) = self.index.entity(*old) {
                self.remove_child(parent, old)?;
            }
        }
        for &child in children {
            if let Some(child) = self.index.entity(child) {
                self.add_child(parent, child)?;
            }
        }
        if let Some(list) = self.component_mut_unchecked::<Children>(parent.id()) {
            *list = Children::new(children.to_vec());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_child_mirrors_both_sides() {
        let mut store = EntityStore::new();
        let parent = store.create_entity();
        let a = store.create_entity();
        let b = store.create_entity();
        store.add_child(parent, a).unwrap();
        store.add_child(parent, b).unwrap();
        store.add_child(parent, a).unwrap();

        assert_eq!(store.children_of(parent).unwrap(), vec![a, b]);
        assert_eq!(store.parent_of(a).unwrap(), Some(parent));
        assert_eq!(store.child_count(parent).unwrap(), 2);
        assert!(store.check_consistency().is_empty());
    }

    #[test]
    fn insert_child_places_at_index() {
        let mut store = EntityStore::new();
        let parent = store.create_entity();
        let a = store.create_entity();
        let b = store.create_entity();
        store.add_child(parent, a).unwrap();
        store.insert_child(parent, b, 0).unwrap();
        assert_eq!(store.children_of(parent).unwrap(), vec![b, a]);
        store.insert_child(parent, b, 5).unwrap();
        assert_eq!(store.children_of(parent).unwrap(), vec![a, b]);
    }

    #[test]
    fn reparenting_moves_child() {
        let mut store = EntityStore::new();
        let first = store.create_entity();
        let second = store.create_entity();
        let child = store.create_entity();
        store.add_child(first, child).unwrap();
        store.add_child(second, child).unwrap();

        assert_eq!(store.child_count(first).unwrap(), 0);
        assert!(!store.has::<Children>(first));
        assert_eq!(store.parent_of(child).unwrap(), Some(second));
        assert!(store.check_consistency().is_empty());
    }

    #[test]
    fn cycles_are_rejected() {
        let mut store = EntityStore::new();
        let root = store.create_entity();
        let mid = store.create_entity();
        let leaf = store.create_entity();
        store.add_child(root, mid).unwrap();
        store.add_child(mid, leaf).unwrap();

        assert_eq!(
            store.add_child(leaf, root),
            Err(EcsError::CycleDetected {
                parent: leaf.id(),
                child: root.id()
            })
        );
        assert!(matches!(store.add_child(mid, mid), Err(EcsError::CycleDetected { .. })));
        assert!(store.is_ancestor(root, leaf));
        assert!(!store.is_ancestor(leaf, root));
        assert_eq!(store.parent_of(root).unwrap(), None);
    }

    #[test]
    fn remove_child_reports_membership() {
        let mut store = EntityStore::new();
        let parent = store.create_entity();
        let child = store.create_entity();
        let stranger = store.create_entity();
        store.add_child(parent, child).unwrap();

        assert!(!store.remove_child(parent, stranger).unwrap());
        assert!(store.remove_child(parent, child).unwrap());
        assert_eq!(store.parent_of(child).unwrap(), None);
        assert!(!store.has::<Children>(parent));
    }

    #[test]
    fn deleting_entities_cleans_hierarchy() {
        let mut store = EntityStore::new();
        let root = store.create_entity();
        let mid = store.create_entity();
        let leaf = store.create_entity();
        store.add_child(root, mid).unwrap();
        store.add_child(mid, leaf).unwrap();

        store.delete_entity(mid).unwrap();
        assert_eq!(store.parent_of(leaf).unwrap(), None);
        assert_eq!(store.child_count(root).unwrap(), 0);
        assert!(store.check_consistency().is_empty());
    }
}
