// archetype.rs - Archetype tables and the archetype registry
//
// An archetype stores every entity that carries exactly one signature. Rows
// are dense: columns and the entity list always have the same length, and
// removal fills the gap with the last row.

use std::any::Any;
use std::collections::HashMap;

use crate::ecs::storage::{Column, ErasedColumn};
use crate::ecs::{marker_meta, EntityId, MarkerId, Signature};

pub type ArchetypeId = u32;

/// The archetype of entities without components or tags.
pub const EMPTY_ARCHETYPE: ArchetypeId = 0;

/// Values taken out of a row during a move, keyed by marker.
pub(crate) type RemovedValues = Vec<(MarkerId, Box<dyn Any + Send>)>;

/// Cached archetype transitions for single marker changes.
#[derive(Default)]
struct Edges {
    add: HashMap<MarkerId, ArchetypeId>,
    remove: HashMap<MarkerId, ArchetypeId>,
}

/// Table of all entities sharing one signature.
pub struct Archetype {
    id: ArchetypeId,
    signature: Signature,
    /// Component markers (tags excluded), sorted, parallel to `columns`.
    component_ids: Box<[MarkerId]>,
    columns: Vec<Box<dyn ErasedColumn>>,
    entities: Vec<EntityId>,
    edges: Edges,
}

impl Archetype {
    fn new(id: ArchetypeId, signature: Signature, capacity: usize) -> Self {
        let mut component_ids = Vec::new();
        let mut columns = Vec::new();
        for &marker in signature.markers() {
            let Some(vtable) = marker_meta(marker).and_then(|meta| meta.vtable) else {
                continue;
            };
            component_ids.push(marker);
            columns.push((vtable.new_column)(capacity));
        }

        Self {
            id,
            signature,
            component_ids: component_ids.into_boxed_slice(),
            columns,
            entities: Vec::with_capacity(capacity),
            edges: Edges::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Component markers with a column in this archetype.
    pub fn component_ids(&self) -> &[MarkerId] {
        &self.component_ids
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity ids in row order.
    #[inline]
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    #[inline]
    pub(crate) fn column_index(&self, marker: MarkerId) -> Option<usize> {
        self.component_ids.binary_search(&marker).ok()
    }

    pub fn column<T: 'static>(&self, marker: MarkerId) -> Option<&[T]> {
        let index = self.column_index(marker)?;
        self.columns[index]
            .as_any()
            .downcast_ref::<Column<T>>()
            .map(Column::as_slice)
    }

    pub fn column_mut<T: 'static>(&mut self, marker: MarkerId) -> Option<&mut [T]> {
        let index = self.column_index(marker)?;
        self.columns[index]
            .as_any_mut()
            .downcast_mut::<Column<T>>()
            .map(Column::as_mut_slice)
    }

    /// Entity ids together with one mutable column.
    pub fn entities_and_column_mut<T: 'static>(&mut self, marker: MarkerId) -> Option<(&[EntityId], &mut [T])> {
        let index = self.column_index(marker)?;
        let column = self.columns[index]
            .as_any_mut()
            .downcast_mut::<Column<T>>()?
            .as_mut_slice();
        Some((&self.entities, column))
    }

    /// Two distinct mutable columns at once.
    pub fn column_pair_mut<A: 'static, B: 'static>(
        &mut self,
        a: MarkerId,
        b: MarkerId,
    ) -> Option<(&mut [A], &mut [B])> {
        let ia = self.column_index(a)?;
        let ib = self.column_index(b)?;
        if ia == ib {
            return None;
        }
        let (first, second) = if ia < ib {
            let (left, right) = self.columns.split_at_mut(ib);
            (&mut left[ia], &mut right[0])
        } else {
            let (left, right) = self.columns.split_at_mut(ia);
            (&mut right[0], &mut left[ib])
        };
        let first = first.as_any_mut().downcast_mut::<Column<A>>()?.as_mut_slice();
        let second = second.as_any_mut().downcast_mut::<Column<B>>()?.as_mut_slice();
        Some((first, second))
    }

    pub(crate) fn erased_column(&self, index: usize) -> &dyn ErasedColumn {
        self.columns[index].as_ref()
    }

    pub(crate) fn erased_column_mut(&mut self, index: usize) -> &mut dyn ErasedColumn {
        self.columns[index].as_mut()
    }

    pub(crate) fn reserve(&mut self, additional: usize) {
        self.entities.reserve(additional);
        for column in &mut self.columns {
            column.reserve(additional);
        }
    }

    /// Append an entity id. Every column must receive a value for the new row
    /// before the archetype is read again.
    pub(crate) fn push_entity(&mut self, id: EntityId) -> usize {
        self.entities.push(id);
        self.entities.len() - 1
    }

    /// Drop the values of `row` and close the gap.
    ///
    /// Returns the entity that was moved into `row`, if any.
    pub(crate) fn remove_row(&mut self, row: usize) -> Option<EntityId> {
        for column in &mut self.columns {
            column.swap_remove_drop(row);
        }
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }

    /// Move `row` to the end of `dst`.
    ///
    /// Values of shared components move across. Values without a column in
    /// `dst` are pushed to `removed`, or dropped when `removed` is `None`.
    /// Columns of `dst` missing in `self` are left one short; the caller fills
    /// them. Returns the new row and the entity moved into `row`, if any.
    pub(crate) fn move_row(
        &mut self,
        row: usize,
        dst: &mut Archetype,
        mut removed: Option<&mut RemovedValues>,
    ) -> (usize, Option<EntityId>) {
        let new_row = dst.push_entity(self.entities[row]);
        for (index, &marker) in self.component_ids.iter().enumerate() {
            let column = self.columns[index].as_mut();
            match dst.column_index(marker) {
                Some(target) => column.swap_remove_into(row, dst.columns[target].as_mut()),
                None => match removed.as_deref_mut() {
                    Some(removed) => removed.push((marker, column.swap_remove_boxed(row))),
                    None => column.swap_remove_drop(row),
                },
            }
        }
        self.entities.swap_remove(row);
        (new_row, self.entities.get(row).copied())
    }

    pub(crate) fn is_consistent(&self) -> bool {
        self.columns.iter().all(|column| column.len() == self.entities.len())
    }
}

/// Owns every archetype of one store. Archetypes are never removed, so ids
/// and query caches stay valid for the store's lifetime.
pub struct ArchetypeRegistry {
    archetypes: Vec<Archetype>,
    by_signature: HashMap<Signature, ArchetypeId>,
    capacity: usize,
}

impl ArchetypeRegistry {
    pub fn new(capacity: usize) -> Self {
        let mut registry = Self {
            archetypes: Vec::new(),
            by_signature: HashMap::new(),
            capacity,
        };
        registry.get_or_create(&Signature::default());
        registry
    }

    /// Resolve a signature to its archetype, creating it on first use.
    pub fn get_or_create(&mut self, signature: &Signature) -> ArchetypeId {
        if let Some(&id) = self.by_signature.get(signature) {
            return id;
        }
        let id = self.archetypes.len() as ArchetypeId;
        let archetype = Archetype::new(id, signature.clone(), self.capacity);
        tracing::debug!(
            archetype = id,
            markers = signature.len(),
            columns = archetype.component_ids.len(),
            "created archetype"
        );
        self.archetypes.push(archetype);
        self.by_signature.insert(signature.clone(), id);
        id
    }

    /// Archetype reached from `from` by adding or removing one marker.
    pub fn transition(&mut self, from: ArchetypeId, marker: MarkerId, add: bool) -> ArchetypeId {
        let edges = &self.archetypes[from as usize].edges;
        let cached = if add {
            edges.add.get(&marker)
        } else {
            edges.remove.get(&marker)
        };
        if let Some(&to) = cached {
            return to;
        }

        let source = &self.archetypes[from as usize].signature;
        let signature = if add {
            source.with(marker)
        } else {
            source.without(marker)
        };
        let to = self.get_or_create(&signature);
        let edges = &mut self.archetypes[from as usize].edges;
        if add {
            edges.add.insert(marker, to);
        } else {
            edges.remove.insert(marker, to);
        }
        to
    }

    pub fn find(&self, signature: &Signature) -> Option<ArchetypeId> {
        self.by_signature.get(signature).copied()
    }

    #[inline]
    pub fn get(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id as usize]
    }

    /// Mutable access to two different archetypes.
    pub(crate) fn pair_mut(&mut self, a: ArchetypeId, b: ArchetypeId) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "pair_mut needs two different archetypes");
        let (a, b) = (a as usize, b as usize);
        if a < b {
            let (left, right) = self.archetypes.split_at_mut(b);
            (&mut left[a], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a);
            (&mut right[0], &mut left[b])
        }
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [Archetype] {
        &mut self.archetypes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{component_id, tag_id};
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Mass(u32);
    crate::define_component!(Mass, "archetype-test-mass");

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Label(String);
    crate::define_component!(Label, "archetype-test-label");

    struct Marked;
    crate::define_tag!(Marked);

    fn fill(archetype: &mut Archetype, id: EntityId, mass: u32, label: &str) {
        archetype.push_entity(id);
        let m = archetype.column_index(component_id::<Mass>()).unwrap();
        archetype.erased_column_mut(m).push_boxed(Box::new(Mass(mass))).unwrap();
        let l = archetype.column_index(component_id::<Label>()).unwrap();
        archetype
            .erased_column_mut(l)
            .push_boxed(Box::new(Label(label.to_string())))
            .unwrap();
    }

    #[test]
    fn empty_archetype_exists() {
        let registry = ArchetypeRegistry::new(0);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(EMPTY_ARCHETYPE).signature().is_empty());
    }

    #[test]
    fn tags_have_no_column() {
        let mut registry = ArchetypeRegistry::new(0);
        let sig = Signature::from_markers(vec![component_id::<Mass>(), tag_id::<Marked>()]);
        let id = registry.get_or_create(&sig);
        assert_eq!(registry.get(id).component_ids(), &[component_id::<Mass>()]);
        assert_eq!(registry.get_or_create(&sig), id);
    }

    #[test]
    fn transitions_are_cached_and_consistent() {
        let mut registry = ArchetypeRegistry::new(0);
        let mass = component_id::<Mass>();
        let with_mass = registry.transition(EMPTY_ARCHETYPE, mass, true);
        assert_eq!(registry.transition(EMPTY_ARCHETYPE, mass, true), with_mass);
        assert_eq!(registry.transition(with_mass, mass, false), EMPTY_ARCHETYPE);
        assert_eq!(
            registry.find(&Signature::from_markers(vec![mass])),
            Some(with_mass)
        );
    }

    #[test]
    fn move_row_keeps_shared_and_returns_dropped() {
        let mut registry = ArchetypeRegistry::new(0);
        let (mass, label) = (component_id::<Mass>(), component_id::<Label>());
        let both = registry.get_or_create(&Signature::from_markers(vec![mass, label]));
        let only_mass = registry.get_or_create(&Signature::from_markers(vec![mass]));

        let (src, dst) = registry.pair_mut(both, only_mass);
        fill(src, 1, 10, "a");
        fill(src, 2, 20, "b");
        fill(src, 3, 30, "c");

        let mut removed = Vec::new();
        let (row, moved) = src.move_row(0, dst, Some(&mut removed));
        assert_eq!(row, 0);
        assert_eq!(moved, Some(3));
        assert_eq!(src.entities(), &[3, 2]);
        assert_eq!(src.column::<Mass>(mass).unwrap(), &[Mass(30), Mass(20)]);
        assert_eq!(dst.column::<Mass>(mass).unwrap(), &[Mass(10)]);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, label);
        assert_eq!(removed[0].1.downcast_ref::<Label>(), Some(&Label("a".into())));
        assert!(src.is_consistent() && dst.is_consistent());
    }

    #[test]
    fn remove_last_row_reports_no_move() {
        let mut registry = ArchetypeRegistry::new(4);
        let (mass, label) = (component_id::<Mass>(), component_id::<Label>());
        let id = registry.get_or_create(&Signature::from_markers(vec![mass, label]));
        let archetype = registry.get_mut(id);
        fill(archetype, 5, 1, "x");
        fill(archetype, 6, 2, "y");
        assert_eq!(archetype.remove_row(1), None);
        assert_eq!(archetype.remove_row(0), None);
        assert!(archetype.is_empty());
    }

    #[test]
    fn pair_columns_are_disjoint() {
        let mut registry = ArchetypeRegistry::new(0);
        let (mass, label) = (component_id::<Mass>(), component_id::<Label>());
        let id = registry.get_or_create(&Signature::from_markers(vec![mass, label]));
        let archetype = registry.get_mut(id);
        fill(archetype, 1, 5, "five");

        let (labels, masses) = archetype.column_pair_mut::<Label, Mass>(label, mass).unwrap();
        masses[0].0 += 1;
        labels[0].0.push('!');
        assert_eq!(archetype.column::<Mass>(mass).unwrap(), &[Mass(6)]);
        assert_eq!(archetype.column::<Label>(label).unwrap(), &[Label("five!".into())]);
        assert!(archetype.column_pair_mut::<Mass, Mass>(mass, mass).is_none());
    }
}
