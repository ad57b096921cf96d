// query.rs - Archetype queries and chunk iteration
//
// A query matches archetypes whose signature holds every required marker
// and none of the excluded ones. Matches are cached: archetypes are never
// removed, so each refresh only inspects archetypes created since the last
// one. Iteration hands out one `Chunk` per non-empty matching archetype,
// giving contiguous column slices.
//
// Chunks borrow the store mutably, so structural changes while iterating
// are impossible; record them in a `CommandBuffer` and apply it afterwards.

use rayon::prelude::*;

use crate::ecs::archetype::{Archetype, ArchetypeRegistry};
use crate::ecs::{
    component_id, tag_id, ArchetypeId, Component, ComponentRole, EcsError, EcsResult, Entity, EntityId, EntityStore,
    MarkerId, Signature, Tag,
};

/// Cached archetype query.
///
/// # Example
/// ```ignore
/// let mut query = Query::new().with::<Position>().without_tag::<Frozen>();
/// for mut chunk in query.chunks(&mut store) {
///     for pos in chunk.column_mut::<Position>().unwrap() {
///         pos.x += 1;
///     }
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Query {
    required: Vec<MarkerId>,
    excluded: Vec<MarkerId>,
    matched: Vec<ArchetypeId>,
    /// Number of archetypes already inspected.
    seen: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Component>(self) -> Self {
        self.require(component_id::<T>())
    }

    pub fn with_tag<T: Tag>(self) -> Self {
        self.require(tag_id::<T>())
    }

    pub fn without<T: Component>(self) -> Self {
        self.exclude(component_id::<T>())
    }

    pub fn without_tag<T: Tag>(self) -> Self {
        self.exclude(tag_id::<T>())
    }

    fn require(mut self, marker: MarkerId) -> Self {
        if let Err(pos) = self.required.binary_search(&marker) {
            self.required.insert(pos, marker);
        }
        self.reset();
        self
    }

    fn exclude(mut self, marker: MarkerId) -> Self {
        if !self.excluded.contains(&marker) {
            self.excluded.push(marker);
        }
        self.reset();
        self
    }

    fn reset(&mut self) {
        self.matched.clear();
        self.seen = 0;
    }

    pub fn matches(&self, signature: &Signature) -> bool {
        signature.contains_all(&self.required) && signature.contains_none(&self.excluded)
    }

    fn refresh(&mut self, archetypes: &ArchetypeRegistry) {
        if self.seen == archetypes.len() {
            return;
        }
        for archetype in archetypes.iter().skip(self.seen) {
            if self.matches(archetype.signature()) {
                self.matched.push(archetype.id());
            }
        }
        self.seen = archetypes.len();
    }

    /// Ids of matching archetypes, in creation order.
    pub fn archetypes(&mut self, store: &EntityStore) -> &[ArchetypeId] {
        self.refresh(&store.archetypes);
        &self.matched
    }

    /// Number of matching entities.
    pub fn count(&mut self, store: &EntityStore) -> usize {
        self.refresh(&store.archetypes);
        self.matched
            .iter()
            .map(|&id| store.archetypes.get(id).len())
            .sum()
    }

    /// Handles of matching entities, chunk by chunk in row order.
    pub fn entities(&mut self, store: &EntityStore) -> Vec<Entity> {
        self.iter_chunks(store)
            .flat_map(|chunk| chunk.entities().iter().copied())
            .filter_map(|id| store.entity_by_id(id))
            .collect()
    }

    /// Read-only chunks of matching archetypes.
    pub fn iter_chunks<'a>(&'a mut self, store: &'a EntityStore) -> impl Iterator<Item = ChunkRef<'a>> + 'a {
        self.refresh(&store.archetypes);
        self.matched
            .iter()
            .map(move |&id| store.archetypes.get(id))
            .filter(|archetype| !archetype.is_empty())
            .map(|archetype| ChunkRef { archetype })
    }

    /// Mutable chunks of matching archetypes.
    ///
    /// The iterator is lazy and can be restarted by calling `chunks` again.
    pub fn chunks<'a>(&'a mut self, store: &'a mut EntityStore) -> Chunks<'a> {
        self.refresh(&store.archetypes);
        Chunks {
            archetypes: store.archetypes.as_mut_slice().iter_mut().enumerate(),
            matched: &self.matched,
            next: 0,
        }
    }

    /// Run `f` on every chunk, chunks spread over the rayon pool.
    pub fn for_each_chunk_par<F>(&mut self, store: &mut EntityStore, f: F)
    where
        F: Fn(Chunk<'_>) + Send + Sync,
    {
        let chunks: Vec<Chunk<'_>> = self.chunks(store).collect();
        chunks.into_par_iter().for_each(f);
    }

    /// Run `f` on every `T` of matching entities in parallel.
    ///
    /// Rows are split into partitions of `StoreConfig::parallel_rows`.
    pub fn par_for_each_mut<T, F>(&mut self, store: &mut EntityStore, f: F) -> EcsResult<()>
    where
        T: Component,
        F: Fn(&mut T) + Send + Sync,
    {
        check_writable::<T>()?;
        let rows = store.config().parallel_rows.max(1);
        for mut chunk in self.chunks(store) {
            if let Some(column) = chunk.column_mut::<T>() {
                column.par_chunks_mut(rows).for_each(|part| {
                    for value in part {
                        f(value);
                    }
                });
            }
        }
        Ok(())
    }

    /// Run `f` on every `(A, B)` pair of matching entities in parallel.
    pub fn par_for_each_mut2<A, B, F>(&mut self, store: &mut EntityStore, f: F) -> EcsResult<()>
    where
        A: Component,
        B: Component,
        F: Fn(&mut A, &mut B) + Send + Sync,
    {
        check_writable::<A>()?;
        check_writable::<B>()?;
        let rows = store.config().parallel_rows.max(1);
        for mut chunk in self.chunks(store) {
            if let Some((a, b)) = chunk.columns_mut2::<A, B>() {
                a.par_chunks_mut(rows)
                    .zip(b.par_chunks_mut(rows))
                    .for_each(|(part_a, part_b)| {
                        for (a, b) in part_a.iter_mut().zip(part_b) {
                            f(a, b);
                        }
                    });
            }
        }
        Ok(())
    }
}

fn check_writable<T: Component>() -> EcsResult<()> {
    if T::ROLE == ComponentRole::Data {
        Ok(())
    } else {
        Err(EcsError::ManagedComponent { component: T::KEY })
    }
}

/// Iterator over the mutable chunks of a query.
pub struct Chunks<'a> {
    archetypes: std::iter::Enumerate<std::slice::IterMut<'a, Archetype>>,
    matched: &'a [ArchetypeId],
    next: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        while let Some(&wanted) = self.matched.get(self.next) {
            let (index, archetype) = self.archetypes.next()?;
            if index != wanted as usize {
                continue;
            }
            self.next += 1;
            if !archetype.is_empty() {
                return Some(Chunk { archetype });
            }
        }
        None
    }
}

/// Mutable view of one archetype's rows.
pub struct Chunk<'a> {
    archetype: &'a mut Archetype,
}

impl<'a> Chunk<'a> {
    pub fn archetype_id(&self) -> ArchetypeId {
        self.archetype.id()
    }

    pub fn len(&self) -> usize {
        self.archetype.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetype.is_empty()
    }

    /// Entity ids in row order.
    pub fn entities(&self) -> &[EntityId] {
        self.archetype.entities()
    }

    pub fn column<T: Component>(&self) -> Option<&[T]> {
        self.archetype.column::<T>(component_id::<T>())
    }

    /// Mutable column of a plain-data component.
    ///
    /// Returns `None` for link, unique and hierarchy components, whose values
    /// feed store indexes.
    pub fn column_mut<T: Component>(&mut self) -> Option<&mut [T]> {
        check_writable::<T>().ok()?;
        self.archetype.column_mut::<T>(component_id::<T>())
    }

    /// Two different mutable columns at once.
    pub fn columns_mut2<A: Component, B: Component>(&mut self) -> Option<(&mut [A], &mut [B])> {
        check_writable::<A>().ok()?;
        check_writable::<B>().ok()?;
        self.archetype
            .column_pair_mut::<A, B>(component_id::<A>(), component_id::<B>())
    }

    /// Entity ids together with one mutable column.
    pub fn entities_and_column_mut<T: Component>(&mut self) -> Option<(&[EntityId], &mut [T])> {
        check_writable::<T>().ok()?;
        self.archetype.entities_and_column_mut::<T>(component_id::<T>())
    }

    pub fn has_tag<T: Tag>(&self) -> bool {
        self.archetype.signature().contains(tag_id::<T>())
    }
}

/// Read-only view of one archetype's rows.
#[derive(Clone, Copy)]
pub struct ChunkRef<'a> {
    archetype: &'a Archetype,
}

impl<'a> ChunkRef<'a> {
    pub fn archetype_id(&self) -> ArchetypeId {
        self.archetype.id()
    }

    pub fn len(&self) -> usize {
        self.archetype.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetype.is_empty()
    }

    pub fn entities(&self) -> &'a [EntityId] {
        self.archetype.entities()
    }

    pub fn column<T: Component>(&self) -> Option<&'a [T]> {
        self.archetype.column::<T>(component_id::<T>())
    }

    pub fn has_tag<T: Tag>(&self) -> bool {
        self.archetype.signature().contains(tag_id::<T>())
    }
}
