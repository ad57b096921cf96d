// store.rs - The entity store
//
// Every structural change (component or tag added/removed, several at once
// from a batch or command buffer) goes through one path: the requested ops
// are folded into their net `Changes`, validated into a `Plan` without
// touching any state, then executed as a single row move.

use std::any::Any;

use keystone_metrics::{metrics, Counter};
use tracing::{trace, warn};

use crate::config::{PidMode, StoreConfig};
use crate::ecs::archetype::{ArchetypeRegistry, RemovedValues, EMPTY_ARCHETYPE};
use crate::ecs::entity_index::EntityIndex;
use crate::ecs::links::LinkIndex;
use crate::ecs::unique::{self, UniqueIndex};
use crate::ecs::{
    component_id, marker_meta, tag_id, ArchetypeId, Children, Component, ComponentRole, EcsError, EcsResult,
    Entity, EntityId, EntityLocation, MarkerId, Parent, Pid, Signature, Tag, UniqueEntity,
};

/// One requested structural change.
pub(crate) enum Op {
    /// Attach a marker. Components carry their value, tags carry none.
    Add {
        marker: MarkerId,
        value: Option<Box<dyn Any + Send>>,
    },
    Remove {
        marker: MarkerId,
    },
}

impl Op {
    pub fn add<T: Component>(value: T) -> Self {
        Op::Add {
            marker: component_id::<T>(),
            value: Some(Box::new(value)),
        }
    }

    pub fn add_tag<T: Tag>() -> Self {
        Op::Add {
            marker: tag_id::<T>(),
            value: None,
        }
    }

    pub fn remove<T: Component>() -> Self {
        Op::Remove {
            marker: component_id::<T>(),
        }
    }

    pub fn remove_tag<T: Tag>() -> Self {
        Op::Remove { marker: tag_id::<T>() }
    }

    pub fn marker(&self) -> MarkerId {
        match self {
            Op::Add { marker, .. } | Op::Remove { marker } => *marker,
        }
    }
}

/// Net effect of a sequence of ops on one entity.
pub(crate) struct Changes {
    /// Final signature, sorted.
    pub markers: Vec<MarkerId>,
    /// Final attachment order.
    pub order: Vec<MarkerId>,
    /// Component values to write, last write per marker wins.
    pub values: Vec<(MarkerId, Box<dyn Any + Send>)>,
    /// Set when the changes come from exactly one op.
    single: Option<(MarkerId, bool)>,
}

impl Changes {
    pub fn new(markers: &[MarkerId], order: &[MarkerId]) -> Self {
        Self {
            markers: markers.to_vec(),
            order: order.to_vec(),
            values: Vec::new(),
            single: None,
        }
    }

    /// Fold `ops` on top of an entity currently carrying `markers`.
    pub fn fold(
        entity: Entity,
        markers: &[MarkerId],
        order: &[MarkerId],
        ops: Vec<Op>,
        allow_managed: bool,
    ) -> EcsResult<Self> {
        let mut changes = Self::new(markers, order);
        changes.single = match ops.as_slice() {
            [Op::Add { marker, .. }] => Some((*marker, true)),
            [Op::Remove { marker }] => Some((*marker, false)),
            _ => None,
        };
        for op in ops {
            changes.apply(entity, op, allow_managed)?;
        }
        Ok(changes)
    }

    pub fn apply(&mut self, entity: Entity, op: Op, allow_managed: bool) -> EcsResult<()> {
        let marker = op.marker();
        let meta = marker_meta(marker).ok_or(EcsError::TypeMismatch {
            component: "<unregistered>",
        })?;
        if meta.role.is_hierarchy() && !allow_managed {
            return Err(EcsError::ManagedComponent { component: meta.name });
        }

        match op {
            Op::Add { value, .. } => {
                let typed = match &value {
                    Some(value) => meta.accepts(value.as_ref()),
                    None => !meta.is_component(),
                };
                if !typed {
                    return Err(EcsError::TypeMismatch { component: meta.name });
                }
                if let Err(pos) = self.markers.binary_search(&marker) {
                    self.markers.insert(pos, marker);
                }
                if !self.order.contains(&marker) {
                    self.order.push(marker);
                }
                self.values.retain(|(m, _)| *m != marker);
                if let Some(value) = value {
                    self.values.push((marker, value));
                }
            }
            Op::Remove { .. } => match self.markers.binary_search(&marker) {
                Ok(pos) => {
                    self.markers.remove(pos);
                    self.order.retain(|&m| m != marker);
                    self.values.retain(|(m, _)| *m != marker);
                }
                Err(_) if meta.is_component() => {
                    return Err(EcsError::ComponentNotFound {
                        entity,
                        component: meta.name,
                    });
                }
                Err(_) => {}
            },
        }
        Ok(())
    }

    fn has_value(&self, marker: MarkerId) -> bool {
        self.values.iter().any(|(m, _)| *m == marker)
    }
}

/// Validated changes for one live entity. Executing a plan cannot fail.
struct Plan {
    entity: Entity,
    from: EntityLocation,
    changes: Changes,
    /// Indexed components whose current value leaves the entity.
    unindex: Vec<MarkerId>,
}

/// Archetype-based entity store.
///
/// Entities are grouped by signature (their set of components and tags);
/// each group lives in one archetype table with a dense column per
/// component type.
///
/// # Example
/// ```ignore
/// let mut store = EntityStore::new();
/// let e = store.create_entity();
/// store.add_component(e, Position { x: 1, y: 2, z: 3 })?;
/// assert_eq!(store.get::<Position>(e)?.x, 1);
/// ```
pub struct EntityStore {
    config: StoreConfig,
    pub(crate) index: EntityIndex,
    pub(crate) archetypes: ArchetypeRegistry,
    pub(crate) uniques: UniqueIndex,
    pub(crate) links: LinkIndex,
    counters: Counter,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            index: EntityIndex::new(config.pid_mode),
            archetypes: ArchetypeRegistry::new(config.archetype_capacity),
            uniques: UniqueIndex::default(),
            links: LinkIndex::default(),
            counters: Counter::new(),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn pid_mode(&self) -> PidMode {
        self.index.mode()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.len() == 0
    }

    pub fn archetypes(&self) -> &ArchetypeRegistry {
        &self.archetypes
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Event counters (always zero without the `metrics` feature).
    pub fn counters(&self) -> &Counter {
        &self.counters
    }

    pub fn reset_counters(&mut self) {
        self.counters.reset_all();
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Create an entity without components.
    pub fn create_entity(&mut self) -> Entity {
        let row = self.archetypes.get(EMPTY_ARCHETYPE).len();
        let entity = self.index.allocate(EntityLocation {
            archetype: EMPTY_ARCHETYPE,
            row,
        });
        self.archetypes.get_mut(EMPTY_ARCHETYPE).push_entity(entity.id());
        metrics! { self.counters.increment("entities_created", 1); }
        trace!(entity = %entity, "created entity");
        entity
    }

    /// Create an entity bound to an explicit pid.
    pub fn create_entity_with_pid(&mut self, pid: Pid) -> EcsResult<Entity> {
        let row = self.archetypes.get(EMPTY_ARCHETYPE).len();
        let entity = self.index.allocate_with_pid(
            pid,
            EntityLocation {
                archetype: EMPTY_ARCHETYPE,
                row,
            },
        )?;
        self.archetypes.get_mut(EMPTY_ARCHETYPE).push_entity(entity.id());
        metrics! { self.counters.increment("entities_created", 1); }
        trace!(entity = %entity, pid, "created entity");
        Ok(entity)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.index.is_alive(entity)
    }

    /// Current handle of a live id.
    pub fn entity_by_id(&self, id: EntityId) -> Option<Entity> {
        self.index.entity(id)
    }

    pub fn entity_by_pid(&self, pid: Pid) -> Option<Entity> {
        self.index.by_pid(pid).and_then(|id| self.index.entity(id))
    }

    pub fn pid_of(&self, entity: Entity) -> EcsResult<Pid> {
        Ok(self.index.resolve(entity)?.pid)
    }

    pub fn location(&self, entity: Entity) -> EcsResult<EntityLocation> {
        self.index.location(entity)
    }

    /// Live entities in ascending id order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.index.live_ids().filter_map(|id| self.index.entity(id))
    }

    /// Delete an entity with everything attached to it.
    ///
    /// Children lose their parent reference, the parent forgets the entity,
    /// and links on other entities drop it as a target. A link component
    /// left without targets is removed.
    pub fn delete_entity(&mut self, entity: Entity) -> EcsResult<()> {
        self.index.location(entity)?;
        let id = entity.id();

        self.detach_hierarchy(entity);

        for (source, marker) in self.links.take_incoming(id) {
            if source == id {
                continue;
            }
            let Some(source) = self.index.entity(source) else {
                continue;
            };
            let component = marker_meta(marker).map_or("<unregistered>", |meta| meta.name);
            warn!(
                source = %source,
                target = %entity,
                component,
                "removing link to deleted entity"
            );
            if self.unlink_in_place(source, marker, id) {
                continue;
            }
            if let Ok(plan) = self.plan(source, vec![Op::Remove { marker }], false) {
                self.execute(plan);
            }
        }

        // Earlier steps may have swapped this entity to another row.
        let location = self.index.location(entity)?;
        let indexed: Vec<MarkerId> = self
            .archetypes
            .get(location.archetype)
            .component_ids()
            .iter()
            .copied()
            .filter(|&marker| is_indexed(marker))
            .collect();
        for marker in indexed {
            self.unindex_value(id, marker);
        }

        if let Some(moved) = self.archetypes.get_mut(location.archetype).remove_row(location.row) {
            self.index.set_location(moved, location);
        }
        self.index.release(id);
        metrics! { self.counters.increment("entities_deleted", 1); }
        trace!(entity = %entity, "deleted entity");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Components and tags
    // ------------------------------------------------------------------

    /// Attach `value`, replacing the current value if the entity already has one.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> EcsResult<()> {
        let plan = self.plan(entity, vec![Op::add(value)], false)?;
        self.execute(plan);
        Ok(())
    }

    /// Detach component `T` and return its value.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> EcsResult<T> {
        let marker = component_id::<T>();
        let plan = self.plan(entity, vec![Op::remove::<T>()], false)?;
        let removed = self.execute(plan);
        removed
            .into_iter()
            .find(|(m, _)| *m == marker)
            .and_then(|(_, value)| value.downcast::<T>().ok())
            .map(|value| *value)
            .ok_or(EcsError::TypeMismatch { component: T::KEY })
    }

    pub fn get<T: Component>(&self, entity: Entity) -> EcsResult<&T> {
        let location = self.index.location(entity)?;
        self.archetypes
            .get(location.archetype)
            .column::<T>(component_id::<T>())
            .and_then(|column| column.get(location.row))
            .ok_or(EcsError::ComponentNotFound {
                entity,
                component: T::KEY,
            })
    }

    /// Mutable access to a plain-data component.
    ///
    /// Link, unique and hierarchy components feed store indexes and are
    /// changed through `add_component` or the hierarchy API instead.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> EcsResult<&mut T> {
        if T::ROLE != ComponentRole::Data {
            return Err(EcsError::ManagedComponent { component: T::KEY });
        }
        let location = self.index.location(entity)?;
        self.archetypes
            .get_mut(location.archetype)
            .column_mut::<T>(component_id::<T>())
            .and_then(|column| column.get_mut(location.row))
            .ok_or(EcsError::ComponentNotFound {
                entity,
                component: T::KEY,
            })
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.has_marker(entity, component_id::<T>())
    }

    pub fn add_tag<T: Tag>(&mut self, entity: Entity) -> EcsResult<()> {
        let plan = self.plan(entity, vec![Op::add_tag::<T>()], false)?;
        self.execute(plan);
        Ok(())
    }

    /// Detach tag `T`. Returns whether the entity had it.
    pub fn remove_tag<T: Tag>(&mut self, entity: Entity) -> EcsResult<bool> {
        self.index.location(entity)?;
        if !self.has_tag::<T>(entity) {
            return Ok(false);
        }
        let plan = self.plan(entity, vec![Op::remove_tag::<T>()], false)?;
        self.execute(plan);
        Ok(true)
    }

    pub fn has_tag<T: Tag>(&self, entity: Entity) -> bool {
        self.has_marker(entity, tag_id::<T>())
    }

    fn has_marker(&self, entity: Entity, marker: MarkerId) -> bool {
        self.index
            .location(entity)
            .map(|location| self.archetypes.get(location.archetype).signature().contains(marker))
            .unwrap_or(false)
    }

    /// Record keys of the entity's components, in attachment order.
    pub fn component_keys(&self, entity: Entity) -> EcsResult<Vec<&'static str>> {
        self.marker_names(entity, true)
    }

    /// Names of the entity's tags, in attachment order.
    pub fn tag_names(&self, entity: Entity) -> EcsResult<Vec<&'static str>> {
        self.marker_names(entity, false)
    }

    fn marker_names(&self, entity: Entity, components: bool) -> EcsResult<Vec<&'static str>> {
        let slot = self.index.resolve(entity)?;
        Ok(slot
            .order
            .iter()
            .filter_map(|&marker| marker_meta(marker))
            .filter(|meta| meta.is_component() == components)
            .map(|meta| meta.name)
            .collect())
    }

    /// Signature of the entity's archetype.
    pub fn signature(&self, entity: Entity) -> EcsResult<&Signature> {
        let location = self.index.location(entity)?;
        Ok(self.archetypes.get(location.archetype).signature())
    }

    // ------------------------------------------------------------------
    // Structural change core
    // ------------------------------------------------------------------

    /// Apply several ops to one entity as a single move.
    pub(crate) fn apply_ops(&mut self, entity: Entity, ops: Vec<Op>) -> EcsResult<RemovedValues> {
        let plan = self.plan(entity, ops, false)?;
        Ok(self.execute(plan))
    }

    /// Hierarchy-internal variant of `apply_ops` that may touch `Parent` and `Children`.
    pub(crate) fn apply_managed(&mut self, entity: Entity, ops: Vec<Op>) -> EcsResult<RemovedValues> {
        let plan = self.plan(entity, ops, true)?;
        Ok(self.execute(plan))
    }

    /// Validate that `values` may be written to `id` (or to a new entity).
    pub(crate) fn check_values(
        &self,
        id: Option<EntityId>,
        values: &[(MarkerId, Box<dyn Any + Send>)],
    ) -> EcsResult<()> {
        for (marker, value) in values {
            let Some(meta) = marker_meta(*marker) else {
                continue;
            };
            match meta.role {
                ComponentRole::Unique => {
                    if let Some(key) = unique::key_of(value.as_ref()) {
                        if let Some(holder) = self.uniques.holder(key).filter(|&holder| Some(holder) != id) {
                            return Err(EcsError::DuplicateUniqueKey {
                                key: key.to_owned(),
                                holder,
                            });
                        }
                    }
                }
                ComponentRole::Link => {
                    let targets = meta.vtable.map(|vtable| (vtable.link_targets)(value.as_ref()));
                    if let Some(&dead) = targets.iter().flatten().find(|&&target| !self.index.is_id_alive(target)) {
                        return Err(EcsError::UnknownEntity {
                            entity: self.index.handle(dead),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn plan(&self, entity: Entity, ops: Vec<Op>, allow_managed: bool) -> EcsResult<Plan> {
        let slot = self.index.resolve(entity)?;
        let from = self.index.location(entity)?;
        let source = self.archetypes.get(from.archetype);
        let changes = Changes::fold(
            entity,
            source.signature().markers(),
            &slot.order,
            ops,
            allow_managed,
        )?;
        self.check_values(Some(entity.id()), &changes.values)?;

        let unindex = source
            .component_ids()
            .iter()
            .copied()
            .filter(|&marker| is_indexed(marker))
            .filter(|&marker| changes.markers.binary_search(&marker).is_err() || changes.has_value(marker))
            .collect();

        Ok(Plan {
            entity,
            from,
            changes,
            unindex,
        })
    }

    /// Carry out a validated plan. Returns the values of removed components.
    fn execute(&mut self, plan: Plan) -> RemovedValues {
        let Plan {
            entity,
            from,
            changes,
            unindex,
        } = plan;
        let id = entity.id();

        for marker in unindex {
            self.unindex_value(id, marker);
        }

        let target = self.resolve_target(from.archetype, &changes);
        let mut removed = RemovedValues::new();
        let row = if target == from.archetype {
            from.row
        } else {
            let (src, dst) = self.archetypes.pair_mut(from.archetype, target);
            let (row, moved) = src.move_row(from.row, dst, Some(&mut removed));
            if let Some(moved) = moved {
                self.index.set_location(moved, from);
            }
            self.index.set_location(id, EntityLocation { archetype: target, row });
            metrics! { self.counters.increment("rows_moved", 1); }
            trace!(entity = %entity, from = from.archetype, to = target, "moved entity");
            row
        };

        let indexed: Vec<MarkerId> = changes
            .values
            .iter()
            .map(|(marker, _)| *marker)
            .filter(|&marker| is_indexed(marker))
            .collect();
        self.write_values(target, row, changes.values);
        for marker in indexed {
            self.index_value(id, marker);
        }
        if let Some(slot) = self.index.slot_mut(id) {
            slot.order = changes.order;
        }
        removed
    }

    fn resolve_target(&mut self, from: ArchetypeId, changes: &Changes) -> ArchetypeId {
        if self.archetypes.get(from).signature().markers() == changes.markers.as_slice() {
            return from;
        }
        match changes.single {
            Some((marker, add)) => self.archetypes.transition(from, marker, add),
            None => self
                .archetypes
                .get_or_create(&Signature::from_markers(changes.markers.clone())),
        }
    }

    /// Push values into columns still missing the row, overwrite the rest.
    ///
    /// Value types were checked when the changes were folded.
    fn write_values(&mut self, target: ArchetypeId, row: usize, values: RemovedValues) {
        let archetype = self.archetypes.get_mut(target);
        let len = archetype.len();
        for (marker, value) in values {
            let Some(index) = archetype.column_index(marker) else {
                continue;
            };
            let column = archetype.erased_column_mut(index);
            let written = if column.len() < len {
                column.push_boxed(value)
            } else {
                column.replace_boxed(row, value)
            };
            debug_assert!(written.is_ok(), "value for marker {marker} does not match its column type");
        }
        debug_assert!(archetype.is_consistent(), "archetype {target} has unfilled columns");
    }

    /// Create an entity carrying `changes`, which must already be validated.
    pub(crate) fn spawn(&mut self, pid: Option<Pid>, changes: Changes) -> EcsResult<Entity> {
        let target = self
            .archetypes
            .get_or_create(&Signature::from_markers(changes.markers.clone()));
        self.spawn_into(target, pid, changes)
    }

    /// Create an entity in archetype `target`, whose signature must match `changes`.
    pub(crate) fn spawn_into(&mut self, target: ArchetypeId, pid: Option<Pid>, changes: Changes) -> EcsResult<Entity> {
        let location = EntityLocation {
            archetype: target,
            row: self.archetypes.get(target).len(),
        };
        let entity = match pid {
            Some(pid) => self.index.allocate_with_pid(pid, location)?,
            None => self.index.allocate(location),
        };
        let id = entity.id();
        self.archetypes.get_mut(target).push_entity(id);

        let indexed: Vec<MarkerId> = changes
            .values
            .iter()
            .map(|(marker, _)| *marker)
            .filter(|&marker| is_indexed(marker))
            .collect();
        self.write_values(target, location.row, changes.values);
        for marker in indexed {
            self.index_value(id, marker);
        }
        if let Some(slot) = self.index.slot_mut(id) {
            slot.order = changes.order;
        }
        metrics! { self.counters.increment("entities_created", 1); }
        trace!(entity = %entity, archetype = target, "created entity");
        Ok(entity)
    }

    /// Create an entity from ops in one step. Nothing changes on error.
    pub(crate) fn create_with_ops(&mut self, pid: Option<Pid>, ops: Vec<Op>) -> EcsResult<Entity> {
        if let Some(pid) = pid {
            self.index.check_pid(pid)?;
        }
        // New entities have no handle yet; removal errors name id 0.
        let changes = Changes::fold(self.index.handle(0), &[], &[], ops, false)?;
        self.check_values(None, &changes.values)?;
        self.spawn(pid, changes)
    }

    pub(crate) fn reserve_rows(&mut self, target: ArchetypeId, additional: usize) {
        self.archetypes.get_mut(target).reserve(additional);
    }

    #[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
    pub(crate) fn count(&mut self, name: &'static str, value: usize) {
        metrics! { self.counters.increment(name, value); }
    }

    fn index_value(&mut self, id: EntityId, marker: MarkerId) {
        self.update_index(id, marker, true);
    }

    fn unindex_value(&mut self, id: EntityId, marker: MarkerId) {
        self.update_index(id, marker, false);
    }

    fn update_index(&mut self, id: EntityId, marker: MarkerId, insert: bool) {
        let Some(location) = self.index.slot(id).and_then(|slot| slot.location) else {
            return;
        };
        let Some(meta) = marker_meta(marker) else {
            return;
        };
        let archetype = self.archetypes.get(location.archetype);
        let Some(column) = archetype.column_index(marker) else {
            return;
        };
        let value = archetype.erased_column(column).value_any(location.row);
        match meta.role {
            ComponentRole::Unique => {
                if let Some(key) = unique::key_of(value) {
                    if insert {
                        self.uniques.insert(key, id);
                    } else {
                        self.uniques.release(key, id);
                    }
                }
            }
            ComponentRole::Link => {
                let Some(vtable) = meta.vtable else {
                    return;
                };
                for target in (vtable.link_targets)(value) {
                    if insert {
                        self.links.link(target, id, marker);
                    } else {
                        self.links.unlink(target, id, marker);
                    }
                }
            }
            _ => {}
        }
    }

    /// Drop `target` from the link value `marker` of `source`. Returns whether
    /// the link still has targets. The index entry for `target` must already
    /// be gone.
    fn unlink_in_place(&mut self, source: Entity, marker: MarkerId, target: EntityId) -> bool {
        let Some(vtable) = marker_meta(marker).and_then(|meta| meta.vtable) else {
            return false;
        };
        let Ok(location) = self.index.location(source) else {
            return false;
        };
        let archetype = self.archetypes.get_mut(location.archetype);
        let Some(column) = archetype.column_index(marker) else {
            return false;
        };
        (vtable.unlink_target)(archetype.erased_column_mut(column).value_any_mut(location.row), target)
    }

    /// Mutable component access that skips the role check. Hierarchy use only.
    pub(crate) fn component_mut_unchecked<T: Component>(&mut self, id: EntityId) -> Option<&mut T> {
        let location = self.index.slot(id)?.location?;
        self.archetypes
            .get_mut(location.archetype)
            .column_mut::<T>(component_id::<T>())?
            .get_mut(location.row)
    }

    pub(crate) fn component_by_id<T: Component>(&self, id: EntityId) -> Option<&T> {
        let location = self.index.slot(id)?.location?;
        self.archetypes
            .get(location.archetype)
            .column::<T>(component_id::<T>())?
            .get(location.row)
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Check every internal index against the archetype tables.
    ///
    /// Returns one message per violated invariant; empty when consistent.
    pub fn check_consistency(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let rows: usize = self.archetypes.iter().map(|archetype| archetype.len()).sum();
        if rows != self.index.len() {
            problems.push(format!("{rows} rows stored but {} entities alive", self.index.len()));
        }
        for archetype in self.archetypes.iter() {
            if !archetype.is_consistent() {
                problems.push(format!("archetype {} has columns of unequal length", archetype.id()));
            }
        }

        let mut unique_holders = 0;
        let mut link_count = 0;
        for id in self.index.live_ids() {
            let Some(slot) = self.index.slot(id) else {
                continue;
            };
            let Some(location) = slot.location else {
                continue;
            };
            let archetype = self.archetypes.get(location.archetype);
            if archetype.entities().get(location.row) != Some(&id) {
                problems.push(format!("entity {id} is not at its recorded row {location:?}"));
                continue;
            }

            let mut ordered = slot.order.clone();
            ordered.sort_unstable();
            if ordered != archetype.signature().markers() {
                problems.push(format!("entity {id} attachment order does not match its signature"));
            }

            if let Some(unique) = self.component_by_id::<UniqueEntity>(id) {
                unique_holders += 1;
                if self.uniques.holder(&unique.uid) != Some(id) {
                    problems.push(format!("unique key '{}' of entity {id} is not indexed", unique.uid));
                }
            }
            link_count += self.outgoing_links(id).len();

            if let Some(parent) = self.component_by_id::<Parent>(id) {
                let listed = self
                    .component_by_id::<Children>(parent.id())
                    .is_some_and(|children| children.contains(id));
                if !listed {
                    problems.push(format!("entity {id} is missing from the children of {}", parent.id()));
                }
            }
            if let Some(children) = self.component_by_id::<Children>(id) {
                if children.is_empty() {
                    problems.push(format!("entity {id} keeps an empty child list"));
                }
                for &child in children.ids() {
                    if self.component_by_id::<Parent>(child).map(Parent::id) != Some(id) {
                        problems.push(format!("child {child} of entity {id} does not point back"));
                    }
                }
            }
        }

        if unique_holders != self.uniques.len() {
            problems.push(format!(
                "{unique_holders} unique components but {} indexed keys",
                self.uniques.len()
            ));
        }
        if link_count != self.links.len() {
            problems.push(format!("{link_count} link components but {} indexed links", self.links.len()));
        }
        problems
    }
}

fn is_indexed(marker: MarkerId) -> bool {
    marker_meta(marker).is_some_and(|meta| meta.role.is_indexed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::EntityName;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: i32,
        y: i32,
        z: i32,
    }
    crate::define_component!(Position, "store-test-pos");

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Velocity {
        dx: i32,
    }
    crate::define_component!(Velocity, "store-test-vel");

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Target {
        entity: EntityId,
    }
    crate::define_link!(Target, "store-test-target", entity);

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Allies {
        entities: Vec<EntityId>,
    }
    crate::define_links!(Allies, "store-test-allies", entities);

    struct Enemy;
    crate::define_tag!(Enemy);

    fn pos(x: i32) -> Position {
        Position { x, y: 0, z: 0 }
    }

    #[test]
    fn add_get_remove_component() {
        let mut store = EntityStore::new();
        let e = store.create_entity();
        store.add_component(e, pos(1)).unwrap();
        assert_eq!(store.get::<Position>(e).unwrap(), &pos(1));

        store.get_mut::<Position>(e).unwrap().y = 9;
        assert_eq!(store.get::<Position>(e).unwrap().y, 9);

        let removed = store.remove_component::<Position>(e).unwrap();
        assert_eq!(removed.y, 9);
        assert!(!store.has::<Position>(e));
        assert!(store.check_consistency().is_empty());
    }

    #[test]
    fn adding_present_component_overwrites_in_place() {
        let mut store = EntityStore::new();
        let e = store.create_entity();
        store.add_component(e, pos(1)).unwrap();
        let before = store.location(e).unwrap();
        store.add_component(e, pos(2)).unwrap();
        assert_eq!(store.location(e).unwrap(), before);
        assert_eq!(store.get::<Position>(e).unwrap().x, 2);
    }

    #[test]
    fn removing_absent_component_fails() {
        let mut store = EntityStore::new();
        let e = store.create_entity();
        assert_eq!(
            store.remove_component::<Position>(e),
            Err(EcsError::ComponentNotFound {
                entity: e,
                component: "store-test-pos"
            })
        );
        assert!(matches!(
            store.get::<Velocity>(e),
            Err(EcsError::ComponentNotFound { .. })
        ));
    }

    #[test]
    fn tags_do_not_need_storage() {
        let mut store = EntityStore::new();
        let e = store.create_entity();
        store.add_tag::<Enemy>(e).unwrap();
        store.add_tag::<Enemy>(e).unwrap();
        assert!(store.has_tag::<Enemy>(e));
        assert_eq!(store.tag_names(e).unwrap(), vec!["Enemy"]);
        assert!(store.remove_tag::<Enemy>(e).unwrap());
        assert!(!store.remove_tag::<Enemy>(e).unwrap());
    }

    #[test]
    fn delete_fixes_moved_row_and_invalidates_handle() {
        let mut store = EntityStore::new();
        let a = store.create_entity();
        let b = store.create_entity();
        store.add_component(a, pos(1)).unwrap();
        store.add_component(b, pos(2)).unwrap();

        store.delete_entity(a).unwrap();
        assert!(!store.is_alive(a));
        assert_eq!(store.get::<Position>(b).unwrap().x, 2);
        assert_eq!(store.location(b).unwrap().row, 0);
        assert_eq!(store.delete_entity(a), Err(EcsError::UnknownEntity { entity: a }));

        let c = store.create_entity();
        assert_eq!(c.id(), a.id());
        assert!(matches!(store.get::<Position>(a), Err(EcsError::UnknownEntity { .. })));
        assert!(store.check_consistency().is_empty());
    }

    #[test]
    fn component_keys_follow_attachment_order() {
        let mut store = EntityStore::new();
        let e = store.create_entity();
        store.add_component(e, Velocity { dx: 1 }).unwrap();
        store.add_component(e, pos(0)).unwrap();
        store.add_component(e, EntityName::new("ship")).unwrap();
        assert_eq!(
            store.component_keys(e).unwrap(),
            vec!["store-test-vel", "store-test-pos", "name"]
        );
    }

    #[test]
    fn unique_keys_are_exclusive() {
        let mut store = EntityStore::new();
        let a = store.create_entity();
        let b = store.create_entity();
        store.add_component(a, UniqueEntity::new("player")).unwrap();
        assert_eq!(
            store.add_component(b, UniqueEntity::new("player")),
            Err(EcsError::DuplicateUniqueKey {
                key: "player".into(),
                holder: a.id()
            })
        );
        assert_eq!(store.unique_entity("player"), Some(a));

        // Re-adding the same key to its holder is fine.
        store.add_component(a, UniqueEntity::new("player")).unwrap();
        store.add_component(a, UniqueEntity::new("hero")).unwrap();
        assert_eq!(store.unique_entity("player"), None);
        assert_eq!(store.unique_entity("hero"), Some(a));
        assert!(matches!(
            store.get_mut::<UniqueEntity>(a),
            Err(EcsError::ManagedComponent { .. })
        ));

        store.delete_entity(a).unwrap();
        assert_eq!(store.unique_entity("hero"), None);
        assert!(store.check_consistency().is_empty());
    }

    #[test]
    fn deleting_target_strips_links() {
        let mut store = EntityStore::new();
        let hunter = store.create_entity();
        let prey = store.create_entity();
        store.add_component(hunter, Target { entity: prey.id() }).unwrap();
        assert_eq!(store.incoming_link_count(prey).unwrap(), 1);
        let links = store.links_of(hunter).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links.get(0).unwrap().target, prey);

        store.delete_entity(prey).unwrap();
        assert!(!store.has::<Target>(hunter));
        assert!(store.links_of(hunter).unwrap().is_empty());
        assert!(store.check_consistency().is_empty());
    }

    #[test]
    fn multi_target_links_enumerate_in_order() {
        let mut store = EntityStore::new();
        let source = store.create_entity();
        let a = store.create_entity();
        let b = store.create_entity();
        let c = store.create_entity();
        store.add_component(source, Target { entity: c.id() }).unwrap();
        store
            .add_component(source, Allies { entities: vec![b.id(), a.id(), c.id()] })
            .unwrap();

        let targets: Vec<Entity> = store.links_of(source).unwrap().targets().collect();
        assert_eq!(targets, vec![c, b, a, c]);
        assert_eq!(store.incoming_link_count(c).unwrap(), 2);
        assert_eq!(store.incoming_link_count(a).unwrap(), 1);

        // Replacing the value re-indexes every target.
        store.add_component(source, Allies { entities: vec![a.id()] }).unwrap();
        assert_eq!(store.incoming_link_count(b).unwrap(), 0);
        assert_eq!(store.incoming_link_count(c).unwrap(), 1);
        assert!(store.check_consistency().is_empty());
    }

    #[test]
    fn deleting_one_target_keeps_the_others() {
        let mut store = EntityStore::new();
        let source = store.create_entity();
        let a = store.create_entity();
        let b = store.create_entity();
        store
            .add_component(source, Allies { entities: vec![a.id(), b.id()] })
            .unwrap();

        store.delete_entity(a).unwrap();
        assert_eq!(store.get::<Allies>(source).unwrap().entities, vec![b.id()]);
        let links = store.links_of(source).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links.get(0).unwrap().target, b);
        assert_eq!(store.incoming_links(b).unwrap().get(0).unwrap().entity, source);
        assert!(store.check_consistency().is_empty());

        store.delete_entity(b).unwrap();
        assert!(!store.has::<Allies>(source));
        assert!(store.links_of(source).unwrap().is_empty());
        assert!(store.check_consistency().is_empty());
    }

    #[test]
    fn multi_link_with_dead_target_is_rejected() {
        let mut store = EntityStore::new();
        let source = store.create_entity();
        let alive = store.create_entity();
        let gone = store.create_entity();
        store.delete_entity(gone).unwrap();
        assert!(matches!(
            store.add_component(source, Allies { entities: vec![alive.id(), gone.id()] }),
            Err(EcsError::UnknownEntity { .. })
        ));
        assert_eq!(store.incoming_link_count(alive).unwrap(), 0);
    }

    #[test]
    fn link_to_dead_entity_is_rejected() {
        let mut store = EntityStore::new();
        let a = store.create_entity();
        let b = store.create_entity();
        store.delete_entity(b).unwrap();
        assert!(matches!(
            store.add_component(a, Target { entity: b.id() }),
            Err(EcsError::UnknownEntity { .. })
        ));
        assert!(!store.has::<Target>(a));
    }

    #[test]
    fn mistyped_value_is_rejected_before_any_change() {
        let mut store = EntityStore::new();
        let e = store.create_entity();
        store.add_component(e, pos(1)).unwrap();
        let ops = vec![
            Op::add(Velocity { dx: 1 }),
            Op::Add {
                marker: component_id::<Position>(),
                value: Some(Box::new(Velocity { dx: 2 })),
            },
        ];
        assert_eq!(
            store.apply_ops(e, ops).err(),
            Some(EcsError::TypeMismatch {
                component: "store-test-pos"
            })
        );
        assert!(!store.has::<Velocity>(e));
        assert_eq!(store.get::<Position>(e).unwrap(), &pos(1));
        assert!(store.check_consistency().is_empty());
    }

    #[test]
    fn hierarchy_components_are_managed() {
        let mut store = EntityStore::new();
        let e = store.create_entity();
        assert!(matches!(
            store.remove_component::<Parent>(e),
            Err(EcsError::ManagedComponent { component: "parent" })
        ));
    }

    #[test]
    fn pid_modes() {
        let mut store = EntityStore::with_config(StoreConfig::default().with_pid_mode(PidMode::UsePidAsId));
        let e = store.create_entity_with_pid(10).unwrap();
        assert_eq!(e.id(), 10);
        assert_eq!(store.entity_by_pid(10), Some(e));
        assert!(matches!(
            store.create_entity_with_pid(10),
            Err(EcsError::DuplicatePid { pid: 10, .. })
        ));

        let mut store = EntityStore::new();
        let e = store.create_entity_with_pid(1 << 40).unwrap();
        assert_eq!(store.pid_of(e).unwrap(), 1 << 40);
        assert_eq!(store.entity_by_pid(1 << 40), Some(e));
    }
}
