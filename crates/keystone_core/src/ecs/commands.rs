// commands.rs - Deferred structural changes
//
// Structural changes cannot happen while a query borrows the store, so
// iteration code records them in a `CommandBuffer` and applies it once the
// borrow ends. `apply` validates the whole buffer against a simulated view
// of the store before touching it: either every command lands or none does.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::ecs::store::{Changes, Op};
use crate::ecs::unique;
use crate::ecs::{
    marker_meta, ArchetypeId, Component, ComponentRole, EcsError, EcsResult, Entity, EntityBatch,
    EntityId, EntityStore, MarkerId, Pid, Signature, Tag, UniqueEntity,
};

/// A deferred structural change.
pub(crate) enum Command {
    /// Create an entity carrying the result of `ops`.
    Create { pid: Option<Pid>, ops: Vec<Op> },
    /// Delete an entity and detach everything pointing at it.
    Delete { entity: Entity },
    /// Add or remove one component or tag.
    Change { entity: Entity, op: Op },
}

/// Queue of structural changes applied in submission order.
///
/// Consecutive changes to the same entity are folded into one move, and
/// consecutive creations sharing a signature are appended to their archetype
/// in bulk.
#[derive(Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    /// Queue creation of an entity carrying `batch`.
    pub fn create(&mut self, batch: EntityBatch) {
        self.commands.push(Command::Create {
            pid: None,
            ops: batch.into_ops(),
        });
    }

    pub fn create_with_pid(&mut self, pid: Pid, batch: EntityBatch) {
        self.commands.push(Command::Create {
            pid: Some(pid),
            ops: batch.into_ops(),
        });
    }

    pub fn delete(&mut self, entity: Entity) {
        self.commands.push(Command::Delete { entity });
    }

    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) {
        self.commands.push(Command::Change {
            entity,
            op: Op::add(value),
        });
    }

    pub fn remove_component<T: Component>(&mut self, entity: Entity) {
        self.commands.push(Command::Change {
            entity,
            op: Op::remove::<T>(),
        });
    }

    pub fn add_tag<T: Tag>(&mut self, entity: Entity) {
        self.commands.push(Command::Change {
            entity,
            op: Op::add_tag::<T>(),
        });
    }

    pub fn remove_tag<T: Tag>(&mut self, entity: Entity) {
        self.commands.push(Command::Change {
            entity,
            op: Op::remove_tag::<T>(),
        });
    }

    /// Queue every change of `batch` for `entity`.
    pub fn apply_batch(&mut self, entity: Entity, batch: &EntityBatch) {
        for op in batch.to_ops() {
            self.commands.push(Command::Change { entity, op });
        }
    }

    /// Apply all queued commands and empty the buffer.
    ///
    /// Returns the created entities in submission order. On error the store
    /// is unchanged and the queued commands are discarded.
    pub fn apply(&mut self, store: &mut EntityStore) -> EcsResult<Vec<Entity>> {
        let commands = std::mem::take(&mut self.commands);
        let total = commands.len();
        Simulation::new(store).run(&commands)?;

        // Pid-less creations must not take a pid (or, with pids as ids, an id)
        // that a later creation in this buffer asks for.
        store.index.reserve_pids(commands.iter().filter_map(|command| match command {
            Command::Create { pid, .. } => *pid,
            _ => None,
        }));
        let result = replay(store, commands);
        store.index.clear_reserved_pids();
        let created = result?;

        store.count("commands_applied", total);
        debug!(commands = total, created = created.len(), "applied command buffer");
        Ok(created)
    }
}

/// Apply validated commands in order, folding runs as described on `CommandBuffer`.
fn replay(store: &mut EntityStore, commands: Vec<Command>) -> EcsResult<Vec<Entity>> {
    let mut created = Vec::new();
    let mut commands = commands.into_iter().peekable();
    while let Some(command) = commands.next() {
        match command {
            Command::Create { pid, ops } => {
                let mut run = vec![(pid, ops)];
                while matches!(commands.peek(), Some(Command::Create { .. })) {
                    if let Some(Command::Create { pid, ops }) = commands.next() {
                        run.push((pid, ops));
                    }
                }
                created.extend(spawn_run(store, run)?);
            }
            Command::Change { entity, op } => {
                let mut ops = vec![op];
                while matches!(commands.peek(), Some(Command::Change { entity: next, .. }) if *next == entity) {
                    if let Some(Command::Change { op, .. }) = commands.next() {
                        ops.push(op);
                    }
                }
                store.apply_ops(entity, ops)?;
            }
            Command::Delete { entity } => store.delete_entity(entity)?,
        }
    }
    Ok(created)
}

/// Create a run of entities, grouped by their final signature.
fn spawn_run(store: &mut EntityStore, run: Vec<(Option<Pid>, Vec<Op>)>) -> EcsResult<Vec<Entity>> {
    let total = run.len();
    let mut groups: Vec<(Signature, Vec<(usize, Option<Pid>, Changes)>)> = Vec::new();
    let mut by_signature: HashMap<Signature, usize> = HashMap::new();
    for (position, (pid, ops)) in run.into_iter().enumerate() {
        let changes = Changes::fold(store.index.handle(0), &[], &[], ops, false)?;
        let signature = Signature::from_markers(changes.markers.clone());
        let group = *by_signature.entry(signature.clone()).or_insert_with(|| {
            groups.push((signature, Vec::new()));
            groups.len() - 1
        });
        groups[group].1.push((position, pid, changes));
    }

    let mut created: Vec<Option<Entity>> = vec![None; total];
    for (signature, members) in groups {
        let target: ArchetypeId = store.archetypes.get_or_create(&signature);
        store.reserve_rows(target, members.len());
        for (position, pid, changes) in members {
            created[position] = Some(store.spawn_into(target, pid, changes)?);
        }
    }
    Ok(created.into_iter().flatten().collect())
}

/// Who holds a unique key in the simulated store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    Entity(EntityId),
    /// The n-th entity created by the same buffer.
    Created(usize),
}

impl Holder {
    fn id(self) -> EntityId {
        match self {
            Holder::Entity(id) => id,
            Holder::Created(_) => 0,
        }
    }
}

/// What validation needs to know about one entity.
struct SimEntity {
    entity: Entity,
    alive: bool,
    markers: Vec<MarkerId>,
    unique: Option<String>,
    links: Vec<(MarkerId, EntityId)>,
}

/// Replays commands against a lightweight copy of the affected state.
struct Simulation<'s> {
    store: &'s EntityStore,
    entities: HashMap<EntityId, SimEntity>,
    /// Overrides of the store's unique index; `None` marks a released key.
    uniques: HashMap<String, Option<Holder>>,
    claimed_pids: HashSet<Pid>,
    created: usize,
}

impl<'s> Simulation<'s> {
    fn new(store: &'s EntityStore) -> Self {
        Self {
            store,
            entities: HashMap::new(),
            uniques: HashMap::new(),
            claimed_pids: HashSet::new(),
            created: 0,
        }
    }

    fn run(mut self, commands: &[Command]) -> EcsResult<()> {
        for command in commands {
            match command {
                Command::Create { pid, ops } => self.create(*pid, ops)?,
                Command::Delete { entity } => self.delete(*entity)?,
                Command::Change { entity, op } => {
                    let mut sim = self.take(*entity)?;
                    let result = self.apply(&mut sim, Holder::Entity(entity.id()), op);
                    self.entities.insert(entity.id(), sim);
                    result?;
                }
            }
        }
        Ok(())
    }

    /// Remove an entity's simulated state for editing; callers put it back.
    fn take(&mut self, entity: Entity) -> EcsResult<SimEntity> {
        match self.entities.remove(&entity.id()) {
            Some(sim) if sim.alive && sim.entity == entity => Ok(sim),
            Some(sim) => {
                self.entities.insert(entity.id(), sim);
                Err(EcsError::UnknownEntity { entity })
            }
            None => self.load(entity),
        }
    }

    fn load(&self, entity: Entity) -> EcsResult<SimEntity> {
        let markers = self.store.signature(entity)?.markers().to_vec();
        Ok(SimEntity {
            entity,
            alive: true,
            markers,
            unique: self
                .store
                .component_by_id::<UniqueEntity>(entity.id())
                .map(|unique| unique.uid.clone()),
            links: self.store.outgoing_links(entity.id()),
        })
    }

    fn is_alive(&self, id: EntityId) -> bool {
        match self.entities.get(&id) {
            Some(sim) => sim.alive,
            None => self.store.index.is_id_alive(id),
        }
    }

    fn unique_holder(&self, key: &str) -> Option<Holder> {
        match self.uniques.get(key) {
            Some(holder) => *holder,
            None => self.store.uniques.holder(key).map(Holder::Entity),
        }
    }

    fn release_unique(&mut self, sim: &mut SimEntity) {
        if let Some(key) = sim.unique.take() {
            self.uniques.insert(key, None);
        }
    }

    fn create(&mut self, pid: Option<Pid>, ops: &[Op]) -> EcsResult<()> {
        if let Some(pid) = pid {
            if !self.claimed_pids.insert(pid) {
                return Err(EcsError::InvalidPid {
                    pid,
                    reason: "requested by more than one creation in the buffer",
                });
            }
            match self.store.index.check_pid(pid) {
                Err(EcsError::DuplicatePid { holder, .. }) if !self.is_alive(holder) => {}
                other => other?,
            }
        }
        let mut sim = SimEntity {
            entity: self.store.index.handle(0),
            alive: true,
            markers: Vec::new(),
            unique: None,
            links: Vec::new(),
        };
        let this = Holder::Created(self.created);
        self.created += 1;
        for op in ops {
            self.apply(&mut sim, this, op)?;
        }
        Ok(())
    }

    fn delete(&mut self, entity: Entity) -> EcsResult<()> {
        let mut sim = self.take(entity)?;
        let id = entity.id();
        sim.alive = false;
        self.release_unique(&mut sim);
        self.entities.insert(id, sim);

        // Links drop the deleted entity; a link component without targets
        // disappears with it.
        let mut sources: Vec<EntityId> = self.store.links.incoming(id).iter().map(|&(source, _)| source).collect();
        sources.extend(
            self.entities
                .iter()
                .filter(|(_, sim)| sim.alive && sim.links.iter().any(|&(_, target)| target == id))
                .map(|(&source, _)| source),
        );
        sources.sort_unstable();
        sources.dedup();
        for source in sources.into_iter().filter(|&source| source != id) {
            let Some(handle) = self.store.index.entity(source) else {
                continue;
            };
            let Ok(mut sim) = self.take(handle) else {
                continue;
            };
            let touched: Vec<MarkerId> = sim
                .links
                .iter()
                .filter(|&&(_, target)| target == id)
                .map(|&(marker, _)| marker)
                .collect();
            sim.links.retain(|&(_, target)| target != id);
            let links = &sim.links;
            sim.markers
                .retain(|marker| !touched.contains(marker) || links.iter().any(|(linked, _)| linked == marker));
            self.entities.insert(source, sim);
        }
        Ok(())
    }

    fn apply(&mut self, sim: &mut SimEntity, this: Holder, op: &Op) -> EcsResult<()> {
        let marker = op.marker();
        let meta = marker_meta(marker).ok_or(EcsError::TypeMismatch {
            component: "<unregistered>",
        })?;
        if meta.role.is_hierarchy() {
            return Err(EcsError::ManagedComponent { component: meta.name });
        }

        match op {
            Op::Add { value, .. } => {
                let typed = match value {
                    Some(value) => meta.accepts(value.as_ref()),
                    None => !meta.is_component(),
                };
                if !typed {
                    return Err(EcsError::TypeMismatch { component: meta.name });
                }
                if let Err(pos) = sim.markers.binary_search(&marker) {
                    sim.markers.insert(pos, marker);
                }
                let Some(value) = value else {
                    return Ok(());
                };
                match meta.role {
                    ComponentRole::Unique => {
                        if let Some(key) = unique::key_of(value.as_ref()) {
                            if let Some(holder) = self.unique_holder(key).filter(|&holder| holder != this) {
                                return Err(EcsError::DuplicateUniqueKey {
                                    key: key.to_owned(),
                                    holder: holder.id(),
                                });
                            }
                            self.release_unique(sim);
                            sim.unique = Some(key.to_owned());
                            self.uniques.insert(key.to_owned(), Some(this));
                        }
                    }
                    ComponentRole::Link => {
                        sim.links.retain(|&(m, _)| m != marker);
                        let targets = meta.vtable.map(|vtable| (vtable.link_targets)(value.as_ref()));
                        for target in targets.into_iter().flatten() {
                            if !self.is_alive(target) {
                                return Err(EcsError::UnknownEntity {
                                    entity: self.store.index.handle(target),
                                });
                            }
                            sim.links.push((marker, target));
                        }
                    }
                    _ => {}
                }
            }
            Op::Remove { .. } => match sim.markers.binary_search(&marker) {
                Ok(pos) => {
                    sim.markers.remove(pos);
                    match meta.role {
                        ComponentRole::Unique => self.release_unique(sim),
                        ComponentRole::Link => sim.links.retain(|&(m, _)| m != marker),
                        _ => {}
                    }
                }
                Err(_) if meta.is_component() => {
                    return Err(EcsError::ComponentNotFound {
                        entity: sim.entity,
                        component: meta.name,
                    });
                }
                Err(_) => {}
            },
        }
        Ok(())
    }
}
