// entity_index.rs - Entity id allocation and location tracking
//
// Every id maps to a slot holding its generation, its current row and the
// order in which markers were attached. Freed ids go to a free list; stale
// free-list entries (ids later claimed explicitly) are skipped on pop.
// Reserved pids are never handed to store-chosen allocations.

use std::collections::{HashMap, HashSet};

use crate::config::PidMode;
use crate::ecs::{EcsError, EcsResult, Entity, EntityId, EntityLocation, MarkerId, Pid};

#[derive(Debug, Default, Clone)]
pub(crate) struct EntitySlot {
    pub generation: u32,
    pub location: Option<EntityLocation>,
    pub pid: Pid,
    /// Markers in attachment order.
    pub order: Vec<MarkerId>,
}

impl EntitySlot {
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.location.is_some()
    }
}

pub(crate) struct EntityIndex {
    mode: PidMode,
    /// Slot 0 is reserved so id 0 is never handed out.
    slots: Vec<EntitySlot>,
    free: Vec<EntityId>,
    /// pid -> id, only used in `PidMode::Independent`.
    pids: HashMap<Pid, EntityId>,
    next_pid: Pid,
    /// Pids an explicit allocation will claim shortly.
    reserved: HashSet<Pid>,
    alive: usize,
}

impl EntityIndex {
    pub fn new(mode: PidMode) -> Self {
        Self {
            mode,
            slots: vec![EntitySlot::default()],
            free: Vec::new(),
            pids: HashMap::new(),
            next_pid: 1,
            reserved: HashSet::new(),
            alive: 0,
        }
    }

    pub fn mode(&self) -> PidMode {
        self.mode
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.alive
    }

    #[inline]
    pub fn slot(&self, id: EntityId) -> Option<&EntitySlot> {
        self.slots.get(id as usize).filter(|slot| slot.is_alive())
    }

    #[inline]
    pub fn slot_mut(&mut self, id: EntityId) -> Option<&mut EntitySlot> {
        self.slots.get_mut(id as usize).filter(|slot| slot.is_alive())
    }

    /// Handle for a live id.
    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.slot(id).map(|slot| Entity::new(id, slot.generation))
    }

    /// Handle for any id, live or not. Used to report errors about ids.
    pub fn handle(&self, id: EntityId) -> Entity {
        let generation = self.slots.get(id as usize).map_or(0, |slot| slot.generation);
        Entity::new(id, generation)
    }

    /// Slot of a live entity whose generation matches.
    pub fn resolve(&self, entity: Entity) -> EcsResult<&EntitySlot> {
        self.slots
            .get(entity.id() as usize)
            .filter(|slot| slot.is_alive() && slot.generation == entity.generation())
            .ok_or(EcsError::UnknownEntity { entity })
    }

    pub fn location(&self, entity: Entity) -> EcsResult<EntityLocation> {
        let slot = self.resolve(entity)?;
        slot.location.ok_or(EcsError::UnknownEntity { entity })
    }

    pub fn set_location(&mut self, id: EntityId, location: EntityLocation) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            slot.location = Some(location);
        }
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.resolve(entity).is_ok()
    }

    pub fn is_id_alive(&self, id: EntityId) -> bool {
        self.slot(id).is_some()
    }

    /// Live id bound to `pid`.
    pub fn by_pid(&self, pid: Pid) -> Option<EntityId> {
        match self.mode {
            PidMode::UsePidAsId => {
                let id = EntityId::try_from(pid).ok()?;
                self.slot(id).map(|_| id)
            }
            PidMode::Independent => self.pids.get(&pid).copied(),
        }
    }

    /// Check that `pid` could be bound to a new entity.
    pub fn check_pid(&self, pid: Pid) -> EcsResult<()> {
        match self.mode {
            PidMode::UsePidAsId => {
                if pid == 0 {
                    return Err(EcsError::InvalidPid {
                        pid,
                        reason: "pid 0 is reserved",
                    });
                }
                if pid > EntityId::MAX as Pid {
                    return Err(EcsError::InvalidPid {
                        pid,
                        reason: "pid exceeds the entity id range",
                    });
                }
            }
            PidMode::Independent => {}
        }
        match self.by_pid(pid) {
            Some(holder) => Err(EcsError::DuplicatePid { pid, holder }),
            None => Ok(()),
        }
    }

    /// Keep `allocate` away from `pids` until `clear_reserved_pids`.
    ///
    /// With pids as ids this also keeps the matching ids free.
    pub fn reserve_pids(&mut self, pids: impl IntoIterator<Item = Pid>) {
        self.reserved.extend(pids);
    }

    pub fn clear_reserved_pids(&mut self) {
        self.reserved.clear();
    }

    /// Allocate a fresh id with a store-chosen pid.
    ///
    /// The caller places the entity at `location` right after.
    pub fn allocate(&mut self, location: EntityLocation) -> Entity {
        let id = self.next_free_id();
        let pid = match self.mode {
            PidMode::UsePidAsId => id as Pid,
            PidMode::Independent => self.next_store_pid(),
        };
        self.bind(id, pid, location)
    }

    /// Allocate an id bound to an explicit pid.
    pub fn allocate_with_pid(&mut self, pid: Pid, location: EntityLocation) -> EcsResult<Entity> {
        self.check_pid(pid)?;
        let id = match self.mode {
            PidMode::UsePidAsId => {
                let id = pid as EntityId;
                self.grow_to(id);
                id
            }
            PidMode::Independent => self.next_free_id(),
        };
        Ok(self.bind(id, pid, location))
    }

    fn bind(&mut self, id: EntityId, pid: Pid, location: EntityLocation) -> Entity {
        if self.mode == PidMode::Independent {
            self.pids.insert(pid, id);
        }
        let slot = &mut self.slots[id as usize];
        slot.location = Some(location);
        slot.pid = pid;
        slot.order.clear();
        self.alive += 1;
        Entity::new(id, slot.generation)
    }

    /// Release a live id. Bumps its generation so old handles go stale.
    pub fn release(&mut self, id: EntityId) {
        let Some(slot) = self.slots.get_mut(id as usize).filter(|slot| slot.is_alive()) else {
            return;
        };
        slot.location = None;
        slot.generation = slot.generation.wrapping_add(1);
        slot.order.clear();
        if self.mode == PidMode::Independent {
            self.pids.remove(&slot.pid);
        }
        slot.pid = 0;
        self.alive -= 1;
        self.free.push(id);
    }

    fn next_free_id(&mut self) -> EntityId {
        let mut skipped = Vec::new();
        let id = loop {
            match self.free.pop() {
                Some(id) if self.slots[id as usize].is_alive() => {}
                Some(id) if self.is_reserved_id(id) => skipped.push(id),
                Some(id) => break id,
                None => {
                    let id = self.slots.len() as EntityId;
                    self.slots.push(EntitySlot::default());
                    if !self.is_reserved_id(id) {
                        break id;
                    }
                    skipped.push(id);
                }
            }
        };
        // Reserved ids stay free, lowest on top.
        self.free.extend(skipped.into_iter().rev());
        id
    }

    fn is_reserved_id(&self, id: EntityId) -> bool {
        self.mode == PidMode::UsePidAsId && self.reserved.contains(&(id as Pid))
    }

    /// Make sure slot `id` exists. Skipped ids become free.
    fn grow_to(&mut self, id: EntityId) {
        let len = self.slots.len() as EntityId;
        if id < len {
            return;
        }
        self.slots.resize_with(id as usize + 1, EntitySlot::default);
        // Reverse so lower ids are popped first.
        self.free.extend((len..id).rev());
    }

    fn next_store_pid(&mut self) -> Pid {
        while self.pids.contains_key(&self.next_pid) || self.reserved.contains(&self.next_pid) {
            self.next_pid += 1;
        }
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// Iterate live ids in ascending order.
    pub fn live_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_alive())
            .map(|(id, _)| id as EntityId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOME: EntityLocation = EntityLocation { archetype: 0, row: 0 };

    #[test]
    fn ids_start_at_one_and_recycle() {
        let mut index = EntityIndex::new(PidMode::Independent);
        let a = index.allocate(HOME);
        let b = index.allocate(HOME);
        assert_eq!((a.id(), b.id()), (1, 2));

        index.release(a.id());
        assert!(!index.is_alive(a));
        let c = index.allocate(HOME);
        assert_eq!(c.id(), a.id());
        assert_ne!(c.generation(), a.generation());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn independent_pids_are_unique() {
        let mut index = EntityIndex::new(PidMode::Independent);
        let a = index.allocate_with_pid(500, HOME).unwrap();
        assert_eq!(index.by_pid(500), Some(a.id()));
        assert_eq!(
            index.allocate_with_pid(500, HOME),
            Err(EcsError::DuplicatePid { pid: 500, holder: a.id() })
        );
        let b = index.allocate(HOME);
        assert_eq!(index.slot(b.id()).unwrap().pid, 1);

        index.release(a.id());
        assert_eq!(index.by_pid(500), None);
    }

    #[test]
    fn pid_as_id_claims_exact_slots() {
        let mut index = EntityIndex::new(PidMode::UsePidAsId);
        let e = index.allocate_with_pid(10, HOME).unwrap();
        assert_eq!(e.id(), 10);
        assert_eq!(index.by_pid(10), Some(10));

        // Skipped ids are handed out before new ones.
        let next = index.allocate(HOME);
        assert_eq!(next.id(), 1);

        // Claiming a free-listed id explicitly leaves a stale entry behind.
        index.allocate_with_pid(2, HOME).unwrap();
        let after = index.allocate(HOME);
        assert_eq!(after.id(), 3);
    }

    #[test]
    fn reserved_pids_are_skipped_by_allocate() {
        let mut index = EntityIndex::new(PidMode::Independent);
        index.reserve_pids([1, 2]);
        let a = index.allocate(HOME);
        assert_eq!(index.slot(a.id()).unwrap().pid, 3);
        index.allocate_with_pid(1, HOME).unwrap();
        index.clear_reserved_pids();

        let mut index = EntityIndex::new(PidMode::UsePidAsId);
        index.allocate_with_pid(4, HOME).unwrap();
        index.reserve_pids([1, 5]);
        assert_eq!(index.allocate(HOME).id(), 2);
        assert_eq!(index.allocate(HOME).id(), 3);
        assert_eq!(index.allocate(HOME).id(), 6);
        assert_eq!(index.allocate_with_pid(5, HOME).unwrap().id(), 5);
        index.clear_reserved_pids();
        assert_eq!(index.allocate(HOME).id(), 1);
    }

    #[test]
    fn pid_as_id_rejects_out_of_range() {
        let mut index = EntityIndex::new(PidMode::UsePidAsId);
        assert!(matches!(
            index.allocate_with_pid(0, HOME),
            Err(EcsError::InvalidPid { pid: 0, .. })
        ));
        let too_big = EntityId::MAX as Pid + 1;
        assert!(matches!(
            index.check_pid(too_big),
            Err(EcsError::InvalidPid { .. })
        ));
        assert_eq!(index.len(), 0);
    }
}
