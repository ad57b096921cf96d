// batch.rs - Reusable multi-change descriptions
//
// An `EntityBatch` lists component/tag additions and removals. Applying it
// folds every change into one archetype move, so an entity gaining five
// components moves once instead of five times.

use std::any::Any;
use std::fmt;

use crate::ecs::store::{Changes, Op};
use crate::ecs::unique;
use crate::ecs::{
    component_id, marker_meta, tag_id, Component, ComponentRole, EcsError, EcsResult, Entity, EntityStore, MarkerId,
    Pid, Signature, Tag,
};

/// Component value that can be copied out of a reusable batch.
trait BatchValue: Send + Sync {
    fn clone_boxed(&self) -> Box<dyn Any + Send>;
    fn into_boxed(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Component + Clone> BatchValue for T {
    fn clone_boxed(&self) -> Box<dyn Any + Send> {
        Box::new(self.clone())
    }

    fn into_boxed(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

enum BatchOp {
    Add {
        marker: MarkerId,
        value: Option<Box<dyn BatchValue>>,
    },
    Remove {
        marker: MarkerId,
    },
}

/// Ordered list of structural changes, applied as one move.
///
/// # Example
/// ```ignore
/// let batch = EntityBatch::new()
///     .add(Position { x: 1, y: 2, z: 3 })
///     .add_tag::<Enemy>();
/// let e = store.create_from_batch(&batch)?;
/// store.apply_batch(other, &batch)?;
/// ```
#[derive(Default)]
pub struct EntityBatch {
    ops: Vec<BatchOp>,
}

impl EntityBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: Component + Clone>(mut self, value: T) -> Self {
        self.ops.push(BatchOp::Add {
            marker: component_id::<T>(),
            value: Some(Box::new(value)),
        });
        self
    }

    pub fn add_tag<T: Tag>(mut self) -> Self {
        self.ops.push(BatchOp::Add {
            marker: tag_id::<T>(),
            value: None,
        });
        self
    }

    pub fn remove<T: Component>(mut self) -> Self {
        self.ops.push(BatchOp::Remove {
            marker: component_id::<T>(),
        });
        self
    }

    pub fn remove_tag<T: Tag>(mut self) -> Self {
        self.ops.push(BatchOp::Remove { marker: tag_id::<T>() });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Ops with cloned values; the batch stays usable.
    pub(crate) fn to_ops(&self) -> Vec<Op> {
        self.ops
            .iter()
            .map(|op| match op {
                BatchOp::Add { marker, value } => Op::Add {
                    marker: *marker,
                    value: value.as_ref().map(|value| value.clone_boxed()),
                },
                BatchOp::Remove { marker } => Op::Remove { marker: *marker },
            })
            .collect()
    }

    /// Ops with the batch's own values moved out.
    pub(crate) fn into_ops(self) -> Vec<Op> {
        self.ops
            .into_iter()
            .map(|op| match op {
                BatchOp::Add { marker, value } => Op::Add {
                    marker,
                    value: value.map(|value| value.into_boxed()),
                },
                BatchOp::Remove { marker } => Op::Remove { marker },
            })
            .collect()
    }
}

impl fmt::Debug for EntityBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for op in &self.ops {
            let (verb, marker) = match op {
                BatchOp::Add { marker, .. } => ("add", *marker),
                BatchOp::Remove { marker } => ("remove", *marker),
            };
            let name = marker_meta(marker).map_or("<unregistered>", |meta| meta.name);
            list.entry(&format_args!("{verb} {name}"));
        }
        list.finish()
    }
}

impl EntityStore {
    /// Apply every change of `batch` to `entity` in one move.
    ///
    /// Nothing changes if any step fails.
    pub fn apply_batch(&mut self, entity: Entity, batch: &EntityBatch) -> EcsResult<()> {
        self.apply_ops(entity, batch.to_ops())?;
        Ok(())
    }

    /// Create an entity that already carries everything `batch` adds.
    pub fn create_from_batch(&mut self, batch: &EntityBatch) -> EcsResult<Entity> {
        self.create_with_ops(None, batch.to_ops())
    }

    pub fn create_from_batch_with_pid(&mut self, pid: Pid, batch: &EntityBatch) -> EcsResult<Entity> {
        self.create_with_ops(Some(pid), batch.to_ops())
    }

    /// Create `count` entities sharing the contents of `batch`.
    ///
    /// The target archetype is resolved once and its rows reserved up front.
    pub fn create_many(&mut self, batch: &EntityBatch, count: usize) -> EcsResult<Vec<Entity>> {
        let probe = Changes::fold(self.index.handle(0), &[], &[], batch.to_ops(), false)?;
        self.check_values(None, &probe.values)?;
        // Copies of one unique key would collide with each other.
        if count > 1 {
            let key = probe
                .values
                .iter()
                .filter(|(marker, _)| is_unique(*marker))
                .find_map(|(_, value)| unique::key_of(value.as_ref()));
            if let Some(key) = key {
                return Err(EcsError::DuplicateUniqueKey {
                    key: key.to_owned(),
                    holder: 0,
                });
            }
        }

        let target = self.archetypes.get_or_create(&Signature::from_markers(probe.markers.clone()));
        self.reserve_rows(target, count);
        let mut entities = Vec::with_capacity(count);
        let mut next = Some(probe);
        for _ in 0..count {
            let changes = match next.take() {
                Some(changes) => changes,
                None => Changes::fold(self.index.handle(0), &[], &[], batch.to_ops(), false)?,
            };
            entities.push(self.spawn_into(target, None, changes)?);
        }
        Ok(entities)
    }
}

fn is_unique(marker: MarkerId) -> bool {
    marker_meta(marker).is_some_and(|meta| meta.role == ComponentRole::Unique)
}
