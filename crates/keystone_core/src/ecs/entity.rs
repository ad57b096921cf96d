//! Entity handle with generational index
//!
//! Entities are lightweight handles (8 bytes) that reference rows in the
//! store. The generation counter prevents use-after-free bugs when ids are
//! recycled.

use std::fmt;

use crate::ecs::ArchetypeId;

/// Dense, reusable entity id. `0` is never allocated.
pub type EntityId = u32;

/// Persistent id, stable across sessions.
pub type Pid = u64;

/// Entity handle (generation-indexed for safety)
///
/// Format: [32-bit generation | 32-bit id]
/// - Id: Position in the entity index
/// - Generation: Incremented on entity deletion (prevents use-after-free)
///
/// Example:
/// ```ignore
/// let entity = store.create_entity();
/// store.delete_entity(entity)?;
/// // entity handle is now invalid (generation mismatch)
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    id: EntityId,
    generation: u32,
}

impl Entity {
    pub(crate) const fn new(id: EntityId, generation: u32) -> Self {
        Self { id, generation }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Serialize to 64-bit integer (for networking/save files)
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | (self.id as u64)
    }

    /// Deserialize from 64-bit integer
    pub fn from_bits(bits: u64) -> Self {
        Self {
            id: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity {}v{}", self.id, self.generation)
    }
}

/// Physical address of an entity's row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    pub row: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip_keeps_generation() {
        let entity = Entity::new(42, 7);
        let back = Entity::from_bits(entity.to_bits());
        assert_eq!(back, entity);
        assert_eq!(back.id(), 42);
        assert_eq!(back.generation(), 7);
    }
}
