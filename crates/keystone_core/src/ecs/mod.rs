//! Archetype-based entity store.
//!
//! Entities sharing the same set of components and tags (their signature)
//! live together in one archetype table with a dense column per component.
//! Structural changes move an entity's row between archetypes and compact the
//! vacated row by swapping in the last one. Queries cache the archetypes they
//! match and hand out contiguous column slices.
//!
//! Relations are plain components holding entity ids: `Parent`/`Children`
//! for the hierarchy and user-defined link components, with reverse indexes
//! kept by the store.

mod archetype;
mod batch;
mod commands;
mod component;
pub mod components;
mod entity;
mod entity_index;
mod entity_list;
mod error;
mod hierarchy;
mod links;
mod query;
mod signature;
mod snapshot;
pub mod storage;
pub(crate) mod store;
pub(crate) mod unique;


pub use archetype::{Archetype, ArchetypeId, ArchetypeRegistry, EMPTY_ARCHETYPE};
pub use batch::EntityBatch;
pub use commands::CommandBuffer;
pub use component::{
    component_by_key, component_id, marker_meta, tag_by_name, tag_id, Component, ComponentRole, MarkerId,
    MarkerKind, MarkerMeta, Tag,
};
pub use components::{Children, EntityName, Parent, UniqueEntity};
pub use entity::{Entity, EntityId, EntityLocation, Pid};
pub use entity_list::EntityList;
pub use error::{EcsError, EcsResult};
pub use links::{EntityLink, EntityLinks};
pub use query::{Chunk, ChunkRef, Chunks, Query};
pub use signature::Signature;
pub use snapshot::EntitySnapshot;
pub use store::EntityStore;
