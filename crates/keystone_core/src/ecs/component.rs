// component.rs - Runtime marker registration
//
// Components and tags share one id space ("markers"). Ids are handed out on
// first use, so two stores in the same process agree on them.

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::ecs::storage::{Column, ErasedColumn};
use crate::ecs::EntityId;

/// Dense id shared by components and tags.
pub type MarkerId = u16;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Component,
    Tag,
}

/// How the store treats a component type beyond plain storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ComponentRole {
    /// Plain data.
    Data,
    /// Holds a reference to another entity, tracked in the reverse link index.
    Link,
    /// Indexed by its key for `EntityStore::unique_entity`.
    Unique,
    /// Hierarchy parent reference, maintained by the hierarchy API.
    Parent,
    /// Hierarchy child list, maintained by the hierarchy API.
    Children,
}

impl ComponentRole {
    pub fn is_hierarchy(self) -> bool {
        matches!(self, ComponentRole::Parent | ComponentRole::Children)
    }

    /// Roles whose values feed a store-side index.
    pub fn is_indexed(self) -> bool {
        matches!(self, ComponentRole::Link | ComponentRole::Unique)
    }
}

/// Plain-data value attached to an entity. At most one per type per entity.
///
/// Use [`define_component!`](crate::define_component) or
/// [`define_link!`](crate::define_link) instead of implementing by hand.
pub trait Component: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Record key used by snapshots and debug JSON.
    const KEY: &'static str;

    #[doc(hidden)]
    const ROLE: ComponentRole = ComponentRole::Data;

    /// Target entities of a link component, in order.
    fn link_targets(&self) -> Vec<EntityId> {
        Vec::new()
    }

    /// Drop `target` from a link component. Returns whether any target is left;
    /// a link without targets is removed from its entity.
    fn unlink_target(&mut self, _target: EntityId) -> bool {
        false
    }
}

/// Zero-size marker attached to an entity.
pub trait Tag: Send + Sync + 'static {
    /// Name shown in records. Falls back to the type name without its path.
    const NAME: Option<&'static str> = None;
}

/// Type-erased hooks for one component type.
#[derive(Copy, Clone)]
pub(crate) struct ComponentVTable {
    pub value_type: TypeId,
    pub new_column: fn(usize) -> Box<dyn ErasedColumn>,
    pub decode: fn(serde_json::Value) -> Result<Box<dyn Any + Send>, serde_json::Error>,
    pub link_targets: fn(&dyn Any) -> Vec<EntityId>,
    pub unlink_target: fn(&mut dyn Any, EntityId) -> bool,
}

/// Everything the store knows about a registered marker.
#[derive(Copy, Clone)]
pub struct MarkerMeta {
    pub id: MarkerId,
    pub kind: MarkerKind,
    /// Record key for components, display name for tags.
    pub name: &'static str,
    pub type_name: &'static str,
    pub role: ComponentRole,
    pub(crate) vtable: Option<ComponentVTable>,
}

impl MarkerMeta {
    pub fn is_component(&self) -> bool {
        self.kind == MarkerKind::Component
    }

    /// Whether `value` has this component's type.
    pub(crate) fn accepts(&self, value: &(dyn Any + Send)) -> bool {
        self.vtable.is_some_and(|vtable| value.type_id() == vtable.value_type)
    }
}

impl std::fmt::Debug for MarkerMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkerMeta")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("role", &self.role)
            .finish()
    }
}

#[derive(Default)]
struct MarkerRegistry {
    metas: Vec<MarkerMeta>,
    by_type: HashMap<TypeId, MarkerId>,
    components_by_key: HashMap<&'static str, MarkerId>,
    tags_by_name: HashMap<&'static str, MarkerId>,
}

impl MarkerRegistry {
    fn register(
        &mut self,
        type_id: TypeId,
        make: impl FnOnce(MarkerId) -> MarkerMeta,
    ) -> MarkerId {
        if let Some(&id) = self.by_type.get(&type_id) {
            return id;
        }
        let id = MarkerId::try_from(self.metas.len()).unwrap_or_else(|_| {
            panic!("more than {} marker types registered", MarkerId::MAX)
        });
        let meta = make(id);
        let names = match meta.kind {
            MarkerKind::Component => &mut self.components_by_key,
            MarkerKind::Tag => &mut self.tags_by_name,
        };
        let slot = names.entry(meta.name).or_insert(id);
        if *slot != id {
            tracing::warn!(
                name = meta.name,
                type_name = meta.type_name,
                "marker name already registered by another type; records resolve to the first"
            );
        }
        self.metas.push(meta);
        self.by_type.insert(type_id, id);
        id
    }
}

static REGISTRY: Lazy<RwLock<MarkerRegistry>> = Lazy::new(|| RwLock::new(MarkerRegistry::default()));

fn lookup(type_id: TypeId) -> Option<MarkerId> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .by_type
        .get(&type_id)
        .copied()
}

fn decode_value<T: Component>(value: serde_json::Value) -> Result<Box<dyn Any + Send>, serde_json::Error> {
    let value: T = serde_json::from_value(value)?;
    Ok(Box::new(value))
}

/// Targets of a link value, each listed once.
fn link_targets_of<T: Component>(value: &dyn Any) -> Vec<EntityId> {
    let Some(value) = value.downcast_ref::<T>() else {
        return Vec::new();
    };
    let mut targets = value.link_targets();
    let mut seen = Vec::with_capacity(targets.len());
    targets.retain(|&target| {
        let first = !seen.contains(&target);
        seen.push(target);
        first
    });
    targets
}

fn unlink_target_of<T: Component>(value: &mut dyn Any, target: EntityId) -> bool {
    value
        .downcast_mut::<T>()
        .is_some_and(|value| value.unlink_target(target))
}

fn new_column<T: Component>(capacity: usize) -> Box<dyn ErasedColumn> {
    Box::new(Column::<T>::with_capacity(capacity))
}

/// Marker id of component `T`, registering it on first use.
pub fn component_id<T: Component>() -> MarkerId {
    if let Some(id) = lookup(TypeId::of::<T>()) {
        return id;
    }
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(TypeId::of::<T>(), |id| MarkerMeta {
            id,
            kind: MarkerKind::Component,
            name: T::KEY,
            type_name: type_name::<T>(),
            role: T::ROLE,
            vtable: Some(ComponentVTable {
                value_type: TypeId::of::<T>(),
                new_column: new_column::<T>,
                decode: decode_value::<T>,
                link_targets: link_targets_of::<T>,
                unlink_target: unlink_target_of::<T>,
            }),
        })
}

/// Marker id of tag `T`, registering it on first use.
pub fn tag_id<T: Tag>() -> MarkerId {
    if let Some(id) = lookup(TypeId::of::<T>()) {
        return id;
    }
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(TypeId::of::<T>(), |id| MarkerMeta {
            id,
            kind: MarkerKind::Tag,
            name: T::NAME.unwrap_or_else(short_type_name::<T>),
            type_name: type_name::<T>(),
            role: ComponentRole::Data,
            vtable: None,
        })
}

fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    // Keep generic arguments intact: only strip the path before the first '<'.
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(pos) => &full[pos + 2..],
        None => full,
    }
}

/// Metadata for a registered marker id.
pub fn marker_meta(id: MarkerId) -> Option<MarkerMeta> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .metas
        .get(id as usize)
        .copied()
}

/// Component registered under record key `key`.
pub fn component_by_key(key: &str) -> Option<MarkerMeta> {
    find_by_name(MarkerKind::Component, key)
}

/// Tag registered under display name `name`.
pub fn tag_by_name(name: &str) -> Option<MarkerMeta> {
    find_by_name(MarkerKind::Tag, name)
}

fn find_by_name(kind: MarkerKind, name: &str) -> Option<MarkerMeta> {
    let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
    let names = match kind {
        MarkerKind::Component => &registry.components_by_key,
        MarkerKind::Tag => &registry.tags_by_name,
    };
    let id = *names.get(name)?;
    registry.metas.get(id as usize).copied()
}

/// Define a plain-data component.
///
/// # Example
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Position { x: i32, y: i32, z: i32 }
///
/// define_component!(Position, "pos");
/// ```
#[macro_export]
macro_rules! define_component {
    ($ty:ty, $key:expr) => {
        impl $crate::ecs::Component for $ty {
            const KEY: &'static str = $key;
        }
    };
}

/// Define a link component: a component whose field `$field` names the
/// target entity id.
///
/// # Example
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct AttackTarget { entity: EntityId }
///
/// define_link!(AttackTarget, "attack", entity);
/// ```
#[macro_export]
macro_rules! define_link {
    ($ty:ty, $key:expr, $field:ident) => {
        impl $crate::ecs::Component for $ty {
            const KEY: &'static str = $key;
            const ROLE: $crate::ecs::ComponentRole = $crate::ecs::ComponentRole::Link;

            fn link_targets(&self) -> Vec<$crate::ecs::EntityId> {
                vec![self.$field]
            }
        }
    };
}

/// Define a multi-target link component: field `$field` is a
/// `Vec<EntityId>` listing the targets in order.
///
/// Deleting a target drops it from the list; the component goes away with
/// its last target.
///
/// # Example
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Watching { entities: Vec<EntityId> }
///
/// define_links!(Watching, "watching", entities);
/// ```
#[macro_export]
macro_rules! define_links {
    ($ty:ty, $key:expr, $field:ident) => {
        impl $crate::ecs::Component for $ty {
            const KEY: &'static str = $key;
            const ROLE: $crate::ecs::ComponentRole = $crate::ecs::ComponentRole::Link;

            fn link_targets(&self) -> Vec<$crate::ecs::EntityId> {
                self.$field.clone()
            }

            fn unlink_target(&mut self, target: $crate::ecs::EntityId) -> bool {
                self.$field.retain(|&linked| linked != target);
                !self.$field.is_empty()
            }
        }
    };
}

/// Define a tag, optionally with an explicit record name.
#[macro_export]
macro_rules! define_tag {
    ($ty:ty) => {
        impl $crate::ecs::Tag for $ty {}
    };
    ($ty:ty, $name:expr) => {
        impl $crate::ecs::Tag for $ty {
            const NAME: Option<&'static str> = Some($name);
        }
    };
}
