use serde::{Deserialize, Serialize};

use crate::ecs::{Component, ComponentRole};

/// Store-wide unique string key, looked up with `EntityStore::unique_entity`.
///
/// Adding a key that another live entity already holds fails with
/// `EcsError::DuplicateUniqueKey`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueEntity {
    pub uid: String,
}

impl UniqueEntity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: uid.into() }
    }
}

impl Component for UniqueEntity {
    const KEY: &'static str = "unique";
    const ROLE: ComponentRole = ComponentRole::Unique;
}
