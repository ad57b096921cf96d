use serde::{Deserialize, Serialize};

/// Human-readable label. Names are not required to be unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityName {
    pub value: String,
}

impl EntityName {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }
}

crate::define_component!(EntityName, "name");
