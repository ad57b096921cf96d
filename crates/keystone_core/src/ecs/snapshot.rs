// snapshot.rs - Per-entity records for external serializers
//
// A record holds an entity's pid, its children as pids, a map from component
// key to the component value as JSON, and its tag names. `debug_json` and
// `set_debug_json` render and parse the same record, so there is a single
// conversion between store state and record.

use std::collections::HashSet;
use std::fmt::Write;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::ecs::store::Op;
use crate::ecs::{
    component_by_key, marker_meta, tag_by_name, Children, EcsError, EcsResult, Entity, EntityId, EntityStore,
    MarkerId, Pid,
};

/// Portable description of one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    #[serde(rename = "id", default)]
    pub pid: Pid,
    /// Child pids in order. `None` when the entity has no children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Pid>>,
    /// Component key -> value, in attachment order.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub components: Map<String, Value>,
    /// Tag names in attachment order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl EntitySnapshot {
    /// Indented rendering with one line per component value.
    pub fn to_debug_json(&self) -> String {
        let mut fields = vec![format!("    \"id\": {}", self.pid)];
        if let Some(children) = self.children.as_ref().filter(|children| !children.is_empty()) {
            let items: Vec<String> = children.iter().map(|pid| format!("        {pid}")).collect();
            fields.push(format!("    \"children\": [\n{}\n    ]", items.join(",\n")));
        }
        if !self.components.is_empty() {
            let mut items = Vec::with_capacity(self.components.len());
            for (key, value) in &self.components {
                let mut line = String::from("        ");
                let _ = write!(line, "{}: {}", quote(key), value);
                items.push(line);
            }
            fields.push(format!("    \"components\": {{\n{}\n    }}", items.join(",\n")));
        }
        if !self.tags.is_empty() {
            let items: Vec<String> = self.tags.iter().map(|tag| format!("        {}", quote(tag))).collect();
            fields.push(format!("    \"tags\": [\n{}\n    ]", items.join(",\n")));
        }
        format!("{{\n{}\n}}", fields.join(",\n"))
    }
}

fn quote(text: &str) -> String {
    Value::from(text).to_string()
}

/// A child listed in a record, either present or to be created.
enum RecordChild {
    Existing(EntityId),
    Missing(Pid),
}

impl EntityStore {
    /// Record of `entity`'s current state.
    pub fn export_entity(&self, entity: Entity) -> EcsResult<EntitySnapshot> {
        let slot = self.index.resolve(entity)?;
        let location = self.index.location(entity)?;
        let archetype = self.archetypes.get(location.archetype);

        let mut components = Map::new();
        let mut tags = Vec::new();
        for &marker in &slot.order {
            let Some(meta) = marker_meta(marker) else {
                continue;
            };
            if !meta.is_component() {
                tags.push(meta.name.to_owned());
                continue;
            }
            if meta.role.is_hierarchy() {
                continue;
            }
            if let Some(column) = archetype.column_index(marker) {
                let value = archetype
                    .erased_column(column)
                    .encode(location.row)
                    .map_err(|err| EcsError::record(entity, format!("components.{}", meta.name), err.to_string()))?;
                components.insert(meta.name.to_owned(), value);
            }
        }

        let children = self.component_by_id::<Children>(entity.id()).map(|children| {
            children
                .ids()
                .iter()
                .filter_map(|&id| self.index.slot(id).map(|slot| slot.pid))
                .collect()
        });

        Ok(EntitySnapshot {
            pid: slot.pid,
            children,
            components,
            tags,
        })
    }

    /// Replace the components, tags and children of `entity` with the record's.
    ///
    /// The entity keeps its own id and pid. Children whose pid is unknown are
    /// created. Nothing changes when the record is rejected.
    pub fn import_entity(&mut self, entity: Entity, record: &EntitySnapshot) -> EcsResult<()> {
        let current_order = self.index.resolve(entity)?.order.clone();

        let mut markers: Vec<MarkerId> = Vec::with_capacity(record.components.len() + record.tags.len());
        let mut adds = Vec::with_capacity(markers.capacity());
        for (key, value) in &record.components {
            let path = format!("components.{key}");
            let meta = component_by_key(key)
                .ok_or_else(|| EcsError::record(entity, &path, format!("unknown component key '{key}'")))?;
            if meta.role.is_hierarchy() {
                return Err(EcsError::record(
                    entity,
                    path,
                    "hierarchy is described by the record's children",
                ));
            }
            let vtable = meta
                .vtable
                .ok_or_else(|| EcsError::record(entity, &path, "component has no decoder"))?;
            let value = (vtable.decode)(value.clone()).map_err(|err| EcsError::record(entity, &path, err.to_string()))?;
            markers.push(meta.id);
            adds.push(Op::Add {
                marker: meta.id,
                value: Some(value),
            });
        }
        for (i, name) in record.tags.iter().enumerate() {
            let meta = tag_by_name(name)
                .ok_or_else(|| EcsError::record(entity, format!("tags[{i}]"), format!("unknown tag '{name}'")))?;
            if !markers.contains(&meta.id) {
                markers.push(meta.id);
                adds.push(Op::Add {
                    marker: meta.id,
                    value: None,
                });
            }
        }

        let children = self.record_children(entity, record)?;

        let mut ops: Vec<Op> = current_order
            .iter()
            .copied()
            .filter(|marker| !markers.contains(marker))
            .filter(|&marker| marker_meta(marker).is_some_and(|meta| !meta.role.is_hierarchy()))
            .map(|marker| Op::Remove { marker })
            .collect();
        ops.extend(adds);
        self.apply_ops(entity, ops)?;

        if let Some(slot) = self.index.slot_mut(entity.id()) {
            let mut order: Vec<MarkerId> = slot
                .order
                .iter()
                .copied()
                .filter(|marker| !markers.contains(marker))
                .collect();
            order.extend_from_slice(&markers);
            slot.order = order;
        }

        let mut ids = Vec::with_capacity(children.len());
        for child in children {
            match child {
                RecordChild::Existing(id) => ids.push(id),
                RecordChild::Missing(pid) => ids.push(self.create_entity_with_pid(pid)?.id()),
            }
        }
        self.replace_children(entity, &ids)?;
        debug!(
            entity = %entity,
            components = record.components.len(),
            tags = record.tags.len(),
            children = ids.len(),
            "imported entity record"
        );
        Ok(())
    }

    /// Resolve the record's child pids without touching the store.
    fn record_children(&self, entity: Entity, record: &EntitySnapshot) -> EcsResult<Vec<RecordChild>> {
        let pids = record.children.as_deref().unwrap_or_default();
        let mut seen = HashSet::with_capacity(pids.len());
        let mut children = Vec::with_capacity(pids.len());
        for (i, &pid) in pids.iter().enumerate() {
            if !seen.insert(pid) {
                return Err(EcsError::record(
                    entity,
                    format!("children[{i}]"),
                    format!("child pid {pid} is listed twice"),
                ));
            }
            match self.index.by_pid(pid) {
                Some(id) => {
                    if id == entity.id() || self.is_ancestor_id(id, entity.id()) {
                        return Err(EcsError::CycleDetected {
                            parent: entity.id(),
                            child: id,
                        });
                    }
                    children.push(RecordChild::Existing(id));
                }
                None => {
                    self.index.check_pid(pid)?;
                    children.push(RecordChild::Missing(pid));
                }
            }
        }
        Ok(children)
    }

    /// Indented JSON record of `entity`.
    ///
    /// ```text
    /// {
    ///     "id": 10,
    ///     "children": [
    ///         11
    ///     ],
    ///     "components": {
    ///         "pos": {"x":1,"y":2,"z":3}
    ///     },
    ///     "tags": [
    ///         "TestTag"
    ///     ]
    /// }
    /// ```
    pub fn debug_json(&self, entity: Entity) -> EcsResult<String> {
        Ok(self.export_entity(entity)?.to_debug_json())
    }

    /// Parse a JSON record and import it into `entity`.
    pub fn set_debug_json(&mut self, entity: Entity, json: &str) -> EcsResult<()> {
        self.index.resolve(entity)?;
        let object: Map<String, Value> = serde_json::from_str(json).map_err(|err| EcsError::InvalidRecord {
            entity,
            path: "$".to_owned(),
            line: err.line(),
            column: err.column(),
            reason: err.to_string(),
        })?;
        let record = record_from_object(entity, object)?;
        self.import_entity(entity, &record)
    }
}

fn record_from_object(entity: Entity, mut object: Map<String, Value>) -> EcsResult<EntitySnapshot> {
    fn field<T: DeserializeOwned + Default>(
        entity: Entity,
        object: &mut Map<String, Value>,
        name: &str,
    ) -> EcsResult<T> {
        match object.remove(name) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value).map_err(|err| EcsError::record(entity, name, err.to_string())),
        }
    }

    Ok(EntitySnapshot {
        pid: field(entity, &mut object, "id")?,
        children: field(entity, &mut object, "children")?,
        components: field(entity, &mut object, "components")?,
        tags: field(entity, &mut object, "tags")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PidMode, StoreConfig};
    use crate::ecs::UniqueEntity;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Position {
        x: i32,
        y: i32,
        z: i32,
    }
    crate::define_component!(Position, "pos");

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Score {
        value: u32,
    }
    crate::define_component!(Score, "snapshot-test-score");

    struct TestTag;
    crate::define_tag!(TestTag);

    struct Hidden;
    crate::define_tag!(Hidden, "snapshot-test-hidden");

    fn pid_store() -> EntityStore {
        EntityStore::with_config(StoreConfig::default().with_pid_mode(PidMode::UsePidAsId))
    }

    fn sample(store: &mut EntityStore) -> Entity {
        let entity = store.create_entity_with_pid(10).unwrap();
        let child = store.create_entity_with_pid(11).unwrap();
        store.add_child(entity, child).unwrap();
        store.add_component(entity, Position { x: 1, y: 2, z: 3 }).unwrap();
        store.add_tag::<TestTag>(entity).unwrap();
        entity
    }

    #[test]
    fn export_lists_children_components_and_tags() {
        let mut store = pid_store();
        let entity = sample(&mut store);

        let record = store.export_entity(entity).unwrap();
        assert_eq!(record.pid, 10);
        assert_eq!(record.children, Some(vec![11]));
        assert_eq!(
            Value::Object(record.components.clone()).to_string(),
            r#"{"pos":{"x":1,"y":2,"z":3}}"#
        );
        assert_eq!(record.tags, vec!["TestTag".to_owned()]);

        let leaf = store.entity_by_pid(11).unwrap();
        assert_eq!(store.export_entity(leaf).unwrap().children, None);
    }

    #[test]
    fn debug_json_layout() {
        let mut store = pid_store();
        let entity = sample(&mut store);
        let expected = r#"{
    "id": 10,
    "children": [
        11
    ],
    "components": {
        "pos": {"x":1,"y":2,"z":3}
    },
    "tags": [
        "TestTag"
    ]
}"#;
        assert_eq!(store.debug_json(entity).unwrap(), expected);

        let empty = store.create_entity_with_pid(12).unwrap();
        assert_eq!(store.debug_json(empty).unwrap(), "{\n    \"id\": 12\n}");
    }

    #[test]
    fn import_export_is_a_fixed_point() {
        let mut store = pid_store();
        let entity = sample(&mut store);
        store.add_component(entity, Score { value: 7 }).unwrap();
        store.add_tag::<Hidden>(entity).unwrap();

        let first = store.export_entity(entity).unwrap();
        store.import_entity(entity, &first).unwrap();
        assert_eq!(store.export_entity(entity).unwrap(), first);

        let json = store.debug_json(entity).unwrap();
        store.set_debug_json(entity, &json).unwrap();
        assert_eq!(store.debug_json(entity).unwrap(), json);
        assert!(store.check_consistency().is_empty());
    }

    #[test]
    fn import_replaces_state_and_keeps_id() {
        let mut store = pid_store();
        let entity = sample(&mut store);
        let json = r#"{
            "id": 99,
            "children": [12, 11],
            "components": { "snapshot-test-score": { "value": 3 } },
            "tags": ["snapshot-test-hidden"]
        }"#;
        store.set_debug_json(entity, json).unwrap();

        assert_eq!(store.pid_of(entity).unwrap(), 10);
        assert!(!store.has::<Position>(entity));
        assert!(!store.has_tag::<TestTag>(entity));
        assert_eq!(store.get::<Score>(entity).unwrap().value, 3);
        assert!(store.has_tag::<Hidden>(entity));

        let created = store.entity_by_pid(12).unwrap();
        let kept = store.entity_by_pid(11).unwrap();
        assert_eq!(store.children_of(entity).unwrap(), vec![created, kept]);
        assert_eq!(store.parent_of(created).unwrap(), Some(entity));
        assert!(store.check_consistency().is_empty());

        store.set_debug_json(entity, "{}").unwrap();
        assert_eq!(store.child_count(entity).unwrap(), 0);
        assert_eq!(store.parent_of(kept).unwrap(), None);
        assert!(store.signature(entity).unwrap().is_empty());
    }

    #[test]
    fn malformed_json_is_rejected_without_changes() {
        let mut store = pid_store();
        let entity = sample(&mut store);
        let before = store.debug_json(entity).unwrap();

        for json in ["", "[]", "{}x", "{", r#"{"components":[]}"#, r#"{"tags":"a"}"#] {
            let result = store.set_debug_json(entity, json);
            assert!(
                matches!(result, Err(EcsError::InvalidRecord { .. })),
                "{json:?} gave {result:?}"
            );
            assert_eq!(store.debug_json(entity).unwrap(), before);
        }

        match store.set_debug_json(entity, "{\n  \"id\": 1,\n  x\n}") {
            Err(EcsError::InvalidRecord { line, column, .. }) => {
                assert_eq!(line, 3);
                assert!(column > 0);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn invalid_records_are_rejected_without_changes() {
        let mut store = pid_store();
        let entity = sample(&mut store);
        let before = store.export_entity(entity).unwrap();

        let cases = [
            (r#"{"components":{"no-such-key":{}}}"#, "components.no-such-key"),
            (r#"{"components":{"pos":{"x":"one"}}}"#, "components.pos"),
            (r#"{"components":{"children":[11]}}"#, "components.children"),
            (r#"{"tags":["TestTag","NoSuchTag"]}"#, "tags[1]"),
            (r#"{"children":[11,11]}"#, "children[1]"),
        ];
        for (json, expected_path) in cases {
            match store.set_debug_json(entity, json) {
                Err(EcsError::InvalidRecord { path, .. }) => assert_eq!(path, expected_path, "{json}"),
                other => panic!("{json} gave {other:?}"),
            }
            assert_eq!(store.export_entity(entity).unwrap(), before);
        }
    }

    #[test]
    fn import_rejects_cycles_and_duplicate_uniques() {
        let mut store = pid_store();
        let root = store.create_entity_with_pid(1).unwrap();
        let leaf = store.create_entity_with_pid(2).unwrap();
        store.add_child(root, leaf).unwrap();

        let record = EntitySnapshot {
            pid: 2,
            children: Some(vec![1]),
            ..Default::default()
        };
        assert_eq!(
            store.import_entity(leaf, &record),
            Err(EcsError::CycleDetected {
                parent: leaf.id(),
                child: root.id()
            })
        );

        store.add_component(root, UniqueEntity::new("boss")).unwrap();
        let mut components = Map::new();
        components.insert("unique".to_owned(), serde_json::json!({ "uid": "boss" }));
        let record = EntitySnapshot {
            pid: 2,
            components,
            ..Default::default()
        };
        assert!(matches!(
            store.import_entity(leaf, &record),
            Err(EcsError::DuplicateUniqueKey { .. })
        ));
        assert_eq!(store.parent_of(leaf).unwrap(), Some(root));
        assert!(store.signature(leaf).unwrap().len() == 1);
    }

    #[test]
    fn record_serializes_with_record_field_names() {
        let record = EntitySnapshot {
            pid: 4,
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"id":4}"#);
        let parsed: EntitySnapshot = serde_json::from_str(r#"{"id":4,"tags":["a"]}"#).unwrap();
        assert_eq!(parsed.tags, vec!["a".to_owned()]);
    }
}
