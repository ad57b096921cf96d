//! Keystone Runtime
//!
//! Small driver that builds a store, runs a few simulation steps over it and
//! logs what happened. An optional first argument names a JSON file with a
//! `StoreConfig`.

use anyhow::{Context, Result};
use keystone_core::ecs::{CommandBuffer, EntityBatch, EntityName, EntityStore, Query, UniqueEntity};
use keystone_core::StoreConfig;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Position {
    x: f32,
    y: f32,
}
keystone_core::define_component!(Position, "pos");

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Velocity {
    dx: f32,
    dy: f32,
}
keystone_core::define_component!(Velocity, "vel");

struct Resting;
keystone_core::define_tag!(Resting, "resting");

const SWARM: usize = 10_000;
const STEPS: usize = 5;

fn load_config() -> Result<StoreConfig> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(StoreConfig::default());
    };
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading config {path}"))?;
    let config = serde_json::from_str(&text).with_context(|| format!("parsing config {path}"))?;
    Ok(config)
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Keystone v{}", keystone_core::VERSION);
    let config = load_config()?;
    tracing::info!(?config, "store configuration");
    let mut store = EntityStore::with_config(config);

    let world = store.create_from_batch(
        &EntityBatch::new()
            .add(UniqueEntity::new("world"))
            .add(EntityName::new("world")),
    )?;

    let swarm = EntityBatch::new()
        .add(Position { x: 0.0, y: 0.0 })
        .add(Velocity { dx: 1.0, dy: 0.5 });
    let movers = store.create_many(&swarm, SWARM)?;
    for &mover in movers.iter().take(8) {
        store.add_child(world, mover)?;
    }
    tracing::info!(
        entities = store.len(),
        archetypes = store.archetype_count(),
        "spawned swarm"
    );

    let mut moving = Query::new().with::<Position>().with::<Velocity>().without_tag::<Resting>();
    for step in 0..STEPS {
        moving.par_for_each_mut2::<Position, Velocity, _>(&mut store, |pos, vel| {
            pos.x += vel.dx;
            pos.y += vel.dy;
        })?;

        // Every step another slice of the swarm comes to rest.
        let mut commands = CommandBuffer::new();
        for chunk in moving.iter_chunks(&store) {
            for &id in chunk.entities().iter().step_by(STEPS + 1) {
                if let Some(entity) = store.entity_by_id(id) {
                    commands.add_tag::<Resting>(entity);
                }
            }
        }
        commands.apply(&mut store)?;
        tracing::info!(step, moving = moving.count(&store), "simulation step");
    }

    if let Some(world) = store.unique_entity("world") {
        tracing::info!(children = store.child_count(world)?, "world record:\n{}", store.debug_json(world)?);
    }
    for (name, value) in store.counters().snapshot() {
        tracing::info!(counter = name, value, "store counter");
    }
    Ok(())
}
