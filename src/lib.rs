//! Crowd Simulation Core
//!
//! A per-frame pipeline that walks a large fixed population of units across
//! a bounded 2D field: each unit steers toward a destination, repels from
//! same-cell neighbors found through a spatial hash, and receives a freshly
//! sampled destination through its paired target marker once it arrives.
//! Uses `bevy_ecs` for the entity-component-system architecture.

pub mod api;
pub mod components;
pub mod profiler;
pub mod rng;
pub mod spatial;
pub mod systems;
pub mod world;

pub use api::{SimConfig, SimError, SimWorld};
pub use components::*;
pub use rng::RandomPool;
pub use spatial::SpatialHashGrid;
pub use systems::*;
pub use world::Snapshot;
