//! Serializable snapshot of the simulation state.
//!
//! The `Snapshot` struct is the read surface presentation layers consume:
//! every unit's and target marker's current position, cell index and
//! arrival state, serializable to JSON.

use crate::components::*;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// Snapshot of a single unit's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub index: u32,
    pub x: f32,
    pub z: f32,
    pub dest_x: f32,
    pub dest_z: f32,
    pub cell_index: i32,
    pub reached: bool,
    pub colliding: bool,
}

/// Snapshot of a single target marker's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub index: u32,
    pub x: f32,
    pub z: f32,
    pub cell_index: i32,
    pub reached: bool,
}

/// Complete simulation state snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Current simulation tick.
    pub tick: u64,
    /// Elapsed simulation time in seconds.
    pub time: f32,
    /// All units, sorted by index.
    pub units: Vec<UnitSnapshot>,
    /// All target markers, sorted by index.
    pub targets: Vec<TargetSnapshot>,
}

impl Snapshot {
    /// Create a snapshot from the ECS world.
    pub fn from_world(world: &mut World, tick: u64, time: f32) -> Self {
        let mut units = Vec::new();
        let mut unit_query = world.query::<(
            &UnitId,
            &Position,
            &Destination,
            &CellIndex,
            &Reached,
            &CollisionDebug,
        )>();
        for (id, pos, dest, cell, reached, collision) in unit_query.iter(world) {
            units.push(UnitSnapshot {
                index: id.0,
                x: pos.x,
                z: pos.z,
                dest_x: dest.x,
                dest_z: dest.z,
                cell_index: cell.0,
                reached: reached.0,
                colliding: collision.colliding,
            });
        }

        let mut targets = Vec::new();
        let mut target_query = world.query::<(&TargetId, &Position, &CellIndex, &Reached)>();
        for (id, pos, cell, reached) in target_query.iter(world) {
            targets.push(TargetSnapshot {
                index: id.0,
                x: pos.x,
                z: pos.z,
                cell_index: cell.0,
                reached: reached.0,
            });
        }

        units.sort_by_key(|u| u.index);
        targets.sort_by_key(|t| t.index);

        Self {
            tick,
            time,
            units,
            targets,
        }
    }

    /// Serialize snapshot to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize snapshot to pretty JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize a snapshot from a JSON string.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}
