//! Spatial hashing for neighbor queries, plus field-index helpers.
//!
//! The grid buckets unit positions by a hashed cell key so the avoidance
//! pass can enumerate same-cell occupants in O(k) instead of scanning the
//! whole population. It is cleared and rebuilt from scratch every frame.
//!
//! The field itself is addressed two ways: continuous positions in
//! `[0, field_size]` on both axes, and a row-major integer index over unit
//! cells whose centers sit at half-integer coordinates. The helpers at the
//! bottom convert between the two.

use crate::api::SimConfig;
use crate::components::{Position, UnitId};
use bevy_ecs::prelude::*;
use std::collections::HashMap;

/// Hash-bucketed multimap from cell key to the unit positions inside the
/// cell. Multiple units routinely share a key.
///
/// One `cell_size` is used for both building and querying. Building and
/// querying at different sizes would send most neighbor lookups into
/// never-populated buckets, so the size is a single session-wide value
/// (see DESIGN.md).
#[derive(Resource, Debug)]
pub struct SpatialHashGrid {
    /// Cell size in field units, fixed per session.
    pub cell_size: f32,
    cells: HashMap<i32, Vec<(f32, f32)>>,
}

impl Default for SpatialHashGrid {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl SpatialHashGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    /// Hash a position into its cell key.
    ///
    /// The key folds both axes into one integer; distinct cells can collide,
    /// which only costs extra candidates in the avoidance distance checks.
    #[inline]
    pub fn cell_key(&self, x: f32, z: f32) -> i32 {
        ((x / self.cell_size).floor() * 19.0 + (z / self.cell_size).floor() * 17.0) as i32
    }

    /// Drop all entries while retaining allocated bucket capacity.
    /// Call at the start of each frame before reinserting.
    pub fn clear(&mut self) {
        for bucket in self.cells.values_mut() {
            bucket.clear();
        }
    }

    /// Append a position under a (non-unique) cell key.
    pub fn insert(&mut self, key: i32, x: f32, z: f32) {
        self.cells.entry(key).or_default().push((x, z));
    }

    /// All positions currently stored under `key`, in insertion order.
    pub fn bucket(&self, key: i32) -> &[(f32, f32)] {
        self.cells.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Enumerate the positions stored under `key`.
    pub fn for_each_in_bucket<F: FnMut(f32, f32)>(&self, key: i32, mut f: F) {
        for &(x, z) in self.bucket(key) {
            f(x, z);
        }
    }

    /// Total stored positions across all buckets.
    pub fn total_count(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }
}

/// System that rebuilds the spatial grid from current unit positions.
/// Runs first in the tick; every later pass reads the grid it produces.
pub fn rebuild_grid_system(
    config: Res<SimConfig>,
    mut grid: ResMut<SpatialHashGrid>,
    query: Query<&Position, With<UnitId>>,
) {
    grid.clear();
    if !config.resolve_collisions {
        return;
    }
    for pos in query.iter() {
        let key = grid.cell_key(pos.x, pos.z);
        grid.insert(key, pos.x, pos.z);
    }
}

// ============================================================================
// FIELD INDEX HELPERS
// ============================================================================

/// Row-major cell index of a position, clamping into field bounds first.
pub fn position_index(pos: Position, size: i32) -> i32 {
    let px = (pos.x - 0.5).clamp(0.0, size as f32);
    let pz = (pos.z - 0.5).clamp(0.0, size as f32);
    pz as i32 * size + px as i32
}

/// Center of the cell addressed by a row-major index.
pub fn index_position(index: i32, size: i32) -> Position {
    let x = (index % size) as f32 + 0.5;
    let z = (index / size) as f32 + 0.5;
    Position::new(x, z)
}

/// Snap a position to the nearest half-integer cell center and clamp it
/// into `[0, size]` on both axes.
pub fn snap_to_cell_center(pos: Position, size: i32) -> Position {
    let x = (pos.x - 0.5).round() + 0.5;
    let z = (pos.z - 0.5).round() + 0.5;
    clamp_to_field(Position::new(x, z), size)
}

/// Clamp a position into `[0, size]` per axis.
pub fn clamp_to_field(pos: Position, size: i32) -> Position {
    Position::new(pos.x.clamp(0.0, size as f32), pos.z.clamp(0.0, size as f32))
}
