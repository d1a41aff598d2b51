//! Local avoidance - per-unit repulsion from same-cell occupants.
//!
//! Each unit queries only its own grid cell, never the 3x3 neighborhood.
//! Units close to a cell boundary can therefore miss neighbors on the other
//! side; this is a documented approximation traded for query cost, not a
//! bug to patch here (see DESIGN.md).

use crate::api::SimConfig;
use crate::components::*;
use crate::spatial::SpatialHashGrid;
use crate::systems::movement::DeltaTime;
use bevy_ecs::prelude::*;

/// Repulsion threshold in field units. The running nearest-distance starts
/// here and only tightens; occupants beyond it never contribute.
pub const AVOIDANCE_RADIUS: f32 = 1.5;

/// Distance below which a pair counts as a debug-visible collision.
pub const CONTACT_DISTANCE: f32 = 0.05;

/// Outcome of resolving one unit's cell against the grid.
struct CellAvoidance {
    x: f32,
    z: f32,
    nearest: f32,
    contact: bool,
}

/// Walk the unit's own bucket and accumulate repulsion from every occupant
/// that tightens the running distance threshold. The accumulated sum of
/// away-pointing unit vectors is averaged over the contributor count; no
/// contributors means a zero vector.
fn resolve_cell_avoidance(grid: &SpatialHashGrid, pos: Position) -> CellAvoidance {
    let key = grid.cell_key(pos.x, pos.z);
    let mut nearest = AVOIDANCE_RADIUS;
    let mut sum_x = 0.0;
    let mut sum_z = 0.0;
    let mut total = 0u32;
    let mut contact = false;

    for &(ox, oz) in grid.bucket(key) {
        // The grid stores bare positions; self-exclusion is by exact equality.
        if ox == pos.x && oz == pos.z {
            continue;
        }
        let dx = pos.x - ox;
        let dz = pos.z - oz;
        let distance = (dx * dx + dz * dz).sqrt();

        if distance < CONTACT_DISTANCE {
            contact = true;
        }

        if nearest > distance {
            nearest = distance;
            if distance > 0.0 {
                sum_x += dx / distance;
                sum_z += dz / distance;
                total += 1;
            }
        }
    }

    // Guard the zero-contributor case rather than dividing by zero.
    let (x, z) = if total > 0 {
        (sum_x / total as f32, sum_z / total as f32)
    } else {
        (0.0, 0.0)
    };
    CellAvoidance {
        x,
        z,
        nearest,
        contact,
    }
}

/// System that recomputes every unit's avoidance vector from the grid built
/// this frame. Must run strictly after the grid rebuild and strictly before
/// movement integration.
pub fn avoidance_system(
    dt: Res<DeltaTime>,
    config: Res<SimConfig>,
    grid: Res<SpatialHashGrid>,
    mut query: Query<(&Position, &mut Avoidance, &mut CollisionDebug), With<UnitId>>,
) {
    let delta = dt.0;

    if !config.resolve_collisions {
        for (_, mut avoid, mut debug) in query.iter_mut() {
            avoid.reset(AVOIDANCE_RADIUS);
            debug.decay(delta);
        }
        return;
    }

    let outcomes: Vec<CellAvoidance>;
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        let positions: Vec<Position> = query.iter().map(|(pos, _, _)| *pos).collect();
        outcomes = positions
            .par_iter()
            .map(|pos| resolve_cell_avoidance(&grid, *pos))
            .collect();
    }
    #[cfg(not(feature = "parallel"))]
    {
        outcomes = query
            .iter()
            .map(|(pos, _, _)| resolve_cell_avoidance(&grid, *pos))
            .collect();
    }

    // Query iteration order is stable within the system, so the write-back
    // zip lines up with the collection pass above.
    for ((_, mut avoid, mut debug), outcome) in query.iter_mut().zip(outcomes) {
        avoid.x = outcome.x;
        avoid.z = outcome.z;
        avoid.nearest = outcome.nearest;
        if outcome.contact {
            debug.mark_contact();
        }
        debug.decay(delta);
    }
}
