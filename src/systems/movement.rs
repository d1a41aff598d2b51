//! Movement integration - steers non-idle units toward their destinations.

use crate::api::SimConfig;
use crate::components::*;
use crate::spatial::clamp_to_field;
use bevy_ecs::prelude::*;

/// Resource containing the delta time for the current tick.
#[derive(Resource, Default)]
pub struct DeltaTime(pub f32);

/// Records the first non-finite unit position seen during integration.
///
/// A tick in progress always runs to completion; the orchestrator inspects
/// this resource afterwards and surfaces the fault as an error.
#[derive(Resource, Debug, Default)]
pub struct TickFault(pub Option<FaultInfo>);

#[derive(Debug, Clone, Copy)]
pub struct FaultInfo {
    pub index: u32,
    pub x: f32,
    pub z: f32,
}

/// System that advances every non-idle unit by one tick.
///
/// The steering direction is the normalized waypoint direction plus the raw
/// avoidance vector - the sum is deliberately left un-normalized, so strong
/// avoidance can dominate or cancel goal-seeking. The new position is clamped
/// per-axis into `[0, field_size]`, then arrival is detected within the
/// unit's `min_arrival_distance`. Idle units are left untouched; their
/// reassignment happens in the target-assignment passes.
pub fn movement_system(
    dt: Res<DeltaTime>,
    config: Res<SimConfig>,
    mut fault: ResMut<TickFault>,
    mut query: Query<(
        &UnitId,
        &mut Position,
        &Destination,
        &Avoidance,
        &UnitMotion,
        &mut Reached,
    )>,
) {
    let delta = dt.0;
    let speed = config.units_per_second;
    let size = config.field_size;

    for (id, mut pos, dest, avoid, motion, mut reached) in query.iter_mut() {
        if reached.0 {
            continue;
        }

        let dx = dest.x - pos.x;
        let dz = dest.z - pos.z;
        let len = (dx * dx + dz * dz).sqrt();
        // Zero-length waypoint direction degenerates to pure avoidance.
        let (wx, wz) = if len > f32::EPSILON {
            (dx / len, dz / len)
        } else {
            (0.0, 0.0)
        };

        let step_x = (wx + avoid.x) * speed * delta;
        let step_z = (wz + avoid.z) * speed * delta;
        *pos = clamp_to_field(Position::new(pos.x + step_x, pos.z + step_z), size);

        if !pos.is_finite() {
            if fault.0.is_none() {
                fault.0 = Some(FaultInfo {
                    index: id.0,
                    x: pos.x,
                    z: pos.z,
                });
            }
            continue;
        }

        if pos.distance_to(&dest.as_position()) <= motion.min_arrival_distance {
            reached.0 = true;
        }
    }
}
