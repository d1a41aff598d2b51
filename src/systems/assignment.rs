//! Target assignment - the three-pass destination hand-off.
//!
//! Every frame, after movement integration:
//!
//! 1. **Propose**: each idle unit samples a fresh destination on a disc
//!    around its current destination and offers it under its own index.
//! 2. **Propagate to marker**: the paired target marker adopts the proposal
//!    and un-settles itself, which is the canonical arrival event.
//! 3. **Propagate to unit**: the unit adopts the proposal too, unless the
//!    proposed cell equals its current one, in which case it stays idle and
//!    retries next tick.
//!
//! The pending table is keyed by unit index, so concurrent proposers write
//! disjoint keys; the first insert wins within a frame and nothing retries.

use crate::api::SimConfig;
use crate::components::*;
use crate::rng::{random_point_in_disc, RandomPool};
use crate::spatial::{index_position, position_index, snap_to_cell_center};
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-frame table of proposed destination cells, keyed by unit index.
/// Cleared and refilled at the start of the propose pass every frame.
#[derive(Resource, Debug, Default)]
pub struct PendingDestinations {
    entries: HashMap<u32, i32>,
}

impl PendingDestinations {
    /// Drop all entries, keeping capacity sized to the population.
    pub fn clear_and_reserve(&mut self, count: usize) {
        self.entries.clear();
        if self.entries.capacity() < count {
            self.entries.reserve(count - self.entries.capacity());
        }
    }

    /// Insert a proposal unless the key already holds one (first wins).
    /// Returns whether the proposal was stored.
    pub fn try_insert(&mut self, index: u32, cell_index: i32) -> bool {
        use std::collections::hash_map::Entry;
        match self.entries.entry(index) {
            Entry::Vacant(slot) => {
                slot.insert(cell_index);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Proposal for an index, if one was made this frame. Absence is the
    /// normal "no assignment yet" outcome, not a failure.
    pub fn get(&self, index: u32) -> Option<i32> {
        self.entries.get(&index).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One target-marker move, emitted the moment the marker adopts a new
/// position in the propagate pass. Drained by the embedding for
/// exactly-once arrival feedback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArrivalEvent {
    pub index: u32,
    pub x: f32,
    pub z: f32,
}

/// Accumulated arrival events, drained via `SimWorld::drain_arrivals`.
#[derive(Resource, Debug, Default)]
pub struct ArrivalEvents(pub Vec<ArrivalEvent>);

/// Pass 1: sample a proposed destination for every idle unit.
///
/// The disc is centered on the unit's *current destination*, not its
/// position, with radius `SimConfig::max_retarget_radius`. The sample is
/// snapped to the nearest cell center, clamped into the field, and stored as
/// a cell index. Draws come from the pool slot of the executing worker.
pub fn propose_destinations_system(
    config: Res<SimConfig>,
    pool: Res<RandomPool>,
    mut pending: ResMut<PendingDestinations>,
    query: Query<(&UnitId, &Destination, &Reached)>,
) {
    pending.clear_and_reserve(config.unit_count);
    let size = config.field_size;
    let max_radius = config.max_retarget_radius();

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        let idle: Vec<(u32, Position)> = query
            .iter()
            .filter(|(_, _, reached)| reached.0)
            .map(|(id, dest, _)| (id.0, dest.as_position()))
            .collect();
        let proposals: Vec<(u32, i32)> = idle
            .par_iter()
            .map(|&(index, center)| {
                let slot = rayon::current_thread_index().unwrap_or(0);
                let sampled =
                    pool.with_slot(slot, |rng| random_point_in_disc(rng, center, max_radius));
                (index, position_index(snap_to_cell_center(sampled, size), size))
            })
            .collect();
        for (index, cell) in proposals {
            pending.try_insert(index, cell);
        }
    }
    #[cfg(not(feature = "parallel"))]
    {
        for (id, dest, reached) in query.iter() {
            if !reached.0 {
                continue;
            }
            let sampled = pool.with_slot(0, |rng| {
                random_point_in_disc(rng, dest.as_position(), max_radius)
            });
            pending.try_insert(id.0, position_index(snap_to_cell_center(sampled, size), size));
        }
    }
}

/// Pass 2: move each settled target marker whose index has a proposal.
///
/// A pending entry exists exactly when the owning unit is idle this frame,
/// since the propose pass covers every idle unit. Clearing the marker's
/// `Reached` flag is the signal presentation layers use to know it moved;
/// the flag stays cleared until `drain_arrivals` acknowledges it, which
/// also keeps the arrival event exactly-once.
pub fn retarget_markers_system(
    config: Res<SimConfig>,
    pending: Res<PendingDestinations>,
    mut events: ResMut<ArrivalEvents>,
    mut query: Query<(&TargetId, &mut Position, &mut CellIndex, &mut Reached)>,
) {
    let size = config.field_size;
    for (id, mut pos, mut cell, mut reached) in query.iter_mut() {
        if !reached.0 {
            continue;
        }
        if let Some(cell_index) = pending.get(id.0) {
            cell.0 = cell_index;
            *pos = index_position(cell_index, size);
            reached.0 = false;
            events.0.push(ArrivalEvent {
                index: id.0,
                x: pos.x,
                z: pos.z,
            });
        }
    }
}

/// Pass 3: hand the proposal back to the idle unit.
///
/// A proposal whose cell equals the unit's current cell is a degenerate
/// no-op reassignment: the unit stays idle and tries again next tick.
pub fn apply_unit_destinations_system(
    config: Res<SimConfig>,
    pending: Res<PendingDestinations>,
    mut query: Query<(&UnitId, &mut Destination, &mut CellIndex, &mut Reached)>,
) {
    let size = config.field_size;
    for (id, mut dest, mut cell, mut reached) in query.iter_mut() {
        if !reached.0 {
            continue;
        }
        if let Some(cell_index) = pending.get(id.0) {
            if cell_index == cell.0 {
                continue;
            }
            cell.0 = cell_index;
            let pos = index_position(cell_index, size);
            *dest = Destination::new(pos.x, pos.z);
            reached.0 = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(units_per_second: f32) -> SimConfig {
        SimConfig {
            field_size: 100,
            unit_count: 4,
            units_per_second,
            resolve_collisions: true,
            cell_size: 10.0,
            seed: None,
        }
    }

    fn setup_world(units_per_second: f32) -> World {
        let mut world = World::new();
        world.insert_resource(test_config(units_per_second));
        world.insert_resource(RandomPool::new(4));
        world.insert_resource(PendingDestinations::default());
        world.insert_resource(ArrivalEvents::default());
        world
    }

    fn run(world: &mut World, schedule: &mut Schedule) {
        schedule.run(world);
    }

    #[test]
    fn test_pending_first_insert_wins() {
        let mut pending = PendingDestinations::default();
        assert!(pending.try_insert(3, 100));
        assert!(!pending.try_insert(3, 200));
        assert_eq!(pending.get(3), Some(100));
        assert_eq!(pending.get(7), None);
    }

    #[test]
    fn test_propose_covers_every_idle_unit() {
        let mut world = setup_world(5.0);
        for i in 0..4u32 {
            world.spawn(UnitBundle {
                id: UnitId(i),
                destination: Destination::new(50.0, 50.0),
                reached: Reached(i % 2 == 0),
                ..Default::default()
            });
        }
        let mut schedule = Schedule::default();
        schedule.add_systems(propose_destinations_system);
        run(&mut world, &mut schedule);

        let pending = world.resource::<PendingDestinations>();
        assert_eq!(pending.len(), 2);
        assert!(pending.get(0).is_some());
        assert!(pending.get(1).is_none());
    }

    #[test]
    fn test_proposed_cells_stay_in_field() {
        // Destination near the corner, so the disc reaches out of bounds.
        let mut world = setup_world(100.0);
        world.spawn(UnitBundle {
            id: UnitId(0),
            destination: Destination::new(1.5, 1.5),
            reached: Reached(true),
            ..Default::default()
        });
        let mut schedule = Schedule::default();
        schedule.add_systems(propose_destinations_system);

        for _ in 0..50 {
            run(&mut world, &mut schedule);
            let cell = world.resource::<PendingDestinations>().get(0).unwrap();
            let pos = index_position(cell, 100);
            assert!(pos.x >= 0.0 && pos.x <= 100.0);
            assert!(pos.z >= 0.0 && pos.z <= 100.0);
        }
    }

    #[test]
    fn test_degenerate_radius_proposes_destination_cell() {
        let mut world = setup_world(0.0); // max_retarget_radius == 0
        world.spawn(UnitBundle {
            id: UnitId(0),
            destination: Destination::new(50.5, 50.5),
            cell: CellIndex(position_index(Position::new(50.5, 50.5), 100)),
            reached: Reached(true),
            ..Default::default()
        });
        let mut schedule = Schedule::default();
        schedule.add_systems((propose_destinations_system, apply_unit_destinations_system).chain());
        run(&mut world, &mut schedule);

        // The proposal collapses onto the current cell, so the unit stays idle.
        let pending = world.resource::<PendingDestinations>();
        assert_eq!(
            pending.get(0),
            Some(position_index(Position::new(50.5, 50.5), 100))
        );
        let mut query = world.query::<(&UnitId, &Reached)>();
        let (_, reached) = query.single(&world);
        assert!(reached.0);
    }

    #[test]
    fn test_marker_adopts_proposal_and_emits_event() {
        let mut world = setup_world(5.0);
        world
            .resource_mut::<PendingDestinations>()
            .try_insert(2, 4237);
        world.spawn(TargetBundle {
            id: TargetId(2),
            position: Position::new(10.5, 10.5),
            cell: CellIndex(position_index(Position::new(10.5, 10.5), 100)),
            reached: Reached(true),
        });
        let mut schedule = Schedule::default();
        schedule.add_systems(retarget_markers_system);
        run(&mut world, &mut schedule);

        let mut query = world.query::<(&TargetId, &Position, &CellIndex, &Reached)>();
        let (_, pos, cell, reached) = query.single(&world);
        assert_eq!(cell.0, 4237);
        let expected = index_position(4237, 100);
        assert_eq!((pos.x, pos.z), (expected.x, expected.z));
        assert!(!reached.0);

        let events = world.resource::<ArrivalEvents>();
        assert_eq!(events.0.len(), 1);
        assert_eq!(events.0[0].index, 2);

        // Not yet acknowledged: a second pass must not re-fire the event.
        run(&mut world, &mut schedule);
        assert_eq!(world.resource::<ArrivalEvents>().0.len(), 1);
    }

    #[test]
    fn test_unit_adopts_differing_proposal() {
        let mut world = setup_world(5.0);
        world
            .resource_mut::<PendingDestinations>()
            .try_insert(0, 4237);
        let e = world
            .spawn(UnitBundle {
                id: UnitId(0),
                destination: Destination::new(10.5, 10.5),
                cell: CellIndex(1010),
                reached: Reached(true),
                ..Default::default()
            })
            .id();
        let mut schedule = Schedule::default();
        schedule.add_systems(apply_unit_destinations_system);
        run(&mut world, &mut schedule);

        assert_eq!(world.get::<CellIndex>(e).unwrap().0, 4237);
        let dest = world.get::<Destination>(e).unwrap();
        let expected = index_position(4237, 100);
        assert_eq!((dest.x, dest.z), (expected.x, expected.z));
        assert!(!world.get::<Reached>(e).unwrap().0);
    }

    #[test]
    fn test_apply_pass_is_idempotent() {
        let mut world = setup_world(5.0);
        world
            .resource_mut::<PendingDestinations>()
            .try_insert(0, 4237);
        let e = world
            .spawn(UnitBundle {
                id: UnitId(0),
                destination: Destination::new(10.5, 10.5),
                cell: CellIndex(1010),
                reached: Reached(true),
                ..Default::default()
            })
            .id();
        let mut schedule = Schedule::default();
        schedule.add_systems(apply_unit_destinations_system);
        run(&mut world, &mut schedule);
        let first = *world.get::<Destination>(e).unwrap();

        // Same pending table, second run: identical outcome.
        run(&mut world, &mut schedule);
        let second = *world.get::<Destination>(e).unwrap();
        assert_eq!((first.x, first.z), (second.x, second.z));
        assert_eq!(world.get::<CellIndex>(e).unwrap().0, 4237);
    }
}
