//! Public API for the crowd simulation.
//!
//! `SimWorld` is the session container an embedding drives: it owns the ECS
//! world, the chained pass schedule, and the random pool. One session has a
//! fixed population created at start; dropping the `SimWorld` discards all
//! unit/target state and the pool.
//!
//! ## Ticking
//!
//! `step(dt)` runs the ordered pass sequence of `systems` exactly once with
//! the caller's elapsed-time delta, gated by the pause flag. A tick that has
//! started always runs to completion; invariant violations (non-finite
//! positions) are reported as an error after the tick finishes.

use crate::components::*;
use crate::rng::RandomPool;
use crate::spatial::{index_position, position_index, SpatialHashGrid};
use crate::systems::*;
use crate::world::Snapshot;
use bevy_ecs::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use thiserror::Error;

/// Errors surfaced by a simulation tick.
#[derive(Debug, Error)]
pub enum SimError {
    /// A unit's position became NaN or infinite during integration - a fatal
    /// invariant violation rather than a recoverable condition.
    #[error("non-finite position on unit {index}: ({x}, {z})")]
    NonFinitePosition { index: u32, x: f32, z: f32 },
}

/// Session configuration, fixed once a session starts.
#[derive(Resource, Debug, Clone)]
pub struct SimConfig {
    /// Field edge length; positions live in `[0, field_size]` on both axes.
    pub field_size: i32,
    /// Number of units (and therefore target markers) to spawn.
    pub unit_count: usize,
    /// Movement speed in field units per second, shared by all units.
    pub units_per_second: f32,
    /// Whether the avoidance passes run at all.
    pub resolve_collisions: bool,
    /// Spatial hash cell size, used for both build and query.
    pub cell_size: f32,
    /// Master RNG seed; `None` seeds from entropy. Pinning it makes spawn
    /// layout and per-frame draws repeatable for tests, but cross-run
    /// determinism is not a guarantee of this crate.
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            field_size: 100,
            unit_count: 5000,
            units_per_second: 5.0,
            resolve_collisions: true,
            cell_size: 10.0,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Total number of discrete cells on the field.
    pub fn total_cells(&self) -> i32 {
        self.field_size * self.field_size
    }

    /// Radius of the reassignment disc, tied to unit speed so faster crowds
    /// spread their new destinations wider.
    pub fn max_retarget_radius(&self) -> f32 {
        self.units_per_second * 5.0
    }
}

/// The main simulation session container.
pub struct SimWorld {
    world: World,
    schedule: Schedule,
    tick: u64,
    time: f32,
    paused: bool,
    /// Draws spawn placement and the per-tick broadcast seed for the pool.
    master_rng: ChaCha8Rng,
}

impl SimWorld {
    /// Create a session and spawn its unit/target populations.
    pub fn start(config: SimConfig) -> Self {
        let mut sim = Self::with_config(config);
        sim.spawn_population();
        sim
    }

    /// Create an empty session (no population). Useful for tests that spawn
    /// hand-placed entities through `world_mut`.
    pub fn with_config(config: SimConfig) -> Self {
        let mut world = World::new();

        world.insert_resource(DeltaTime(0.0));
        world.insert_resource(SpatialHashGrid::new(config.cell_size));
        world.insert_resource(PendingDestinations::default());
        world.insert_resource(ArrivalEvents::default());
        world.insert_resource(TickFault::default());
        world.insert_resource(RandomPool::new(worker_slot_count()));

        let master_rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        world.insert_resource(config);

        // Pass barriers: each pass consumes what the previous one produced,
        // so the whole tick is one explicit chain.
        let mut schedule = Schedule::default();
        schedule.add_systems(
            (
                crate::spatial::rebuild_grid_system,
                avoidance_system,
                movement_system,
                propose_destinations_system,
                retarget_markers_system,
                apply_unit_destinations_system,
            )
                .chain(),
        );

        Self {
            world,
            schedule,
            tick: 0,
            time: 0.0,
            paused: false,
            master_rng,
        }
    }

    /// Spawn the fixed populations: each unit at a random cell center, its
    /// paired target at an independently random cell center, and the unit's
    /// initial destination set to the target's position.
    fn spawn_population(&mut self) {
        let config = match self.world.get_resource::<SimConfig>() {
            Some(config) => config.clone(),
            None => return,
        };
        let size = config.field_size;
        let total_cells = config.total_cells();

        for index in 0..config.unit_count as u32 {
            let unit_pos = index_position(self.master_rng.gen_range(0..total_cells), size);
            let target_pos = index_position(self.master_rng.gen_range(0..total_cells), size);

            self.world.spawn(TargetBundle {
                id: TargetId(index),
                position: target_pos,
                cell: CellIndex(position_index(target_pos, size)),
                // Spawn-placed markers start settled; they un-settle when
                // their owning unit first arrives.
                reached: Reached(true),
            });

            self.world.spawn(UnitBundle {
                id: UnitId(index),
                position: unit_pos,
                destination: Destination::new(target_pos.x, target_pos.z),
                cell: CellIndex(position_index(unit_pos, size)),
                reached: Reached(false),
                motion: UnitMotion::default(),
                avoidance: Avoidance::default(),
                collision: CollisionDebug::default(),
            });
        }
    }

    /// Run one simulation tick with the given elapsed-time delta.
    ///
    /// Does nothing while paused. The random pool is reseeded from a fresh
    /// 32-bit draw before the passes run, so generator state never persists
    /// across ticks.
    pub fn step(&mut self, dt: f32) -> Result<(), SimError> {
        if self.paused {
            return Ok(());
        }

        let frame_seed: u32 = self.master_rng.gen();
        if let Some(mut pool) = self.world.get_resource_mut::<RandomPool>() {
            pool.reseed(frame_seed);
        }
        if let Some(mut delta) = self.world.get_resource_mut::<DeltaTime>() {
            delta.0 = dt;
        }
        if let Some(mut fault) = self.world.get_resource_mut::<TickFault>() {
            fault.0 = None;
        }

        self.schedule.run(&mut self.world);
        self.tick += 1;
        self.time += dt;

        let fault = self.world.get_resource::<TickFault>().and_then(|f| f.0);
        match fault {
            Some(info) => Err(SimError::NonFinitePosition {
                index: info.index,
                x: info.x,
                z: info.z,
            }),
            None => Ok(()),
        }
    }

    /// Pause the simulation; `step` becomes a no-op until `resume`.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Take all arrival events accumulated since the last drain, and settle
    /// the corresponding target markers (`Reached` back to `true`) so they
    /// can be reassigned on later arrivals.
    ///
    /// This is the acknowledgment a presentation layer performs after it has
    /// repositioned the markers and played arrival feedback; each marker
    /// move is observed exactly once.
    pub fn drain_arrivals(&mut self) -> Vec<ArrivalEvent> {
        let events = match self.world.get_resource_mut::<ArrivalEvents>() {
            Some(mut res) => std::mem::take(&mut res.0),
            None => Vec::new(),
        };
        if events.is_empty() {
            return events;
        }

        let moved: HashSet<u32> = events.iter().map(|e| e.index).collect();
        let mut query = self.world.query::<(&TargetId, &mut Reached)>();
        for (id, mut reached) in query.iter_mut(&mut self.world) {
            if moved.contains(&id.0) {
                reached.0 = true;
            }
        }
        events
    }

    /// Get a snapshot of the current simulation state.
    pub fn snapshot(&mut self) -> Snapshot {
        Snapshot::from_world(&mut self.world, self.tick, self.time)
    }

    /// Get the snapshot as a JSON string.
    pub fn snapshot_json(&mut self) -> String {
        self.snapshot().to_json().unwrap_or_else(|_| "{}".to_string())
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn current_time(&self) -> f32 {
        self.time
    }

    pub fn unit_count(&mut self) -> usize {
        let mut query = self.world.query::<&UnitId>();
        query.iter(&self.world).count()
    }

    pub fn target_count(&mut self) -> usize {
        let mut query = self.world.query::<&TargetId>();
        query.iter(&self.world).count()
    }

    /// Direct access to the ECS world (for advanced usage and tests).
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable access to the ECS world (for advanced usage and tests).
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

/// Number of random-pool slots: one per rayon worker when internal
/// parallelism is enabled, otherwise a single slot.
fn worker_slot_count() -> usize {
    #[cfg(feature = "parallel")]
    {
        rayon::current_num_threads()
    }
    #[cfg(not(feature = "parallel"))]
    {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SimConfig {
        SimConfig {
            field_size: 50,
            unit_count: 20,
            units_per_second: 5.0,
            resolve_collisions: true,
            cell_size: 10.0,
            seed: Some(1),
        }
    }

    #[test]
    fn test_start_spawns_paired_populations() {
        let mut sim = SimWorld::start(small_config());
        assert_eq!(sim.unit_count(), 20);
        assert_eq!(sim.target_count(), 20);

        // Index correlation: both populations cover exactly 0..N-1.
        let snapshot = sim.snapshot();
        let unit_ids: HashSet<u32> = snapshot.units.iter().map(|u| u.index).collect();
        let target_ids: HashSet<u32> = snapshot.targets.iter().map(|t| t.index).collect();
        let expected: HashSet<u32> = (0..20).collect();
        assert_eq!(unit_ids, expected);
        assert_eq!(target_ids, expected);
    }

    #[test]
    fn test_population_and_bounds_invariants_hold_over_ticks() {
        let mut sim = SimWorld::start(small_config());
        for _ in 0..50 {
            sim.step(0.1).unwrap();
            assert_eq!(sim.unit_count(), 20);
            assert_eq!(sim.target_count(), 20);
        }

        let snapshot = sim.snapshot();
        for unit in &snapshot.units {
            assert!(unit.x >= 0.0 && unit.x <= 50.0, "x out of field: {}", unit.x);
            assert!(unit.z >= 0.0 && unit.z <= 50.0, "z out of field: {}", unit.z);
        }
    }

    #[test]
    fn test_pause_gates_tick() {
        let mut sim = SimWorld::start(small_config());
        sim.pause();
        assert!(sim.is_paused());
        sim.step(0.1).unwrap();
        assert_eq!(sim.current_tick(), 0);

        sim.resume();
        sim.step(0.1).unwrap();
        assert_eq!(sim.current_tick(), 1);
        assert!((sim.current_time() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_arrival_moves_paired_target_same_tick() {
        let mut sim = SimWorld::with_config(SimConfig {
            field_size: 100,
            unit_count: 1,
            units_per_second: 10.0,
            resolve_collisions: true,
            cell_size: 10.0,
            seed: Some(7),
        });

        let dest = Position::new(50.5, 60.5);
        sim.world_mut().spawn(TargetBundle {
            id: TargetId(0),
            position: dest,
            cell: CellIndex(position_index(dest, 100)),
            reached: Reached(true),
        });
        sim.world_mut().spawn(UnitBundle {
            id: UnitId(0),
            position: Position::new(50.5, 50.5),
            destination: Destination::new(dest.x, dest.z),
            cell: CellIndex(position_index(Position::new(50.5, 50.5), 100)),
            reached: Reached(false),
            ..Default::default()
        });

        // Speed 10 over one second covers the 10-unit gap: the unit arrives,
        // and the marker must move within the same tick.
        sim.step(1.0).unwrap();

        let snapshot = sim.snapshot();
        let target = &snapshot.targets[0];
        assert!(!target.reached, "marker must un-settle on arrival");
        assert_eq!(
            (target.x, target.z),
            {
                let p = index_position(target.cell_index, 100);
                (p.x, p.z)
            },
            "marker position must match its cell index"
        );

        let events = sim.drain_arrivals();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 0);
        assert_eq!((events[0].x, events[0].z), (target.x, target.z));

        // Acknowledged: the marker is settled again and the queue is empty.
        let snapshot = sim.snapshot();
        assert!(snapshot.targets[0].reached);
        assert!(sim.drain_arrivals().is_empty());

        // The unit either adopted the new destination or hit the degenerate
        // same-cell proposal and stays idle for another tick.
        let unit = &snapshot.units[0];
        if !unit.reached {
            let p = index_position(unit.cell_index, 100);
            assert_eq!((unit.dest_x, unit.dest_z), (p.x, p.z));
        }
    }

    #[test]
    fn test_session_keeps_producing_arrivals() {
        let mut sim = SimWorld::start(SimConfig {
            field_size: 30,
            unit_count: 10,
            units_per_second: 10.0,
            resolve_collisions: true,
            cell_size: 10.0,
            seed: Some(3),
        });

        let mut arrivals = 0usize;
        for _ in 0..300 {
            sim.step(0.1).unwrap();
            arrivals += sim.drain_arrivals().len();
        }
        assert!(arrivals > 0, "units crossing a 30-unit field for 30 seconds must arrive");
    }

    #[test]
    fn test_non_finite_position_aborts_tick_with_error() {
        let mut sim = SimWorld::with_config(small_config());
        sim.world_mut().spawn(UnitBundle {
            id: UnitId(0),
            position: Position::new(f32::NAN, 5.0),
            destination: Destination::new(25.5, 25.5),
            reached: Reached(false),
            ..Default::default()
        });

        let err = sim.step(0.1).unwrap_err();
        match err {
            SimError::NonFinitePosition { index, .. } => assert_eq!(index, 0),
        }
        // The tick itself still completed.
        assert_eq!(sim.current_tick(), 1);
    }

    #[test]
    fn test_snapshot_json_contains_populations() {
        let mut sim = SimWorld::start(small_config());
        let json = sim.snapshot_json();
        assert!(json.contains("units"));
        assert!(json.contains("targets"));
        assert!(json.contains("cell_index"));
    }

    #[test]
    fn test_avoidance_disabled_session_still_ticks() {
        let mut sim = SimWorld::start(SimConfig {
            resolve_collisions: false,
            unit_count: 10,
            field_size: 50,
            seed: Some(2),
            ..Default::default()
        });
        for _ in 0..20 {
            sim.step(0.1).unwrap();
        }
        let snapshot = sim.snapshot();
        for unit in &snapshot.units {
            assert!(unit.x >= 0.0 && unit.x <= 50.0);
        }
    }
}
