//! ECS systems for the crowd simulation.
//!
//! ## Pass ordering
//!
//! One tick is a fixed sequence of passes; every pass consumes data produced
//! by its predecessor, so the ordering is a correctness requirement enforced
//! with `.chain()` in the schedule, not an optimization:
//!
//! 1. `rebuild_grid_system` - clears and refills the spatial hash from
//!    current unit positions.
//! 2. `avoidance_system` - per-unit own-cell repulsion from the fresh grid.
//! 3. `movement_system` - goal-seeking plus avoidance integration, bounds
//!    clamp, arrival detection.
//! 4. `propose_destinations_system` - idle units sample new destinations
//!    into the pending table.
//! 5. `retarget_markers_system` - paired target markers adopt proposals and
//!    emit arrival events.
//! 6. `apply_unit_destinations_system` - units adopt proposals and resume
//!    walking next tick.
//!
//! Within a pass, per-entity work units are independent; the `parallel`
//! feature fans the heavy passes (2 and 4) out over rayon.

pub mod assignment;
pub mod avoidance;
pub mod movement;

pub use assignment::*;
pub use avoidance::*;
pub use movement::*;
