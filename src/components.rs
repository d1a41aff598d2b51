//! ECS components for the crowd simulation.
//!
//! Components are pure data containers attached to entities.
//! All simulation logic lives in systems that query these components.
//!
//! Two entity populations exist: mobile *units* and passive *target markers*.
//! They are independent collections of equal size, joined only by a matching
//! `u32` index value, never by entity reference.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

// ============================================================================
// SPATIAL COMPONENTS
// ============================================================================

/// 2D position on the field plane (x = east/west, z = north/south).
/// The vertical axis is implicit and always zero.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, z: f32) -> Self {
        Self { x, z }
    }

    pub fn distance_to(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.z.is_finite()
    }
}

/// The point a unit is currently walking toward.
#[derive(Component, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Destination {
    pub x: f32,
    pub z: f32,
}

impl Destination {
    pub fn new(x: f32, z: f32) -> Self {
        Self { x, z }
    }

    pub fn as_position(&self) -> Position {
        Position::new(self.x, self.z)
    }
}

/// Row-major index of a discretized field cell. At spawn this is the
/// entity's own cell; each reassignment overwrites it with the newly
/// proposed destination cell.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CellIndex(pub i32);

// ============================================================================
// IDENTITY COMPONENTS
// ============================================================================

/// Join key of a unit. Values form `0..N-1`, assigned once at spawn.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UnitId(pub u32);

/// Join key of a target marker. Exactly one target shares each unit's index.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TargetId(pub u32);

// ============================================================================
// STATE COMPONENTS
// ============================================================================

/// Arrival state. On a unit, `true` means idle: it has reached its
/// destination and awaits a new one. On a target marker, `false` means the
/// marker just moved and presentation has not acknowledged it yet.
#[derive(Component, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Reached(pub bool);

/// Per-unit movement constants fixed at spawn.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnitMotion {
    /// Arrival is detected within this distance of the destination.
    pub min_arrival_distance: f32,
    /// Heading interpolation rate, kept for presentation layers.
    pub turn_rate: f32,
}

impl Default for UnitMotion {
    fn default() -> Self {
        Self {
            min_arrival_distance: 1.0,
            turn_rate: 20.0,
        }
    }
}

/// Transient local-repulsion result, recomputed from the spatial grid every
/// frame before integration.
#[derive(Component, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Avoidance {
    pub x: f32,
    pub z: f32,
    /// Distance to the closest same-cell occupant seen this frame.
    pub nearest: f32,
}

impl Avoidance {
    pub fn reset(&mut self, threshold: f32) {
        self.x = 0.0;
        self.z = 0.0;
        self.nearest = threshold;
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.z == 0.0
    }
}

impl Default for Avoidance {
    fn default() -> Self {
        Self {
            x: 0.0,
            z: 0.0,
            nearest: f32::MAX,
        }
    }
}

/// Debug contact flag with a decaying timer, for visualizing collisions.
#[derive(Component, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CollisionDebug {
    pub colliding: bool,
    /// Simulated-time countdown; `colliding` clears when it reaches zero.
    pub timer: f32,
}

impl CollisionDebug {
    /// Timer reload value on a fresh contact, in simulated time units.
    pub const CONTACT_TIMER: f32 = 60.0;

    pub fn mark_contact(&mut self) {
        self.colliding = true;
        self.timer = Self::CONTACT_TIMER;
    }

    pub fn decay(&mut self, dt: f32) {
        if self.colliding {
            self.timer -= dt;
            if self.timer <= 0.0 {
                self.colliding = false;
                self.timer = 0.0;
            }
        }
    }
}

// ============================================================================
// BUNDLE HELPERS
// ============================================================================

/// Bundle for spawning a complete unit entity.
#[derive(Bundle, Default)]
pub struct UnitBundle {
    pub id: UnitId,
    pub position: Position,
    pub destination: Destination,
    pub cell: CellIndex,
    pub reached: Reached,
    pub motion: UnitMotion,
    pub avoidance: Avoidance,
    pub collision: CollisionDebug,
}

/// Bundle for spawning a target marker entity.
#[derive(Bundle, Default)]
pub struct TargetBundle {
    pub id: TargetId,
    pub position: Position,
    pub cell: CellIndex,
    pub reached: Reached,
}
