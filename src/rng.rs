//! Per-worker random number generation.
//!
//! The simulation draws randomness from a bank of generator slots, one per
//! worker thread, so parallel passes never contend on a single generator
//! state. The whole bank is reseeded once per tick from a single 32-bit
//! value drawn by the session; each slot derives its own seed by mixing the
//! broadcast value with its slot index, so no two workers produce the same
//! first draw in a frame.
//!
//! Generator state therefore advances within a tick but never persists
//! across ticks.

use crate::components::Position;
use bevy_ecs::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Mutex;

/// Substitute seed when the externally drawn frame seed is zero.
const ZERO_SEED_FALLBACK: u32 = 1;

/// Bank of independent generator states indexed by worker slot.
///
/// Slots sit behind mutexes so a shared `Res<RandomPool>` can be drawn from
/// inside a pass; each worker locks only its own slot, so the locks are
/// uncontended in practice.
#[derive(Resource)]
pub struct RandomPool {
    slots: Vec<Mutex<ChaCha8Rng>>,
}

impl RandomPool {
    /// Create a pool with `slot_count` generators (at least one).
    pub fn new(slot_count: usize) -> Self {
        let count = slot_count.max(1);
        Self {
            slots: (0..count)
                .map(|i| Mutex::new(ChaCha8Rng::seed_from_u64(slot_seed(ZERO_SEED_FALLBACK, i))))
                .collect(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Reseed every slot from one broadcast 32-bit value. A zero seed is
    /// remapped to a non-zero fallback before mixing.
    pub fn reseed(&mut self, frame_seed: u32) {
        let base = if frame_seed == 0 {
            ZERO_SEED_FALLBACK
        } else {
            frame_seed
        };
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let rng = ChaCha8Rng::seed_from_u64(slot_seed(base, i));
            match slot.get_mut() {
                Ok(state) => *state = rng,
                Err(poisoned) => *poisoned.into_inner() = rng,
            }
        }
    }

    /// Run `f` with exclusive access to one slot's generator, writing the
    /// advanced state back. `slot` wraps modulo the slot count.
    pub fn with_slot<R>(&self, slot: usize, f: impl FnOnce(&mut ChaCha8Rng) -> R) -> R {
        let mutex = &self.slots[slot % self.slots.len()];
        let mut guard = match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

/// Derive a slot's seed from the broadcast seed and its index.
///
/// Handing every slot the identical seed would make workers' first draws
/// in a frame identical; mixing the index in keeps the streams decorrelated
/// (see DESIGN.md).
fn slot_seed(base: u32, slot: usize) -> u64 {
    (base as u64) ^ (slot as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Draw a point uniformly distributed over the disc of radius `max_radius`
/// around `center`, using the area-uniform polar rule `r = sqrt(U1) * R`.
///
/// A non-positive radius degenerates to the center point.
pub fn random_point_in_disc<T: Rng>(rng: &mut T, center: Position, max_radius: f32) -> Position {
    if max_radius <= 0.0 {
        return center;
    }
    let radius = rng.gen::<f64>().sqrt() * max_radius as f64;
    let angle = rng.gen::<f64>() * std::f64::consts::TAU;
    Position::new(
        center.x + (radius * angle.cos()) as f32,
        center.z + (radius * angle.sin()) as f32,
    )
}
