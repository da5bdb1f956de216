//! The kinematic plant boundary.
//!
//! The agent never integrates physics itself; it reads the cart's state and
//! writes a commanded force through [`Plant`], and an external integrator
//! (the simulator in [`crate::sim`], or real hardware behind the same trait)
//! does the rest. Everything is plain load/store so the control loop and the
//! integrator never contend on a lock.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// What the agent is allowed to do to its cart: intrinsic sensing, perfect
/// actuation, nothing else.
pub trait Plant: Send + Sync {
    fn position(&self) -> f64;
    fn velocity(&self) -> f64;
    /// Stores the commanded force; the integrator applies it on its next tick.
    fn apply_force(&self, force: f64);
}

/// An `f64` cell readable and writable from any thread. Loads and stores are
/// relaxed: each cell is an independent sensor reading, and the consumers
/// tolerate values that are one integrator tick stale.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// The physical state of one cart, shared between its agent and the
/// integrator.
#[derive(Debug)]
pub struct CartBody {
    pub id: u32,
    pub name: String,
    pub mass: f64,
    pub width: f64,
    pub position: AtomicF64,
    pub velocity: AtomicF64,
    pub acceleration: AtomicF64,
    pub force: AtomicF64,
}

impl CartBody {
    pub fn new(id: u32, name: impl Into<String>, position: f64, mass: f64, width: f64) -> Self {
        Self {
            id,
            name: name.into(),
            mass,
            width,
            position: AtomicF64::new(position),
            velocity: AtomicF64::new(0.0),
            acceleration: AtomicF64::new(0.0),
            force: AtomicF64::new(0.0),
        }
    }

    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot {
            id: self.id,
            name: self.name.clone(),
            position: self.position.load(),
            velocity: self.velocity.load(),
            acceleration: self.acceleration.load(),
            force: self.force.load(),
        }
    }
}

impl Plant for CartBody {
    fn position(&self) -> f64 {
        self.position.load()
    }

    fn velocity(&self) -> f64 {
        self.velocity.load()
    }

    fn apply_force(&self, force: f64) {
        self.force.store(force);
    }
}

/// A point-in-time copy of a cart's state, for reports and logs.
#[derive(Debug, Clone, Serialize)]
pub struct CartSnapshot {
    pub id: u32,
    pub name: String,
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub force: f64,
}
