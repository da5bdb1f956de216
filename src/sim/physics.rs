//! Fixed-step integrator for the simulated carts.
//!
//! Runs as one task over every cart body on the track: integrate position
//! from velocity, velocity from acceleration, acceleration from the force
//! the agents last commanded. Overlapping carts trade velocities (elastic
//! collision, equal masses); if that ever fires, coordination has already
//! failed, so it logs at error level.

use crate::plant::CartBody;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub struct PhysicsHandle {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl PhysicsHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.task.await;
    }
}

/// Spawns the integrator over `bodies` at the given tick.
pub fn spawn(bodies: Vec<Arc<CartBody>>, tick: Duration) -> PhysicsHandle {
    let (stop_tx, mut stop_rx) = mpsc::channel(1);
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous = Instant::now();
        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                now = interval.tick() => {
                    let dt = now.duration_since(previous).as_secs_f64();
                    previous = now;
                    step(&bodies, dt);
                }
            }
        }
    });
    PhysicsHandle { stop_tx, task }
}

fn step(bodies: &[Arc<CartBody>], dt: f64) {
    for body in bodies {
        let velocity = body.velocity.load();
        body.position.store(body.position.load() + velocity * dt);
        body.velocity.store(velocity + body.acceleration.load() * dt);
        body.acceleration.store(body.force.load() / body.mass);
    }

    for i in 0..bodies.len() {
        for j in (i + 1)..bodies.len() {
            let a = &bodies[i];
            let b = &bodies[j];
            let overlap = a.position.load() + a.width / 2.0 > b.position.load() - b.width / 2.0
                && a.position.load() - a.width / 2.0 < b.position.load() + b.width / 2.0;
            if overlap {
                tracing::error!(cart_a = %a.name, cart_b = %b.name, "collision detected");
                let va = a.velocity.load();
                a.velocity.store(b.velocity.load());
                b.velocity.store(va);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plant::Plant;

    #[test]
    fn test_step_integrates_force() {
        let body = Arc::new(CartBody::new(1, "Cart 1", 0.0, 2.0, 50.0));
        body.apply_force(10.0);
        let bodies = vec![Arc::clone(&body)];

        step(&bodies, 0.001);
        // Acceleration picks up force/mass on the first step...
        assert_eq!(body.acceleration.load(), 5.0);
        step(&bodies, 0.001);
        // ...and velocity follows on the next.
        assert!((body.velocity.load() - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_overlapping_carts_swap_velocities() {
        let a = Arc::new(CartBody::new(1, "Cart 1", 100.0, 1.0, 50.0));
        let b = Arc::new(CartBody::new(2, "Cart 2", 130.0, 1.0, 50.0));
        a.velocity.store(10.0);
        b.velocity.store(-5.0);

        step(&[Arc::clone(&a), Arc::clone(&b)], 0.0);
        assert_eq!(a.velocity.load(), -5.0);
        assert_eq!(b.velocity.load(), 10.0);
    }
}
