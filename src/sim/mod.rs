//! Simulation harness: track wiring, the physics integrator, and the lossy
//! network between agents.
//!
//! [`Track::build`] turns a [`TrackConfig`] into a chain of agents wired
//! left to right through [`NetworkSimulator`] links; [`Track::spawn`] starts
//! every agent loop plus the integrator and hands back the operator-facing
//! endpoints.

pub mod network;
pub mod physics;

pub use network::NetworkSimulator;
pub use physics::PhysicsHandle;

use crate::agent::{Agent, StatusCell};
use crate::config::TrackConfig;
use crate::metrics::MessageMetrics;
use crate::plant::CartBody;
use crate::protocol::AgentHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// One built cart: operator endpoints plus observation handles.
pub struct TrackAgent {
    pub name: String,
    pub handle: AgentHandle,
    pub body: Arc<CartBody>,
    pub status: Arc<StatusCell>,
    pub metrics: Arc<MessageMetrics>,
}

/// A fully wired track, ready to spawn.
pub struct Track {
    agents: Vec<Agent>,
    pub carts: Vec<TrackAgent>,
    physics_tick: Duration,
}

impl Track {
    /// Builds bodies and agents left to right and wires every neighbor pair
    /// through the network simulator. Edge agents keep their hard walls.
    pub fn build(config: &TrackConfig) -> Track {
        let network = NetworkSimulator::new(config.network);
        let mut agents = Vec::with_capacity(config.carts.len());
        let mut carts = Vec::with_capacity(config.carts.len());

        for (index, cart) in config.carts.iter().enumerate() {
            let body = Arc::new(CartBody::new(
                index as u32 + 1,
                cart.name.clone(),
                cart.position,
                cart.mass,
                cart.width,
            ));
            let plant: Arc<dyn crate::plant::Plant> = body.clone();
            let (agent, handle) = Agent::new(
                cart.name.clone(),
                config.agent.clone(),
                plant,
                cart.left_border,
                cart.right_border,
            );
            carts.push(TrackAgent {
                name: cart.name.clone(),
                handle,
                body,
                status: agent.status(),
                metrics: agent.metrics(),
            });
            agents.push(agent);
        }

        for index in 0..agents.len().saturating_sub(1) {
            let (head, tail) = agents.split_at_mut(index + 1);
            network.connect(&mut head[index], &mut tail[0]);
        }

        Track {
            agents,
            carts,
            physics_tick: config.physics_tick(),
        }
    }

    /// Spawns every agent loop and the physics integrator.
    pub fn spawn(self) -> RunningTrack {
        let bodies: Vec<_> = self.carts.iter().map(|c| Arc::clone(&c.body)).collect();
        let physics = physics::spawn(bodies, self.physics_tick);
        let tasks = self
            .agents
            .into_iter()
            .map(|agent| tokio::spawn(agent.run()))
            .collect();
        RunningTrack {
            carts: self.carts,
            physics,
            tasks,
        }
    }
}

/// A live track. Dropping it aborts nothing; call [`RunningTrack::shutdown`]
/// for an orderly stop.
pub struct RunningTrack {
    pub carts: Vec<TrackAgent>,
    physics: PhysicsHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningTrack {
    pub async fn shutdown(self) {
        for cart in &self.carts {
            let _ = cart.handle.shutdown_tx.send(()).await;
        }
        for task in self.tasks {
            let _ = task.await;
        }
        self.physics.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentState;

    #[tokio::test(start_paused = true)]
    async fn test_build_default_track() {
        let track = Track::build(&TrackConfig::default());
        assert_eq!(track.carts.len(), 2);
        assert_eq!(track.carts[0].name, "Cart 1");
        assert_eq!(track.carts[0].body.position.load(), 400.0);

        let status = track.carts[1].status.read();
        assert_eq!(status.state, AgentState::Idle);
        assert_eq!(status.left_border, 800.0);
        assert_eq!(status.right_border, 1600.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_track_shuts_down_cleanly() {
        let track = Track::build(&TrackConfig::default()).spawn();
        tokio::time::sleep(Duration::from_millis(100)).await;
        track.shutdown().await;
    }
}
