//! Channel bundles owned by an agent and the matching external endpoints.
//!
//! Every channel an agent listens on is created up front so the event loop
//! can multiplex the full set uniformly. Neighbor receivers start dangling
//! (their senders dropped) and outbound neighbor senders start as `None`,
//! which encodes a hard wall, until the track wiring replaces them.

use super::{Request, Response, SideMap};
use tokio::sync::mpsc;

/// Capacity of every agent-facing channel. Matches the bounded, best-effort
/// semantics of the protocol: a full channel drops, like a lossy wire.
pub const CHANNEL_CAPACITY: usize = 10;

/// The receiving half of an agent's world, taken by its event loop.
pub struct AgentRx {
    /// Operator or scenario goals, in plant units.
    pub goal: mpsc::Receiver<f64>,
    /// Any value is a stop trigger.
    pub estop: mpsc::Receiver<bool>,
    /// Shutdown signal; the loop exits when it fires or its sender drops.
    pub shutdown: mpsc::Receiver<()>,
    pub requests: SideMap<mpsc::Receiver<Request>>,
    pub responses: SideMap<mpsc::Receiver<Response>>,
}

/// The sending half the agent keeps for itself.
pub struct AgentTx {
    /// Outbound request channels. `None` encodes the edge of the track.
    pub requests: SideMap<Option<mpsc::Sender<Request>>>,
    /// Outbound response channels, symmetric with `requests`.
    pub responses: SideMap<Option<mpsc::Sender<Response>>>,
    /// Signals that the current goal is terminally resolved.
    pub completion: mpsc::Sender<bool>,
}

/// Operator-facing endpoints, kept by whoever built the agent.
pub struct AgentHandle {
    pub goal_tx: mpsc::Sender<f64>,
    pub estop_tx: mpsc::Sender<bool>,
    pub shutdown_tx: mpsc::Sender<()>,
    pub completion_rx: mpsc::Receiver<bool>,
}

/// Creates the full channel set for one agent. Neighbor sides are unwired:
/// the returned receivers never yield until the wiring replaces them.
pub fn agent_channels() -> (AgentRx, AgentTx, AgentHandle) {
    let (goal_tx, goal_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (estop_tx, estop_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let (completion_tx, completion_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let rx = AgentRx {
        goal: goal_rx,
        estop: estop_rx,
        shutdown: shutdown_rx,
        requests: SideMap::new(dangling(), dangling()),
        responses: SideMap::new(dangling(), dangling()),
    };
    let tx = AgentTx {
        requests: SideMap::new(None, None),
        responses: SideMap::new(None, None),
        completion: completion_tx,
    };
    let handle = AgentHandle {
        goal_tx,
        estop_tx,
        shutdown_tx,
        completion_rx,
    };
    (rx, tx, handle)
}

/// A receiver whose sender is already gone; `recv` resolves to `None`
/// immediately, which disables the corresponding `select!` arm.
fn dangling<T>() -> mpsc::Receiver<T> {
    let (_, rx) = mpsc::channel(1);
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Side;

    #[tokio::test]
    async fn test_handle_feeds_agent_channels() {
        let (mut rx, _tx, handle) = agent_channels();
        handle.goal_tx.send(700.0).await.unwrap();
        assert_eq!(rx.goal.recv().await, Some(700.0));
    }

    #[tokio::test]
    async fn test_unwired_side_is_a_hard_wall() {
        let (mut rx, tx, _handle) = agent_channels();
        assert!(tx.requests[Side::Left].is_none());
        assert!(tx.requests[Side::Right].is_none());
        // Dangling receivers resolve to closed, never block.
        assert!(rx.requests[Side::Left].recv().await.is_none());
    }
}
