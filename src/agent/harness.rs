//! Scaffolding for driving an agent's handlers directly in unit tests,
//! without spawning its event loop.

use super::Agent;
use crate::config::AgentConfig;
use crate::plant::CartBody;
use crate::protocol::{AgentHandle, Request, Response, Side};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The far end of one wired neighbor side: what the agent sent us, and
/// senders to inject traffic toward it.
pub(crate) struct NeighborProbe {
    pub requests: mpsc::Receiver<Request>,
    pub responses: mpsc::Receiver<Response>,
    #[allow(dead_code)]
    pub request_in: mpsc::Sender<Request>,
    #[allow(dead_code)]
    pub response_in: mpsc::Sender<Response>,
}

pub(crate) struct Rig {
    pub agent: Agent,
    pub handle: AgentHandle,
}

pub(crate) struct NeighborRig {
    pub agent: Agent,
    pub handle: AgentHandle,
    pub left: NeighborProbe,
    pub right: NeighborProbe,
}

/// An agent with hard walls on both sides.
pub(crate) fn rig(position: f64, left_border: f64, right_border: f64) -> Rig {
    let body = Arc::new(CartBody::new(1, "Cart 1", position, 1.0, 50.0));
    let (agent, handle) = Agent::new(
        "Cart 1",
        AgentConfig::default(),
        body,
        left_border,
        right_border,
    );
    Rig { agent, handle }
}

/// An agent with probes wired on both sides.
pub(crate) fn rig_with_neighbors(
    position: f64,
    left_border: f64,
    right_border: f64,
) -> NeighborRig {
    let body = Arc::new(CartBody::new(1, "Cart 1", position, 1.0, 50.0));
    let (mut agent, handle) = Agent::new(
        "Cart 1",
        AgentConfig::default(),
        body,
        left_border,
        right_border,
    );
    let left = wire_probe(&mut agent, Side::Left);
    let right = wire_probe(&mut agent, Side::Right);
    NeighborRig {
        agent,
        handle,
        left,
        right,
    }
}

pub(crate) fn wire_probe(agent: &mut Agent, side: Side) -> NeighborProbe {
    let (request_tx, requests) = mpsc::channel(16);
    let (response_tx, responses) = mpsc::channel(16);
    let (request_in, request_rx) = mpsc::channel(16);
    let (response_in, response_rx) = mpsc::channel(16);
    agent.wire(side, request_tx, response_tx, request_rx, response_rx);
    NeighborProbe {
        requests,
        responses,
        request_in,
        response_in,
    }
}
