//! The per-cart coordination agent.
//!
//! One agent owns one cart: a state machine, a trajectory planner, a PID
//! cascade, and the two border trajectories shared with its neighbors. The
//! whole agent runs as a single cooperative task that multiplexes a fixed
//! 100 Hz control tick with every inbound channel, so its mutable state
//! never needs a lock: handlers run to completion, one event at a time.
//!
//! Negotiation lives in [`negotiation`], the emergency-stop handshake in
//! [`estop`]; this module holds the state, the event loop, and the tick.

mod estop;
#[cfg(test)]
mod harness;
mod negotiation;

use crate::config::AgentConfig;
use crate::metrics::MessageMetrics;
use crate::pid::Pid;
use crate::planner::{MotionPlanner, Trajectory};
use crate::plant::Plant;
use crate::protocol::{
    AgentHandle, AgentRx, AgentTx, Request, RequestId, RequestKind, Response, ResponseKind, Side,
    SideMap, agent_channels,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// No active goal; open to new goals and to giving way.
    Idle,
    /// Tracking the current trajectory toward an operator goal.
    Moving,
    /// A request to a neighbor is in flight or awaiting retry.
    Requesting,
    /// Moving aside to make room for a neighbor.
    Avoiding,
    /// Goal reached; dwelling before the next goal is accepted.
    Busy,
    /// Executing a stopping trajectory.
    Stopping,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Idle => "idle",
            AgentState::Moving => "moving",
            AgentState::Requesting => "requesting",
            AgentState::Avoiding => "avoiding",
            AgentState::Busy => "busy",
            AgentState::Stopping => "stopping",
        };
        write!(f, "{name}")
    }
}

/// Why an outgoing request exists.
#[derive(Debug, Clone)]
pub(crate) enum PendingOrigin {
    /// Our own goal (or stop) needs the neighbor to yield.
    Operator,
    /// Spawned to service a neighbor's border move; the eventual answer is
    /// forwarded back through `side` under the original request's id.
    Forwarded { side: Side, request: Request },
}

/// Bookkeeping for a request awaiting its final response.
#[derive(Debug, Clone)]
pub(crate) struct PendingRequest {
    pub request: Request,
    /// Neighbor the request was sent to.
    pub side: Side,
    /// The goal that motivated it; `None` for emergency stops.
    pub goal: Option<f64>,
    pub retry_at: Instant,
    /// State to enter when the request is accepted.
    pub accept_state: AgentState,
    pub origin: PendingOrigin,
}

/// A `StopConfirm` owed to a neighbor once our own stop is committed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OwedStopConfirm {
    pub request_id: RequestId,
    pub side: Side,
}

/// Externally observable snapshot of an agent, refreshed every tick.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub state: AgentState,
    pub left_border: f64,
    pub right_border: f64,
    pub trajectory_end: f64,
    pub setpoint: f64,
}

#[derive(Debug)]
pub struct StatusCell(Mutex<AgentStatus>);

impl StatusCell {
    fn new(status: AgentStatus) -> Self {
        Self(Mutex::new(status))
    }

    pub fn read(&self) -> AgentStatus {
        self.0.lock().unwrap().clone()
    }

    fn store(&self, status: AgentStatus) {
        *self.0.lock().unwrap() = status;
    }
}

pub struct Agent {
    name: String,
    cfg: AgentConfig,
    plant: Arc<dyn Plant>,
    planner: MotionPlanner,
    position_pid: Pid,
    velocity_pid: Pid,

    pub(crate) state: AgentState,
    /// Priority stamp of the currently accepted goal.
    pub(crate) goal_stamp: RequestId,
    busy_until: Instant,
    pub(crate) current: Trajectory,
    pub(crate) borders: SideMap<Trajectory>,
    pub(crate) pending: HashMap<RequestId, PendingRequest>,
    pub(crate) owed_stop_confirm: Option<OwedStopConfirm>,
    pub(crate) pending_goal_after_stop: Option<f64>,

    metrics: Arc<MessageMetrics>,
    status: Arc<StatusCell>,
    rx: Option<AgentRx>,
    pub(crate) tx: AgentTx,
}

impl Agent {
    /// Builds an agent at rest inside `[left_border, right_border]`. The
    /// returned handle carries the operator-facing channel ends; neighbor
    /// sides stay hard walls until [`Agent::wire`] is called.
    pub fn new(
        name: impl Into<String>,
        cfg: AgentConfig,
        plant: Arc<dyn Plant>,
        left_border: f64,
        right_border: f64,
    ) -> (Agent, AgentHandle) {
        let name = name.into();
        let now = Instant::now();
        let planner = MotionPlanner::new(cfg.planner);
        let current = planner.stationary(plant.position(), now);
        let borders = SideMap::new(
            planner.stationary(left_border, now),
            planner.stationary(right_border, now),
        );
        let status = Arc::new(StatusCell::new(AgentStatus {
            state: AgentState::Idle,
            left_border,
            right_border,
            trajectory_end: current.end_position(),
            setpoint: current.end_position(),
        }));
        let (rx, tx, handle) = agent_channels();

        let agent = Agent {
            position_pid: Pid::new(&cfg.position_pid),
            velocity_pid: Pid::new(&cfg.velocity_pid),
            planner,
            name,
            cfg,
            plant,
            state: AgentState::Idle,
            goal_stamp: 0,
            busy_until: now,
            current,
            borders,
            pending: HashMap::new(),
            owed_stop_confirm: None,
            pending_goal_after_stop: None,
            metrics: Arc::new(MessageMetrics::new()),
            status,
            rx: Some(rx),
            tx,
        };
        (agent, handle)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> Arc<MessageMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn status(&self) -> Arc<StatusCell> {
        Arc::clone(&self.status)
    }

    /// Attaches one neighbor side. Called by the track wiring before the
    /// agent is spawned.
    pub fn wire(
        &mut self,
        side: Side,
        request_tx: mpsc::Sender<Request>,
        response_tx: mpsc::Sender<Response>,
        request_rx: mpsc::Receiver<Request>,
        response_rx: mpsc::Receiver<Response>,
    ) {
        let rx = self.rx.as_mut().expect("agent already running");
        self.tx.requests[side] = Some(request_tx);
        self.tx.responses[side] = Some(response_tx);
        rx.requests[side] = request_rx;
        rx.responses[side] = response_rx;
    }

    /// The event loop. Selects exactly one ready event per iteration and
    /// runs its handler to completion; the relative priority of concurrently
    /// ready sources is not part of the contract.
    pub async fn run(mut self) {
        tracing::info!(agent = %self.name, "agent event loop started");
        let mut rx = self.rx.take().expect("agent already running");

        let mut tick = tokio::time::interval(self.cfg.control_tick());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = rx.shutdown.recv() => {
                    tracing::info!(agent = %self.name, "shutdown signal received");
                    break;
                }
                _ = tick.tick() => {
                    self.on_tick(Instant::now());
                }
                Some(goal) = rx.goal.recv() => {
                    self.on_goal(goal, Instant::now());
                }
                Some(_) = rx.estop.recv() => {
                    tracing::info!(agent = %self.name, "emergency stop signal received");
                    self.begin_emergency_stop(Instant::now());
                }
                Some(request) = rx.requests.left.recv() => {
                    self.on_request(request, Side::Left, Instant::now());
                }
                Some(request) = rx.requests.right.recv() => {
                    self.on_request(request, Side::Right, Instant::now());
                }
                Some(response) = rx.responses.left.recv() => {
                    self.on_response(response, Side::Left, Instant::now());
                }
                Some(response) = rx.responses.right.recv() => {
                    self.on_response(response, Side::Right, Instant::now());
                }
            }
        }
    }

    // ─── Tick ────────────────────────────────────────────────────────────

    pub(crate) fn on_tick(&mut self, now: Instant) {
        self.run_pid_cascade(now);

        match self.state {
            AgentState::Busy => {
                if now >= self.busy_until {
                    tracing::info!(agent = %self.name, "busy dwell ended, back to idle");
                    self.state = AgentState::Idle;
                    self.report_completion();
                }
            }
            AgentState::Moving => {
                if self.current.is_finished(now) {
                    tracing::info!(agent = %self.name, position = self.current.end_position(), "goal reached");
                    self.state = AgentState::Busy;
                    self.busy_until = now + self.cfg.busy_dwell();
                }
            }
            AgentState::Avoiding => {
                if self.current.is_finished(now) {
                    tracing::info!(agent = %self.name, "avoidance maneuver complete");
                    self.state = AgentState::Idle;
                    self.report_completion();
                }
            }
            AgentState::Requesting | AgentState::Idle => {
                self.retry_due_requests(now);
            }
            AgentState::Stopping => {
                if self.current.is_finished(now) {
                    tracing::info!(agent = %self.name, "stop complete");
                    if let Some(goal) = self.pending_goal_after_stop.take() {
                        tracing::info!(agent = %self.name, goal, "resuming pending goal after stop");
                        self.handle_goal(goal, AgentState::Moving, PendingOrigin::Operator, now);
                    } else {
                        self.state = AgentState::Idle;
                        self.report_completion();
                    }
                }
            }
        }

        self.publish_status(now);
    }

    /// Position loop feeds the velocity loop feeds the plant. Runs from the
    /// tick so trajectory replacements are serialized with control output.
    fn run_pid_cascade(&mut self, now: Instant) {
        let setpoint = self.current.position(now);
        self.position_pid.set_setpoint(setpoint);
        let velocity_command = self.position_pid.update(self.plant.position());
        self.velocity_pid.set_setpoint(velocity_command);
        let force = self.velocity_pid.update(self.plant.velocity());
        self.plant.apply_force(force);
    }

    fn retry_due_requests(&mut self, now: Instant) {
        let due: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| now >= p.retry_at)
            // Forwarded entries are re-entered by the upstream retry.
            .filter(|(_, p)| !matches!(p.origin, PendingOrigin::Forwarded { .. }))
            .map(|(id, _)| *id)
            .collect();

        for id in due {
            let Some(kind) = self.pending.get(&id).map(|entry| entry.request.kind) else {
                continue;
            };
            match kind {
                RequestKind::EmergencyStop => {
                    tracing::debug!(agent = %self.name, request_id = id, "re-evaluating unanswered emergency stop");
                    self.pending.remove(&id);
                    // Re-runs the border checks and re-sends whatever is
                    // still required, so stop scanning this tick.
                    self.begin_emergency_stop(now);
                    break;
                }
                RequestKind::BorderMove => {
                    let retry_at = now + self.cfg.retry_interval();
                    let Some(entry) = self.pending.get_mut(&id) else {
                        continue;
                    };
                    entry.retry_at = retry_at;
                    let request = entry.request;
                    let side = entry.side;
                    tracing::debug!(agent = %self.name, request_id = id, side = %side, "retrying border move request");
                    self.metrics.record_request_sent(id, now);
                    self.send_request(side, request);
                }
            }
        }
    }

    fn publish_status(&self, now: Instant) {
        self.status.store(AgentStatus {
            state: self.state,
            left_border: self.borders.left.end_position(),
            right_border: self.borders.right.end_position(),
            trajectory_end: self.current.end_position(),
            setpoint: self.current.position(now),
        });
    }

    // ─── Shared plumbing ─────────────────────────────────────────────────

    pub(crate) fn send_request(&self, side: Side, request: Request) {
        let Some(tx) = &self.tx.requests[side] else {
            tracing::warn!(agent = %self.name, side = %side, "no outbound request channel");
            return;
        };
        if tx.try_send(request).is_err() {
            tracing::warn!(
                agent = %self.name,
                side = %side,
                request_id = request.id,
                "request channel full, message dropped"
            );
        }
    }

    pub(crate) fn respond(&self, side: Side, request_id: RequestId, kind: ResponseKind) {
        let Some(tx) = &self.tx.responses[side] else {
            tracing::warn!(agent = %self.name, side = %side, "no outbound response channel");
            return;
        };
        self.metrics.record_response_sent();
        tracing::debug!(agent = %self.name, side = %side, request_id, response = %kind, "sending response");
        let response = Response {
            id: request_id,
            kind,
        };
        if tx.try_send(response).is_err() {
            tracing::warn!(
                agent = %self.name,
                side = %side,
                request_id,
                "response channel full, message dropped"
            );
        }
    }

    pub(crate) fn report_completion(&self) {
        // Full channel means the consumer is behind; skip rather than block.
        let _ = self.tx.completion.try_send(true);
    }

    pub(crate) fn safety_margin(&self) -> f64 {
        self.cfg.safety_margin
    }

    pub(crate) fn border_overshoot(&self) -> f64 {
        self.cfg.overshoot_factor * self.cfg.safety_margin
    }

    pub(crate) fn retry_interval(&self) -> std::time::Duration {
        self.cfg.retry_interval()
    }

    pub(crate) fn planner(&self) -> &MotionPlanner {
        &self.planner
    }
}
