//! Goal intake and the border-move negotiation protocol.
//!
//! A goal inside the agent's own segment (with safety margin, strictly) is
//! planned and tracked directly. A goal beyond a border turns into a
//! `BorderMove` request to the neighbor on that side, proposing a border
//! just past the goal. The neighbor accepts, gives way, forwards the demand
//! further down the chain, or asks us to wait; ids break ties when two
//! neighbors want the same stretch of track at once.

use super::{Agent, AgentState, PendingOrigin, PendingRequest};
use crate::protocol::{Request, RequestId, RequestKind, Response, ResponseKind, Side, next_origin_id};
use tokio::time::Instant;

impl Agent {
    // ─── Goal intake ─────────────────────────────────────────────────────

    pub(crate) fn on_goal(&mut self, goal: f64, now: Instant) {
        tracing::debug!(agent = %self.name, goal, state = %self.state, "goal received");
        match self.state {
            AgentState::Idle | AgentState::Requesting => {
                self.handle_goal(goal, AgentState::Moving, PendingOrigin::Operator, now);
            }
            AgentState::Moving | AgentState::Avoiding | AgentState::Stopping => {
                self.handle_goal_during_motion(goal, now);
            }
            AgentState::Busy => {
                tracing::warn!(agent = %self.name, goal, "ignoring goal while busy");
            }
        }
    }

    /// Accepts the goal directly when it fits the current segment, otherwise
    /// starts a border negotiation toward the violated side.
    pub(crate) fn handle_goal(
        &mut self,
        goal: f64,
        accept_state: AgentState,
        origin: PendingOrigin,
        now: Instant,
    ) {
        self.metrics.record_goal_received(now);
        let stamp = next_origin_id();
        let margin = self.safety_margin();
        let left = self.borders.left.end_position();
        let right = self.borders.right.end_position();

        if left + margin < goal && goal < right - margin {
            tracing::debug!(agent = %self.name, goal, left, right, "goal within borders");
            self.accept_goal(goal, stamp, accept_state, now);
        } else {
            tracing::debug!(agent = %self.name, goal, left, right, "goal outside borders");
            self.queue_border_move(goal, stamp, accept_state, origin, now);
        }
    }

    /// A new goal while in motion: remember it, stop first (coordinating
    /// with neighbors as needed), and pick it up once at rest.
    fn handle_goal_during_motion(&mut self, goal: f64, now: Instant) {
        tracing::info!(agent = %self.name, goal, "goal during motion, stopping first");
        self.pending_goal_after_stop = Some(goal);
        self.begin_emergency_stop(now);
    }

    pub(crate) fn accept_goal(
        &mut self,
        goal: f64,
        stamp: RequestId,
        accept_state: AgentState,
        now: Instant,
    ) {
        tracing::info!(agent = %self.name, goal, state = %accept_state, "goal accepted");
        self.state = accept_state;
        self.goal_stamp = stamp;
        self.current = self
            .planner()
            .point_to_point(self.current.position(now), goal, now);
        if accept_state == AgentState::Moving {
            self.metrics.record_movement_start(now);
        }
    }

    pub(crate) fn reject_goal(&mut self, goal: f64) {
        tracing::warn!(agent = %self.name, goal, "goal permanently rejected");
        self.state = AgentState::Idle;
        self.report_completion();
    }

    /// Sends a `BorderMove` to the side blocking `goal` and records it as
    /// pending. The proposed border overshoots the goal so the post-accept
    /// inequality is strict.
    fn queue_border_move(
        &mut self,
        goal: f64,
        stamp: RequestId,
        accept_state: AgentState,
        origin: PendingOrigin,
        now: Instant,
    ) {
        self.state = AgentState::Requesting;
        let margin = self.safety_margin();

        let side = if self.borders.left.end_position() + margin >= goal {
            Side::Left
        } else if self.borders.right.end_position() - margin <= goal {
            Side::Right
        } else {
            tracing::error!(agent = %self.name, goal, "goal inside borders but negotiation was requested");
            return;
        };

        if self.tx.requests[side].is_none() {
            tracing::warn!(agent = %self.name, side = %side, goal, "no neighbor on required side");
            self.reject_goal(goal);
            if let PendingOrigin::Forwarded { side: origin_side, request } = origin {
                self.respond(origin_side, request.id, ResponseKind::Reject);
            }
            return;
        }

        let proposed_end = match side {
            Side::Left => goal - self.border_overshoot(),
            Side::Right => goal + self.border_overshoot(),
        };
        // Forwarded chains keep the upstream id so the final answer resolves
        // end to end; our own requests are stamped with the goal timestamp.
        let id = match &origin {
            PendingOrigin::Forwarded { request, .. } => request.id,
            PendingOrigin::Operator => stamp,
        };
        let request = Request::border_move(id, self.borders[side].end_position(), proposed_end);

        tracing::debug!(
            agent = %self.name,
            request_id = id,
            side = %side,
            proposed = proposed_end,
            "sending border move request"
        );
        self.pending.insert(
            id,
            PendingRequest {
                request,
                side,
                goal: Some(goal),
                retry_at: now + self.retry_interval(),
                accept_state,
                origin,
            },
        );
        self.metrics.record_request_sent(id, now);
        self.send_request(side, request);
    }

    // ─── Incoming requests ───────────────────────────────────────────────

    pub(crate) fn on_request(&mut self, request: Request, side: Side, now: Instant) {
        tracing::debug!(
            agent = %self.name,
            request_id = request.id,
            kind = %request.kind,
            side = %side,
            "incoming request"
        );
        match request.kind {
            RequestKind::BorderMove => self.on_border_move(request, side, now),
            RequestKind::EmergencyStop => self.on_estop_request(request, side, now),
        }
    }

    fn on_border_move(&mut self, request: Request, side: Side, now: Instant) {
        let margin = self.safety_margin();

        // A conflict exists when our own claimed extent toward that side
        // overlaps the proposal: either a pending request of ours to the
        // same neighbor, or our in-progress motion. Larger id wins.
        let mut conflict = false;
        let mut defer = false;
        for entry in self.pending.values() {
            if entry.request.kind == RequestKind::BorderMove && entry.side == side {
                conflict = true;
                defer = request.id > entry.request.id;
                tracing::debug!(
                    agent = %self.name,
                    theirs = request.id,
                    ours = entry.request.id,
                    defer,
                    "contending border requests"
                );
                break;
            }
        }
        if matches!(self.state, AgentState::Moving | AgentState::Avoiding) {
            let overlaps = match side {
                Side::Left => self.current.end_position() - margin < request.proposed_border_end,
                Side::Right => self.current.end_position() + margin > request.proposed_border_end,
            };
            if overlaps {
                conflict = true;
                defer = request.id > self.goal_stamp;
                tracing::debug!(
                    agent = %self.name,
                    theirs = request.id,
                    ours = self.goal_stamp,
                    defer,
                    "border request contends with our motion"
                );
            }
        }

        if conflict {
            if defer && matches!(self.state, AgentState::Moving | AgentState::Avoiding) {
                // They outrank us mid-motion: stop first, let their retry
                // find us at rest.
                tracing::debug!(agent = %self.name, "deferring to neighbor, stopping to give way");
                self.begin_emergency_stop(now);
                self.respond(side, request.id, ResponseKind::Wait);
                return;
            }
            if !defer {
                tracing::debug!(agent = %self.name, "keeping priority, neighbor must wait");
                self.respond(side, request.id, ResponseKind::Wait);
                return;
            }
        }

        let clear = match side {
            Side::Left => request.proposed_border_end < self.current.end_position() - margin,
            Side::Right => request.proposed_border_end > self.current.end_position() + margin,
        };
        if clear {
            self.accept_request(request, side, now);
        } else {
            self.try_give_way(request, side, now);
        }
    }

    /// Grants a border move: replan that border from wherever it currently
    /// is to the proposed end, and answer `Accept`.
    pub(crate) fn accept_request(&mut self, request: Request, side: Side, now: Instant) {
        tracing::debug!(
            agent = %self.name,
            request_id = request.id,
            end = request.proposed_border_end,
            side = %side,
            "accepting border move"
        );
        let updated = self.planner().point_to_point(
            self.borders[side].position(now),
            request.proposed_border_end,
            now,
        );
        self.borders[side] = updated;
        self.respond(side, request.id, ResponseKind::Accept);
    }

    /// The proposal reaches into space we occupy: move aside if we can,
    /// recurse toward the opposite neighbor if our own border is in the way.
    fn try_give_way(&mut self, request: Request, side: Side, now: Instant) {
        if !matches!(self.state, AgentState::Idle | AgentState::Requesting) {
            tracing::debug!(agent = %self.name, state = %self.state, "cannot give way in this state");
            self.respond(side, request.id, ResponseKind::Wait);
            return;
        }

        let avoidance = match side {
            Side::Left => request.proposed_border_end + self.border_overshoot(),
            Side::Right => request.proposed_border_end - self.border_overshoot(),
        };
        let margin = self.safety_margin();
        let within = self.borders.left.end_position() + margin < avoidance
            && avoidance < self.borders.right.end_position() - margin;
        tracing::debug!(agent = %self.name, avoidance, within, "attempting to give way");

        if within {
            self.handle_goal(avoidance, AgentState::Avoiding, PendingOrigin::Operator, now);
            self.accept_request(request, side, now);
        } else {
            // Our escape route needs the opposite border moved; the answer
            // to that request is forwarded back to the original requester.
            self.handle_goal(
                avoidance,
                AgentState::Avoiding,
                PendingOrigin::Forwarded { side, request },
                now,
            );
        }
    }

    // ─── Responses to our own requests ───────────────────────────────────

    pub(crate) fn on_response(&mut self, response: Response, side: Side, now: Instant) {
        tracing::debug!(
            agent = %self.name,
            request_id = response.id,
            kind = %response.kind,
            side = %side,
            "incoming response"
        );
        if self.state != AgentState::Requesting {
            tracing::warn!(
                agent = %self.name,
                request_id = response.id,
                state = %self.state,
                "ignoring response outside requesting state"
            );
            return;
        }
        self.metrics.record_response_received(response.id, now);

        let Some(entry) = self.pending.remove(&response.id) else {
            tracing::warn!(
                agent = %self.name,
                request_id = response.id,
                "response for unknown or stale request, ignoring"
            );
            return;
        };

        match response.kind {
            ResponseKind::Accept => self.on_accept(entry, now),
            ResponseKind::Reject => self.on_reject(entry),
            ResponseKind::Wait => self.on_wait(entry, now),
            ResponseKind::StopConfirm => {
                tracing::info!(agent = %self.name, "neighbor confirmed emergency stop");
                self.execute_emergency_stop(now);
            }
        }
    }

    fn on_accept(&mut self, entry: PendingRequest, now: Instant) {
        tracing::info!(agent = %self.name, request_id = entry.request.id, "border move accepted");
        let side = entry.side;
        let updated = self.planner().point_to_point(
            self.borders[side].position(now),
            entry.request.proposed_border_end,
            now,
        );
        self.borders[side] = updated;

        let Some(goal) = entry.goal else {
            tracing::warn!(agent = %self.name, "accept response for a request without a goal");
            return;
        };
        self.accept_goal(goal, entry.request.id, entry.accept_state, now);

        if let PendingOrigin::Forwarded { side: origin_side, request } = entry.origin {
            tracing::debug!(
                agent = %self.name,
                request_id = request.id,
                "chain resolved, forwarding accept upstream"
            );
            self.accept_request(request, origin_side, now);
        }
    }

    fn on_reject(&mut self, entry: PendingRequest) {
        tracing::warn!(agent = %self.name, request_id = entry.request.id, "border move rejected");
        if let Some(goal) = entry.goal {
            self.reject_goal(goal);
        }
        if let PendingOrigin::Forwarded { side, request } = entry.origin {
            self.respond(side, request.id, ResponseKind::Reject);
        }
    }

    fn on_wait(&mut self, mut entry: PendingRequest, now: Instant) {
        tracing::debug!(
            agent = %self.name,
            request_id = entry.request.id,
            "neighbor asked us to wait, retry scheduled"
        );
        entry.retry_at = now + self.retry_interval();
        if let PendingOrigin::Forwarded { side, request } = &entry.origin {
            self.respond(*side, request.id, ResponseKind::Wait);
        }
        self.pending.insert(entry.request.id, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::harness::{rig, rig_with_neighbors};
    use crate::planner::TrajectoryKind;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_goal_within_borders_starts_moving() {
        let mut rig = rig(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(700.0, now);

        assert_eq!(rig.agent.state, AgentState::Moving);
        assert_eq!(rig.agent.current.end_position(), 700.0);
        assert!(rig.agent.pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_goal_on_margin_boundary_is_out_of_bounds() {
        // Goal exactly at right border minus margin requires negotiation;
        // the comparison is strict.
        let mut rig = rig(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(770.0, now);

        // No right neighbor wired: rejected on the spot.
        assert_eq!(rig.agent.state, AgentState::Idle);
        assert!(rig.handle.completion_rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_goal_beyond_hard_wall_rejected() {
        let mut rig = rig(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(2000.0, now);

        assert_eq!(rig.agent.state, AgentState::Idle);
        assert_eq!(rig.agent.current.end_position(), 400.0);
        assert!(rig.handle.completion_rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_border_move_request_carries_overshoot() {
        let mut rig = rig_with_neighbors(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(850.0, now);

        assert_eq!(rig.agent.state, AgentState::Requesting);
        let sent = rig.right.requests.try_recv().expect("request sent");
        assert_eq!(sent.kind, RequestKind::BorderMove);
        assert_eq!(sent.proposed_border_start, 800.0);
        assert!((sent.proposed_border_end - 880.3).abs() < 1e-9);
        let entry = rig.agent.pending.get(&sent.id).expect("pending entry");
        assert_eq!(entry.goal, Some(850.0));
        assert_eq!(entry.side, Side::Right);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_response_updates_border_and_moves() {
        let mut rig = rig_with_neighbors(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(850.0, now);
        let sent = rig.right.requests.try_recv().unwrap();

        let later = now + Duration::from_millis(20);
        rig.agent.on_response(
            Response {
                id: sent.id,
                kind: ResponseKind::Accept,
            },
            Side::Right,
            later,
        );

        assert_eq!(rig.agent.state, AgentState::Moving);
        assert!((rig.agent.borders.right.end_position() - 880.3).abs() < 1e-9);
        assert_eq!(rig.agent.current.end_position(), 850.0);
        assert_eq!(rig.agent.goal_stamp, sent.id);
        assert!(rig.agent.pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_response_abandons_goal() {
        let mut rig = rig_with_neighbors(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(850.0, now);
        let sent = rig.right.requests.try_recv().unwrap();
        rig.agent.on_response(
            Response {
                id: sent.id,
                kind: ResponseKind::Reject,
            },
            Side::Right,
            now + Duration::from_millis(20),
        );

        assert_eq!(rig.agent.state, AgentState::Idle);
        assert_eq!(rig.agent.current.end_position(), 400.0);
        assert!(rig.handle.completion_rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_response_schedules_retry() {
        let mut rig = rig_with_neighbors(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(850.0, now);
        let sent = rig.right.requests.try_recv().unwrap();
        let later = now + Duration::from_millis(15);
        rig.agent.on_response(
            Response {
                id: sent.id,
                kind: ResponseKind::Wait,
            },
            Side::Right,
            later,
        );

        assert_eq!(rig.agent.state, AgentState::Requesting);
        let entry = rig.agent.pending.get(&sent.id).expect("still pending");
        assert_eq!(entry.retry_at, later + Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_resends_identical_request() {
        let mut rig = rig_with_neighbors(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(850.0, now);
        let first = rig.right.requests.try_recv().unwrap();

        // Not due yet.
        rig.agent.on_tick(now + Duration::from_millis(500));
        assert!(rig.right.requests.try_recv().is_err());

        rig.agent.on_tick(now + Duration::from_millis(1100));
        let second = rig.right.requests.try_recv().expect("retried");
        assert_eq!(second.id, first.id);
        assert_eq!(second.proposed_border_end, first.proposed_border_end);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_ignored_outside_requesting() {
        let mut rig = rig(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_response(
            Response {
                id: 99,
                kind: ResponseKind::Accept,
            },
            Side::Right,
            now,
        );
        assert_eq!(rig.agent.state, AgentState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_ignored() {
        let mut rig = rig_with_neighbors(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(850.0, now);
        let sent = rig.right.requests.try_recv().unwrap();

        rig.agent.on_response(
            Response {
                id: sent.id + 1,
                kind: ResponseKind::Accept,
            },
            Side::Right,
            now,
        );

        // Unknown id changed nothing; the real request is still pending.
        assert_eq!(rig.agent.state, AgentState::Requesting);
        assert!(rig.agent.pending.contains_key(&sent.id));
        assert_eq!(rig.agent.borders.right.end_position(), 800.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_reject_collapses_to_one_state_change() {
        let mut rig = rig_with_neighbors(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(850.0, now);
        let sent = rig.right.requests.try_recv().unwrap();
        let reject = Response {
            id: sent.id,
            kind: ResponseKind::Reject,
        };
        rig.agent.on_response(reject, Side::Right, now);
        assert_eq!(rig.agent.state, AgentState::Idle);
        assert!(rig.handle.completion_rx.try_recv().is_ok());

        // Replayed response: dropped by the state guard, no second signal.
        rig.agent.on_response(reject, Side::Right, now);
        assert_eq!(rig.agent.state, AgentState::Idle);
        assert!(rig.handle.completion_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incoming_border_move_accepted_when_clear() {
        // Stationary at 1200 in [800, 1600]; 880.3 clears 1200 - 30.
        let mut rig = rig_with_neighbors(1200.0, 800.0, 1600.0);
        let now = Instant::now();

        rig.agent
            .on_request(Request::border_move(7, 800.0, 880.3), Side::Left, now);

        assert!((rig.agent.borders.left.end_position() - 880.3).abs() < 1e-9);
        let answer = rig.left.responses.try_recv().unwrap();
        assert_eq!(answer.id, 7);
        assert_eq!(answer.kind, ResponseKind::Accept);
        assert_eq!(rig.agent.state, AgentState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incoming_border_move_gives_way_within_borders() {
        let mut rig = rig_with_neighbors(1200.0, 800.0, 1600.0);
        let now = Instant::now();

        // 1430.3 does not clear 1200 + 30, but the avoidance goal 1460.6
        // fits inside [800, 1600] with margin.
        rig.agent
            .on_request(Request::border_move(9, 800.0, 1430.3), Side::Left, now);

        assert_eq!(rig.agent.state, AgentState::Avoiding);
        assert!((rig.agent.current.end_position() - 1460.6).abs() < 1e-9);
        assert!((rig.agent.borders.left.end_position() - 1430.3).abs() < 1e-9);
        let answer = rig.left.responses.try_recv().unwrap();
        assert_eq!(answer.kind, ResponseKind::Accept);
    }

    #[tokio::test(start_paused = true)]
    async fn test_give_way_forwards_when_avoidance_needs_own_border() {
        let mut rig = rig_with_neighbors(1200.0, 800.0, 1600.0);
        let now = Instant::now();

        // Avoidance goal 1585.3 lands beyond 1600 - 30: the demand recurses
        // to the right neighbor under the original id.
        let original = Request::border_move(11, 800.0, 1555.0);
        rig.agent.on_request(original, Side::Left, now);

        assert_eq!(rig.agent.state, AgentState::Requesting);
        assert!(rig.left.responses.try_recv().is_err(), "no answer yet");
        let forwarded = rig.right.requests.try_recv().expect("forwarded request");
        assert_eq!(forwarded.id, 11);
        assert!((forwarded.proposed_border_end - 1615.6).abs() < 1e-9);
        let entry = rig.agent.pending.get(&11).unwrap();
        assert!(matches!(
            entry.origin,
            PendingOrigin::Forwarded { side: Side::Left, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarded_accept_relays_upstream() {
        let mut rig = rig_with_neighbors(1200.0, 800.0, 1600.0);
        let now = Instant::now();

        rig.agent
            .on_request(Request::border_move(11, 800.0, 1555.0), Side::Left, now);
        let forwarded = rig.right.requests.try_recv().unwrap();

        let later = now + Duration::from_millis(25);
        rig.agent.on_response(
            Response {
                id: forwarded.id,
                kind: ResponseKind::Accept,
            },
            Side::Right,
            later,
        );

        // Our right border follows the downstream grant, we avoid to the
        // overshot goal, the left border honors the original proposal, and
        // the original requester hears Accept under its own id.
        assert!((rig.agent.borders.right.end_position() - 1615.6).abs() < 1e-9);
        assert_eq!(rig.agent.state, AgentState::Avoiding);
        assert!((rig.agent.current.end_position() - 1585.3).abs() < 1e-9);
        assert!((rig.agent.borders.left.end_position() - 1555.0).abs() < 1e-9);
        let upstream = rig.left.responses.try_recv().unwrap();
        assert_eq!(upstream.id, 11);
        assert_eq!(upstream.kind, ResponseKind::Accept);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarded_wait_relays_upstream() {
        let mut rig = rig_with_neighbors(1200.0, 800.0, 1600.0);
        let now = Instant::now();

        rig.agent
            .on_request(Request::border_move(11, 800.0, 1555.0), Side::Left, now);
        let forwarded = rig.right.requests.try_recv().unwrap();
        rig.agent.on_response(
            Response {
                id: forwarded.id,
                kind: ResponseKind::Wait,
            },
            Side::Right,
            now,
        );

        let upstream = rig.left.responses.try_recv().unwrap();
        assert_eq!(upstream.kind, ResponseKind::Wait);
        // The entry survives for the upstream retry to re-enter.
        assert!(rig.agent.pending.contains_key(&11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarded_entry_is_not_retried_locally() {
        let mut rig = rig_with_neighbors(1200.0, 800.0, 1600.0);
        let now = Instant::now();

        rig.agent
            .on_request(Request::border_move(11, 800.0, 1555.0), Side::Left, now);
        rig.right.requests.try_recv().unwrap();

        rig.agent.on_tick(now + Duration::from_secs(3));
        assert!(
            rig.right.requests.try_recv().is_err(),
            "forwarded requests ride the upstream retry"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_contention_older_pending_keeps_priority() {
        let mut rig = rig_with_neighbors(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(850.0, now);
        let ours = rig.right.requests.try_recv().unwrap();

        // Incoming from the same neighbor with a smaller id loses the tie.
        let incoming = Request::border_move(ours.id - 10, 800.0, 500.0);
        rig.agent.on_request(incoming, Side::Right, now);

        let answer = rig.right.responses.try_recv().unwrap();
        assert_eq!(answer.kind, ResponseKind::Wait);
        assert_eq!(rig.agent.state, AgentState::Requesting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_contention_newer_incoming_wins() {
        let mut rig = rig_with_neighbors(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(850.0, now);
        let ours = rig.right.requests.try_recv().unwrap();

        // Larger id outranks our pending request; 420 cannot clear our
        // position at rest (400 + 30), so we move aside to 389.7.
        let incoming = Request::border_move(ours.id + 10, 800.0, 420.0);
        rig.agent.on_request(incoming, Side::Right, now);

        assert_eq!(rig.agent.state, AgentState::Avoiding);
        assert!((rig.agent.current.end_position() - 389.7).abs() < 1e-9);
        assert!((rig.agent.borders.right.end_position() - 420.0).abs() < 1e-9);
        let answer = rig.right.responses.try_recv().unwrap();
        assert_eq!(answer.kind, ResponseKind::Accept);
    }

    #[tokio::test(start_paused = true)]
    async fn test_contention_with_motion_stops_and_waits() {
        let mut rig = rig_with_neighbors(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(700.0, now);
        assert_eq!(rig.agent.state, AgentState::Moving);
        let stamp = rig.agent.goal_stamp;

        // The neighbor wants border at 650, inside our claimed extent, with
        // a newer id: we must stop before yielding.
        let incoming = Request::border_move(stamp + 10, 800.0, 650.0);
        rig.agent
            .on_request(incoming, Side::Right, now + Duration::from_millis(100));

        assert_eq!(rig.agent.state, AgentState::Stopping);
        assert_eq!(rig.agent.current.kind(), TrajectoryKind::Stopping);
        let answer = rig.right.responses.try_recv().unwrap();
        assert_eq!(answer.kind, ResponseKind::Wait);
    }

    #[tokio::test(start_paused = true)]
    async fn test_contention_with_motion_older_incoming_waits() {
        let mut rig = rig_with_neighbors(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(700.0, now);
        let stamp = rig.agent.goal_stamp;

        let incoming = Request::border_move(stamp - 10, 800.0, 650.0);
        rig.agent
            .on_request(incoming, Side::Right, now + Duration::from_millis(100));

        // We keep moving; they retry later.
        assert_eq!(rig.agent.state, AgentState::Moving);
        let answer = rig.right.responses.try_recv().unwrap();
        assert_eq!(answer.kind, ResponseKind::Wait);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_agent_postpones_give_way() {
        let mut rig = rig_with_neighbors(1200.0, 800.0, 1600.0);
        let now = Instant::now();
        rig.agent.state = AgentState::Busy;

        rig.agent
            .on_request(Request::border_move(3, 800.0, 1430.3), Side::Left, now);

        let answer = rig.left.responses.try_recv().unwrap();
        assert_eq!(answer.kind, ResponseKind::Wait);
        assert_eq!(rig.agent.state, AgentState::Busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_agent_ignores_goals() {
        let mut rig = rig(400.0, 0.0, 800.0);
        rig.agent.state = AgentState::Busy;
        rig.agent.on_goal(700.0, Instant::now());
        assert_eq!(rig.agent.state, AgentState::Busy);
        assert_eq!(rig.agent.current.end_position(), 400.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_moving_then_busy_then_idle_cycle() {
        let mut rig = rig(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(700.0, now);
        let travel = rig.agent.current.duration();

        let arrived = now + Duration::from_secs_f64(travel + 0.1);
        rig.agent.on_tick(arrived);
        assert_eq!(rig.agent.state, AgentState::Busy);

        rig.agent.on_tick(arrived + Duration::from_millis(4000));
        assert_eq!(rig.agent.state, AgentState::Busy);

        rig.agent.on_tick(arrived + Duration::from_millis(5100));
        assert_eq!(rig.agent.state, AgentState::Idle);
        assert!(rig.handle.completion_rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_goal_at_current_position_is_a_busy_cycle() {
        let mut rig = rig(400.0, 0.0, 800.0);
        let now = Instant::now();

        rig.agent.on_goal(400.0, now);
        assert_eq!(rig.agent.state, AgentState::Moving);
        // Stationary trajectory finishes immediately.
        rig.agent.on_tick(now + Duration::from_millis(10));
        assert_eq!(rig.agent.state, AgentState::Busy);
    }
}
