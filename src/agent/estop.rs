//! The emergency-stop handshake.
//!
//! Braking is only allowed to carry the cart across a border after the
//! neighbor owning that border has committed to stopping too. An agent that
//! must stop first checks where its hypothetical stop would land; if that
//! position (or a goal stored for after the stop) crosses a border, it sends
//! `EmergencyStop` to the neighbor on that side and brakes only once
//! `StopConfirm` comes back. Receivers run the same check themselves, which
//! cascades the handshake outward breadth-first, and answer after their own
//! stop is committed.

use super::{Agent, AgentState, OwedStopConfirm, PendingOrigin, PendingRequest};
use crate::protocol::{Request, RequestKind, ResponseKind, Side, SideMap, next_origin_id};
use tokio::time::Instant;

impl Agent {
    /// Entry point for every local stop trigger: the operator channel, a
    /// goal change mid-motion, or yielding to a higher-priority neighbor.
    ///
    /// Decides between stopping right away and first collecting stop
    /// confirmations from the neighbors whose borders the stop (or the
    /// pending goal after it) would cross.
    pub(crate) fn begin_emergency_stop(&mut self, now: Instant) {
        tracing::info!(agent = %self.name, "emergency stop initiated");

        let stop = self.planner().stop_from(&self.current, now);
        let stop_position = stop.end_position();
        let violates = self.border_violations(stop_position);

        let mut expansion_needed = SideMap::new(false, false);
        if let Some(goal) = self.pending_goal_after_stop {
            let margin = self.safety_margin();
            expansion_needed.left = self.borders.left.end_position() + margin >= goal;
            expansion_needed.right = self.borders.right.end_position() - margin <= goal;
            tracing::debug!(
                agent = %self.name,
                goal,
                left = expansion_needed.left,
                right = expansion_needed.right,
                "pending goal border expansion needs"
            );
        }

        let mut awaiting_confirmation = false;
        for side in [Side::Left, Side::Right] {
            if !(violates[side] || expansion_needed[side]) {
                continue;
            }
            // A violated hard wall has nobody to coordinate with; the stop
            // itself is still the safest available action.
            if self.tx.requests[side].is_none() {
                continue;
            }
            let id = next_origin_id();
            let request = Request::emergency_stop(id);
            self.pending.insert(
                id,
                PendingRequest {
                    request,
                    side,
                    goal: None,
                    retry_at: now + self.retry_interval(),
                    accept_state: AgentState::Stopping,
                    origin: PendingOrigin::Operator,
                },
            );
            self.metrics.record_request_sent(id, now);
            tracing::warn!(
                agent = %self.name,
                side = %side,
                stop_position,
                request_id = id,
                "stop requires neighbor confirmation"
            );
            self.send_request(side, request);
            awaiting_confirmation = true;
        }

        if awaiting_confirmation {
            self.state = AgentState::Requesting;
            tracing::debug!(agent = %self.name, "waiting for stop confirmations");
        } else {
            tracing::info!(
                agent = %self.name,
                stop_position,
                "stop position within borders, stopping immediately"
            );
            self.execute_emergency_stop(now);
        }
    }

    /// Commits to the stop: replaces the current trajectory with a stopping
    /// profile, freezes any border this stop crosses (or that belongs to a
    /// neighbor known to be stopping), cancels ordinary pendings, and pays
    /// any owed `StopConfirm`.
    pub(crate) fn execute_emergency_stop(&mut self, now: Instant) {
        tracing::info!(agent = %self.name, "executing emergency stop");

        let stop = self.planner().stop_from(&self.current, now);
        let violates = self.border_violations(stop.end_position());
        let owed_side = self.owed_stop_confirm.map(|owed| owed.side);

        self.state = AgentState::Stopping;
        self.current = stop;

        for side in [Side::Left, Side::Right] {
            let neighbor_stopping = owed_side == Some(side);
            if (violates[side] || neighbor_stopping) && !self.borders[side].is_finished(now) {
                let frozen = self.planner().stop_from(&self.borders[side], now);
                self.borders[side] = frozen;
                tracing::debug!(
                    agent = %self.name,
                    side = %side,
                    neighbor_stopping,
                    "freezing border trajectory"
                );
            }
        }

        // Everything except the stop handshake itself is void now; border
        // moves will be renegotiated from rest if still wanted.
        self.pending
            .retain(|_, entry| entry.request.kind == RequestKind::EmergencyStop);

        if let Some(owed) = self.owed_stop_confirm.take() {
            tracing::debug!(
                agent = %self.name,
                side = %owed.side,
                request_id = owed.request_id,
                "confirming neighbor's stop after committing our own"
            );
            self.respond(owed.side, owed.request_id, ResponseKind::StopConfirm);
        }
    }

    /// A neighbor asks us to commit to stopping before it brakes across our
    /// shared border. The confirmation is owed only once our own stop is
    /// underway, which may first require the handshake to cascade further.
    pub(crate) fn on_estop_request(&mut self, request: Request, side: Side, now: Instant) {
        tracing::info!(
            agent = %self.name,
            request_id = request.id,
            side = %side,
            "neighbor requests emergency stop"
        );
        if self.tx.responses[side].is_some() {
            self.owed_stop_confirm = Some(OwedStopConfirm {
                request_id: request.id,
                side,
            });
        }
        self.begin_emergency_stop(now);
    }

    fn border_violations(&self, stop_position: f64) -> SideMap<bool> {
        let margin = self.safety_margin();
        SideMap::new(
            stop_position < self.borders.left.end_position() + margin,
            stop_position > self.borders.right.end_position() - margin,
        )
    }
}
