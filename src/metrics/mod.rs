//! Per-agent coordination metrics.
//!
//! Tracks request round-trip times, the latency between receiving a goal and
//! actually starting to move, and how many messages a scenario cost. The
//! agent owns an `Arc<MessageMetrics>` and records from its event loop;
//! tests and the binary snapshot a [`MetricsReport`] from the outside.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::protocol::RequestId;

#[derive(Debug, Default)]
struct MetricsInner {
    /// Send timestamps of requests still waiting for a response.
    in_flight: HashMap<RequestId, Instant>,
    round_trips: Vec<Duration>,
    total_round_trip: Duration,
    goal_received_at: Option<Instant>,
    goal_to_movement: Vec<Duration>,
    /// Requests and responses sent since the last scenario reset.
    scenario_messages: u64,
}

#[derive(Debug, Default)]
pub struct MessageMetrics {
    inner: Mutex<MetricsInner>,
}

impl MessageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request_sent(&self, id: RequestId, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        inner.in_flight.insert(id, now);
        inner.scenario_messages += 1;
    }

    pub fn record_response_sent(&self) {
        self.inner.lock().unwrap().scenario_messages += 1;
    }

    /// Completes the round trip for `id` if we still remember sending it.
    /// Retries reuse ids, so a second response to the same id is not counted
    /// twice.
    pub fn record_response_received(&self, id: RequestId, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(sent) = inner.in_flight.remove(&id) {
            let rtt = now.duration_since(sent);
            inner.round_trips.push(rtt);
            inner.total_round_trip += rtt;
        }
    }

    pub fn record_goal_received(&self, now: Instant) {
        self.inner.lock().unwrap().goal_received_at = Some(now);
    }

    pub fn record_movement_start(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(received) = inner.goal_received_at {
            let delay = now.duration_since(received);
            inner.goal_to_movement.push(delay);
        }
    }

    /// Resets the scenario message counter; round-trip history is kept.
    pub fn start_scenario(&self) {
        self.inner.lock().unwrap().scenario_messages = 0;
    }

    pub fn scenario_message_count(&self) -> u64 {
        self.inner.lock().unwrap().scenario_messages
    }

    pub fn report(&self) -> MetricsReport {
        let inner = self.inner.lock().unwrap();
        let average_round_trip_ms = if inner.round_trips.is_empty() {
            0.0
        } else {
            inner.total_round_trip.as_secs_f64() * 1000.0 / inner.round_trips.len() as f64
        };
        let average_goal_to_movement_ms = if inner.goal_to_movement.is_empty() {
            0.0
        } else {
            inner.goal_to_movement.iter().sum::<Duration>().as_secs_f64() * 1000.0
                / inner.goal_to_movement.len() as f64
        };
        MetricsReport {
            average_round_trip_ms,
            average_goal_to_movement_ms,
            completed_round_trips: inner.round_trips.len() as u64,
            goal_to_movement_samples: inner.goal_to_movement.len() as u64,
            scenario_messages: inner.scenario_messages,
        }
    }
}

/// Snapshot of one agent's metrics, serializable for operator output.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub average_round_trip_ms: f64,
    pub average_goal_to_movement_ms: f64,
    pub completed_round_trips: u64,
    pub goal_to_movement_samples: u64,
    pub scenario_messages: u64,
}
