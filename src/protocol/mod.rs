//! Wire types and channel plumbing for neighbor-to-neighbor negotiation.
//!
//! Agents on the track talk to their immediate neighbors only, over typed
//! `mpsc` channels wired symmetrically at startup. Two message kinds travel
//! on the request channels and four on the response channels:
//!
//! | Message | Meaning |
//! |---------|---------|
//! | `BorderMove` | "shift our shared border to this position" |
//! | `EmergencyStop` | "commit to stopping before I brake across our border" |
//! | `Accept` / `Reject` / `Wait` | final / final / transient answer to a `BorderMove` |
//! | `StopConfirm` | "my stop is underway, yours may begin" |
//!
//! Request ids are nanosecond origination timestamps and double as priorities
//! during contention. Channels are bounded and best-effort: a full channel
//! drops the message, which the protocol treats the same as network loss.

mod channels;

pub use channels::{AgentHandle, AgentRx, AgentTx, CHANNEL_CAPACITY, agent_channels};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicI64, Ordering};

// ─── Sides ───────────────────────────────────────────────────────────────

/// Which neighbor a message concerns, from the perspective of the agent
/// handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// A pair of values indexed by [`Side`]. Used for border trajectories,
/// neighbor channels, and anything else that exists once per side.
#[derive(Debug, Clone, Copy, Default)]
pub struct SideMap<T> {
    pub left: T,
    pub right: T,
}

impl<T> SideMap<T> {
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }
}

impl<T> Index<Side> for SideMap<T> {
    type Output = T;

    fn index(&self, side: Side) -> &T {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

impl<T> IndexMut<Side> for SideMap<T> {
    fn index_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

// ─── Requests & responses ────────────────────────────────────────────────

/// Unique request identifier: nanosecond wall-clock timestamp at
/// origination. Doubles as a priority during contention.
pub type RequestId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    BorderMove,
    EmergencyStop,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::BorderMove => write!(f, "border-move"),
            RequestKind::EmergencyStop => write!(f, "emergency-stop"),
        }
    }
}

/// A request sent to an immediate neighbor. For `EmergencyStop` requests the
/// border fields carry no meaning and are zeroed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub kind: RequestKind,
    /// Where the border currently ends. Informational, used only in logs.
    pub proposed_border_start: f64,
    /// Where the sender wants the shared border to end up.
    pub proposed_border_end: f64,
}

impl Request {
    pub fn border_move(id: RequestId, start: f64, end: f64) -> Self {
        Self {
            id,
            kind: RequestKind::BorderMove,
            proposed_border_start: start,
            proposed_border_end: end,
        }
    }

    pub fn emergency_stop(id: RequestId) -> Self {
        Self {
            id,
            kind: RequestKind::EmergencyStop,
            proposed_border_start: 0.0,
            proposed_border_end: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// The border move is granted; the responder has replanned its border.
    Accept,
    /// Permanent refusal: hard wall or a goal nothing on this side can satisfy.
    Reject,
    /// Transient refusal: the responder is contended or busy, retry later.
    Wait,
    /// The responder's emergency stop is underway.
    StopConfirm,
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseKind::Accept => write!(f, "accept"),
            ResponseKind::Reject => write!(f, "reject"),
            ResponseKind::Wait => write!(f, "wait"),
            ResponseKind::StopConfirm => write!(f, "stop-confirm"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    pub kind: ResponseKind,
}

// ─── Id clock ────────────────────────────────────────────────────────────

/// Returns a fresh request id / goal timestamp.
///
/// Ids are nanosecond wall-clock timestamps, kept strictly increasing across
/// the process so that a stepped clock cannot hand out duplicate priorities.
pub fn next_origin_id() -> RequestId {
    static HIGH_WATER: AtomicI64 = AtomicI64::new(0);

    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let mut last = HIGH_WATER.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match HIGH_WATER.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}
