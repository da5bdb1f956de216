//! Time-parameterized motion profiles.
//!
//! A [`Trajectory`] is an immutable snapshot: eight breakpoints, each
//! carrying the state at a phase boundary and the constant jerk applied over
//! the phase that starts there. Sampling integrates forward from the
//! breakpoint preceding the queried instant. Agents never mutate a live
//! trajectory; they replace it wholesale, so a control-loop read is always
//! coherent.

use serde::Serialize;
use tokio::time::Instant;

/// Instantaneous kinematic state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Kinematics {
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub jerk: f64,
}

/// State at one phase boundary. `jerk` is the constant jerk applied over the
/// phase beginning here, not the jerk that produced this state.
#[derive(Debug, Clone, Copy)]
pub struct Breakpoint {
    /// Seconds since the trajectory's `t0`. Non-decreasing across the array.
    pub t: f64,
    pub position: f64,
    pub velocity: f64,
    pub acceleration: f64,
    pub jerk: f64,
}

impl Breakpoint {
    /// The state `dt` seconds into this breakpoint's phase.
    pub(crate) fn kinematics_at(&self, dt: f64) -> Kinematics {
        Kinematics {
            position: self.position
                + self.velocity * dt
                + 0.5 * self.acceleration * dt * dt
                + self.jerk * dt * dt * dt / 6.0,
            velocity: self.velocity + self.acceleration * dt + 0.5 * self.jerk * dt * dt,
            acceleration: self.acceleration + self.jerk * dt,
            jerk: self.jerk,
        }
    }

    /// The breakpoint `dt` seconds later under this breakpoint's jerk.
    pub(crate) fn advanced(&self, dt: f64) -> Breakpoint {
        let next = self.kinematics_at(dt);
        Breakpoint {
            t: self.t + dt,
            position: next.position,
            velocity: next.velocity,
            acceleration: next.acceleration,
            jerk: self.jerk,
        }
    }

    pub(crate) fn with_jerk(mut self, jerk: f64) -> Breakpoint {
        self.jerk = jerk;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrajectoryKind {
    /// Seven phases, rest to rest.
    PointToPoint,
    /// Three braking phases from a mid-motion state; slots 4..7 collapse to
    /// the final state.
    Stopping,
}

#[derive(Debug, Clone)]
pub struct Trajectory {
    pub(crate) t0: Instant,
    pub(crate) start: f64,
    pub(crate) end: f64,
    pub(crate) kind: TrajectoryKind,
    pub(crate) points: [Breakpoint; 8],
}

impl Trajectory {
    /// A degenerate trajectory that holds `position` forever.
    pub fn stationary(position: f64, t0: Instant) -> Self {
        let rest = Breakpoint {
            t: 0.0,
            position,
            velocity: 0.0,
            acceleration: 0.0,
            jerk: 0.0,
        };
        Self {
            t0,
            start: position,
            end: position,
            kind: TrajectoryKind::PointToPoint,
            points: [rest; 8],
        }
    }

    pub fn kind(&self) -> TrajectoryKind {
        self.kind
    }

    pub fn started_at(&self) -> Instant {
        self.t0
    }

    pub fn start_position(&self) -> f64 {
        self.start
    }

    /// Where the motion comes to rest. This is the value border checks and
    /// stop-position checks reason about.
    pub fn end_position(&self) -> f64 {
        self.end
    }

    /// Total duration in seconds.
    pub fn duration(&self) -> f64 {
        self.points[7].t
    }

    /// Seconds since `t0`, saturating at zero for instants before the start.
    pub fn elapsed(&self, now: Instant) -> f64 {
        now.duration_since(self.t0).as_secs_f64()
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        self.elapsed(now) >= self.duration()
    }

    pub fn sample(&self, now: Instant) -> Kinematics {
        self.sample_elapsed(self.elapsed(now))
    }

    pub fn position(&self, now: Instant) -> f64 {
        self.sample(now).position
    }

    pub fn velocity(&self, now: Instant) -> f64 {
        self.sample(now).velocity
    }

    pub fn acceleration(&self, now: Instant) -> f64 {
        self.sample(now).acceleration
    }

    pub(crate) fn sample_elapsed(&self, t: f64) -> Kinematics {
        if t <= 0.0 {
            let first = &self.points[0];
            return Kinematics {
                position: first.position,
                velocity: first.velocity,
                acceleration: first.acceleration,
                jerk: first.jerk,
            };
        }
        if t >= self.points[7].t {
            // At or past the final breakpoint the profile is at rest.
            return Kinematics {
                position: self.points[7].position,
                velocity: 0.0,
                acceleration: 0.0,
                jerk: 0.0,
            };
        }
        let (phase, into, _) = self.phase_at(t);
        self.points[phase - 1].kinematics_at(into)
    }

    /// Which phase (1..=7) the elapsed time `t` falls in, how far into it we
    /// are, and how much of it remains. Zero-length phases are skipped in
    /// favor of the earliest matching boundary.
    pub(crate) fn phase_at(&self, t: f64) -> (usize, f64, f64) {
        for phase in 1..=7 {
            if t <= self.points[phase].t {
                return (
                    phase,
                    t - self.points[phase - 1].t,
                    self.points[phase].t - t,
                );
            }
        }
        (7, t - self.points[6].t, 0.0)
    }
}
