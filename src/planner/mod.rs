//! Jerk-limited trajectory planning.
//!
//! The planner produces two kinds of profiles: a seven-phase point-to-point
//! motion between two rest positions, and a three-phase stop computed from
//! the live state of an in-progress trajectory. Both respect the configured
//! jerk, acceleration, and velocity bounds in magnitude.
//!
//! Phase order of a point-to-point profile (signs given for forward motion):
//! jerk+, hold accel, jerk-, cruise, jerk-, hold decel, jerk+. Durations are
//! `tj, ta, tj, tv, tj, ta, tj`, with `ta`/`tv` possibly zero depending on
//! which bound saturates first.

mod trajectory;

pub use trajectory::{Breakpoint, Kinematics, Trajectory, TrajectoryKind};

use crate::config::PlannerConfig;
use tokio::time::Instant;

/// Displacements below this are not worth planning; they collapse to a
/// stationary trajectory.
pub const MIN_DISTANCE: f64 = 1e-9;

/// Which kinematic bound shapes a point-to-point profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Regime {
    /// `v_max` is reached and the acceleration phase holds `a_max`.
    AccelLimitedWithMaxVelocity,
    /// `v_max` is reached before acceleration can saturate.
    VelocityLimited,
    /// `a_max` saturates but the move is too short to reach `v_max`.
    AccelLimitedWithoutMaxVelocity,
    /// Too short for either bound; pure jerk profile.
    JerkLimited,
}

#[derive(Debug, Clone)]
pub struct MotionPlanner {
    limits: PlannerConfig,
}

impl MotionPlanner {
    /// Limits must be strictly positive; config validation reports bad
    /// values to the operator before this is ever reached.
    pub fn new(limits: PlannerConfig) -> Self {
        assert!(
            limits.max_jerk > 0.0 && limits.max_acceleration > 0.0 && limits.max_velocity > 0.0,
            "planner limits must be strictly positive: {limits:?}"
        );
        Self { limits }
    }

    pub fn limits(&self) -> &PlannerConfig {
        &self.limits
    }

    pub fn stationary(&self, position: f64, t0: Instant) -> Trajectory {
        Trajectory::stationary(position, t0)
    }

    /// Plans a rest-to-rest motion from `start` to `end` beginning at `t0`.
    pub fn point_to_point(&self, start: f64, end: f64, t0: Instant) -> Trajectory {
        let s = (end - start).abs();
        if s < MIN_DISTANCE {
            return Trajectory::stationary(start, t0);
        }

        let j = self.limits.max_jerk;
        let a_max = self.limits.max_acceleration;
        let v_max = self.limits.max_velocity;

        // Velocity reached by a zero-length hold phase, distance consumed by
        // the triangular acceleration profile alone, and distance needed to
        // reach v_max at all.
        let va = a_max * a_max / j;
        let sa = 2.0 * a_max.powi(3) / (j * j);
        let sv = if v_max * j < a_max * a_max {
            2.0 * v_max * (v_max / j).sqrt()
        } else {
            v_max * (v_max / a_max + a_max / j)
        };

        let regime = if v_max <= va {
            if s > sa || s > sv {
                Regime::VelocityLimited
            } else {
                Regime::JerkLimited
            }
        } else if s <= sa {
            Regime::JerkLimited
        } else if s > sv {
            Regime::AccelLimitedWithMaxVelocity
        } else {
            Regime::AccelLimitedWithoutMaxVelocity
        };

        // Boundary times: t_j ends the first jerk phase, t_a the hold phase,
        // t_v the cruise. The full profile mirrors these around the cruise.
        let (t_j, t_a, t_v) = match regime {
            Regime::JerkLimited => {
                let tj = (s / (2.0 * j)).cbrt();
                (tj, tj, 2.0 * tj)
            }
            Regime::VelocityLimited => {
                let tj = (v_max / j).sqrt();
                (tj, tj, s / v_max)
            }
            Regime::AccelLimitedWithMaxVelocity => (a_max / j, v_max / a_max, s / v_max),
            Regime::AccelLimitedWithoutMaxVelocity => {
                let tj = a_max / j;
                let ta =
                    0.5 * (((4.0 * s * j * j + a_max.powi(3)) / (a_max * j * j)).sqrt() - tj);
                (tj, ta, ta + tj)
            }
        };

        let jerk = if start < end { j } else { -j };
        let d_j = t_j;
        let d_a = t_a - t_j;
        let d_v = t_v - t_j - t_a;

        // Integrate the accelerating half, mirror it for the decelerating
        // half. The mirrored states are exact by symmetry, which keeps the
        // endpoint free of accumulated integration error.
        let p0 = Breakpoint {
            t: 0.0,
            position: start,
            velocity: 0.0,
            acceleration: 0.0,
            jerk,
        };
        let p1 = p0.advanced(d_j).with_jerk(0.0);
        let p2 = p1.advanced(d_a).with_jerk(-jerk);
        let p3 = p2.advanced(d_j).with_jerk(0.0);
        let p4 = p3.advanced(d_v).with_jerk(-jerk);
        let p5 = Breakpoint {
            t: t_v + t_j,
            position: end - (p2.position - start),
            velocity: p2.velocity,
            acceleration: -p2.acceleration,
            jerk: 0.0,
        };
        let p6 = Breakpoint {
            t: t_v + t_a,
            position: end - (p1.position - start),
            velocity: p1.velocity,
            acceleration: -p1.acceleration,
            jerk,
        };
        let p7 = Breakpoint {
            t: t_v + t_a + t_j,
            position: end,
            velocity: 0.0,
            acceleration: 0.0,
            jerk: 0.0,
        };

        tracing::debug!(
            start,
            end,
            regime = ?regime,
            duration = p7.t,
            "planned point-to-point trajectory"
        );

        Trajectory {
            t0,
            start,
            end,
            kind: TrajectoryKind::PointToPoint,
            points: [p0, p1, p2, p3, p4, p5, p6, p7],
        }
    }

    /// The fastest safe stop from `source`'s state at `now`.
    ///
    /// Three slots: brake (drive acceleration to the maximum opposing
    /// value), hold, release (ramp acceleration and velocity to exactly
    /// zero). Slot durations depend on which phase of the source is being
    /// interrupted; a finished source yields a stationary trajectory.
    pub fn stop_from(&self, source: &Trajectory, now: Instant) -> Trajectory {
        let elapsed = source.elapsed(now);
        if elapsed >= source.duration() {
            return self.stationary(source.end_position(), now);
        }

        let state = source.sample_elapsed(elapsed);
        let dir = if state.velocity != 0.0 {
            state.velocity.signum()
        } else if state.acceleration != 0.0 {
            state.acceleration.signum()
        } else {
            return self.stationary(state.position, now);
        };
        let brake = -dir * self.limits.max_jerk;

        let (phase, into, remaining) = source.phase_at(elapsed);
        let pts = &source.points;
        let (t_brake, t_hold, t_release) = match source.kind {
            TrajectoryKind::Stopping => {
                // Re-stopping a stop keeps the remainder of the slot we are
                // in plus the untouched later slots; the result lands on the
                // same final position.
                let holds = pts[2].t - pts[1].t;
                let releases = pts[3].t - pts[2].t;
                match phase {
                    1 => (remaining, holds, releases),
                    2 => (0.0, remaining, releases),
                    _ => (0.0, 0.0, remaining),
                }
            }
            TrajectoryKind::PointToPoint => {
                let tj = pts[1].t - pts[0].t;
                let ta = pts[2].t - pts[1].t;
                match phase {
                    1 => (2.0 * into, 0.0, into),
                    2 => (2.0 * tj, into, tj),
                    3 => (remaining + tj, ta, tj),
                    4 => (tj, ta, tj),
                    5 => (remaining, ta, tj),
                    6 => (0.0, remaining, tj),
                    _ => (0.0, 0.0, remaining),
                }
            }
        };

        let p0 = Breakpoint {
            t: 0.0,
            position: state.position,
            velocity: state.velocity,
            acceleration: state.acceleration,
            jerk: brake,
        };
        let p1 = p0.advanced(t_brake).with_jerk(0.0);
        let p2 = p1.advanced(t_hold).with_jerk(-brake);
        let mut p3 = p2.advanced(t_release).with_jerk(0.0);
        // The profile lands on rest analytically; zero the float dust so
        // downstream equality checks on the terminal state hold.
        p3.velocity = 0.0;
        p3.acceleration = 0.0;

        tracing::debug!(
            from = state.position,
            to = p3.position,
            duration = p3.t,
            "planned stopping trajectory"
        );

        Trajectory {
            t0: now,
            start: state.position,
            end: p3.position,
            kind: TrajectoryKind::Stopping,
            points: [p0, p1, p2, p3, p3, p3, p3, p3],
        }
    }
}
