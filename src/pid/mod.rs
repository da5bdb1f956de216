//! Discrete-time PID controller.
//!
//! Two of these run in series inside every agent: a position loop whose
//! output is the velocity setpoint of a velocity loop, whose output is the
//! force handed to the plant. Both share the agent's fixed control tick.

use crate::config::PidConfig;

#[derive(Debug, Clone)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    /// Fixed sample interval in seconds.
    dt: f64,
    /// Output is clamped to `[-limit, limit]`.
    limit: f64,
    setpoint: f64,
    integral: f64,
    previous_error: f64,
}

impl Pid {
    pub fn new(cfg: &PidConfig) -> Self {
        Self {
            kp: cfg.kp,
            ki: cfg.ki,
            kd: cfg.kd,
            dt: cfg.sample_time().as_secs_f64(),
            limit: cfg.output_limit,
            setpoint: 0.0,
            integral: 0.0,
            previous_error: 0.0,
        }
    }

    /// Sets a new setpoint, resetting the accumulated integral and previous
    /// error so stale history cannot wind up against the new target.
    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
        self.integral = 0.0;
        self.previous_error = 0.0;
    }

    /// Advances the controller one sample and returns the clamped output.
    pub fn update(&mut self, input: f64) -> f64 {
        let error = self.setpoint - input;
        self.integral += error * self.dt;
        let derivative = (error - self.previous_error) / self.dt;
        self.previous_error = error;

        let output = self.kp * error + self.ki * self.integral + self.kd * derivative;
        output.clamp(-self.limit, self.limit)
    }
}
