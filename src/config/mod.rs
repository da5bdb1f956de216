//! Configuration for tracks, agents, and the simulated network.
//!
//! Everything deserializes from TOML with per-field defaults, so a config
//! file only needs to name what it changes. `TrackConfig::load` reads an
//! optional file; absent file means defaults (two carts on a 1600-unit
//! track).

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Gains and limits of one PID loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    #[serde(default = "default_sample_time_ms")]
    pub sample_time_ms: u64,
    pub output_limit: f64,
}

fn default_sample_time_ms() -> u64 {
    10
}

impl PidConfig {
    pub fn sample_time(&self) -> Duration {
        Duration::from_millis(self.sample_time_ms)
    }
}

/// Kinematic bounds the trajectory planner must honor. All strictly positive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub max_jerk: f64,
    pub max_acceleration: f64,
    pub max_velocity: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_jerk: 200.0,
            max_acceleration: 100.0,
            max_velocity: 300.0,
        }
    }
}

/// Per-agent coordination parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Clearance added to every border comparison, in plant units.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    /// Requested border moves overshoot the goal by this factor times the
    /// safety margin, so the accepted border strictly clears the goal.
    #[serde(default = "default_overshoot_factor")]
    pub overshoot_factor: f64,
    #[serde(default = "default_control_tick_ms")]
    pub control_tick_ms: u64,
    /// Dwell at a reached goal before accepting the next one.
    #[serde(default = "default_busy_dwell_ms")]
    pub busy_dwell_ms: u64,
    /// Fixed interval between resends of an unanswered request.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_position_pid")]
    pub position_pid: PidConfig,
    #[serde(default = "default_velocity_pid")]
    pub velocity_pid: PidConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
}

fn default_safety_margin() -> f64 {
    30.0
}

fn default_overshoot_factor() -> f64 {
    1.01
}

fn default_control_tick_ms() -> u64 {
    10
}

fn default_busy_dwell_ms() -> u64 {
    5000
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_position_pid() -> PidConfig {
    PidConfig {
        kp: 100.0,
        ki: 0.0,
        kd: 0.0,
        sample_time_ms: 10,
        output_limit: 300.0,
    }
}

fn default_velocity_pid() -> PidConfig {
    PidConfig {
        kp: 150.0,
        ki: 10.0,
        kd: 0.0,
        sample_time_ms: 10,
        output_limit: 150.0,
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            safety_margin: default_safety_margin(),
            overshoot_factor: default_overshoot_factor(),
            control_tick_ms: default_control_tick_ms(),
            busy_dwell_ms: default_busy_dwell_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            position_pid: default_position_pid(),
            velocity_pid: default_velocity_pid(),
            planner: PlannerConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn control_tick(&self) -> Duration {
        Duration::from_millis(self.control_tick_ms)
    }

    pub fn busy_dwell(&self) -> Duration {
        Duration::from_millis(self.busy_dwell_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Delay and loss injected between every neighbor pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Probability in `[0, 1]` that a message is dropped in flight.
    #[serde(default)]
    pub loss_probability: f64,
}

fn default_min_delay_ms() -> u64 {
    10
}

fn default_max_delay_ms() -> u64 {
    20
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            loss_probability: 0.0,
        }
    }
}

impl NetworkConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// One cart and its initial operating segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartConfig {
    pub name: String,
    pub position: f64,
    pub left_border: f64,
    pub right_border: f64,
    #[serde(default = "default_mass")]
    pub mass: f64,
    #[serde(default = "default_width")]
    pub width: f64,
}

fn default_mass() -> f64 {
    1.0
}

fn default_width() -> f64 {
    50.0
}

/// The whole deployment: agents, carts, and the wire between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_physics_tick_ms")]
    pub physics_tick_ms: u64,
    #[serde(default = "default_carts")]
    pub carts: Vec<CartConfig>,
}

fn default_physics_tick_ms() -> u64 {
    1
}

fn default_carts() -> Vec<CartConfig> {
    evenly_spread_carts(2, 1600.0)
}

/// `count` carts at the centers of equal segments over `[0, span]`.
pub fn evenly_spread_carts(count: usize, span: f64) -> Vec<CartConfig> {
    let segment = span / count as f64;
    (0..count)
        .map(|i| CartConfig {
            name: format!("Cart {}", i + 1),
            position: (i as f64 + 0.5) * segment,
            left_border: i as f64 * segment,
            right_border: (i as f64 + 1.0) * segment,
            mass: default_mass(),
            width: default_width(),
        })
        .collect()
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            network: NetworkConfig::default(),
            physics_tick_ms: default_physics_tick_ms(),
            carts: default_carts(),
        }
    }
}

impl TrackConfig {
    /// Loads from a TOML file, or returns defaults when `path` is `None`.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn physics_tick(&self) -> Duration {
        Duration::from_millis(self.physics_tick_ms)
    }

    /// Rejects configurations the engine cannot run safely. Planner limits
    /// and margins are relied on without further checks downstream, so they
    /// must be caught here where the operator can still fix them.
    pub fn validate(&self) -> Result<()> {
        let planner = &self.agent.planner;
        if planner.max_jerk <= 0.0
            || planner.max_acceleration <= 0.0
            || planner.max_velocity <= 0.0
        {
            bail!("planner limits must be strictly positive, got {planner:?}");
        }
        if self.agent.safety_margin <= 0.0 {
            bail!("safety_margin must be positive");
        }
        if self.agent.overshoot_factor <= 1.0 {
            bail!("overshoot_factor must exceed 1.0 so accepted borders clear the goal");
        }
        if self.agent.control_tick_ms == 0 {
            bail!("control_tick_ms must be nonzero");
        }
        if self.network.max_delay_ms < self.network.min_delay_ms {
            bail!("network max_delay_ms must be >= min_delay_ms");
        }
        if !(0.0..=1.0).contains(&self.network.loss_probability) {
            bail!("loss_probability must be within [0, 1]");
        }
        if self.carts.is_empty() {
            bail!("at least one cart is required");
        }
        for cart in &self.carts {
            if !(cart.left_border < cart.position && cart.position < cart.right_border) {
                bail!(
                    "{}: position {} must lie inside borders [{}, {}]",
                    cart.name,
                    cart.position,
                    cart.left_border,
                    cart.right_border
                );
            }
            if cart.mass <= 0.0 {
                bail!("{}: mass must be positive", cart.name);
            }
        }
        for pair in self.carts.windows(2) {
            if pair[0].right_border != pair[1].left_border {
                bail!(
                    "adjacent carts {} and {} must share a border ({} != {})",
                    pair[0].name,
                    pair[1].name,
                    pair[0].right_border,
                    pair[1].left_border
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        TrackConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_track_matches_reference_layout() {
        let cfg = TrackConfig::default();
        assert_eq!(cfg.carts.len(), 2);
        assert_eq!(cfg.carts[0].position, 400.0);
        assert_eq!(cfg.carts[0].right_border, 800.0);
        assert_eq!(cfg.carts[1].position, 1200.0);
        assert_eq!(cfg.carts[1].left_border, 800.0);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: TrackConfig = toml::from_str(
            r#"
            [network]
            loss_probability = 0.15

            [[carts]]
            name = "Solo"
            position = 800.0
            left_border = 0.0
            right_border = 1600.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.network.loss_probability, 0.15);
        assert_eq!(cfg.network.min_delay_ms, 10);
        assert_eq!(cfg.agent.safety_margin, 30.0);
        assert_eq!(cfg.carts[0].width, 50.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_nonpositive_planner_limits() {
        let mut cfg = TrackConfig::default();
        cfg.agent.planner.max_acceleration = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_split_borders() {
        let mut cfg = TrackConfig::default();
        cfg.carts[1].left_border = 900.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_evenly_spread_carts() {
        let carts = evenly_spread_carts(4, 1600.0);
        assert_eq!(carts[0].position, 200.0);
        assert_eq!(carts[3].left_border, 1200.0);
        assert_eq!(carts[3].right_border, 1600.0);
    }
}
