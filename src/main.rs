//! trackline demo binary.
//!
//! Builds a track from an optional TOML config, runs one of the canned
//! coordination demos against it, and prints cart snapshots and per-agent
//! metrics as JSON at the end. The interesting machinery lives in the
//! library; this is just wiring.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use trackline::config::TrackConfig;
use trackline::sim::Track;

#[derive(Debug, Parser)]
#[command(name = "trackline", about = "Cart coordination on a shared linear track")]
struct Cli {
    /// Path to a TOML track configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Which demo to run.
    #[arg(long, value_enum, default_value = "border-shift")]
    demo: Demo,

    /// Override the simulated packet-loss probability.
    #[arg(long)]
    loss: Option<f64>,

    /// How long to let the demo run before reporting.
    #[arg(long, default_value_t = 15)]
    seconds: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Demo {
    /// Cart 1 moves inside its own segment.
    SimpleMove,
    /// Cart 1's goal pushes the shared border into Cart 2's segment.
    BorderShift,
    /// Cart 1's goal forces Cart 2 to relocate entirely.
    GiveWay,
    /// Both carts want each other's territory at the same time.
    CrossedGoals,
    /// An emergency stop lands mid-motion.
    StopMidMove,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = TrackConfig::load(cli.config.as_deref()).await?;
    if let Some(loss) = cli.loss {
        config.network.loss_probability = loss;
        config.validate()?;
    }

    tracing::info!(carts = config.carts.len(), demo = ?cli.demo, "starting track");
    let mut track = Track::build(&config).spawn();

    match cli.demo {
        Demo::SimpleMove => {
            track.carts[0].handle.goal_tx.send(700.0).await?;
        }
        Demo::BorderShift => {
            require_carts(&track.carts, 2)?;
            track.carts[0].handle.goal_tx.send(850.0).await?;
        }
        Demo::GiveWay => {
            require_carts(&track.carts, 2)?;
            track.carts[0].handle.goal_tx.send(1400.0).await?;
        }
        Demo::CrossedGoals => {
            require_carts(&track.carts, 2)?;
            track.carts[0].handle.goal_tx.send(1100.0).await?;
            track.carts[1].handle.goal_tx.send(500.0).await?;
        }
        Demo::StopMidMove => {
            track.carts[0].handle.goal_tx.send(700.0).await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            track.carts[0].handle.estop_tx.send(true).await?;
        }
    }

    tokio::time::sleep(Duration::from_secs(cli.seconds)).await;

    for cart in &mut track.carts {
        // Drain completion signals so the report reflects resolved goals.
        let mut completions = 0u32;
        while cart.handle.completion_rx.try_recv().is_ok() {
            completions += 1;
        }
        let snapshot = cart.body.snapshot();
        let status = cart.status.read();
        let metrics = cart.metrics.report();
        println!(
            "{}",
            serde_json::json!({
                "cart": snapshot,
                "status": status,
                "metrics": metrics,
                "completed_goals": completions,
            })
        );
    }

    track.shutdown().await;
    Ok(())
}

fn require_carts(carts: &[trackline::sim::TrackAgent], needed: usize) -> Result<()> {
    anyhow::ensure!(
        carts.len() >= needed,
        "this demo needs at least {needed} carts, config has {}",
        carts.len()
    );
    Ok(())
}
