//! trackline - decentralized coordination for carts on a shared linear track
//!
//! Every cart is driven by an autonomous agent that owns an exclusive
//! segment of track, bounded by movable borders shared with its immediate
//! neighbors. Agents take position goals, plan jerk-limited trajectories,
//! and negotiate border shifts peer to peer over lossy, delayed channels.
//! No central scheduler, and no collisions even when messages go missing.

pub mod agent;
pub mod config;
pub mod metrics;
pub mod pid;
pub mod planner;
pub mod plant;
pub mod protocol;
pub mod sim;
