//! Lossy, delayed links between neighboring agents.
//!
//! Each direction of each channel pair runs through a relay task that holds
//! every message for a uniform random delay in `[min_delay, max_delay]` and
//! then either forwards it or drops it with the configured probability.
//! Relaying is sequential per link, so per-channel FIFO order is preserved;
//! a full destination buffer drops the message, same as loss on the wire.

use crate::agent::Agent;
use crate::config::NetworkConfig;
use crate::protocol::{CHANNEL_CAPACITY, Side};
use rand::Rng;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct NetworkSimulator {
    cfg: NetworkConfig,
}

impl NetworkSimulator {
    pub fn new(cfg: NetworkConfig) -> Self {
        Self { cfg }
    }

    /// One delayed, lossy, order-preserving channel.
    pub fn link<T: Send + Debug + 'static>(&self) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
        let (entry_tx, mut relay_rx) = mpsc::channel::<T>(CHANNEL_CAPACITY);
        let (relay_tx, exit_rx) = mpsc::channel::<T>(CHANNEL_CAPACITY);
        let cfg = self.cfg;

        tokio::spawn(async move {
            while let Some(message) = relay_rx.recv().await {
                tokio::time::sleep(sample_delay(&cfg)).await;
                if cfg.loss_probability > 0.0
                    && rand::rng().random::<f64>() < cfg.loss_probability
                {
                    tracing::debug!(?message, "message dropped by simulated packet loss");
                    continue;
                }
                if relay_tx.try_send(message).is_err() {
                    tracing::debug!("destination buffer full, message dropped");
                }
            }
        });

        (entry_tx, exit_rx)
    }

    /// Wires `left` and `right` as neighbors: two request links and two
    /// response links, one each way, all through delay and loss.
    pub fn connect(&self, left: &mut Agent, right: &mut Agent) {
        let (req_to_right_tx, req_to_right_rx) = self.link();
        let (resp_to_right_tx, resp_to_right_rx) = self.link();
        let (req_to_left_tx, req_to_left_rx) = self.link();
        let (resp_to_left_tx, resp_to_left_rx) = self.link();

        left.wire(
            Side::Right,
            req_to_right_tx,
            resp_to_right_tx,
            req_to_left_rx,
            resp_to_left_rx,
        );
        right.wire(
            Side::Left,
            req_to_left_tx,
            resp_to_left_tx,
            req_to_right_rx,
            resp_to_right_rx,
        );
    }
}

fn sample_delay(cfg: &NetworkConfig) -> Duration {
    let min = cfg.min_delay();
    let max = cfg.max_delay();
    if max <= min {
        return min;
    }
    let span = (max - min).as_nanos() as u64;
    min + Duration::from_nanos(rand::rng().random_range(0..span))
}
