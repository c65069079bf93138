//! Liveness sweeper.
//!
//! A silently-dead peer produces no event for its own connection task to
//! react to, so eviction has to come from outside: a periodic pass over
//! the registry snapshot that force-closes anything whose last proof of
//! liveness is older than the threshold. The task is owned by the
//! gateway and stops on the shutdown broadcast rather than free-running.

use crate::registry::{ClientRegistry, ConnCommand};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub struct Sweeper {
    registry: Arc<ClientRegistry>,
    period: Duration,
    stale_threshold: Duration,
}

impl Sweeper {
    pub fn new(registry: Arc<ClientRegistry>, period: Duration, stale_threshold: Duration) -> Self {
        Self {
            registry,
            period,
            stale_threshold,
        }
    }

    /// Spawn the periodic sweep task. It ends when `shutdown` fires.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                    _ = shutdown.recv() => {
                        debug!("sweeper stopped");
                        break;
                    }
                }
            }
        })
    }

    /// One pass over the registry snapshot. Returns how many entries
    /// were evicted.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;

        for record in self.registry.all().await {
            let idle = now.saturating_duration_since(record.last_liveness);
            if idle > self.stale_threshold {
                warn!(
                    client_id = %record.id,
                    idle_secs = idle.as_secs(),
                    "evicting stale connection"
                );
                // Ask the owning task to close its handle, then drop the
                // entry; a send failure means the task is already gone.
                let _ = record.sender.send(ConnCommand::Close);
                self.registry.remove(&record.id).await;
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(count = evicted, "sweep removed stale connections");
        }
        evicted
    }
}
