//! New-block notifications by polling the chain node

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vsp_rpc::ConnectionManager;

/// Sends the height of every new tip to the engine's update task
pub struct BlockWatcher {
    peers: Arc<ConnectionManager>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl BlockWatcher {
    pub fn new(
        peers: Arc<ConnectionManager>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            peers,
            poll_interval,
            shutdown,
        }
    }

    pub fn spawn(self, block_tx: mpsc::Sender<u64>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_height: Option<u64> = None;

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let height = match self.poll().await {
                    Some(height) => height,
                    None => continue,
                };
                if last_height.is_some_and(|last| height <= last) {
                    continue;
                }
                // The first height seen is covered by the startup pass
                let is_first = last_height.is_none();
                last_height = Some(height);
                if is_first {
                    info!(height, "Watching for new blocks");
                    continue;
                }

                debug!(height, "New block");
                if block_tx.send(height).await.is_err() {
                    break;
                }
            }
            debug!("Block watcher stopped");
        })
    }

    async fn poll(&self) -> Option<u64> {
        let chain = match self.peers.chain_client().await {
            Ok(chain) => chain,
            Err(e) => {
                warn!(error = %e, "Chain node unavailable");
                return None;
            }
        };
        match chain.get_block_count().await {
            Ok(height) => Some(height),
            Err(e) => {
                warn!(error = %e, "Failed to fetch block count");
                None
            }
        }
    }
}
