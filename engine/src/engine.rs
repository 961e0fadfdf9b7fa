//! Engine object and its background tasks
//!
//! One engine owns the handles every pass needs: the ticket store, the
//! connection manager and the scan watermark. The update task runs a
//! pipeline pass at startup, on every new block and on a safety timer,
//! preceded by the integrity checks until they have succeeded once. The
//! consistency task runs the wallet reconciler at startup and on its own
//! timer. Both stop when the shutdown token fires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as ParkingMutex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vsp_core::{Network, Ticket};
use vsp_rpc::ConnectionManager;
use vsp_storage::TicketStore;

pub struct Engine {
    pub(crate) store: Arc<dyn TicketStore>,
    pub(crate) peers: Arc<ConnectionManager>,
    pub(crate) network: Network,
    pub(crate) shutdown: CancellationToken,
    /// Highest block already scanned for spent tickets; 0 until the first scan.
    /// Held for the whole pipeline pass so passes never overlap.
    pub(crate) last_scanned: Mutex<u64>,
    /// Rescan heights owed to wallets whose last rescan failed, by address
    pub(crate) pending_rescans: ParkingMutex<HashMap<String, u64>>,
    /// Set until the startup integrity checks complete cleanly
    pub(crate) integrity_pending: AtomicBool,
}

impl Engine {
    pub fn new(
        store: Arc<dyn TicketStore>,
        peers: Arc<ConnectionManager>,
        network: Network,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            peers,
            network,
            shutdown,
            last_scanned: Mutex::new(0),
            pending_rescans: ParkingMutex::new(HashMap::new()),
            integrity_pending: AtomicBool::new(true),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn store(&self) -> &Arc<dyn TicketStore> {
        &self.store
    }

    pub fn peers(&self) -> &Arc<ConnectionManager> {
        &self.peers
    }

    /// Current scan watermark
    pub async fn last_scanned_block(&self) -> u64 {
        *self.last_scanned.lock().await
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Persist the preference maps of `ticket` onto the stored record.
    ///
    /// Only the preferences are taken from `ticket`; fee and outcome fields
    /// keep whatever the store currently holds.
    pub(crate) fn save_preferences(&self, ticket: &Ticket) {
        let result = self.store.get_ticket(&ticket.hash).and_then(|stored| match stored {
            Some(mut stored) => {
                stored.vote_choices = ticket.vote_choices.clone();
                stored.tspend_policy = ticket.tspend_policy.clone();
                stored.treasury_policy = ticket.treasury_policy.clone();
                self.store.update_ticket(&stored)
            }
            None => Ok(()),
        });
        if let Err(e) = result {
            error!(ticket = %ticket.hash, "Failed to save ticket preferences: {}", e);
        }
    }

    /// Drive the update pipeline from block notifications and a safety timer.
    ///
    /// The first timer tick fires immediately, which doubles as the startup
    /// catch-up pass.
    pub fn spawn_update_task(
        self: &Arc<Self>,
        mut block_rx: mpsc::Receiver<u64>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut notifications_open = true;

            info!(interval_secs = interval.as_secs(), "Ticket update task started");
            loop {
                tokio::select! {
                    _ = engine.shutdown.cancelled() => break,
                    _ = ticker.tick() => engine.run_update_pass("timer").await,
                    msg = block_rx.recv(), if notifications_open => match msg {
                        Some(mut height) => {
                            // Collapse a burst of notifications into one pass
                            while let Ok(next) = block_rx.try_recv() {
                                height = height.max(next);
                            }
                            debug!(height, "Block connected");
                            engine.run_update_pass("block").await;
                        }
                        None => {
                            warn!("Block notifications closed, relying on timer");
                            notifications_open = false;
                        }
                    },
                }
            }
            info!("Ticket update task stopped");
        })
    }

    /// Run the wallet reconciler on a timer, starting immediately
    pub fn spawn_consistency_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(interval_secs = interval.as_secs(), "Wallet consistency task started");
            loop {
                tokio::select! {
                    _ = engine.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match engine.reconcile_wallets().await {
                            Ok(report) => {
                                if !report.failed.is_empty() {
                                    warn!(failed = report.failed.len(), "Some voting wallets were unreachable");
                                }
                            }
                            Err(e) => warn!(error = %e, "Wallet consistency check aborted"),
                        }
                    }
                }
            }
            info!("Wallet consistency task stopped");
        })
    }

    async fn run_update_pass(&self, trigger: &'static str) {
        if self.integrity_pending.load(Ordering::SeqCst) {
            if let Err(e) = self.run_startup_checks().await {
                warn!(trigger, error = %e, "Integrity checks failed, retrying next pass");
            }
        }

        match self.update_tickets().await {
            Ok(report) => {
                if report.is_empty() {
                    debug!(trigger, "Ticket update pass found nothing to do");
                } else {
                    info!(
                        trigger,
                        confirmed = report.tickets_confirmed,
                        evicted = report.tickets_evicted,
                        fees_broadcast = report.fees_broadcast,
                        fees_confirmed = report.fees_confirmed,
                        outcomes = report.outcomes.len(),
                        "Ticket update pass complete"
                    );
                }
            }
            Err(e) => warn!(trigger, error = %e, "Ticket update pass aborted"),
        }
    }
}
