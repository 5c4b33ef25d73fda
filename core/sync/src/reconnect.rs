//! Runs the sync processor when connectivity comes back.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use wayfarer_remote::NetworkMonitor;

use crate::processor::{SyncProcessor, SyncReport};

/// Watches reachability and replays the queue on each offline-to-online edge.
///
/// The trigger holds only a receiver, so it stops once every
/// [`NetworkMonitor`] handle has been dropped.
pub struct ReconnectTrigger {
    processor: Arc<SyncProcessor>,
    network: watch::Receiver<bool>,
    was_online: bool,
    reports: Option<mpsc::UnboundedSender<SyncReport>>,
}

impl ReconnectTrigger {
    pub fn new(processor: Arc<SyncProcessor>, monitor: &NetworkMonitor) -> Self {
        let mut network = monitor.subscribe();
        let was_online = *network.borrow_and_update();
        Self {
            processor,
            network,
            was_online,
            reports: None,
        }
    }

    /// Forward the report of every triggered run.
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<SyncReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Run the trigger on a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("Reconnect trigger started (online: {})", self.was_online);

        while self.network.changed().await.is_ok() {
            let online = *self.network.borrow_and_update();
            if online && !self.was_online {
                info!("Connectivity restored, replaying mutation queue");
                match self.processor.run().await {
                    Ok(report) => {
                        if let Some(reports) = &self.reports {
                            let _ = reports.send(report);
                        }
                    }
                    Err(e) => error!("Triggered replay failed: {}", e),
                }
            }
            self.was_online = online;
        }

        debug!("Network monitor dropped, reconnect trigger stopping");
    }
}
