//! Background re-persistence of a live registration.
//!
//! Heartbeats only touch memory. The refresher is what keeps the durable
//! record alive, re-writing it every `update_interval` until its lease is
//! torn down. Storage write cadence is therefore bounded by the update
//! interval no matter how often kites heartbeat.
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::storage::Storage;
use crate::types::{KiteId, RegisterValue};

/// Handle to a running refresher task.
#[derive(Debug)]
pub struct Refresher {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Refresher {
    /// Start refreshing `kite` every `interval`. The first write happens one
    /// interval from now; registration has just written the record.
    pub fn spawn(
        storage: Arc<dyn Storage>,
        kite: KiteId,
        value: RegisterValue,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let stopped = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // Stop may land between the tick and the write.
                if stopped.is_cancelled() {
                    break;
                }

                tracing::debug!("kite is active, updating the value {kite}");
                if let Err(e) = storage.update(&kite, &value).await {
                    tracing::error!("storage update '{kite}' error: {e}");
                }
            }
            tracing::debug!("refresher stopped for {kite}");
        });

        Self { cancel, handle }
    }

    /// Stop the task. No write is issued after this returns; an in-flight
    /// write is abandoned.
    pub fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.handle.is_finished()
    }
}
