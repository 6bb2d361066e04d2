//! In-memory liveness of registered kites.
//!
//! One entry per kite id, holding a resettable deadline, the timer task that
//! watches it, and the kite's refresher. Heartbeats move the deadline; the
//! timer task re-reads it under the same lock before declaring the lease
//! lost, so a reset and an expiry never interleave.
//!
//! The map is disposable. After a restart it is empty and every heartbeat
//! answers "register again"; records in storage are left to their TTL.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::refresher::Refresher;
use crate::types::KiteId;

/// Capacity of the lease event channel. Slow subscribers lag, they never
/// block the tracker.
const EVENT_BUFFER: usize = 256;

/// Lifecycle transitions of a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseEvent {
    /// A lease was armed after a successful registration.
    Armed { id: String },
    /// A re-registration replaced an active lease; its timer and refresher were stopped.
    Superseded { id: String },
    /// No heartbeat arrived in time; the refresher was stopped.
    Expired { id: String },
    /// The lease was torn down by shutdown.
    Released { id: String },
}

struct LeaseEntry {
    generation: u64,
    kite: KiteId,
    deadline: Instant,
    refresher: Refresher,
    timer: JoinHandle<()>,
}

impl LeaseEntry {
    /// Stop the refresher and the timer.
    fn teardown(self) {
        self.refresher.stop();
        self.timer.abort();
    }
}

type LeaseMap = Arc<Mutex<HashMap<String, LeaseEntry>>>;

fn lock(map: &Mutex<HashMap<String, LeaseEntry>>) -> MutexGuard<'_, HashMap<String, LeaseEntry>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

/// Tracks one lease per registered kite id.
pub struct LeaseTracker {
    leases: LeaseMap,
    duration: Duration,
    next_generation: AtomicU64,
    events: broadcast::Sender<LeaseEvent>,
}

impl LeaseTracker {
    /// Tracker whose leases survive `duration` without a heartbeat.
    pub fn new(duration: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            leases: Arc::new(Mutex::new(HashMap::new())),
            duration,
            next_generation: AtomicU64::new(0),
            events,
        }
    }

    pub fn lease_duration(&self) -> Duration {
        self.duration
    }

    /// Observe lease transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<LeaseEvent> {
        self.events.subscribe()
    }

    /// Arm a lease for `kite`, taking ownership of its refresher.
    ///
    /// An active lease for the same id is removed in the same critical
    /// section and torn down before this returns, so two refreshers for one
    /// kite never run side by side.
    pub fn install(&self, kite: KiteId, refresher: Refresher) {
        let id = kite.id.clone();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.duration;

        let previous = {
            let mut leases = lock(&self.leases);
            let timer = tokio::spawn(watch_lease(
                Arc::clone(&self.leases),
                id.clone(),
                generation,
                self.events.clone(),
            ));
            leases.insert(
                id.clone(),
                LeaseEntry {
                    generation,
                    kite,
                    deadline,
                    refresher,
                    timer,
                },
            )
        };

        if let Some(previous) = previous {
            tracing::info!("superseding active lease for {}", previous.kite);
            previous.teardown();
            let _ = self.events.send(LeaseEvent::Superseded { id: id.clone() });
        }
        let _ = self.events.send(LeaseEvent::Armed { id });
    }

    /// Push the deadline of `id` to a full lease duration from now.
    ///
    /// Returns `false` when no lease exists. Never touches storage.
    pub fn renew(&self, id: &str) -> bool {
        let mut leases = lock(&self.leases);
        match leases.get_mut(id) {
            Some(entry) => {
                entry.deadline = Instant::now() + self.duration;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.leases).contains_key(id)
    }

    /// Time left before `id` expires, if it holds a lease.
    pub fn remaining(&self, id: &str) -> Option<Duration> {
        lock(&self.leases)
            .get(id)
            .map(|entry| entry.deadline.saturating_duration_since(Instant::now()))
    }

    pub fn len(&self) -> usize {
        lock(&self.leases).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.leases).is_empty()
    }

    /// Tear down every lease. Returns how many were released.
    pub fn close(&self) -> usize {
        let drained: Vec<(String, LeaseEntry)> = lock(&self.leases).drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            entry.teardown();
            let _ = self.events.send(LeaseEvent::Released { id });
        }
        count
    }
}

impl Drop for LeaseTracker {
    fn drop(&mut self) {
        self.close();
    }
}

/// Timer task for one lease generation.
///
/// Sleeps until the current deadline, then re-checks it under the lock: a
/// heartbeat that moved the deadline wins and the loop sleeps again. Exits
/// quietly once its generation is no longer the one in the map.
async fn watch_lease(
    leases: LeaseMap,
    id: String,
    generation: u64,
    events: broadcast::Sender<LeaseEvent>,
) {
    loop {
        let deadline = {
            let leases = lock(&leases);
            match leases.get(&id) {
                Some(entry) if entry.generation == generation => entry.deadline,
                _ => return,
            }
        };

        tokio::time::sleep_until(deadline).await;

        let expired = {
            let mut leases = lock(&leases);
            let current = match leases.get(&id) {
                Some(entry) if entry.generation == generation => entry.deadline,
                _ => return,
            };
            if current > Instant::now() {
                None
            } else {
                leases.remove(&id)
            }
        };

        if let Some(entry) = expired {
            tracing::info!(
                "kite didn't get heartbeat, stopping the updater {}",
                entry.kite
            );
            // Our own handle: dropping it detaches, aborting it would cancel us.
            entry.refresher.stop();
            drop(entry.timer);
            let _ = events.send(LeaseEvent::Expired { id });
            return;
        }
    }
}
