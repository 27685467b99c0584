//! Single-slot reconnection timer
//!
//! At most one attempt is pending. Scheduling again replaces the pending
//! attempt, and closing the scheduler guarantees nothing fires afterwards.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Default)]
struct Slot {
    pending: Option<JoinHandle<()>>,
    generation: u64,
    closed: bool,
}

#[derive(Default)]
pub struct ReconnectScheduler {
    slot: Arc<Mutex<Slot>>,
}

impl ReconnectScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `attempt` after `delay`, replacing any attempt not yet fired
    ///
    /// Returns false once the scheduler is closed. `attempt` runs synchronously
    /// on the timer task, so it cannot be cut short by a later `schedule`.
    pub fn schedule<F>(&self, delay: Duration, attempt: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.lock();
        if slot.closed {
            return false;
        }
        if let Some(previous) = slot.pending.take() {
            previous.abort();
            debug!("Replaced pending reconnection attempt");
        }
        slot.generation += 1;
        let generation = slot.generation;
        let shared = Arc::clone(&self.slot);

        slot.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut slot = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if slot.closed || slot.generation != generation {
                    return;
                }
                slot.pending = None;
            }
            attempt();
        }));
        true
    }

    /// Cancel the pending attempt, if any
    pub fn cancel_pending(&self) -> bool {
        let mut slot = self.lock();
        slot.generation += 1;
        match slot.pending.take() {
            Some(pending) => {
                pending.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Cancel and refuse all further scheduling
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        slot.generation += 1;
        if let Some(pending) = slot.pending.take() {
            pending.abort();
        }
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.close();
    }
}
