//! Rewrite Coordinator
//!
//! Makes sure only the most recent rewrite request may touch the session.
//! Starting a rewrite while another is in flight cancels the older one's
//! token and marks it stale, so its result is discarded even if the
//! response arrives after all.

use crate::cancellation::{CancellationSource, CancellationToken};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Handle given to the task that performs one rewrite.
#[derive(Debug, Clone)]
pub struct RewriteTicket {
    pub id: u64,
    pub token: CancellationToken,
}

struct ActiveRewrite {
    id: u64,
    source: CancellationSource,
    started_at: Instant,
}

pub struct RewriteCoordinator {
    /// Monotonically increasing id; 0 is never issued.
    next_id: AtomicU64,

    /// Id of the rewrite currently allowed to apply its result, 0 when idle.
    active_id: AtomicU64,

    active: Mutex<Option<ActiveRewrite>>,
}

impl Default for RewriteCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RewriteCoordinator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active_id: AtomicU64::new(0),
            active: Mutex::new(None),
        }
    }

    /// Start a new rewrite, cancelling whichever one was in flight.
    pub fn begin(&self) -> RewriteTicket {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let source = CancellationSource::new();
        let token = source.token();

        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        self.active_id.store(id, Ordering::SeqCst);

        if let Some(previous) = active.replace(ActiveRewrite {
            id,
            source,
            started_at: Instant::now(),
        }) {
            previous.source.cancel();
            warn!(
                "Cancelled rewrite {} after {:?}; rewrite {} supersedes it",
                previous.id,
                previous.started_at.elapsed(),
                id
            );
        } else {
            debug!("Started rewrite {}", id);
        }

        RewriteTicket { id, token }
    }

    /// Finish a rewrite. Returns `true` only if it is still the active one,
    /// meaning the caller may apply its result.
    pub fn finish(&self, id: u64) -> bool {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let was_active = self
            .active_id
            .compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if was_active {
            if let Some(done) = active.take() {
                debug!("Rewrite {} finished after {:?}", id, done.started_at.elapsed());
            }
        } else {
            debug!("Rewrite {} was superseded or cancelled, dropping its result", id);
        }
        was_active
    }

    /// Cancel whatever rewrite is in flight.
    pub fn cancel(&self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        self.active_id.store(0, Ordering::SeqCst);
        if let Some(previous) = active.take() {
            previous.source.cancel();
            info!("Cancelled rewrite {}", previous.id);
        }
    }

    pub fn is_active(&self, id: u64) -> bool {
        id != 0 && self.active_id.load(Ordering::SeqCst) == id
    }

    pub fn active_id(&self) -> Option<u64> {
        match self.active_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }
}
