//! Shared request pacing.
//!
//! Every outbound request reserves a start slot on the [`RequestGate`]. The
//! slot lies a freshly sampled politeness delay after the previous slot (or
//! after "now" when the gate has been idle), so request starts stay spaced
//! out no matter how many workers share the gate. A pause holds back every
//! request, including those whose slot was reserved before the pause began.

use crate::config::{DelayBounds, MAX_WAIT_SECS};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct GateState {
    /// Start of the most recently reserved slot
    next_slot: Instant,
    /// No request may start before this instant
    paused_until: Instant,
}

/// Pacing state shared by all fetches of a run. Cloning shares the state.
#[derive(Debug, Clone)]
pub struct RequestGate {
    state: Arc<Mutex<GateState>>,
}

/// `at + by`, with `by` capped so the addition cannot overflow.
fn later(at: Instant, by: Duration) -> Instant {
    let by = by.min(Duration::from_secs(MAX_WAIT_SECS));
    at.checked_add(by).unwrap_or(at)
}

impl RequestGate {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            state: Arc::new(Mutex::new(GateState {
                next_slot: now,
                paused_until: now,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Reserve the next start slot for a request paced by `bounds`.
    fn reserve(&self, bounds: DelayBounds) -> Instant {
        let delay = bounds.sample();
        let mut state = self.lock();
        let slot = later(state.next_slot.max(Instant::now()), delay);
        state.next_slot = slot;
        slot
    }

    fn is_paused(&self, now: Instant) -> bool {
        self.lock().paused_until > now
    }

    /// Wait for a start slot.
    ///
    /// Returns `false` when `cancel` fires first; the caller must then skip
    /// the request.
    pub async fn wait_turn(&self, bounds: DelayBounds, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let mut until = self.reserve(bounds);
        loop {
            debug!(
                wait_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Waiting for request slot"
            );
            tokio::select! {
                _ = tokio::time::sleep_until(until) => {}
                _ = cancel.cancelled() => return false,
            }
            // A pause started while this request was waiting: queue again
            // behind it.
            if !self.is_paused(Instant::now()) {
                return true;
            }
            until = self.reserve(bounds);
        }
    }

    /// Hold back every request for `pause`, e.g. after the site starts
    /// refusing requests. Requests already waiting for a slot wait too.
    pub fn pause(&self, pause: Duration) {
        let now = Instant::now();
        let mut state = self.lock();
        let resume = later(now, pause);
        state.paused_until = state.paused_until.max(resume);
        state.next_slot = state.next_slot.max(resume);
    }
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::new()
    }
}
