//! Request pacing for the IMAP server
//!
//! Gmail throttles clients that fire commands back to back. The pacer spaces
//! remote requests at least `interval` apart:
//! - The first request goes out immediately
//! - Each later request waits until `interval` has passed since the previous one
//! - Waiting happens outside the lock so stats stay readable

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Enforces a minimum delay between consecutive remote requests
#[derive(Debug)]
pub struct RequestPacer {
    inner: Mutex<PacerState>,
}

#[derive(Debug)]
struct PacerState {
    /// Minimum spacing between two requests
    interval: Duration,
    /// When the next request may start
    next_slot: Option<Instant>,
    /// Total requests admitted (for stats)
    total_requests: u64,
    /// Total time spent waiting (for stats)
    total_waited: Duration,
}

impl RequestPacer {
    /// Create a pacer that spaces requests `interval` apart
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Mutex::new(PacerState {
                interval,
                next_slot: None,
                total_requests: 0,
                total_waited: Duration::ZERO,
            }),
        }
    }

    /// Wait for the next request slot and claim it
    pub async fn acquire(&self) {
        let wait_time = {
            let mut state = self.inner.lock().await;
            let now = Instant::now();

            // Claim the slot while holding the lock so concurrent callers queue up
            let start = match state.next_slot {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            state.next_slot = Some(start + state.interval);
            state.total_requests += 1;

            let wait = start.saturating_duration_since(now);
            state.total_waited += wait;

            trace!(
                "Request #{} scheduled in {:?} (interval {:?})",
                state.total_requests,
                wait,
                state.interval
            );
            wait
        };

        if !wait_time.is_zero() {
            debug!("Pacing remote request, waiting {:.3}s", wait_time.as_secs_f64());
            tokio::time::sleep(wait_time).await;
        }
    }

    /// Get current statistics about pacing
    pub async fn stats(&self) -> PacerStats {
        let state = self.inner.lock().await;
        PacerStats {
            interval: state.interval,
            total_requests: state.total_requests,
            total_waited: state.total_waited,
        }
    }
}

/// Statistics about pacing
#[derive(Debug, Clone)]
pub struct PacerStats {
    /// Configured spacing between requests
    pub interval: Duration,
    /// Requests admitted since creation
    pub total_requests: u64,
    /// Time spent waiting for slots
    pub total_waited: Duration,
}
