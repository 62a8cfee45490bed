//! Average bandwidth cap for one node's transfers

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

/// Delays callers so the bytes reported since creation stay under a rate
pub struct Throttle {
    bytes_per_second: Option<u64>,
    state: Mutex<ThrottleState>,
}

struct ThrottleState {
    started: Instant,
    sent: u64,
}

impl Throttle {
    /// `None` disables throttling
    pub fn new(bytes_per_second: Option<u64>) -> Self {
        Self {
            bytes_per_second: bytes_per_second.filter(|rate| *rate > 0),
            state: Mutex::new(ThrottleState {
                started: Instant::now(),
                sent: 0,
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// How long to wait after `bytes` more have been sent
    fn delay_for(&self, bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second?;
        let mut state = self.state.lock();
        state.sent = state.sent.saturating_add(bytes);

        let due = Duration::from_secs_f64(state.sent as f64 / rate as f64);
        due.checked_sub(state.started.elapsed())
            .filter(|delay| !delay.is_zero())
    }

    /// Account for `bytes` sent, sleeping when ahead of the cap
    pub async fn consume(&self, bytes: u64) {
        if let Some(delay) = self.delay_for(bytes) {
            trace!("Throttling for {:?} after {} bytes", delay, bytes);
            tokio::time::sleep(delay).await;
        }
    }
}
