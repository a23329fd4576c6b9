//! Per-session reply window timer.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// A re-armable deadline.
///
/// `expired()` is cancel safe: dropping it (e.g. when another `select!`
/// branch wins) leaves the deadline untouched, so polling it again waits
/// for the same instant rather than a fresh window.
#[derive(Debug)]
pub struct ProbeTimer {
    window: Duration,
    deadline: Option<Instant>,
}

impl ProbeTimer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Start a full window from now, replacing any pending deadline.
    pub fn arm(&mut self) -> Instant {
        let deadline = Instant::now() + self.window;
        self.deadline = Some(deadline);
        deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once the armed deadline has passed, then disarms.
    /// Never resolves while disarmed.
    pub async fn expired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
