use std::time::Duration;

use tokio::time::Instant;

/// A cancellable one-shot deadline. The owner polls it; nothing fires on
/// its own, so a paused tokio clock drives it deterministically in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn arm(&mut self, after: Duration) {
        self.at = Some(Instant::now() + after);
    }

    /// Arm only if not already running.
    pub fn arm_if_idle(&mut self, after: Duration) {
        if self.at.is_none() {
            self.arm(after);
        }
    }

    pub fn disarm(&mut self) {
        self.at = None;
    }

    pub fn at(&self) -> Option<Instant> {
        self.at
    }

    /// Disarms and returns true if the deadline has passed.
    pub fn take_expired(&mut self, now: Instant) -> bool {
        match self.at {
            Some(at) if now >= at => {
                self.at = None;
                true
            }
            _ => false,
        }
    }
}

/// Sleep until `deadline`, or forever when there is none. For `select!` arms.
pub async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
