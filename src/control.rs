//! Cooperative cancellation for long runs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Steps between two polls of the cancellation state
pub const CANCEL_POLL_INTERVAL: usize = 1024;

/// Shared flag that asks running realizations to stop
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Stop conditions checked by the run loop
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    token: Option<CancelToken>,
    deadline: Option<Instant>,
}

impl RunControl {
    /// Never stops early
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `budget` from now
    pub fn with_time_budget(self, budget: Duration) -> Self {
        self.with_deadline(Instant::now() + budget)
    }

    pub fn token(&self) -> Option<&CancelToken> {
        self.token.as_ref()
    }

    pub fn should_stop(&self) -> bool {
        if self.token.as_ref().is_some_and(CancelToken::is_cancelled) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}
