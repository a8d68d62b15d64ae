//! Deadline - absolute time bound plus cooperative cancellation
//!
//! Every suspension point (launch, each command, event waits) runs through
//! `Deadline::bound`. Cancelling the token unblocks all of them at once.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    cancel: CancellationToken,
}

impl Deadline {
    pub fn at(at: Instant) -> Self {
        Self {
            at,
            cancel: CancellationToken::new(),
        }
    }

    pub fn after(budget: Duration) -> Self {
        Self::at(Instant::now() + budget)
    }

    /// Tie this deadline to an external cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Same cancellation, but never later than `now + budget`.
    pub fn capped(&self, budget: Duration) -> Self {
        Self {
            at: self.at.min(Instant::now() + budget),
            cancel: self.cancel.clone(),
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Drive `fut` until it completes, the deadline passes, or the token is
    /// cancelled. A future that is ready at the deadline still wins.
    pub async fn bound<F, E>(&self, fut: F, on_timeout: E) -> Result<F::Output>
    where
        F: Future,
        E: FnOnce() -> Error,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            out = fut => Ok(out),
            _ = tokio::time::sleep_until(self.at) => Err(on_timeout()),
        }
    }
}
