//! Rolling-window rate limiter with a timed full-suspension gate.
//!
//! Grants are semaphore permits that self-expire: each acquisition spawns a
//! timer that returns the slot after one window, so at most `capacity` grants
//! exist within any window. A remote back-off signal ([`RateLimiter::suspend`])
//! publishes an unblock-at instant over a watch channel; every acquirer gates
//! on it and the clearing timer's broadcast releases all waiters at once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limiter acquisition cancelled")]
    Cancelled,
}

pub struct RateLimiter {
    permits: Arc<Semaphore>,
    window: Duration,
    suspend_tx: watch::Sender<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter allowing `capacity` acquisitions per rolling `window`.
    #[must_use]
    pub fn new(capacity: usize, window: Duration) -> Self {
        let (suspend_tx, _) = watch::channel(None);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            window,
            suspend_tx,
        }
    }

    /// Blocks until a slot is free and no suspension is active.
    ///
    /// Returns [`RateLimitError::Cancelled`] if `cancel` fires first. Order of
    /// grants follows rough arrival order, nothing stronger.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        self.wait_for_gate(cancel).await?;

        let permit = tokio::select! {
            permit = self.permits.acquire() => {
                // The semaphore is never closed.
                permit.expect("rate limiter semaphore closed")
            }
            () = cancel.cancelled() => return Err(RateLimitError::Cancelled),
        };
        permit.forget();

        let permits = Arc::clone(&self.permits);
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            permits.add_permits(1);
        });

        // A suspension raised while we were queued on the semaphore still
        // applies to this grant.
        self.wait_for_gate(cancel).await?;

        Ok(())
    }

    /// Suspends all acquisitions for `duration`. Waiters resume when the
    /// suspension's own timer clears the gate.
    pub fn suspend(&self, duration: Duration) {
        let until = Instant::now() + duration;
        self.suspend_tx.send_replace(Some(until));

        let suspend_tx = self.suspend_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(until).await;
            suspend_tx.send_if_modified(|current| {
                if *current == Some(until) {
                    *current = None;
                    true
                } else {
                    // A later suspension extended the gate; leave it alone.
                    false
                }
            });
        });
    }

    async fn wait_for_gate(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        let mut gate = self.suspend_tx.subscribe();
        loop {
            let until = *gate.borrow_and_update();
            match until {
                Some(until) if until > Instant::now() => {
                    tokio::select! {
                        () = tokio::time::sleep_until(until) => {}
                        _ = gate.changed() => {}
                        () = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                    }
                }
                _ => return Ok(()),
            }
        }
    }
}
