//! Channel plumbing shared by the pipeline stages.
//!
//! Worker pools share one receiver behind an async mutex; every blocking
//! channel operation races the run's cancellation token so a stopped run
//! unblocks immediately.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::domain::entities::Page;

/// A fetched page paired with the reader that knows its layout.
pub struct PageReadJob<R> {
    pub path: String,
    pub page: Page,
    pub reader: R,
}

/// Receives the next value, or `None` on channel close or cancellation.
pub(crate) async fn recv_or_cancel<T>(
    cancel: &CancellationToken,
    rx: &mut mpsc::Receiver<T>,
) -> Option<T> {
    tokio::select! {
        item = rx.recv() => item,
        () = cancel.cancelled() => None,
    }
}

/// Sends a value, reporting `false` on channel close or cancellation.
pub(crate) async fn send_or_cancel<T>(
    cancel: &CancellationToken,
    tx: &mpsc::Sender<T>,
    value: T,
) -> bool {
    tokio::select! {
        result = tx.send(value) => result.is_ok(),
        () = cancel.cancelled() => false,
    }
}

/// Wraps a receiver for consumption by a pool of workers.
pub(crate) fn shared<T>(rx: mpsc::Receiver<T>) -> Arc<Mutex<mpsc::Receiver<T>>> {
    Arc::new(Mutex::new(rx))
}

/// Takes the next value off a shared receiver, honouring cancellation both
/// while waiting for the receiver and while waiting for a value.
pub(crate) async fn next_item<T>(
    cancel: &CancellationToken,
    shared: &Arc<Mutex<mpsc::Receiver<T>>>,
) -> Option<T> {
    let mut rx = tokio::select! {
        guard = shared.lock() => guard,
        () = cancel.cancelled() => return None,
    };
    recv_or_cancel(cancel, &mut rx).await
}
