//! Run-status tracking and live broadcasting.
//!
//! One mutable [`UpdateStatus`] record guarded by a single mutex: every
//! mutation is a transform applied under the lock, immediately followed by a
//! best-effort publish of the new snapshot to each subscriber's own bounded
//! channel. `try_send` keeps a slow or full listener from ever blocking the
//! broadcaster; such a listener just misses intermediate snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::domain::status::UpdateStatus;

/// Snapshots a listener can lag behind before it starts missing updates.
const LISTENER_BUFFER: usize = 16;

struct Listener {
    id: u64,
    tx: mpsc::Sender<UpdateStatus>,
}

pub struct StatusBroadcaster {
    status: Mutex<UpdateStatus>,
    listeners: Arc<Mutex<Vec<Listener>>>,
    next_listener_id: AtomicU64,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: Mutex::new(UpdateStatus::default()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Applies one transform and broadcasts the resulting snapshot.
    fn with_update(&self, transform: impl FnOnce(&mut UpdateStatus)) {
        let status = {
            let mut status = self.status.lock().expect("status lock poisoned");
            transform(&mut status);
            status.clone()
        };

        let mut listeners = self.listeners.lock().expect("listeners lock poisoned");
        listeners.retain(|listener| match listener.tx.try_send(status.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Marks the run started and resets counters and errors, so snapshots
    /// always describe a single run.
    pub fn start_update(&self) {
        self.with_update(|status| {
            *status = UpdateStatus {
                is_updating: true,
                update_start: Some(Utc::now()),
                ..UpdateStatus::default()
            };
        });
    }

    /// Marks the run finished. A no-op when no run is active.
    pub fn end_update(&self) {
        self.with_update(|status| {
            if status.is_updating {
                status.is_updating = false;
                status.update_end = Some(Utc::now());
            }
        });
    }

    pub fn increment_artists(&self) {
        self.with_update(|status| {
            if status.is_updating {
                status.artists += 1;
            }
        });
    }

    pub fn increment_albums(&self) {
        self.with_update(|status| {
            if status.is_updating {
                status.albums += 1;
            }
        });
    }

    pub fn increment_pages(&self) {
        self.with_update(|status| {
            if status.is_updating {
                status.pages += 1;
            }
        });
    }

    pub fn add_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.with_update(|status| {
            if status.is_updating {
                status.errors.push(message);
            }
        });
    }

    /// Returns an independent copy of the current status.
    #[must_use]
    pub fn snapshot(&self) -> UpdateStatus {
        self.status.lock().expect("status lock poisoned").clone()
    }

    /// Registers a live snapshot stream ending when `cancel` fires.
    ///
    /// The current snapshot is delivered first so subscribers never start
    /// blind.
    pub fn subscribe(&self, cancel: CancellationToken) -> ReceiverStream<UpdateStatus> {
        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);

        let _ = tx.try_send(self.snapshot());
        self.listeners
            .lock()
            .expect("listeners lock poisoned")
            .push(Listener { id, tx });

        let listeners = Arc::clone(&self.listeners);
        tokio::spawn(async move {
            cancel.cancelled().await;
            listeners
                .lock()
                .expect("listeners lock poisoned")
                .retain(|listener| listener.id != id);
        });

        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn concurrent_increments_all_land() {
        let broadcaster = Arc::new(StatusBroadcaster::new());
        broadcaster.start_update();

        let mut handles = Vec::new();
        for _ in 0..1000 {
            let broadcaster = Arc::clone(&broadcaster);
            handles.push(tokio::spawn(async move {
                broadcaster.increment_artists();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        broadcaster.end_update();

        let snapshot = broadcaster.snapshot();
        assert_eq!(snapshot.artists, 1000);
        assert!(!snapshot.is_updating);
        assert!(snapshot.update_start.is_some());
        assert!(snapshot.update_end.is_some());
    }

    #[tokio::test]
    async fn counters_do_not_move_outside_a_run() {
        let broadcaster = StatusBroadcaster::new();
        broadcaster.increment_albums();
        broadcaster.add_error("boom");
        assert_eq!(broadcaster.snapshot().albums, 0);
        assert!(broadcaster.snapshot().errors.is_empty());
    }

    #[tokio::test]
    async fn starting_a_run_resets_the_previous_one() {
        let broadcaster = StatusBroadcaster::new();
        broadcaster.start_update();
        broadcaster.increment_pages();
        broadcaster.add_error("transient");
        broadcaster.end_update();

        broadcaster.start_update();
        let snapshot = broadcaster.snapshot();
        assert_eq!(snapshot.pages, 0);
        assert!(snapshot.errors.is_empty());
        assert!(snapshot.update_end.is_none());
    }

    #[tokio::test]
    async fn snapshots_are_independent_copies() {
        let broadcaster = StatusBroadcaster::new();
        broadcaster.start_update();
        broadcaster.add_error("first");

        let mut snapshot = broadcaster.snapshot();
        snapshot.errors.push("local only".to_string());

        assert_eq!(broadcaster.snapshot().errors, vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn subscribers_see_updates_and_deregister_on_cancel() {
        let broadcaster = Arc::new(StatusBroadcaster::new());
        let cancel = CancellationToken::new();

        let mut stream = broadcaster.subscribe(cancel.clone());
        // Initial snapshot.
        assert!(stream.next().await.is_some());

        broadcaster.start_update();
        let snapshot = stream.next().await.unwrap();
        assert!(snapshot.is_updating);

        cancel.cancel();
        // Drain whatever was buffered before deregistration; the stream must
        // then terminate rather than hang.
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while stream.next().await.is_some() {}
        })
        .await
        .expect("stream should close after cancellation");
    }
}
