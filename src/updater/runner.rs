//! Run lifecycle: the forever loop, start coalescing and run-scoped stop.
//!
//! Each run gets a child token of the process shutdown token, so stopping a
//! run never tears down the process. A start request while a run is active
//! coalesces: the one-slot signal channel holds at most one pending start.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::status::UpdateStatus;
use crate::status::StatusBroadcaster;
use crate::updater::Updater;

pub struct UpdateRunner {
    updater: Arc<Updater>,
    status: Arc<StatusBroadcaster>,
    interval: Duration,
    start_rx: mpsc::Receiver<()>,
    current_run: Arc<Mutex<Option<CancellationToken>>>,
}

/// Control-plane handle: start/stop/status/subscribe.
#[derive(Clone)]
pub struct UpdateHandle {
    status: Arc<StatusBroadcaster>,
    start_tx: mpsc::Sender<()>,
    current_run: Arc<Mutex<Option<CancellationToken>>>,
}

impl UpdateRunner {
    pub fn new(
        updater: Arc<Updater>,
        status: Arc<StatusBroadcaster>,
        interval: Duration,
    ) -> (Self, UpdateHandle) {
        let (start_tx, start_rx) = mpsc::channel(1);
        let current_run = Arc::new(Mutex::new(None));

        let runner = Self {
            updater,
            status: Arc::clone(&status),
            interval,
            start_rx,
            current_run: Arc::clone(&current_run),
        };
        let handle = UpdateHandle {
            status,
            start_tx,
            current_run,
        };
        (runner, handle)
    }

    /// Runs updates until `shutdown` fires: one run, then wait for the
    /// interval or an explicit start signal, whichever comes first.
    ///
    /// A cancelled run still passes through `end_update`, so the status
    /// machine always returns to idle.
    pub async fn run_forever(mut self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            let run_cancel = shutdown.child_token();
            *self
                .current_run
                .lock()
                .expect("current run lock poisoned") = Some(run_cancel.clone());

            self.status.start_update();
            let started = Instant::now();
            info!("starting update");
            let (artists, albums) = self.updater.run_update(&run_cancel).await;
            self.status.end_update();

            *self
                .current_run
                .lock()
                .expect("current run lock poisoned") = None;
            info!(
                "update finished in {:?}: {} artists, {} albums",
                started.elapsed(),
                artists,
                albums
            );

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                _ = self.start_rx.recv() => {}
                () = shutdown.cancelled() => return,
            }
        }
    }
}

impl UpdateHandle {
    /// Requests a run. Coalesces: while a run is active (or a start is
    /// already pending) this folds into it.
    pub fn start_update(&self) {
        let _ = self.start_tx.try_send(());
    }

    /// Cancels the current run, if any. The run drains its workers and goes
    /// through `end_update` before the runner idles.
    pub fn stop_update(&self) {
        if let Some(run) = self
            .current_run
            .lock()
            .expect("current run lock poisoned")
            .as_ref()
        {
            run.cancel();
        }
    }

    /// Point-in-time status snapshot.
    #[must_use]
    pub fn status(&self) -> UpdateStatus {
        self.status.snapshot()
    }

    /// Live status stream ending when `cancel` fires.
    pub fn subscribe(&self, cancel: CancellationToken) -> ReceiverStream<UpdateStatus> {
        self.status.subscribe(cancel)
    }
}
