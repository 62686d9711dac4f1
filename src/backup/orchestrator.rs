//! Debounced, single-flight backup scheduling driven by write events.
//!
//! ## Design
//!
//! Uses a capacity-1 mpsc channel + timeout loop:
//! 1. Every `WriteOperation` event calls `trigger()`, a non-blocking `try_send`
//! 2. The background task waits for the first trigger, then keeps consuming
//!    triggers until `debounce_ms` of silence (bounded by a maximum wait)
//! 3. It then exports and rotates, sequentially: at most one export runs
//! 4. Triggers arriving meanwhile fill the single channel slot (one pending
//!    export); any further trigger is dropped because the pending one covers it
//!
//! Failures are logged and published as `Error` events. They never reach
//! the writer that caused the trigger.

use super::export::{rotate, BackupArtifact, GraphExporter};
use crate::error::Result;
use crate::events::{DomainEvent, EventBus, EventKind, SubscriptionId};
use crate::BackupSettings;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Upper bound on debouncing, in multiples of the debounce window
const MAX_WAIT_FACTOR: u32 = 5;

/// What the loop and `trigger_now` share
struct Worker {
    exporter: Arc<dyn GraphExporter>,
    events: Arc<EventBus>,
    settings: BackupSettings,
    exports: AtomicUsize,
    /// Serializes exports between the loop and `trigger_now`
    in_flight: Mutex<()>,
}

impl Worker {
    async fn run(&self) -> Result<BackupArtifact> {
        let _running = self.in_flight.lock().await;
        let started = Instant::now();

        let outcome = async {
            let artifact = self.exporter.export(&self.settings.directory).await?;
            let removed = rotate(&self.settings.directory, self.settings.retention()).await?;
            Ok::<_, crate::error::GraphError>((artifact, removed))
        }
        .await;

        match outcome {
            Ok((artifact, removed)) => {
                self.exports.fetch_add(1, Ordering::SeqCst);
                let duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    path = %artifact.path.display(),
                    removed,
                    duration_ms,
                    "Backup completed"
                );
                self.events.publish(DomainEvent::backup_completed(
                    artifact.path.display().to_string(),
                    removed,
                    duration_ms,
                ));
                Ok(artifact)
            }
            Err(e) => {
                error!("Backup failed: {}", e);
                self.events.publish(DomainEvent::error("backup", &e, None));
                Err(e)
            }
        }
    }
}

/// Schedules graph exports in response to committed writes
pub struct BackupOrchestrator {
    worker: Arc<Worker>,
    trigger_tx: std::sync::Mutex<Option<mpsc::Sender<()>>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    subscription: std::sync::Mutex<Option<SubscriptionId>>,
}

impl BackupOrchestrator {
    /// Spawn the background loop and subscribe to write events.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        exporter: Arc<dyn GraphExporter>,
        events: Arc<EventBus>,
        settings: BackupSettings,
    ) -> Self {
        let orchestrator = Self::detached(exporter, events.clone(), settings);

        let trigger = orchestrator.sender();
        let id = events.subscribe(EventKind::WriteOperation, move |_| {
            if let Some(tx) = &trigger {
                let _ = tx.try_send(());
            }
            Ok(())
        });
        *orchestrator
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(id);

        info!(
            directory = %orchestrator.worker.settings.directory.display(),
            max_backups = orchestrator.worker.settings.retention(),
            debounce_ms = orchestrator.worker.settings.debounce_ms,
            "Backup orchestrator started"
        );
        orchestrator
    }

    /// Spawn the loop without subscribing; exports happen only via `trigger`
    pub fn detached(
        exporter: Arc<dyn GraphExporter>,
        events: Arc<EventBus>,
        settings: BackupSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<()>(1);
        let debounce = settings.debounce();
        let worker = Arc::new(Worker {
            exporter,
            events,
            settings,
            exports: AtomicUsize::new(0),
            in_flight: Mutex::new(()),
        });
        let task = tokio::spawn(Self::run_loop(worker.clone(), rx, debounce));

        Self {
            worker,
            trigger_tx: std::sync::Mutex::new(Some(tx)),
            task: std::sync::Mutex::new(Some(task)),
            subscription: std::sync::Mutex::new(None),
        }
    }

    /// Request an export. Non-blocking; coalesced with any pending request.
    pub fn trigger(&self) {
        if let Some(tx) = self.sender() {
            let _ = tx.try_send(());
        }
    }

    /// Export and rotate right now, waiting for any export already running
    pub async fn trigger_now(&self) -> Result<BackupArtifact> {
        self.worker.run().await
    }

    /// Number of successful exports so far
    pub fn export_count(&self) -> usize {
        self.worker.exports.load(Ordering::SeqCst)
    }

    /// Unsubscribe, flush a pending export, and wait for the loop to end.
    /// Idempotent.
    pub async fn stop(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = subscription {
            self.worker.events.unsubscribe(id);
        }

        // Dropping the last sender ends the loop after its pending export
        self.trigger_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Backup loop ended abnormally: {}", e);
            }
            debug!("Backup orchestrator stopped");
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<()>> {
        self.trigger_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn run_loop(worker: Arc<Worker>, mut rx: mpsc::Receiver<()>, debounce: Duration) {
        let max_wait = debounce * MAX_WAIT_FACTOR;

        while rx.recv().await.is_some() {
            let first = Instant::now();
            let mut closed = false;

            // Debounce: keep consuming triggers until a quiet period or max wait
            loop {
                let remaining = max_wait.saturating_sub(first.elapsed());
                if remaining.is_zero() {
                    break;
                }
                match tokio::time::timeout(debounce.min(remaining), rx.recv()).await {
                    Ok(Some(())) => continue,
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            // Errors are already logged and published
            let _ = worker.run().await;

            if closed {
                return;
            }
        }
    }
}

impl Drop for BackupOrchestrator {
    fn drop(&mut self) {
        if let Ok(mut subscription) = self.subscription.lock() {
            if let Some(id) = subscription.take() {
                self.worker.events.unsubscribe(id);
            }
        }
    }
}
