//! Persistent file watcher feeding the updater.
//!
//! Watches one source tree per category, collapses raw notify events into
//! the updater's pending map, and flushes after a change-stability window
//! with no further events. Shutdown drains the queue with one final flush
//! before the notify handle is released.

use crate::entity::Category;
use crate::error::Result;
use crate::updater::{ChangeAction, RegistryUpdater};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

enum WatchMessage {
    Event(notify::Result<Event>),
    Shutdown,
}

struct WatcherHandle {
    // Kept alive for the lifetime of the watch; dropping it unsubscribes.
    _watcher: RecommendedWatcher,
    tx: mpsc::UnboundedSender<WatchMessage>,
    task: tokio::task::JoinHandle<()>,
}

/// Owns the notify subscription and the debounce loop.
pub struct RegistryWatcher {
    updater: Arc<RegistryUpdater>,
    handle: parking_lot::Mutex<Option<WatcherHandle>>,
}

impl RegistryWatcher {
    pub fn new(updater: Arc<RegistryUpdater>) -> Self {
        Self {
            updater,
            handle: parking_lot::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Subscribe to every existing category root and start the debounce
    /// loop. Idempotent: a second start is a no-op.
    pub fn start_watcher(&self) -> Result<()> {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let event_tx = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = event_tx.send(WatchMessage::Event(res));
            },
            notify::Config::default(),
        )?;

        let config = self.updater.registry().config();
        let mut watched = 0usize;
        for category in Category::ALL {
            let Some(root) = config.category_roots.get(&category) else {
                continue;
            };
            // Resolve the root itself so symlinked trees are followed.
            let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.clone());
            if !root.is_dir() {
                continue;
            }
            watcher.watch(&root, RecursiveMode::Recursive)?;
            watched += 1;
        }
        tracing::info!(roots = watched, "registry watcher started");

        let task = tokio::spawn(Self::run_loop(
            Arc::clone(&self.updater),
            rx,
            Duration::from_millis(config.debounce_ms),
        ));

        *guard = Some(WatcherHandle {
            _watcher: watcher,
            tx,
            task,
        });
        Ok(())
    }

    /// Stop watching: drop the subscription, drain the current batch, and
    /// join the loop.
    pub async fn stop_watcher(&self) {
        let handle = self.handle.lock().take();
        let Some(handle) = handle else { return };

        let _ = handle.tx.send(WatchMessage::Shutdown);
        drop(handle._watcher);
        if let Err(e) = handle.task.await {
            tracing::warn!(error = %e, "watcher loop did not join cleanly");
        }
        tracing::info!("registry watcher stopped");
    }

    async fn run_loop(
        updater: Arc<RegistryUpdater>,
        mut rx: mpsc::UnboundedReceiver<WatchMessage>,
        debounce: Duration,
    ) {
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            let wait = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                message = rx.recv() => match message {
                    Some(WatchMessage::Event(Ok(event))) => {
                        if Self::enqueue_event(&updater, &event) {
                            deadline = Some(tokio::time::Instant::now() + debounce);
                        }
                    }
                    Some(WatchMessage::Event(Err(e))) => {
                        tracing::warn!(error = %e, "watch event error");
                    }
                    Some(WatchMessage::Shutdown) | None => break,
                },
                _ = wait => {
                    deadline = None;
                    if let Err(e) = updater.flush().await {
                        tracing::warn!(error = %e, "debounced flush failed, entries deferred");
                    }
                }
            }
        }

        // Drain whatever is still queued before the loop ends.
        if let Err(e) = updater.flush().await {
            tracing::warn!(error = %e, "final drain flush failed");
        }
    }

    /// Map a notify event onto pending-map entries. Returns whether
    /// anything was queued.
    fn enqueue_event(updater: &RegistryUpdater, event: &Event) -> bool {
        let action = match event.kind {
            EventKind::Create(_) => ChangeAction::Add,
            EventKind::Modify(_) => ChangeAction::Change,
            EventKind::Remove(_) => ChangeAction::Unlink,
            _ => return false,
        };

        let config = updater.registry().config();
        let mut queued = false;
        for path in &event.paths {
            let eligible = match action {
                // Unlink eligibility can't consult the (gone) file; the
                // updater resolves it against the registry instead.
                ChangeAction::Unlink => true,
                _ => config.is_ingestible(path),
            };
            if !eligible {
                continue;
            }
            updater.enqueue(normalize_event_path(path), action);
            queued = true;
        }
        queued
    }
}

fn normalize_event_path(path: &PathBuf) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.clone())
}
