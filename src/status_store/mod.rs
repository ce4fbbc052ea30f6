//! Per-track audio status with a durable ledger
//!
//! [`StatusStore`] answers "what is the state of track N's audio" for every
//! other component. Reads are served from an in-memory cache and never wait on
//! the pipeline. Writes update the cache immediately and then persist the
//! entry to the ledger; persistence failures are logged and swallowed, so a
//! full disk degrades durability but never breaks a download.
//!
//! Only one store may own a ledger at a time. Opening takes an exclusive lock
//! on `<ledger>.lock` and fails with [`Error::LedgerLocked`] when another
//! process (or another store in this process) already holds it.
//!
//! [`Error::LedgerLocked`]: crate::error::Error::LedgerLocked

mod ledger;


use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, broadcast};

use crate::error::Result;
use crate::types::{AudioStatus, StatusEvent, TrackId};

use ledger::Ledger;

/// Buffer size of the status event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Shared status store (cloneable - all state is Arc-wrapped)
#[derive(Clone)]
pub struct StatusStore {
    inner: Arc<Inner>,
}

struct Inner {
    cache: RwLock<HashMap<TrackId, AudioStatus>>,
    ledger: Ledger,
    /// Serializes ledger rewrites
    write_lock: Mutex<()>,
    event_tx: broadcast::Sender<StatusEvent>,
}

impl StatusStore {
    /// Open the store backed by the ledger at `ledger_path`
    ///
    /// Entries that were `pending` or `downloading` when the ledger was last
    /// written are loaded as [`AudioStatus::server_restart`]. The file itself
    /// is left untouched until the next [`set`](Self::set) or
    /// [`clear`](Self::clear).
    ///
    /// # Errors
    ///
    /// - [`Error::LedgerLocked`](crate::error::Error::LedgerLocked) if another
    ///   store owns the ledger
    /// - [`Error::Io`](crate::error::Error::Io) if the directory or lock file
    ///   cannot be created
    pub async fn open(ledger_path: impl Into<PathBuf>) -> Result<Self> {
        let ledger = Ledger::open(ledger_path.into())?;

        let mut interrupted = 0usize;
        let cache: HashMap<TrackId, AudioStatus> = ledger
            .load()
            .await
            .into_iter()
            .map(|(id, status)| {
                if status.is_in_flight() {
                    interrupted += 1;
                    (id, AudioStatus::server_restart())
                } else {
                    (id, status)
                }
            })
            .collect();

        tracing::info!(
            path = %ledger.path().display(),
            entries = cache.len(),
            interrupted,
            "Status ledger loaded"
        );

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                cache: RwLock::new(cache),
                ledger,
                write_lock: Mutex::new(()),
                event_tx,
            }),
        })
    }

    /// Current status of `id`, [`AudioStatus::Pending`] when unknown
    pub fn get(&self, id: TrackId) -> AudioStatus {
        self.inner
            .cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
            .unwrap_or(AudioStatus::Pending)
    }

    /// Record a new status for `id`
    ///
    /// The cache is updated and the event broadcast before the ledger write
    /// starts; the returned future completes once the entry is persisted (or
    /// the failure logged).
    pub async fn set(&self, id: TrackId, status: AudioStatus) {
        self.inner
            .cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, status.clone());
        self.emit(StatusEvent::Updated { id, status });

        self.persist(id).await;
    }

    /// Forget `id` entirely
    pub async fn clear(&self, id: TrackId) {
        let removed = self
            .inner
            .cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id)
            .is_some();
        if removed {
            self.emit(StatusEvent::Cleared { id });
        }

        self.persist(id).await;
    }

    /// Subscribe to status changes
    ///
    /// Slow receivers lose the oldest events (`RecvError::Lagged`) rather than
    /// blocking writers.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Copy of every cached entry
    pub fn snapshot(&self) -> HashMap<TrackId, AudioStatus> {
        self.inner
            .cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Location of the durable ledger
    pub fn ledger_path(&self) -> &Path {
        self.inner.ledger.path()
    }

    fn emit(&self, event: StatusEvent) {
        // No receivers is fine; the event is dropped
        self.inner.event_tx.send(event).ok();
    }

    /// Write the cached value of `id` (or its absence) to the ledger
    ///
    /// The value is read from the cache under the write lock, so when two
    /// writers race the ledger ends with whatever the cache holds last.
    async fn persist(&self, id: TrackId) {
        let _guard = self.inner.write_lock.lock().await;

        let current = self
            .inner
            .cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned();

        if let Err(e) = self.inner.ledger.write_entry(id, current.as_ref()).await {
            tracing::error!(
                track_id = id.get(),
                path = %self.inner.ledger.path().display(),
                error = %e,
                "Failed to persist audio status"
            );
        }
    }
}

impl std::fmt::Debug for StatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStore")
            .field("ledger", &self.inner.ledger.path())
            .finish_non_exhaustive()
    }
}
