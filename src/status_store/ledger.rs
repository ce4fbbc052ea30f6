//! On-disk status ledger
//!
//! The ledger is a pretty-printed JSON object keyed by track id:
//!
//! ```json
//! {
//!   "12": { "status": "ready" },
//!   "13": { "status": "error", "error": { "message": "Download cancelled", "code": "CANCELLED" } }
//! }
//! ```
//!
//! Writers rewrite the whole document through a sibling temp file followed by
//! a rename, so a crash mid-write leaves either the old or the new document.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{AudioStatus, TrackId};

/// Raw ledger document, entries kept as untyped JSON until parsed
type Document = serde_json::Map<String, serde_json::Value>;

/// Handle to the ledger file of one media directory
#[derive(Debug)]
pub(crate) struct Ledger {
    path: PathBuf,
    tmp_path: PathBuf,
    // Held for the lifetime of the store; closing the descriptor releases the lock
    _lock: LedgerLock,
}

impl Ledger {
    /// Take the process lock for `path` and return a handle
    ///
    /// Creates the parent directory when missing.
    pub(crate) fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create ledger directory '{}': {}",
                        parent.display(),
                        e
                    ),
                ))
            })?;
        }

        let lock = LedgerLock::acquire(&sibling(&path, "lock"))?;
        let tmp_path = sibling(&path, "tmp");

        Ok(Self {
            path,
            tmp_path,
            _lock: lock,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Load and parse every entry
    ///
    /// A missing file is an empty ledger. An unreadable or non-object document
    /// is logged and treated as empty. Individual entries that fail to parse
    /// (bad key or bad status) are logged and skipped.
    pub(crate) async fn load(&self) -> HashMap<TrackId, AudioStatus> {
        let document = match self.read_document().await {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Status ledger unreadable, starting with an empty store"
                );
                return HashMap::new();
            }
        };

        let mut entries = HashMap::with_capacity(document.len());
        for (key, value) in document {
            let id = match key.parse::<TrackId>() {
                Ok(id) => id,
                Err(_) => {
                    tracing::warn!(key = %key, "Skipping ledger entry with non-numeric id");
                    continue;
                }
            };
            match serde_json::from_value::<AudioStatus>(value) {
                Ok(status) => {
                    entries.insert(id, status);
                }
                Err(e) => {
                    tracing::warn!(
                        track_id = id.get(),
                        error = %e,
                        "Skipping malformed ledger entry"
                    );
                }
            }
        }
        entries
    }

    /// Read-modify-write a single entry; `None` removes it
    ///
    /// Callers serialize invocations; the ledger itself does no locking beyond
    /// the cross-process lock taken at open.
    pub(crate) async fn write_entry(&self, id: TrackId, status: Option<&AudioStatus>) -> Result<()> {
        // A corrupt document is replaced rather than blocking every future write
        let mut document = match self.read_document().await {
            Ok(document) => document,
            Err(Error::Io(e)) => return Err(Error::Io(e)),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Replacing corrupt status ledger"
                );
                Document::new()
            }
        };

        let key = id.to_string();
        match status {
            Some(status) => {
                document.insert(key, serde_json::to_value(status)?);
            }
            None => {
                document.remove(&key);
            }
        }

        let bytes = serde_json::to_vec_pretty(&document)?;
        tokio::fs::write(&self.tmp_path, &bytes).await?;
        tokio::fs::rename(&self.tmp_path, &self.path).await?;
        Ok(())
    }

    async fn read_document(&self) -> Result<Document> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Document::new());
        }
        Ok(serde_json::from_slice(&data)?)
    }
}

/// `<ledger>.<suffix>` next to the ledger file
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Exclusive advisory lock guarding the ledger against a second process
#[derive(Debug)]
struct LedgerLock {
    _file: File,
}

impl LedgerLock {
    #[cfg(unix)]
    fn acquire(path: &Path) -> Result<Self> {
        use std::os::unix::io::AsRawFd;

        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        // SAFETY: the descriptor is valid for the lifetime of `file`
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Err(Error::LedgerLocked {
                    path: path.to_path_buf(),
                });
            }
            return Err(Error::Io(err));
        }

        Ok(Self { _file: file })
    }

    #[cfg(not(unix))]
    fn acquire(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        tracing::warn!(
            path = %path.display(),
            "Advisory ledger locking is unavailable on this platform; \
             running two pipelines on one media directory will corrupt the ledger"
        );

        Ok(Self { _file: file })
    }
}
