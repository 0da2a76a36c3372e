use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::config::{MEMORY_URI, OpenOptions};
use crate::connection::Connection;
use crate::error::CrunchError;
use crate::raw::{OPEN_READ_ONLY, OPEN_READ_WRITE, RawBindings};

/// Handle to the initialized engine runtime.
///
/// Cloning is cheap and every clone refers to the same runtime. Connections
/// keep a clone alive so the scratch directory holding staged database
/// images outlives them; each image file is removed when its connection
/// closes.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
struct EngineInner {
    raw: RawBindings,
    next_image_id: AtomicU64,
    // Created on first image open.
    scratch: Mutex<Option<TempDir>>,
}

impl Engine {
    /// Run the engine's one-shot initialization.
    ///
    /// # Errors
    /// Returns `CrunchError::ConnectionError` if the runtime refuses to
    /// initialize.
    pub fn initialize() -> Result<Self, CrunchError> {
        let raw = RawBindings;
        let status = raw.initialize();
        if !status.is_ok() {
            return Err(CrunchError::ConnectionError(format!(
                "engine initialization failed: {}",
                raw.errstr(status)
            )));
        }
        debug!(version = %raw.libversion(), "engine initialized");
        Ok(Self {
            inner: Arc::new(EngineInner {
                raw,
                next_image_id: AtomicU64::new(1),
                scratch: Mutex::new(None),
            }),
        })
    }

    #[must_use]
    pub fn raw(&self) -> RawBindings {
        self.inner.raw
    }

    #[must_use]
    pub fn version(&self) -> String {
        self.inner.raw.libversion()
    }

    /// Open a connection described by `options`.
    ///
    /// # Errors
    /// Returns `CrunchError::ConfigError` for conflicting options,
    /// `CrunchError::IoError` if an image cannot be staged and
    /// `CrunchError::ConnectionError` if the engine rejects the open.
    pub fn open(&self, options: &OpenOptions) -> Result<Connection, CrunchError> {
        options.validate()?;
        let flags = if options.read_only {
            OPEN_READ_ONLY
        } else {
            OPEN_READ_WRITE
        };
        match (&options.path, &options.image) {
            (Some(path), _) => Connection::open(self.clone(), path, flags),
            (None, Some(bytes)) => {
                let staged = self.stage_image(bytes)?;
                let uri = staged.to_string_lossy().into_owned();
                match Connection::open(self.clone(), &uri, flags) {
                    Ok(conn) => Ok(conn.with_staged_image(staged)),
                    Err(err) => {
                        remove_staged_image(&staged);
                        Err(err)
                    }
                }
            }
            (None, None) => Connection::open(self.clone(), MEMORY_URI, flags),
        }
    }

    /// Shorthand for an in-memory connection.
    ///
    /// # Errors
    /// Returns `CrunchError::ConnectionError` if the engine rejects the open.
    pub fn open_memory(&self) -> Result<Connection, CrunchError> {
        self.open(&OpenOptions::memory())
    }

    fn stage_image(&self, bytes: &[u8]) -> Result<PathBuf, CrunchError> {
        let id = self.inner.next_image_id.fetch_add(1, Ordering::Relaxed);
        let path = {
            let mut scratch = self
                .inner
                .scratch
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let dir = match scratch.take() {
                Some(dir) => dir,
                None => tempfile::Builder::new().prefix("crunch-").tempdir()?,
            };
            let path = dir.path().join(format!("db{id}"));
            *scratch = Some(dir);
            path
        };
        fs::write(&path, bytes)?;
        debug!(path = %path.display(), len = bytes.len(), "staged database image");
        Ok(path)
    }
}

/// Delete a staged image once nothing has it open.
pub(crate) fn remove_staged_image(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed staged database image"),
        Err(err) => warn!(
            path = %path.display(),
            error = %err,
            "could not remove staged database image"
        ),
    }
}
