// Handle access goes through the raw bindings.
#![allow(unsafe_code)]

use std::cell::Cell;
use std::ffi::c_int;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::engine::{Engine, remove_staged_image};
use crate::error::CrunchError;
use crate::query::QueryResult;
use crate::raw::{DbHandle, OpenResult, PrepareResult, RawBindings, Status};
use crate::statement::{StepOutcome, Statement};

/// An open database connection.
///
/// Statements borrow the connection, so it cannot be closed or dropped
/// while any of them is alive.
pub struct Connection {
    engine: Engine,
    db: DbHandle,
    uri: String,
    live_statements: Cell<usize>,
    open: bool,
    // Scratch copy of a database image, deleted on close.
    staged_image: Option<PathBuf>,
}

// SAFETY: the bundled engine is built in serialized threading mode, so the
// handle may be moved to another thread. `Connection` is not `Sync` and its
// statements borrow it, which keeps every use on one thread at a time.
unsafe impl Send for Connection {}

impl Connection {
    pub(crate) fn open(engine: Engine, uri: &str, flags: c_int) -> Result<Self, CrunchError> {
        let raw = engine.raw();
        let OpenResult { status, db } = raw.open_v2(uri, flags);
        if !status.is_ok() {
            let detail = if db.is_null() {
                raw.errstr(status)
            } else {
                // SAFETY: db was just returned by open and is closed here,
                // never to be used again.
                unsafe {
                    let message = raw.errmsg(db);
                    raw.close(db);
                    message
                }
            };
            return Err(CrunchError::ConnectionError(format!(
                "unable to open database {uri}: {detail}"
            )));
        }
        debug!(uri, "connection opened");
        Ok(Self {
            engine,
            db,
            uri: uri.to_owned(),
            live_statements: Cell::new(0),
            open: true,
            staged_image: None,
        })
    }

    pub(crate) fn with_staged_image(mut self, path: PathBuf) -> Self {
        self.staged_image = Some(path);
        self
    }

    /// Scratch file backing a connection opened from an image, until the
    /// connection closes.
    #[must_use]
    pub fn staged_image(&self) -> Option<&Path> {
        self.staged_image.as_deref()
    }

    fn release_staged_image(&mut self) {
        if let Some(path) = self.staged_image.take() {
            remove_staged_image(&path);
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn raw(&self) -> RawBindings {
        self.engine.raw()
    }

    /// Compile the first statement in `sql`.
    ///
    /// # Errors
    /// Returns `CrunchError::SqlError` if the engine rejects the text.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>, CrunchError> {
        self.prepare_with_tail(sql).map(|(stmt, _)| stmt)
    }

    fn prepare_with_tail(&self, sql: &str) -> Result<(Statement<'_>, usize), CrunchError> {
        // SAFETY: db stays live for as long as `self` is borrowed.
        let PrepareResult { status, stmt, tail } = unsafe { self.raw().prepare(self.db, sql) };
        if !status.is_ok() {
            return Err(self.sql_error(status));
        }
        debug!(sql, "statement prepared");
        Ok((Statement::new(self, stmt), tail))
    }

    /// Run a single statement to completion, discarding any rows.
    ///
    /// The statement is finalized on every path out of this call.
    ///
    /// # Errors
    /// Returns `CrunchError::SqlError` if preparing, stepping or finalizing
    /// fails.
    pub fn exec(&self, sql: &str) -> Result<(), CrunchError> {
        run_to_completion(self.prepare(sql)?)
    }

    /// Run every statement in `sql` in order, stopping at the first failure.
    ///
    /// Returns the number of rows the script inserted, updated or deleted.
    /// Statements that modify nothing, such as DDL, add zero.
    ///
    /// # Errors
    /// Returns the first `CrunchError::SqlError` encountered.
    pub fn exec_batch(&self, sql: &str) -> Result<i64, CrunchError> {
        let before = self.total_changes();
        let mut remaining = sql;
        while !remaining.trim().is_empty() {
            let (stmt, tail) = self.prepare_with_tail(remaining)?;
            if stmt.is_empty() {
                break;
            }
            run_to_completion(stmt)?;
            remaining = remaining.get(tail..).unwrap_or_default();
        }
        Ok(self.total_changes() - before)
    }

    /// Prepare `sql` and return a lazy iterator over its rows. Nothing is
    /// stepped until the iterator is advanced.
    ///
    /// # Errors
    /// Returns `CrunchError::SqlError` if the engine rejects the text.
    pub fn query(&self, sql: &str) -> Result<QueryResult<'_>, CrunchError> {
        Ok(QueryResult::new(self.prepare(sql)?))
    }

    /// Rows modified by the most recent INSERT, UPDATE or DELETE.
    #[must_use]
    pub fn changes(&self) -> i64 {
        // SAFETY: db is live while `self` exists.
        unsafe { self.raw().changes(self.db) }
    }

    /// Rows modified since the connection was opened.
    #[must_use]
    pub fn total_changes(&self) -> i64 {
        // SAFETY: db is live while `self` exists.
        unsafe { self.raw().total_changes(self.db) }
    }

    #[must_use]
    pub fn last_insert_rowid(&self) -> i64 {
        // SAFETY: db is live while `self` exists.
        unsafe { self.raw().last_insert_rowid(self.db) }
    }

    /// Number of statements prepared on this connection and not yet
    /// finalized.
    #[must_use]
    pub fn live_statements(&self) -> usize {
        self.live_statements.get()
    }

    pub(crate) fn statement_opened(&self) {
        self.live_statements.set(self.live_statements.get() + 1);
    }

    pub(crate) fn statement_finalized(&self) {
        self.live_statements
            .set(self.live_statements.get().saturating_sub(1));
    }

    /// Build a `SqlError` from `status` and the connection's last message.
    pub(crate) fn sql_error(&self, status: Status) -> CrunchError {
        let raw = self.raw();
        CrunchError::SqlError {
            status,
            code: raw.errstr(status),
            // SAFETY: db is live while `self` exists.
            message: unsafe { raw.errmsg(self.db) },
        }
    }

    /// Close the connection.
    ///
    /// Every statement must have been finalized first. Debug builds assert
    /// this; release builds attempt the close anyway and report the
    /// engine's refusal.
    ///
    /// # Errors
    /// Returns `CrunchError::SqlError` if the engine refuses to close. The
    /// handle is then released once its remaining statements are finalized.
    pub fn close(mut self) -> Result<(), CrunchError> {
        let live = self.live_statements.get();
        debug_assert_eq!(live, 0, "connection closed with {live} live statement(s)");
        self.open = false;
        let raw = self.raw();
        // SAFETY: the handle was open until this point and is not used again
        // except to read the failure message below.
        let status = unsafe { raw.close(self.db) };
        if status.is_ok() {
            debug!(uri = %self.uri, "connection closed");
            self.release_staged_image();
            return Ok(());
        }
        let err = self.sql_error(status);
        warn!(uri = %self.uri, live, error = %err, "close refused, deferring");
        // SAFETY: the failed close left the handle open.
        unsafe { raw.close_v2(self.db) };
        self.release_staged_image();
        Err(err)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        // SAFETY: still open and never used after this.
        let status = unsafe { self.raw().close_v2(self.db) };
        if !status.is_ok() {
            warn!(uri = %self.uri, ?status, "close on drop failed");
        }
        self.release_staged_image();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("uri", &self.uri)
            .field("live_statements", &self.live_statements.get())
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

/// Step `stmt` until it completes, then finalize it.
///
/// A step error wins over any finalize failure during cleanup; the latter is
/// only logged.
fn run_to_completion(mut stmt: Statement<'_>) -> Result<(), CrunchError> {
    let outcome = loop {
        match stmt.step() {
            Ok(StepOutcome::Row) => continue,
            Ok(StepOutcome::Done) => break Ok(()),
            Err(err) => break Err(err),
        }
    };
    match outcome {
        Ok(()) => stmt.finalize(),
        Err(err) => {
            if let Err(cleanup) = stmt.finalize() {
                warn!(error = %cleanup, "finalize failed while surfacing a step error");
            }
            Err(err)
        }
    }
}
