//! Thin wrappers over the engine's C ABI.
//!
//! Every primitive takes the same arguments as the C call but hands back its
//! status and out-parameters together, so callers never manage output
//! pointers. Nothing here raises: a failing status is returned as-is and the
//! lifecycle layer decides what it means.
//!
//! Functions taking a [`DbHandle`] or [`StmtHandle`] are `unsafe`: the handle
//! must come from a successful `open`/`prepare` and must not have been
//! closed or finalized yet. A null handle is accepted wherever the engine
//! itself accepts one.
#![allow(unsafe_code)]

mod status;

use std::ffi::{CStr, CString, c_char, c_int};
use std::ptr;

use rusqlite::ffi;

pub use status::Status;

// The bundled bindings omit `sqlite3_close_v2`, although the linked engine
// library exports it.
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut ffi::sqlite3) -> c_int;
}

/// Flags for a read-write database, created on demand, with URI filenames.
pub const OPEN_READ_WRITE: c_int =
    ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_URI;

/// Flags for a read-only database with URI filenames.
pub const OPEN_READ_ONLY: c_int = ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_URI;

/// Opaque database connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbHandle(*mut ffi::sqlite3);

impl DbHandle {
    #[must_use]
    pub fn null() -> Self {
        DbHandle(ptr::null_mut())
    }

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// Opaque prepared statement handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtHandle(*mut ffi::sqlite3_stmt);

impl StmtHandle {
    #[must_use]
    pub fn null() -> Self {
        StmtHandle(ptr::null_mut())
    }

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

/// Result of `open`. The engine may hand back a handle even on failure; it
/// still has to be closed.
#[derive(Debug, Clone, Copy)]
pub struct OpenResult {
    pub status: Status,
    pub db: DbHandle,
}

/// Result of `prepare`.
///
/// `stmt` is null when the input held no statement (blank text or only a
/// comment). `tail` is the byte offset of the first unconsumed character.
#[derive(Debug, Clone, Copy)]
pub struct PrepareResult {
    pub status: Status,
    pub stmt: StmtHandle,
    pub tail: usize,
}

/// Stateless entry point to the raw primitives.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBindings;

impl RawBindings {
    /// One-shot runtime initialization. Later calls are no-ops returning `Ok`.
    pub fn initialize(&self) -> Status {
        // SAFETY: sqlite3_initialize takes no arguments and is idempotent.
        Status::from_code(unsafe { ffi::sqlite3_initialize() })
    }

    #[must_use]
    pub fn libversion(&self) -> String {
        // SAFETY: sqlite3_libversion returns a pointer to a static string.
        unsafe { cstr_to_string(ffi::sqlite3_libversion()) }.unwrap_or_default()
    }

    /// `sqlite3_open` equivalent: read-write, create if missing.
    pub fn open(&self, uri: &str) -> OpenResult {
        self.open_v2(uri, OPEN_READ_WRITE)
    }

    pub fn open_v2(&self, uri: &str, flags: c_int) -> OpenResult {
        let Ok(c_uri) = CString::new(uri) else {
            return OpenResult {
                status: Status::from_code(ffi::SQLITE_MISUSE),
                db: DbHandle::null(),
            };
        };
        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        // SAFETY: c_uri is nul-terminated and outlives the call, db is a valid
        // out pointer and a null VFS name selects the default VFS.
        let rc = unsafe { ffi::sqlite3_open_v2(c_uri.as_ptr(), &mut db, flags, ptr::null()) };
        OpenResult {
            status: Status::from_code(rc),
            db: DbHandle(db),
        }
    }

    /// # Safety
    /// `db` must be a live handle (or null); it is invalid afterwards unless
    /// the returned status is `Other(SQLITE_BUSY)`.
    pub unsafe fn close(&self, db: DbHandle) -> Status {
        // SAFETY: guaranteed by the caller.
        Status::from_code(unsafe { ffi::sqlite3_close(db.0) })
    }

    /// Deferred close: the engine releases the handle once its last
    /// statement is finalized.
    ///
    /// # Safety
    /// `db` must be a live handle (or null); it is invalid afterwards.
    pub unsafe fn close_v2(&self, db: DbHandle) -> Status {
        // SAFETY: guaranteed by the caller.
        Status::from_code(unsafe { sqlite3_close_v2(db.0) })
    }

    /// Compile the first statement of `sql`.
    ///
    /// # Safety
    /// `db` must be a live handle.
    pub unsafe fn prepare(&self, db: DbHandle, sql: &str) -> PrepareResult {
        let Ok(len) = c_int::try_from(sql.len()) else {
            return PrepareResult {
                status: Status::from_code(ffi::SQLITE_TOOBIG),
                stmt: StmtHandle::null(),
                tail: 0,
            };
        };
        let head = sql.as_ptr().cast::<c_char>();
        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();
        // SAFETY: db is live per the caller; head/len describe a readable
        // buffer (an explicit length means no terminator is needed) and both
        // out pointers are valid.
        let rc = unsafe { ffi::sqlite3_prepare_v2(db.0, head, len, &mut stmt, &mut tail) };
        let consumed = if tail.is_null() {
            sql.len()
        } else {
            (tail as usize).saturating_sub(head as usize).min(sql.len())
        };
        PrepareResult {
            status: Status::from_code(rc),
            stmt: StmtHandle(stmt),
            tail: consumed,
        }
    }

    /// # Safety
    /// `stmt` must be a live handle.
    pub unsafe fn step(&self, stmt: StmtHandle) -> Status {
        // SAFETY: guaranteed by the caller.
        Status::from_code(unsafe { ffi::sqlite3_step(stmt.0) })
    }

    /// Release a statement. Returns the status of the most recent failed
    /// step, if any.
    ///
    /// # Safety
    /// `stmt` must be a live handle (or null); it is invalid afterwards.
    pub unsafe fn finalize(&self, stmt: StmtHandle) -> Status {
        // SAFETY: guaranteed by the caller.
        Status::from_code(unsafe { ffi::sqlite3_finalize(stmt.0) })
    }

    /// # Safety
    /// `stmt` must be a live handle.
    pub unsafe fn column_count(&self, stmt: StmtHandle) -> c_int {
        // SAFETY: guaranteed by the caller.
        unsafe { ffi::sqlite3_column_count(stmt.0) }
    }

    /// `None` when the engine could not allocate the name.
    ///
    /// # Safety
    /// `stmt` must be a live handle.
    pub unsafe fn column_name(&self, stmt: StmtHandle, index: c_int) -> Option<String> {
        // SAFETY: stmt is live; the returned pointer stays valid until the
        // next call on this column and is copied immediately.
        unsafe { cstr_to_string(ffi::sqlite3_column_name(stmt.0, index)) }
    }

    /// Raw type tag of a column in the current row.
    ///
    /// # Safety
    /// `stmt` must be a live handle positioned on a row.
    pub unsafe fn column_type(&self, stmt: StmtHandle, index: c_int) -> c_int {
        // SAFETY: guaranteed by the caller.
        unsafe { ffi::sqlite3_column_type(stmt.0, index) }
    }

    /// # Safety
    /// `stmt` must be a live handle positioned on a row.
    pub unsafe fn column_int(&self, stmt: StmtHandle, index: c_int) -> i64 {
        // SAFETY: guaranteed by the caller.
        unsafe { ffi::sqlite3_column_int64(stmt.0, index) }
    }

    /// # Safety
    /// `stmt` must be a live handle positioned on a row.
    pub unsafe fn column_double(&self, stmt: StmtHandle, index: c_int) -> f64 {
        // SAFETY: guaranteed by the caller.
        unsafe { ffi::sqlite3_column_double(stmt.0, index) }
    }

    /// `None` when the value is NULL. Invalid UTF-8 is replaced lossily.
    ///
    /// # Safety
    /// `stmt` must be a live handle positioned on a row.
    pub unsafe fn column_text(&self, stmt: StmtHandle, index: c_int) -> Option<String> {
        // SAFETY: stmt is live and on a row. column_bytes is read after
        // column_text so it measures the text encoding just produced.
        unsafe {
            let text = ffi::sqlite3_column_text(stmt.0, index);
            if text.is_null() {
                return None;
            }
            let len = usize::try_from(ffi::sqlite3_column_bytes(stmt.0, index)).unwrap_or(0);
            let bytes = std::slice::from_raw_parts(text, len);
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    /// # Safety
    /// `stmt` must be a live handle positioned on a row.
    pub unsafe fn column_blob(&self, stmt: StmtHandle, index: c_int) -> Vec<u8> {
        // SAFETY: stmt is live and on a row; a zero-length blob comes back
        // as a null pointer.
        unsafe {
            let data = ffi::sqlite3_column_blob(stmt.0, index);
            if data.is_null() {
                return Vec::new();
            }
            let len = usize::try_from(ffi::sqlite3_column_bytes(stmt.0, index)).unwrap_or(0);
            std::slice::from_raw_parts(data.cast::<u8>(), len).to_vec()
        }
    }

    /// Last error text recorded on the connection.
    ///
    /// # Safety
    /// `db` must be a live handle (or null).
    pub unsafe fn errmsg(&self, db: DbHandle) -> String {
        // SAFETY: db is live or null; the message is copied before any
        // further call can overwrite it.
        unsafe { cstr_to_string(ffi::sqlite3_errmsg(db.0)) }.unwrap_or_default()
    }

    /// English description of a status code.
    #[must_use]
    pub fn errstr(&self, status: Status) -> String {
        // SAFETY: sqlite3_errstr returns a static string for any input.
        unsafe { cstr_to_string(ffi::sqlite3_errstr(status.code())) }.unwrap_or_default()
    }

    /// Rows modified by the most recent INSERT, UPDATE or DELETE.
    ///
    /// # Safety
    /// `db` must be a live handle.
    pub unsafe fn changes(&self, db: DbHandle) -> i64 {
        // SAFETY: guaranteed by the caller.
        i64::from(unsafe { ffi::sqlite3_changes(db.0) })
    }

    /// Rows modified since the connection was opened.
    ///
    /// # Safety
    /// `db` must be a live handle.
    pub unsafe fn total_changes(&self, db: DbHandle) -> i64 {
        // SAFETY: guaranteed by the caller.
        i64::from(unsafe { ffi::sqlite3_total_changes(db.0) })
    }

    /// # Safety
    /// `db` must be a live handle.
    pub unsafe fn last_insert_rowid(&self, db: DbHandle) -> i64 {
        // SAFETY: guaranteed by the caller.
        unsafe { ffi::sqlite3_last_insert_rowid(db.0) }
    }
}

/// # Safety
/// `ptr` must be null or point at a nul-terminated string.
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: non-null and nul-terminated per the caller.
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}
