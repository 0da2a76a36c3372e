// Handle access goes through the raw bindings.
#![allow(unsafe_code)]

use std::ffi::c_int;
use std::fmt;

use rusqlite::ffi;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::CrunchError;
use crate::raw::{Status, StmtHandle};
use crate::results::Row;
use crate::types::{ColumnType, RowValues};

/// Lifecycle position of a [`Statement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Prepared,
    /// The last step produced a row; column values can be read.
    Stepping,
    Done,
    Errored,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Row,
    Done,
}

/// A prepared statement bound to one connection.
///
/// Finalized exactly once: explicitly through [`Statement::finalize`] or on
/// drop.
pub struct Statement<'conn> {
    conn: &'conn Connection,
    handle: StmtHandle,
    state: StatementState,
}

impl<'conn> Statement<'conn> {
    pub(crate) fn new(conn: &'conn Connection, handle: StmtHandle) -> Self {
        conn.statement_opened();
        // Blank input compiles to no statement at all; it is complete as is.
        let state = if handle.is_null() {
            StatementState::Done
        } else {
            StatementState::Prepared
        };
        Self {
            conn,
            handle,
            state,
        }
    }

    #[must_use]
    pub fn state(&self) -> StatementState {
        self.state
    }

    /// True when the source text held no statement.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handle.is_null()
    }

    #[must_use]
    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    /// Advance execution by one step.
    ///
    /// Once done, further calls return `StepOutcome::Done` without touching
    /// the engine, which would otherwise restart the statement.
    ///
    /// # Errors
    /// Returns `CrunchError::SqlError` if the engine reports a failure and
    /// `CrunchError::MisuseError` when called after a failure or after
    /// finalization.
    pub fn step(&mut self) -> Result<StepOutcome, CrunchError> {
        match self.state {
            StatementState::Finalized => {
                return Err(CrunchError::misuse("step on a finalized statement"));
            }
            StatementState::Errored => {
                return Err(CrunchError::misuse("step after a failed step"));
            }
            StatementState::Done => return Ok(StepOutcome::Done),
            StatementState::Prepared | StatementState::Stepping => {}
        }
        // SAFETY: not finalized, and the connection is borrowed for 'conn.
        match unsafe { self.conn.raw().step(self.handle) } {
            Status::Row => {
                self.state = StatementState::Stepping;
                Ok(StepOutcome::Row)
            }
            Status::Done => {
                self.state = StatementState::Done;
                Ok(StepOutcome::Done)
            }
            status => {
                self.state = StatementState::Errored;
                Err(self.conn.sql_error(status))
            }
        }
    }

    /// Release the statement's engine resources.
    ///
    /// After a failed step the engine repeats that step's status here; that
    /// echo is not reported again.
    ///
    /// # Errors
    /// Returns `CrunchError::MisuseError` on a second call and
    /// `CrunchError::SqlError` if the engine reports a failure.
    pub fn finalize(&mut self) -> Result<(), CrunchError> {
        let previous = self.state;
        if previous == StatementState::Finalized {
            return Err(CrunchError::misuse("statement finalized twice"));
        }
        self.state = StatementState::Finalized;
        self.conn.statement_finalized();
        // SAFETY: the handle is live until this call and never used again.
        let status = unsafe { self.conn.raw().finalize(self.handle) };
        if status.is_ok() {
            Ok(())
        } else if previous == StatementState::Errored {
            debug!(?status, "finalize echoed the failed step");
            Ok(())
        } else {
            Err(self.conn.sql_error(status))
        }
    }

    /// Number of columns in the result set.
    ///
    /// # Errors
    /// Returns `CrunchError::MisuseError` after finalization.
    pub fn column_count(&self) -> Result<usize, CrunchError> {
        self.ensure_live("column_count")?;
        // SAFETY: live handle (or null, for which the engine returns 0).
        let count = unsafe { self.conn.raw().column_count(self.handle) };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// # Errors
    /// Returns `CrunchError::MisuseError` after finalization or for an
    /// index past the last column.
    pub fn column_name(&self, index: usize) -> Result<String, CrunchError> {
        let idx = self.column_index(index)?;
        // SAFETY: live handle and an index inside the result set.
        unsafe { self.conn.raw().column_name(self.handle, idx) }
            .ok_or_else(|| self.conn.sql_error(Status::from_code(ffi::SQLITE_NOMEM)))
    }

    /// All column names in result-set order.
    ///
    /// # Errors
    /// Returns `CrunchError::MisuseError` after finalization.
    pub fn columns(&self) -> Result<Vec<String>, CrunchError> {
        (0..self.column_count()?)
            .map(|i| self.column_name(i))
            .collect()
    }

    /// Runtime type of a column in the current row.
    ///
    /// # Errors
    /// Returns `CrunchError::MisuseError` when no row is available and
    /// `CrunchError::TypeError` for an unknown type tag.
    pub fn column_type(&self, index: usize) -> Result<ColumnType, CrunchError> {
        self.ensure_row()?;
        let idx = self.column_index(index)?;
        // SAFETY: live handle positioned on a row.
        ColumnType::from_code(unsafe { self.conn.raw().column_type(self.handle, idx) })
    }

    /// Read one value of the current row using the reader for its type.
    ///
    /// # Errors
    /// As [`Statement::column_type`].
    pub fn read_value(&self, index: usize) -> Result<RowValues, CrunchError> {
        let column_type = self.column_type(index)?;
        let idx = self.column_index(index)?;
        Ok(self.read_typed(idx, column_type))
    }

    /// Read the current row, re-reading column names and types.
    ///
    /// # Errors
    /// As [`Statement::column_type`]; a `TypeError` aborts the whole row.
    pub fn read_row(&self) -> Result<Row, CrunchError> {
        let count = self.column_count()?;
        let mut names = Vec::with_capacity(count);
        let mut values = Vec::with_capacity(count);
        for index in 0..count {
            let column_type = self.column_type(index)?;
            names.push(self.column_name(index)?);
            values.push(self.read_typed(self.column_index(index)?, column_type));
        }
        Ok(Row::new(names, values))
    }

    fn read_typed(&self, idx: c_int, column_type: ColumnType) -> RowValues {
        let raw = self.conn.raw();
        // SAFETY: callers checked the row is available and idx is in range.
        unsafe {
            match column_type {
                ColumnType::Integer => RowValues::Int(raw.column_int(self.handle, idx)),
                ColumnType::Float => RowValues::Float(raw.column_double(self.handle, idx)),
                ColumnType::Text => raw
                    .column_text(self.handle, idx)
                    .map_or(RowValues::Null, RowValues::Text),
                ColumnType::Blob => RowValues::Blob(raw.column_blob(self.handle, idx)),
                ColumnType::Null => RowValues::Null,
            }
        }
    }

    fn column_index(&self, index: usize) -> Result<c_int, CrunchError> {
        let count = self.column_count()?;
        if index >= count {
            return Err(CrunchError::misuse(format!(
                "column index {index} out of range ({count} columns)"
            )));
        }
        c_int::try_from(index)
            .map_err(|_| CrunchError::misuse(format!("column index {index} out of range")))
    }

    fn ensure_live(&self, op: &str) -> Result<(), CrunchError> {
        if self.state == StatementState::Finalized {
            Err(CrunchError::misuse(format!("{op} on a finalized statement")))
        } else {
            Ok(())
        }
    }

    fn ensure_row(&self) -> Result<(), CrunchError> {
        if self.state == StatementState::Stepping {
            Ok(())
        } else {
            Err(CrunchError::misuse(format!(
                "no row available in state {:?}",
                self.state
            )))
        }
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        if self.state == StatementState::Finalized {
            return;
        }
        if let Err(err) = self.finalize() {
            warn!(error = %err, "finalize on drop failed");
        }
    }
}

impl fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("state", &self.state)
            .field("empty", &self.is_empty())
            .finish_non_exhaustive()
    }
}
