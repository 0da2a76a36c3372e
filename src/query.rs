use std::iter::FusedIterator;

use tracing::warn;

use crate::error::CrunchError;
use crate::results::Row;
use crate::statement::{StatementState, StepOutcome, Statement};

/// Lazy, single-pass sequence of rows from a prepared statement.
///
/// Each `next` steps the engine once. A step or type error is yielded once
/// as `Some(Err(_))`; after that, and after normal completion, the iterator
/// only ever returns `None`. The statement is finalized as soon as the
/// sequence ends, or on drop if it is abandoned early.
///
/// ```rust
/// use crunch::prelude::*;
///
/// # fn main() -> Result<(), CrunchError> {
/// let engine = Engine::initialize()?;
/// let conn = engine.open_memory()?;
/// let rows = conn.query("select 1+1 as a")?.collect::<Result<Vec<_>, _>>()?;
/// assert_eq!(rows[0].get("a").and_then(RowValues::as_int), Some(2));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct QueryResult<'conn> {
    stmt: Statement<'conn>,
    exhausted: bool,
}

impl<'conn> QueryResult<'conn> {
    pub(crate) fn new(stmt: Statement<'conn>) -> Self {
        Self {
            stmt,
            exhausted: false,
        }
    }

    /// Column names of the result set.
    ///
    /// # Errors
    /// Returns `CrunchError::MisuseError` once the sequence has ended and the
    /// statement is finalized.
    pub fn columns(&self) -> Result<Vec<String>, CrunchError> {
        self.stmt.columns()
    }

    /// # Errors
    /// As [`QueryResult::columns`], or for an index out of range.
    pub fn column_name(&self, index: usize) -> Result<String, CrunchError> {
        self.stmt.column_name(index)
    }

    /// # Errors
    /// As [`QueryResult::columns`].
    pub fn num_columns(&self) -> Result<usize, CrunchError> {
        self.stmt.column_count()
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    #[must_use]
    pub fn state(&self) -> StatementState {
        self.stmt.state()
    }

    fn finish(&mut self) {
        self.exhausted = true;
        if self.stmt.state() == StatementState::Finalized {
            return;
        }
        if let Err(err) = self.stmt.finalize() {
            warn!(error = %err, "finalize failed at end of query");
        }
    }
}

impl Iterator for QueryResult<'_> {
    type Item = Result<Row, CrunchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        match self.stmt.step() {
            Ok(StepOutcome::Row) => match self.stmt.read_row() {
                Ok(row) => Some(Ok(row)),
                Err(err) => {
                    self.finish();
                    Some(Err(err))
                }
            },
            Ok(StepOutcome::Done) => {
                self.finish();
                None
            }
            Err(err) => {
                self.finish();
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for QueryResult<'_> {}
