//! Embedded SQLite through its raw C ABI.
//!
//! Layers, bottom up: [`raw`] wraps each engine primitive and returns its
//! status with its out-parameters; [`Connection`] and [`Statement`] own the
//! handle lifecycle and turn failing statuses into [`CrunchError`]s;
//! [`QueryResult`] iterates rows lazily; [`bridge`] buffers commands until
//! the engine is ready and dispatches them in order.

pub mod bridge;
pub mod config;
pub mod prelude;
pub mod raw;

mod connection;
mod engine;
mod error;
mod query;
mod results;
mod statement;
mod types;

pub use config::{OpenOptions, OpenOptionsBuilder, WorkerOptions};
pub use connection::Connection;
pub use engine::Engine;
pub use error::CrunchError;
pub use query::QueryResult;
pub use results::Row;
pub use statement::{Statement, StatementState, StepOutcome};
pub use types::{ColumnType, RowValues};
