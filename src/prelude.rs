//! Convenient imports for common functionality.

pub use crate::bridge::{
    Bridge, BridgeWorker, Command, CommandHandler, EngineHandler, Envelope, RemoteConnection,
    Reply,
};
pub use crate::config::{OpenOptions, WorkerOptions};
pub use crate::{
    ColumnType, Connection, CrunchError, Engine, QueryResult, Row, RowValues, Statement,
    StatementState, StepOutcome,
};
