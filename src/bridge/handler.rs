use std::collections::HashMap;

use crate::config::OpenOptions;
use crate::connection::Connection;
use crate::engine::Engine;
use crate::error::CrunchError;
use crate::results::Row;

use super::command::{Command, CommandResult, ConnectionId, Reply};

/// Executes commands once the engine is ready.
///
/// Each command tag has its own method; [`CommandHandler::dispatch`] routes
/// to them with an exhaustive match, so adding a tag without a handler does
/// not compile.
pub trait CommandHandler {
    fn open(&mut self, id: ConnectionId, options: OpenOptions) -> CommandResult;

    fn exec(&mut self, id: ConnectionId, sql: &str) -> CommandResult;

    fn query(&mut self, id: ConnectionId, sql: &str) -> CommandResult;

    fn close(&mut self, id: ConnectionId) -> CommandResult;

    fn dispatch(&mut self, command: Command) -> CommandResult {
        match command {
            Command::Open { id, options } => self.open(id, options),
            Command::Exec { id, sql } => self.exec(id, &sql),
            Command::Query { id, sql } => self.query(id, &sql),
            Command::Close { id } => self.close(id),
        }
    }
}

/// Default handler: runs commands against live engine connections keyed by
/// connection id.
#[derive(Debug)]
pub struct EngineHandler {
    engine: Engine,
    connections: HashMap<ConnectionId, Connection>,
}

impl EngineHandler {
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            connections: HashMap::new(),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    fn get(&self, id: ConnectionId) -> Result<&Connection, CrunchError> {
        self.connections
            .get(&id)
            .ok_or_else(|| CrunchError::ConnectionError(format!("no open connection with id {id}")))
    }
}

impl CommandHandler for EngineHandler {
    fn open(&mut self, id: ConnectionId, options: OpenOptions) -> CommandResult {
        if self.connections.contains_key(&id) {
            return Err(CrunchError::ConnectionError(format!(
                "connection {id} is already open"
            )));
        }
        let conn = self.engine.open(&options)?;
        self.connections.insert(id, conn);
        Ok(Reply::Opened { id })
    }

    fn exec(&mut self, id: ConnectionId, sql: &str) -> CommandResult {
        let changes = self.get(id)?.exec_batch(sql)?;
        Ok(Reply::Executed { id, changes })
    }

    fn query(&mut self, id: ConnectionId, sql: &str) -> CommandResult {
        let rows = self
            .get(id)?
            .query(sql)?
            .collect::<Result<Vec<Row>, CrunchError>>()?;
        Ok(Reply::Rows { id, rows })
    }

    fn close(&mut self, id: ConnectionId) -> CommandResult {
        let conn = self
            .connections
            .remove(&id)
            .ok_or_else(|| CrunchError::ConnectionError(format!("no open connection with id {id}")))?;
        conn.close()?;
        Ok(Reply::Closed { id })
    }
}
