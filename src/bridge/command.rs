use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::OpenOptions;
use crate::error::CrunchError;
use crate::results::Row;

/// Caller-chosen identifier naming a connection across the bridge.
pub type ConnectionId = u64;

pub type CommandResult = Result<Reply, CrunchError>;
pub type Responder = oneshot::Sender<CommandResult>;

/// Tag of a [`Command`], as it appears in the `name` field of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Open,
    Exec,
    Query,
    Close,
}

impl CommandName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::Open => "open",
            CommandName::Exec => "exec",
            CommandName::Query => "query",
            CommandName::Close => "close",
        }
    }
}

impl FromStr for CommandName {
    type Err = CrunchError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "open" => Ok(CommandName::Open),
            "exec" => Ok(CommandName::Exec),
            "query" => Ok(CommandName::Query),
            "close" => Ok(CommandName::Close),
            other => Err(CrunchError::protocol(format!(
                "no handler for command `{other}`"
            ))),
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work crossing the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Open { id: ConnectionId, options: OpenOptions },
    Exec { id: ConnectionId, sql: String },
    Query { id: ConnectionId, sql: String },
    Close { id: ConnectionId },
}

impl Command {
    #[must_use]
    pub fn name(&self) -> CommandName {
        match self {
            Command::Open { .. } => CommandName::Open,
            Command::Exec { .. } => CommandName::Exec,
            Command::Query { .. } => CommandName::Query,
            Command::Close { .. } => CommandName::Close,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Command::Open { id, .. }
            | Command::Exec { id, .. }
            | Command::Query { id, .. }
            | Command::Close { id } => *id,
        }
    }

    /// Parse a `{ "name": ..., "args": [...] }` message.
    ///
    /// # Errors
    /// Returns `CrunchError::ProtocolError` if `name` or `args` is missing,
    /// the name is unknown, or the arguments do not fit the command.
    pub fn from_message(message: &Value) -> Result<Self, CrunchError> {
        let Some(fields) = message.as_object() else {
            return Err(CrunchError::protocol(format!(
                "message should be an object (message: {message})"
            )));
        };
        let name = fields.get("name").ok_or_else(|| {
            CrunchError::protocol(format!("message should have name (message: {message})"))
        })?;
        let args = fields.get("args").ok_or_else(|| {
            CrunchError::protocol(format!("message should have args (message: {message})"))
        })?;
        let name: CommandName = name
            .as_str()
            .ok_or_else(|| {
                CrunchError::protocol(format!("name should be a string (message: {message})"))
            })?
            .parse()?;
        let args = args.as_array().ok_or_else(|| {
            CrunchError::protocol(format!("args should be an array (message: {message})"))
        })?;

        match name {
            CommandName::Open => {
                expect_arity(name, args, 1, 2)?;
                let options = match args.get(1) {
                    None | Some(Value::Null) => OpenOptions::default(),
                    Some(raw) => serde_json::from_value(raw.clone()).map_err(|err| {
                        CrunchError::protocol(format!("invalid options for `open`: {err}"))
                    })?,
                };
                Ok(Command::Open {
                    id: id_arg(name, args)?,
                    options,
                })
            }
            CommandName::Exec => {
                expect_arity(name, args, 2, 2)?;
                Ok(Command::Exec {
                    id: id_arg(name, args)?,
                    sql: sql_arg(name, args)?,
                })
            }
            CommandName::Query => {
                expect_arity(name, args, 2, 2)?;
                Ok(Command::Query {
                    id: id_arg(name, args)?,
                    sql: sql_arg(name, args)?,
                })
            }
            CommandName::Close => {
                expect_arity(name, args, 1, 1)?;
                Ok(Command::Close {
                    id: id_arg(name, args)?,
                })
            }
        }
    }
}

fn expect_arity(
    name: CommandName,
    args: &[Value],
    min: usize,
    max: usize,
) -> Result<(), CrunchError> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        min.to_string()
    } else {
        format!("{min} to {max}")
    };
    Err(CrunchError::protocol(format!(
        "`{name}` expects {expected} argument(s), got {}",
        args.len()
    )))
}

fn id_arg(name: CommandName, args: &[Value]) -> Result<ConnectionId, CrunchError> {
    args.first().and_then(Value::as_u64).ok_or_else(|| {
        CrunchError::protocol(format!(
            "`{name}` expects a non-negative integer connection id as its first argument"
        ))
    })
}

fn sql_arg(name: CommandName, args: &[Value]) -> Result<String, CrunchError> {
    args.get(1)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| {
            CrunchError::protocol(format!("`{name}` expects SQL text as its second argument"))
        })
}

/// What a handler sends back for a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Opened { id: ConnectionId },
    /// `changes` counts rows modified by the whole script.
    Executed { id: ConnectionId, changes: i64 },
    Rows { id: ConnectionId, rows: Vec<Row> },
    Closed { id: ConnectionId },
}

/// A command plus the channel its result goes back on, if anyone is
/// waiting for it.
#[derive(Debug)]
pub struct Envelope {
    pub command: Command,
    pub respond_to: Option<Responder>,
}

impl Envelope {
    /// Fire-and-forget: failures are logged and reported by the bridge.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            respond_to: None,
        }
    }

    #[must_use]
    pub fn with_reply(command: Command) -> (Self, oneshot::Receiver<CommandResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                command,
                respond_to: Some(tx),
            },
            rx,
        )
    }
}

impl From<Command> for Envelope {
    fn from(command: Command) -> Self {
        Envelope::new(command)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn protocol_message(value: &Value) -> String {
        match Command::from_message(value) {
            Err(CrunchError::ProtocolError(message)) => message,
            other => panic!("expected a protocol error, got {other:?}"),
        }
    }

    #[test]
    fn parses_open_and_exec() {
        let open = Command::from_message(&json!({"name": "open", "args": [1, {}]})).unwrap();
        assert_eq!(
            open,
            Command::Open {
                id: 1,
                options: OpenOptions::memory()
            }
        );

        let exec =
            Command::from_message(&json!({"name": "exec", "args": [1, "select 1"]})).unwrap();
        assert_eq!(exec.name(), CommandName::Exec);
        assert_eq!(exec.connection_id(), 1);
    }

    #[test]
    fn open_options_may_be_omitted_or_null() {
        for message in [
            json!({"name": "open", "args": [3]}),
            json!({"name": "open", "args": [3, null]}),
        ] {
            assert!(matches!(
                Command::from_message(&message).unwrap(),
                Command::Open { id: 3, .. }
            ));
        }
    }

    #[test]
    fn missing_fields_are_protocol_errors() {
        assert!(protocol_message(&json!({"args": []})).contains("should have name"));
        assert!(protocol_message(&json!({"name": "exec"})).contains("should have args"));
        assert!(protocol_message(&json!("exec")).contains("should be an object"));
    }

    #[test]
    fn unknown_name_is_a_protocol_error() {
        let message = protocol_message(&json!({"name": "explode", "args": []}));
        assert!(message.contains("no handler for command `explode`"));
    }

    #[test]
    fn malformed_args_are_protocol_errors() {
        assert!(protocol_message(&json!({"name": "exec", "args": [1]})).contains("expects 2"));
        assert!(
            protocol_message(&json!({"name": "exec", "args": ["x", "select 1"]}))
                .contains("connection id")
        );
        assert!(protocol_message(&json!({"name": "query", "args": [1, 2]})).contains("SQL text"));
        assert!(
            protocol_message(&json!({"name": "open", "args": [1, {"read_only": "yes"}]}))
                .contains("invalid options")
        );
    }
}
