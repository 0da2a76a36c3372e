//! Deferred command bridge.
//!
//! Commands may arrive before the engine has finished initializing. The
//! bridge starts out buffering them, replays the buffer in arrival order
//! exactly once when readiness is signaled, and dispatches straight to the
//! handler from then on.

mod command;
mod handler;
mod worker;

use std::collections::VecDeque;
use std::fmt;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::error::CrunchError;

pub use command::{
    Command, CommandName, CommandResult, ConnectionId, Envelope, Reply, Responder,
};
pub use handler::{CommandHandler, EngineHandler};
pub use worker::{BridgeWorker, RemoteConnection, WorkerReport};

enum BridgeState<H> {
    Buffering { queue: VecDeque<Envelope> },
    Dispatching { handler: H },
}

/// Outcome of replaying the buffer on readiness.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub replayed: usize,
    /// Failures of replayed commands that had no reply channel.
    pub failures: Vec<CrunchError>,
}

/// Ordering gate in front of a [`CommandHandler`].
pub struct Bridge<H> {
    state: BridgeState<H>,
    dispatched: usize,
}

impl<H: CommandHandler> Bridge<H> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: BridgeState::Buffering {
                queue: VecDeque::new(),
            },
            dispatched: 0,
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, BridgeState::Dispatching { .. })
    }

    /// Commands waiting for readiness.
    #[must_use]
    pub fn pending(&self) -> usize {
        match &self.state {
            BridgeState::Buffering { queue } => queue.len(),
            BridgeState::Dispatching { .. } => 0,
        }
    }

    /// Commands handed to the handler so far, replayed ones included.
    #[must_use]
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    #[must_use]
    pub fn handler(&self) -> Option<&H> {
        match &self.state {
            BridgeState::Dispatching { handler } => Some(handler),
            BridgeState::Buffering { .. } => None,
        }
    }

    pub fn handler_mut(&mut self) -> Option<&mut H> {
        match &mut self.state {
            BridgeState::Dispatching { handler } => Some(handler),
            BridgeState::Buffering { .. } => None,
        }
    }

    #[must_use]
    pub fn into_handler(self) -> Option<H> {
        match self.state {
            BridgeState::Dispatching { handler } => Some(handler),
            BridgeState::Buffering { .. } => None,
        }
    }

    /// Queue the command, or run it right away once ready.
    ///
    /// # Errors
    /// After readiness, returns the handler's error for a command without a
    /// reply channel. Commands with a reply channel get their result there
    /// and this returns `Ok`.
    pub fn submit(&mut self, envelope: impl Into<Envelope>) -> Result<(), CrunchError> {
        let envelope = envelope.into();
        match &mut self.state {
            BridgeState::Buffering { queue } => {
                debug!(
                    command = %envelope.command.name(),
                    queued = queue.len() + 1,
                    "engine not ready, buffering"
                );
                queue.push_back(envelope);
                Ok(())
            }
            BridgeState::Dispatching { handler } => {
                self.dispatched += 1;
                deliver(handler, envelope)
            }
        }
    }

    /// Parse a raw `{name, args}` message and submit it.
    ///
    /// # Errors
    /// Returns `CrunchError::ProtocolError` for a malformed message, before
    /// anything is queued, or any error [`Bridge::submit`] returns.
    pub fn submit_message(&mut self, message: &Value) -> Result<(), CrunchError> {
        self.submit(Command::from_message(message)?)
    }

    /// Switch to dispatching and replay the buffer in arrival order.
    ///
    /// # Errors
    /// Returns `CrunchError::MisuseError` if readiness was already signaled.
    pub fn signal_ready(&mut self, handler: H) -> Result<ReplayReport, CrunchError> {
        let queue = match &mut self.state {
            BridgeState::Dispatching { .. } => {
                return Err(CrunchError::misuse("engine readiness signaled twice"));
            }
            BridgeState::Buffering { queue } => std::mem::take(queue),
        };
        info!(queued = queue.len(), "engine ready, replaying buffered commands");

        let mut handler = handler;
        let mut report = ReplayReport::default();
        for envelope in queue {
            report.replayed += 1;
            if let Err(err) = deliver(&mut handler, envelope) {
                report.failures.push(err);
            }
        }
        self.dispatched += report.replayed;
        self.state = BridgeState::Dispatching { handler };
        Ok(report)
    }

    /// Take every buffered command out without running it. Used when the
    /// engine will never become ready.
    pub fn drain_pending(&mut self) -> Vec<Envelope> {
        match &mut self.state {
            BridgeState::Buffering { queue } => queue.drain(..).collect(),
            BridgeState::Dispatching { .. } => Vec::new(),
        }
    }
}

impl<H: CommandHandler> Default for Bridge<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for Bridge<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Bridge");
        match &self.state {
            BridgeState::Buffering { queue } => s.field("state", &"buffering").field("pending", &queue.len()),
            BridgeState::Dispatching { .. } => s.field("state", &"dispatching"),
        };
        s.field("dispatched", &self.dispatched).finish()
    }
}

fn deliver<H: CommandHandler>(handler: &mut H, envelope: Envelope) -> Result<(), CrunchError> {
    let Envelope {
        command,
        respond_to,
    } = envelope;
    let name = command.name();
    let result = handler.dispatch(command);
    match respond_to {
        Some(tx) => {
            if tx.send(result).is_err() {
                debug!(command = %name, "requester went away before the reply");
            }
            Ok(())
        }
        None => result
            .map(|_| ())
            .inspect_err(|err| error!(command = %name, error = %err, "command failed")),
    }
}
