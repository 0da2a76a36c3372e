use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{OpenOptions, WorkerOptions};
use crate::engine::Engine;
use crate::error::CrunchError;
use crate::results::Row;

use super::command::{Command, ConnectionId, Envelope, Reply};
use super::handler::EngineHandler;
use super::Bridge;

enum WorkerEvent {
    Submit(Envelope),
    Ready(Engine),
    InitFailed(CrunchError),
    Shutdown,
}

/// Sending half shared by the worker handle and its remote connections.
#[derive(Debug, Clone)]
struct WorkerLink {
    sender: Sender<WorkerEvent>,
}

impl WorkerLink {
    fn send(&self, envelope: Envelope) -> Result<(), CrunchError> {
        self.sender
            .send(WorkerEvent::Submit(envelope))
            .map_err(|_| connection_error("bridge worker closed"))
    }

    async fn request(&self, command: Command) -> Result<Reply, CrunchError> {
        let name = command.name();
        let (envelope, rx) = Envelope::with_reply(command);
        self.send(envelope)?;
        rx.await.map_err(|_| {
            CrunchError::ConnectionError(format!("bridge worker dropped while handling `{name}`"))
        })?
    }
}

/// Summary handed back by [`BridgeWorker::shutdown`].
#[derive(Debug, Default)]
pub struct WorkerReport {
    /// Whether the engine ever became ready.
    pub ready: bool,
    pub dispatched: usize,
    /// Failures of commands nobody was waiting on, plus the initialization
    /// failure if there was one.
    pub failures: Vec<CrunchError>,
    /// Commands refused because the engine never became ready or the worker
    /// was shutting down.
    pub abandoned: usize,
}

/// A thread that owns a [`Bridge`] over an [`EngineHandler`].
///
/// Engine initialization runs on its own thread and announces readiness on
/// the same channel commands travel through, so commands submitted before
/// it finishes are buffered and replayed in order.
#[derive(Debug)]
pub struct BridgeWorker {
    link: WorkerLink,
    thread: Option<JoinHandle<WorkerReport>>,
    next_id: AtomicU64,
}

impl BridgeWorker {
    /// Spawn a worker whose engine initializes with [`Engine::initialize`].
    ///
    /// # Errors
    /// Returns `CrunchError::ConnectionError` if a thread cannot be spawned.
    pub fn spawn(options: WorkerOptions) -> Result<Self, CrunchError> {
        Self::spawn_with_init(options, Engine::initialize)
    }

    /// Spawn a worker with a custom initialization routine.
    ///
    /// # Errors
    /// Returns `CrunchError::ConnectionError` if a thread cannot be spawned.
    pub fn spawn_with_init<F>(options: WorkerOptions, init: F) -> Result<Self, CrunchError>
    where
        F: FnOnce() -> Result<Engine, CrunchError> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<WorkerEvent>();
        let thread = thread::Builder::new()
            .name(options.thread_name.clone())
            .spawn(move || run_worker(&receiver))
            .map_err(|err| {
                CrunchError::ConnectionError(format!("failed to spawn bridge worker thread: {err}"))
            })?;

        let init_sender = sender.clone();
        thread::Builder::new()
            .name(format!("{}-init", options.thread_name))
            .spawn(move || {
                let event = match panic::catch_unwind(AssertUnwindSafe(init)) {
                    Ok(Ok(engine)) => WorkerEvent::Ready(engine),
                    Ok(Err(err)) => WorkerEvent::InitFailed(err),
                    Err(_) => WorkerEvent::InitFailed(connection_error(
                        "engine initialization panicked",
                    )),
                };
                let _ = init_sender.send(event);
            })
            .map_err(|err| {
                let _ = sender.send(WorkerEvent::InitFailed(connection_error(
                    "engine initialization thread could not start",
                )));
                CrunchError::ConnectionError(format!(
                    "failed to spawn engine initialization thread: {err}"
                ))
            })?;

        Ok(Self {
            link: WorkerLink { sender },
            thread: Some(thread),
            next_id: AtomicU64::new(1),
        })
    }

    /// A connection id not used by this worker before.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// # Errors
    /// Returns `CrunchError::ConnectionError` if the worker has stopped.
    pub fn submit(&self, envelope: impl Into<Envelope>) -> Result<(), CrunchError> {
        self.link.send(envelope.into())
    }

    /// Parse a `{name, args}` message and post it without waiting for the
    /// result. Failures are logged and collected in the final report.
    ///
    /// # Errors
    /// Returns `CrunchError::ProtocolError` for a malformed message and
    /// `CrunchError::ConnectionError` if the worker has stopped.
    pub fn post_message(&self, message: &Value) -> Result<(), CrunchError> {
        self.submit(Command::from_message(message)?)
    }

    /// Submit a command and wait for its reply.
    ///
    /// # Errors
    /// Returns the handler's error, or `CrunchError::ConnectionError` if the
    /// worker stopped before replying.
    pub async fn request(&self, command: Command) -> Result<Reply, CrunchError> {
        self.link.request(command).await
    }

    /// Post an `open` and hand back a proxy for the new connection right
    /// away. The open is queued like any other command, so it may be called
    /// before the engine is ready. If the open fails, later commands on the
    /// proxy fail with an unknown-connection error.
    ///
    /// # Errors
    /// Returns `CrunchError::ConnectionError` if the worker has stopped.
    pub fn create_db(&self, options: OpenOptions) -> Result<RemoteConnection, CrunchError> {
        let id = self.next_connection_id();
        self.submit(Command::Open { id, options })?;
        Ok(RemoteConnection {
            id,
            link: self.link.clone(),
        })
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// If the engine is still initializing, the worker first waits for it
    /// and replays whatever was queued. Connections still open are closed.
    ///
    /// # Errors
    /// Returns `CrunchError::ConnectionError` if the worker thread panicked.
    pub fn shutdown(mut self) -> Result<WorkerReport, CrunchError> {
        let _ = self.link.sender.send(WorkerEvent::Shutdown);
        let Some(thread) = self.thread.take() else {
            return Ok(WorkerReport::default());
        };
        thread
            .join()
            .map_err(|_| connection_error("bridge worker thread panicked"))
    }
}

impl Drop for BridgeWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.link.sender.send(WorkerEvent::Shutdown);
        }
    }
}

/// Proxy for a connection living on a [`BridgeWorker`].
#[derive(Debug, Clone)]
pub struct RemoteConnection {
    id: ConnectionId,
    link: WorkerLink,
}

impl RemoteConnection {
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Run a SQL script and return the number of rows it inserted, updated
    /// or deleted.
    ///
    /// # Errors
    /// Returns the engine's `CrunchError::SqlError`, or
    /// `CrunchError::ConnectionError` if the connection or worker is gone.
    pub async fn exec(&self, sql: &str) -> Result<i64, CrunchError> {
        match self
            .link
            .request(Command::Exec {
                id: self.id,
                sql: sql.to_owned(),
            })
            .await?
        {
            Reply::Executed { changes, .. } => Ok(changes),
            other => Err(unexpected(&other)),
        }
    }

    /// Queue a script without waiting for it.
    ///
    /// # Errors
    /// Returns `CrunchError::ConnectionError` if the worker has stopped.
    pub fn exec_detached(&self, sql: &str) -> Result<(), CrunchError> {
        self.link.send(Envelope::new(Command::Exec {
            id: self.id,
            sql: sql.to_owned(),
        }))
    }

    /// # Errors
    /// As [`RemoteConnection::exec`].
    pub async fn query(&self, sql: &str) -> Result<Vec<Row>, CrunchError> {
        match self
            .link
            .request(Command::Query {
                id: self.id,
                sql: sql.to_owned(),
            })
            .await?
        {
            Reply::Rows { rows, .. } => Ok(rows),
            other => Err(unexpected(&other)),
        }
    }

    /// # Errors
    /// As [`RemoteConnection::exec`].
    pub async fn close(self) -> Result<(), CrunchError> {
        match self.link.request(Command::Close { id: self.id }).await? {
            Reply::Closed { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn run_worker(receiver: &Receiver<WorkerEvent>) -> WorkerReport {
    let mut bridge = Bridge::<EngineHandler>::new();
    let mut report = WorkerReport::default();
    let mut init_error: Option<String> = None;
    let mut shutting_down = false;

    while let Ok(event) = receiver.recv() {
        match event {
            WorkerEvent::Submit(envelope) => {
                if let Some(reason) = &init_error {
                    refuse(envelope, &format!("engine failed to initialize: {reason}"));
                    report.abandoned += 1;
                } else if shutting_down {
                    refuse(envelope, "bridge worker is shutting down");
                    report.abandoned += 1;
                } else if let Err(err) = bridge.submit(envelope) {
                    report.failures.push(err);
                }
            }
            WorkerEvent::Ready(engine) => {
                match bridge.signal_ready(EngineHandler::new(engine)) {
                    Ok(replay) => {
                        debug!(
                            replayed = replay.replayed,
                            failed = replay.failures.len(),
                            "bridge replay finished"
                        );
                        report.failures.extend(replay.failures);
                    }
                    Err(err) => warn!(error = %err, "ignoring readiness signal"),
                }
                if shutting_down {
                    break;
                }
            }
            WorkerEvent::InitFailed(err) => {
                error!(error = %err, pending = bridge.pending(), "engine initialization failed");
                let reason = err.to_string();
                for envelope in bridge.drain_pending() {
                    refuse(envelope, &format!("engine failed to initialize: {reason}"));
                    report.abandoned += 1;
                }
                report.failures.push(err);
                init_error = Some(reason);
                if shutting_down {
                    break;
                }
            }
            WorkerEvent::Shutdown => {
                if bridge.is_ready() || init_error.is_some() {
                    break;
                }
                debug!(
                    pending = bridge.pending(),
                    "shutdown requested, waiting for engine initialization"
                );
                shutting_down = true;
            }
        }
    }

    report.ready = bridge.is_ready();
    report.dispatched = bridge.dispatched();
    if let Some(handler) = bridge.into_handler() {
        info!(
            open_connections = handler.open_connections(),
            dispatched = report.dispatched,
            "bridge worker stopped"
        );
    }
    report
}

fn refuse(envelope: Envelope, reason: &str) {
    let name = envelope.command.name();
    match envelope.respond_to {
        Some(tx) => {
            let _ = tx.send(Err(CrunchError::ConnectionError(reason.to_owned())));
        }
        None => warn!(command = %name, reason, "command refused"),
    }
}

fn unexpected(reply: &Reply) -> CrunchError {
    CrunchError::protocol(format!("unexpected reply {reply:?}"))
}

fn connection_error(message: &str) -> CrunchError {
    CrunchError::ConnectionError(message.into())
}
