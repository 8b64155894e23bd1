mod kill;
mod supervisor;

pub use kill::StopScope;

use crate::command::EncodeCommand;
use crate::error::StreamError;
use crate::log_sink::LogSink;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle as TokioJoinHandle;
use tracing::{debug, error, info, warn};

pub const STOPPED_MARKER: &str = "Streaming stopped by user.";
pub const ENDED_MARKER_PREFIX: &str = "Streaming ended";
pub const FAILED_MARKER_PREFIX: &str = "Streaming failed";
pub const SPAWN_FAILED_MARKER_PREFIX: &str = "Failed to start encoder";
pub const STARTING_PREFIX: &str = "Starting encoder";

/// Why a session reached `Terminated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The encoder exited on its own. `code` is `None` when it was killed by a
    /// signal we did not send.
    Ended { code: Option<i32> },
    StoppedByUser,
    SpawnFailed(String),
    /// Draining output or waiting on the process failed.
    Failed(String),
}

impl ExitReason {
    /// The terminal line appended to the log.
    pub fn marker(&self) -> String {
        match self {
            ExitReason::Ended { code: Some(code) } => {
                format!("{ENDED_MARKER_PREFIX} (exit code {code}).")
            }
            ExitReason::Ended { code: None } => {
                format!("{ENDED_MARKER_PREFIX} (terminated by signal).")
            }
            ExitReason::StoppedByUser => STOPPED_MARKER.to_string(),
            ExitReason::SpawnFailed(message) => format!("{SPAWN_FAILED_MARKER_PREFIX}: {message}"),
            ExitReason::Failed(message) => format!("{FAILED_MARKER_PREFIX}: {message}"),
        }
    }

    /// Whether `line` is one of the lines produced by [`ExitReason::marker`].
    pub fn is_marker(line: &str) -> bool {
        line == STOPPED_MARKER
            || line.starts_with(ENDED_MARKER_PREFIX)
            || line.starts_with(FAILED_MARKER_PREFIX)
            || line.starts_with(SPAWN_FAILED_MARKER_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    /// A kill has been sent; exit not yet observed.
    Stopping,
    Terminated(ExitReason),
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Stopping)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Terminated(_) => "terminated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAck {
    /// A kill was issued; termination will be observed asynchronously.
    Signalled,
    /// Nothing was running.
    NotRunning,
}

/// How the supervising task finished, before the stop flag is taken into
/// account.
pub(crate) enum Outcome {
    Exited(Option<i32>),
    Failed(String),
}

struct Inner {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<TokioJoinHandle<()>>,
    encoder_name: String,
}

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    state: watch::Sender<SessionState>,
    log: LogSink,
    next_id: AtomicU64,
}

impl Shared {
    pub(crate) fn log(&self) -> &LogSink {
        &self.log
    }

    /// Enter `Terminated`. Called once by the supervising task after the
    /// child is reaped and its output drained.
    pub(crate) fn terminate(&self, outcome: Outcome) {
        let mut inner = self.inner.lock();
        let stop_requested = *self.state.borrow() == SessionState::Stopping;

        let reason = match outcome {
            Outcome::Failed(message) => ExitReason::Failed(message),
            Outcome::Exited(_) if stop_requested => ExitReason::StoppedByUser,
            Outcome::Exited(code) => ExitReason::Ended { code },
        };

        match &reason {
            ExitReason::Failed(message) => error!(%message, "Streaming session failed"),
            reason => info!(?reason, "Streaming session terminated"),
        }

        inner.stop_tx = None;
        inner.task = None;
        self.log.append(reason.marker());
        self.state.send_replace(SessionState::Terminated(reason));
    }
}

/// Supervises at most one encoder process at a time.
///
/// The child is owned by a background task which drains its merged
/// stdout/stderr into the [`LogSink`] and awaits its exit; the session only
/// keeps a stop signal for it.
pub struct StreamSession {
    shared: Arc<Shared>,
    stop_scope: StopScope,
}

impl StreamSession {
    pub fn new(log: LogSink, stop_scope: StopScope) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    stop_tx: None,
                    task: None,
                    encoder_name: String::new(),
                }),
                state,
                log,
                next_id: AtomicU64::new(1),
            }),
            stop_scope,
        }
    }

    pub fn log(&self) -> &LogSink {
        &self.shared.log
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Spawn `command` and return the new session id.
    ///
    /// Must be called within a tokio runtime. Fails with
    /// [`StreamError::AlreadyActive`] while a session is running or stopping.
    pub fn start(&self, command: EncodeCommand) -> Result<u64, StreamError> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();

        if shared.state.borrow().is_active() {
            warn!("Rejecting start, a session is already active");
            return Err(StreamError::AlreadyActive);
        }

        // previous session (if any) is fully terminated; discard it
        inner.task = None;
        inner.stop_tx = None;
        inner.encoder_name = command.encoder_name().to_string();

        let session_id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        info!(session_id, %command, "Starting encoder");
        shared.log.append(format!("{STARTING_PREFIX}: {command}"));

        let (child, output) = match supervisor::spawn_encoder(&command) {
            Ok(spawned) => spawned,
            Err(error) => {
                let program = command.program();
                error!(session_id, program, ?error, "Failed to spawn encoder");
                let reason = ExitReason::SpawnFailed(error.to_string());
                shared.log.append(reason.marker());
                shared.state.send_replace(SessionState::Terminated(reason));

                return Err(StreamError::Spawn {
                    program: command.program().to_string(),
                    source: error,
                });
            }
        };

        debug!(session_id, pid = ?child.id(), "Encoder spawned");
        let (stop_tx, stop_rx) = oneshot::channel();
        shared.state.send_replace(SessionState::Running);

        let task = tokio::spawn(supervisor::supervise(
            session_id,
            child,
            output,
            stop_rx,
            shared.clone(),
        ));
        inner.stop_tx = Some(stop_tx);
        inner.task = Some(task);

        Ok(session_id)
    }

    /// Ask the running encoder to die. Never waits for the exit.
    pub fn stop(&self) -> StopAck {
        let mut inner = self.shared.inner.lock();

        if *self.shared.state.borrow() != SessionState::Running {
            debug!(state = self.shared.state.borrow().name(), "Stop ignored");
            return StopAck::NotRunning;
        }

        self.shared.state.send_replace(SessionState::Stopping);
        if let Some(stop_tx) = inner.stop_tx.take() {
            _ = stop_tx.send(());
        }

        if self.stop_scope == StopScope::AllInstances {
            kill::kill_all_instances(&inner.encoder_name);
        }

        info!(scope = ?self.stop_scope, "Stop requested");
        StopAck::Signalled
    }

    /// Resolves once no session is active, returning the state at that point.
    pub async fn wait_terminated(&self) -> SessionState {
        let mut rx = self.subscribe();
        let state = rx
            .wait_for(|state| !state.is_active())
            .await
            .map(|state| (*state).clone());
        state.unwrap_or_else(|_| self.state())
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        // the child is spawned with kill_on_drop, aborting the task reaps it
        if let Some(task) = self.shared.inner.lock().task.take() {
            task.abort();
        }
    }
}
