//! Tunnel session supervisor
//!
//! Drives one session at a time through
//! `Idle → Starting → Running → ShuttingDown → Stopped`:
//!
//! 1. A cancellation token is created and the session task is spawned. The
//!    task starts the tunnel engine in the background, starts the forwarding
//!    engine, then waits for cancellation.
//! 2. [`SessionSupervisor::run`] waits for SIGINT/SIGTERM or cancellation
//!    (see [`SessionSupervisor::shutdown`]).
//! 3. The token is fired and the session task stops the forwarding engine.
//!    `run` returns only once that cleanup finished or the cleanup timeout
//!    elapsed, in which case the task is abandoned.
//!
//! The session slot is held from [`SessionSupervisor::reserve`] until the
//! session task has finished, even if the `run` future is dropped early.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Configuration;
use crate::engine::{Engines, ForwardingOptions};
use crate::error::{TunwarpError, TunwarpResult};
use crate::options::SupervisorOptions;

/// Lifecycle state of the supervised session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl SessionState {
    /// Whether a session currently occupies the supervisor
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Running | SessionState::ShuttingDown
        )
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ShutdownReason {
    /// An OS signal was received (`SIGINT`, `SIGTERM`)
    Signal(String),
    /// Cancellation was requested through the supervisor
    Requested,
    /// The session task ended on its own
    TaskExited,
}

/// How session cleanup finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CleanupOutcome {
    Completed,
    /// Cleanup exceeded the timeout and was abandoned
    TimedOut,
    /// The session task panicked
    Failed,
}

/// Summary returned when a session has fully stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub reason: ShutdownReason,
    pub cleanup: CleanupOutcome,
}

struct ActiveSession {
    id: Uuid,
    cancel: CancellationToken,
}

/// Session slot and state channel, shared with cleanup that outlives `run`
struct SessionSlot {
    active: Mutex<Option<ActiveSession>>,
    state: watch::Sender<SessionState>,
}

impl SessionSlot {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Free the slot held by `id` and publish `state`
    fn release(&self, id: Uuid, state: SessionState) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|session| session.id == id) {
            *active = None;
            self.state.send_replace(state);
        }
    }
}

/// Supervises a single tunnel session at a time
pub struct SessionSupervisor {
    engines: Engines,
    options: SupervisorOptions,
    slot: Arc<SessionSlot>,
}

/// Holds the session slot from reservation until cleanup has finished.
///
/// If dropped while the session task is still cleaning up (the `run` future
/// was dropped), the slot stays claimed until that task ends or the cleanup
/// timeout elapses.
struct SessionGuard {
    slot: Arc<SessionSlot>,
    id: Uuid,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    /// State to restore when no session was launched
    unlaunched: Option<SessionState>,
    cleanup_timeout: Duration,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();

        let pending = self.task.take().filter(|task| !task.is_finished());
        let Some(mut task) = pending else {
            let state = self.unlaunched.unwrap_or(SessionState::Stopped);
            self.slot.release(self.id, state);
            return;
        };

        match Handle::try_current() {
            Ok(runtime) => {
                self.slot.state.send_replace(SessionState::ShuttingDown);
                let slot = Arc::clone(&self.slot);
                let id = self.id;
                let timeout = self.cleanup_timeout;
                runtime.spawn(async move {
                    if tokio::time::timeout(timeout, &mut task).await.is_err() {
                        error!(session = %id, "Detached session cleanup did not finish within {:?}", timeout);
                        task.abort();
                    }
                    debug!(session = %id, "Detached session cleanup done");
                    slot.release(id, SessionState::Stopped);
                });
            }
            Err(_) => {
                task.abort();
                self.slot.release(self.id, SessionState::Stopped);
            }
        }
    }
}

/// A claimed session slot that has not started yet.
///
/// Obtained from [`SessionSupervisor::reserve`]; dropping it frees the slot.
pub struct Reservation<'a> {
    supervisor: &'a SessionSupervisor,
    guard: SessionGuard,
}

impl Reservation<'_> {
    pub fn session_id(&self) -> Uuid {
        self.guard.id
    }

    /// Run the reserved session; see [`SessionSupervisor::run`]
    pub async fn run(self, config: Configuration, tun_fd: i32) -> TunwarpResult<SessionReport> {
        let Reservation { supervisor, mut guard } = self;
        guard.unlaunched = None;
        supervisor.supervise(&mut guard, config, tun_fd).await
    }
}

impl SessionSupervisor {
    /// Create a supervisor driving `engines`
    pub fn new(engines: Engines, options: SupervisorOptions) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            engines,
            options,
            slot: Arc::new(SessionSlot {
                active: Mutex::new(None),
                state,
            }),
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.slot.state.borrow()
    }

    /// Watch session state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.slot.state.subscribe()
    }

    /// Id of the live session, if any
    pub fn session_id(&self) -> Option<Uuid> {
        self.slot.lock_active().as_ref().map(|session| session.id)
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Run a session until it is signalled or cancelled, then clean up.
    ///
    /// Fails with [`TunwarpError::AlreadyRunning`] while another session is
    /// live. On return the forwarding engine has been stopped, unless cleanup
    /// timed out (reported as [`CleanupOutcome::TimedOut`]).
    pub async fn run(&self, config: Configuration, tun_fd: i32) -> TunwarpResult<SessionReport> {
        self.reserve()?.run(config, tun_fd).await
    }

    /// Claim the session slot without starting anything.
    ///
    /// Lets a caller prepare process-wide state (working directory) only
    /// once it owns the slot.
    pub fn reserve(&self) -> TunwarpResult<Reservation<'_>> {
        let mut active = self.slot.lock_active();
        if let Some(session) = active.as_ref() {
            warn!(session = %session.id, "Rejecting start: a session is already running");
            return Err(TunwarpError::AlreadyRunning(session.id.to_string()));
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        *active = Some(ActiveSession {
            id,
            cancel: cancel.clone(),
        });
        let previous = self.slot.state.send_replace(SessionState::Starting);

        Ok(Reservation {
            supervisor: self,
            guard: SessionGuard {
                slot: Arc::clone(&self.slot),
                id,
                cancel,
                task: None,
                unlaunched: Some(previous),
                cleanup_timeout: self.options.cleanup_timeout(),
            },
        })
    }

    async fn supervise(
        &self,
        guard: &mut SessionGuard,
        config: Configuration,
        tun_fd: i32,
    ) -> TunwarpResult<SessionReport> {
        let session_id = guard.id;
        let cancel = guard.cancel.clone();

        let mut signals = if self.options.handle_signals {
            Some(ShutdownSignals::register()?)
        } else {
            None
        };

        let config = Arc::new(config);
        info!(
            session = %session_id,
            bind = %config.bind_address,
            endpoint = %config.endpoint,
            "Starting tunnel session"
        );

        let task = guard.task.insert(tokio::spawn(run_session(
            self.engines.clone(),
            config,
            tun_fd,
            cancel.clone(),
        )));
        self.slot.state.send_replace(SessionState::Running);

        let mut finished = None;
        let reason = tokio::select! {
            name = wait_for_signal(signals.as_mut()) => {
                info!(session = %session_id, "Received {}, shutting down session", name);
                ShutdownReason::Signal(name.to_string())
            }
            _ = cancel.cancelled() => {
                debug!(session = %session_id, "Session cancellation requested");
                ShutdownReason::Requested
            }
            joined = &mut *task => {
                warn!(session = %session_id, "Session task exited before cancellation");
                finished = Some(joined);
                ShutdownReason::TaskExited
            }
        };

        cancel.cancel();
        self.slot.state.send_replace(SessionState::ShuttingDown);

        let timeout = self.options.cleanup_timeout();
        let cleanup = match finished {
            Some(joined) => cleanup_outcome(joined),
            None => match tokio::time::timeout(timeout, &mut *task).await {
                Ok(joined) => cleanup_outcome(joined),
                Err(_) => {
                    error!(
                        session = %session_id,
                        "Session cleanup did not finish within {:?}, abandoning it",
                        timeout
                    );
                    task.abort();
                    CleanupOutcome::TimedOut
                }
            },
        };
        guard.task = None;

        info!(session = %session_id, "Session shut down");
        Ok(SessionReport {
            session_id,
            reason,
            cleanup,
        })
    }

    /// Request cancellation of the live session.
    ///
    /// Returns `false` when no session is active. Never waits and never ends
    /// the process.
    pub fn shutdown(&self) -> bool {
        match self.slot.lock_active().as_ref() {
            Some(session) => {
                info!(session = %session.id, "Shutdown requested");
                session.cancel.cancel();
                true
            }
            None => {
                debug!("Shutdown requested with no active session");
                false
            }
        }
    }

    /// Request cancellation and wait until the session has stopped
    pub async fn shutdown_and_wait(&self) {
        if !self.shutdown() {
            return;
        }
        let mut state = self.subscribe();
        let _ = state.wait_for(|state| !state.is_active()).await;
    }
}

fn cleanup_outcome(joined: Result<(), JoinError>) -> CleanupOutcome {
    match joined {
        Ok(()) => CleanupOutcome::Completed,
        Err(e) => {
            error!("Session task failed: {}", e);
            CleanupOutcome::Failed
        }
    }
}

/// Body of the session task
async fn run_session(
    engines: Engines,
    config: Arc<Configuration>,
    tun_fd: i32,
    cancel: CancellationToken,
) {
    let tunnel = {
        let engine = Arc::clone(&engines.tunnel);
        let config = Arc::clone(&config);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run(config, cancel).await {
                error!("Tunnel engine failed: {}", e);
            }
        })
    };

    let options = ForwardingOptions::for_session(&config, tun_fd);
    let forwarding = Arc::clone(&engines.forwarding);
    match tokio::task::spawn_blocking(move || forwarding.start(&options)).await {
        Ok(Ok(())) => info!("Forwarding engine started on fd {}", tun_fd),
        Ok(Err(e)) => error!("Forwarding engine failed to start: {}", e),
        Err(e) => error!("Forwarding engine start panicked: {}", e),
    }

    cancel.cancelled().await;

    let forwarding = Arc::clone(&engines.forwarding);
    match tokio::task::spawn_blocking(move || forwarding.stop()).await {
        Ok(Ok(())) => debug!("Forwarding engine stopped"),
        Ok(Err(e)) => error!("Failed to stop forwarding engine: {}", e),
        Err(e) => error!("Forwarding engine stop panicked: {}", e),
    }

    if let Err(e) = tunnel.await {
        error!("Tunnel engine task failed: {}", e);
    }
    info!("Cleanup done, exiting session task");
}

async fn wait_for_signal(signals: Option<&mut ShutdownSignals>) -> &'static str {
    match signals {
        Some(signals) => signals.recv().await,
        None => std::future::pending().await,
    }
}

/// Registered SIGINT/SIGTERM listeners
#[cfg(unix)]
struct ShutdownSignals {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn register() -> TunwarpResult<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let terminate = signal(SignalKind::terminate())
            .map_err(|e| TunwarpError::SignalSetup(format!("Failed to register SIGTERM handler: {}", e)))?;
        let interrupt = signal(SignalKind::interrupt())
            .map_err(|e| TunwarpError::SignalSetup(format!("Failed to register SIGINT handler: {}", e)))?;

        Ok(Self { terminate, interrupt })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }
}

#[cfg(not(unix))]
struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    fn register() -> TunwarpResult<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        // On non-Unix platforms, just wait for Ctrl+C
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Ctrl+C",
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending().await
            }
        }
    }
}
