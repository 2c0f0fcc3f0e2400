//! Process-wide host API
//!
//! The three calls an embedding application uses: [`start`] (blocks until
//! the session has stopped), [`shutdown`] and [`get_log_messages`]. They act
//! on a single [`SessionHost`], created on first use with idle engines unless
//! [`install`] supplied engines and options before that.
//!
//! `start` builds its own Tokio runtime, so none of these calls may be made
//! from inside an async context.

use std::path::Path;
use std::sync::OnceLock;

use crate::engine::Engines;
use crate::error::{TunwarpError, TunwarpResult};
use crate::host::{SessionHost, StartRequest};
use crate::options::HostOptions;
use crate::supervisor::{SessionReport, SessionState};

static HOST: OnceLock<SessionHost> = OnceLock::new();

fn host() -> &'static SessionHost {
    HOST.get_or_init(|| SessionHost::new(Engines::default(), HostOptions::default()))
}

/// Configure the process-wide host. Must run before any other call.
pub fn install(engines: Engines, options: HostOptions) -> TunwarpResult<()> {
    HOST.set(SessionHost::new(engines, options))
        .map_err(|_| TunwarpError::ConfigError("Session host already initialized".to_string()))
}

/// Start a session and block until it has fully stopped
pub fn start(arg_str: &str, working_dir: impl AsRef<Path>, tun_fd: i32) -> TunwarpResult<SessionReport> {
    let host = host();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tunwarp-worker")
        .build()?;

    let request = StartRequest {
        args: arg_str.to_string(),
        working_dir: working_dir.as_ref().to_path_buf(),
        tun_fd,
    };
    let result = runtime.block_on(host.start(request));

    // Engine calls abandoned after a cleanup timeout must not hold the caller
    runtime.shutdown_timeout(host.supervisor().options().cleanup_timeout());
    result
}

/// Stop the running session and wait until it has stopped; no-op when idle
pub fn shutdown() {
    futures::executor::block_on(host().shutdown_and_wait());
}

/// Return and clear all buffered log text
pub fn get_log_messages() -> String {
    host().log_messages()
}

/// Current state of the process-wide session
pub fn state() -> SessionState {
    host().supervisor().state()
}
