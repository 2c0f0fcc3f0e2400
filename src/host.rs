//! Host-facing session context
//!
//! A [`SessionHost`] bundles the log sink, the supervisor and the host
//! options, and performs the start sequence: capture logs, enter the working
//! directory, resolve the argument string, then supervise the session.

use std::path::PathBuf;
use tracing::{debug, error, info};

use crate::capture;
use crate::config::Configuration;
use crate::engine::Engines;
use crate::error::{TunwarpError, TunwarpResult};
use crate::log_sink::LogSink;
use crate::logging;
use crate::options::HostOptions;
use crate::supervisor::{SessionReport, SessionSupervisor};

/// Parameters of a session start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    /// Argument string, e.g. `-b 127.0.0.1:8086 --gool`
    pub args: String,
    /// Directory the process changes into before starting
    pub working_dir: PathBuf,
    /// File descriptor of the TUN device
    pub tun_fd: i32,
}

pub struct SessionHost {
    sink: LogSink,
    supervisor: SessionSupervisor,
    options: HostOptions,
}

impl SessionHost {
    /// Create a host with a fresh log sink
    pub fn new(engines: Engines, options: HostOptions) -> Self {
        Self::with_sink(engines, options, LogSink::new())
    }

    pub fn with_sink(engines: Engines, options: HostOptions, sink: LogSink) -> Self {
        let supervisor = SessionSupervisor::new(engines, options.supervisor.clone());
        Self {
            sink,
            supervisor,
            options,
        }
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    /// Drain buffered log text
    pub fn log_messages(&self) -> String {
        self.sink.drain()
    }

    /// Request cancellation of the running session, if any
    pub fn shutdown(&self) -> bool {
        self.supervisor.shutdown()
    }

    /// Request cancellation and wait for the session to stop
    pub async fn shutdown_and_wait(&self) {
        self.supervisor.shutdown_and_wait().await
    }

    /// Start a session and block until it has fully stopped.
    ///
    /// Startup failures are logged to the sink and returned; no engine is
    /// touched in that case.
    pub async fn start(&self, request: StartRequest) -> TunwarpResult<SessionReport> {
        let result = self.launch(request).await;
        if let Err(e) = &result {
            error!("Session start failed: {}", e);
        }
        result
    }

    async fn launch(&self, request: StartRequest) -> TunwarpResult<SessionReport> {
        if self.options.install_logger {
            logging::install(&self.sink, false)?;
        }

        if self.options.capture_stdio {
            // Only the first caller in the process receives the original stderr
            let _ = capture::capture_stdio(&self.sink)?;
        }

        // The working directory is process-wide; claim the session before
        // touching it
        let reservation = self.supervisor.reserve()?;

        std::env::set_current_dir(&request.working_dir).map_err(|source| {
            TunwarpError::WorkingDirectory {
                path: request.working_dir.clone(),
                source,
            }
        })?;
        debug!("Working directory set to {:?}", request.working_dir);

        let config = Configuration::from_args(&request.args)?;
        if self.options.install_logger {
            logging::set_verbose(config.verbose)?;
        }
        info!(
            bind = %config.bind_address,
            endpoint = %config.endpoint,
            country = %config.country_code,
            psiphon = config.psiphon_enabled,
            gool = config.gool,
            scan = config.scan_enabled,
            rtt_ms = config.rtt_threshold_ms,
            "Configuration resolved"
        );

        reservation.run(config, request.tun_fd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{MockForwardingEngine, MockTunnelEngine};
    use crate::engine::idle::{IdleForwardingEngine, IdleTunnelEngine};
    use crate::options::SupervisorOptions;
    use crate::supervisor::{CleanupOutcome, SessionState};
    use serial_test::serial;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn test_options() -> HostOptions {
        HostOptions {
            supervisor: SupervisorOptions {
                cleanup_timeout_ms: 2000,
                handle_signals: false,
            },
            capture_stdio: false,
            install_logger: false,
        }
    }

    fn untouched_engines() -> Engines {
        // Mocks without expectations panic on any call
        Engines::new(MockTunnelEngine::new(), MockForwardingEngine::new())
    }

    fn request(args: &str) -> StartRequest {
        StartRequest {
            args: args.to_string(),
            working_dir: std::env::current_dir().unwrap(),
            tun_fd: 5,
        }
    }

    async fn wait_running(host: &SessionHost) {
        let mut state = host.supervisor().subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == SessionState::Running),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn test_unknown_flag_never_reaches_engines() {
        let host = SessionHost::new(untouched_engines(), test_options());
        let _guard = tracing::subscriber::set_default(logging::subscriber(host.sink(), false));

        let err = host.start(request("-v -bogus")).await.unwrap_err();
        assert!(matches!(err, TunwarpError::UnknownFlag(ref name) if name == "bogus"));
        assert_eq!(host.supervisor().state(), SessionState::Idle);
        assert!(host.log_messages().contains("Session start failed: Unknown flag: -bogus"));
    }

    #[tokio::test]
    #[serial]
    async fn test_invalid_rtt_never_reaches_engines() {
        let host = SessionHost::new(untouched_engines(), test_options());

        let err = host.start(request("-rtt abc")).await.unwrap_err();
        assert!(matches!(err, TunwarpError::InvalidValue { ref flag, .. } if flag == "rtt"));
        assert!(err.is_startup_fatal());
        assert_eq!(host.supervisor().state(), SessionState::Idle);
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_working_directory() {
        let dir = TempDir::new().unwrap();
        let host = SessionHost::new(untouched_engines(), test_options());

        let mut req = request("");
        req.working_dir = dir.path().join("does-not-exist");

        let err = host.start(req).await.unwrap_err();
        assert!(matches!(err, TunwarpError::WorkingDirectory { .. }));
    }

    #[tokio::test]
    #[serial]
    async fn test_session_runs_in_working_directory() {
        let original = std::env::current_dir().unwrap();
        let dir = TempDir::new().unwrap();

        let forwarding = Arc::new(IdleForwardingEngine::default());
        let engines = Engines {
            tunnel: Arc::new(IdleTunnelEngine),
            forwarding: forwarding.clone(),
        };
        let host = Arc::new(SessionHost::new(engines, test_options()));

        let mut req = request("-b 0.0.0.0:9090 -scan");
        req.working_dir = dir.path().to_path_buf();

        let runner = tokio::spawn({
            let host = Arc::clone(&host);
            async move { host.start(req).await }
        });
        wait_running(&host).await;

        let cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(&original).unwrap();
        assert_eq!(cwd.canonicalize().unwrap(), dir.path().canonicalize().unwrap());

        host.shutdown_and_wait().await;
        let report = runner.await.unwrap().unwrap();

        assert_eq!(report.cleanup, CleanupOutcome::Completed);
        assert_eq!(forwarding.start_count(), 1);
        assert_eq!(forwarding.stop_count(), 1);
        assert!(!forwarding.is_running());
    }

    #[tokio::test]
    #[serial]
    async fn test_start_while_running_is_rejected() {
        let original = std::env::current_dir().unwrap();
        let other = TempDir::new().unwrap();
        let host = Arc::new(SessionHost::new(Engines::default(), test_options()));

        let runner = tokio::spawn({
            let host = Arc::clone(&host);
            async move { host.start(request("")).await }
        });
        wait_running(&host).await;

        let mut second = request("-v");
        second.working_dir = other.path().to_path_buf();
        let err = host.start(second).await.unwrap_err();
        assert!(matches!(err, TunwarpError::AlreadyRunning(_)));
        assert_eq!(std::env::current_dir().unwrap(), original);
        assert_eq!(host.supervisor().state(), SessionState::Running);

        assert!(host.shutdown());
        assert!(runner.await.unwrap().is_ok());
    }

    #[tokio::test]
    #[serial]
    async fn test_engines_receive_resolved_configuration() {
        let seen: Arc<Mutex<Option<Configuration>>> = Arc::new(Mutex::new(None));

        let mut tunnel = MockTunnelEngine::new();
        let captured = Arc::clone(&seen);
        tunnel
            .expect_run()
            .times(1)
            .withf(|_, cancel: &CancellationToken| !cancel.is_cancelled())
            .returning(move |config, _| {
                *captured.lock().unwrap() = Some((*config).clone());
                Ok(())
            });

        let mut forwarding = MockForwardingEngine::new();
        forwarding
            .expect_start()
            .times(1)
            .withf(|options| options.tun_fd == 5 && options.socks_server == "127.0.0.1:9000")
            .returning(|_| Ok(()));
        forwarding.expect_stop().times(1).returning(|| Ok(()));

        let host = Arc::new(SessionHost::new(Engines::new(tunnel, forwarding), test_options()));
        let runner = tokio::spawn({
            let host = Arc::clone(&host);
            async move {
                host.start(request(
                    "-b 0.0.0.0:9000 -e 162.159.192.1:2408 -k x -country DE -cfon -gool -scan -rtt 250",
                ))
                .await
            }
        });
        wait_running(&host).await;
        host.shutdown_and_wait().await;
        let report = runner.await.unwrap().unwrap();
        assert_eq!(report.cleanup, CleanupOutcome::Completed);

        let config = seen.lock().unwrap().take().expect("tunnel engine was not started");
        assert_eq!(
            config,
            Configuration {
                verbose: false,
                bind_address: "0.0.0.0:9000".to_string(),
                endpoint: "162.159.192.1:2408".to_string(),
                license_key: "x".to_string(),
                country_code: "DE".to_string(),
                psiphon_enabled: true,
                gool: true,
                scan_enabled: true,
                rtt_threshold_ms: 250,
            }
        );
    }
}
