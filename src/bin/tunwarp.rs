//! Tunnel session runner (tunwarp)
//!
//! Terminal host for a supervised tunnel session. Log output is buffered in
//! the library's log sink and drained to the terminal at a fixed interval.
//!
//! # Usage
//!
//! ```bash
//! # Validate an argument string and print the resolved configuration
//! tunwarp --check --args "-b 0.0.0.0:8086 -e 162.159.192.1:2408 --gool"
//!
//! # Run a session on an open TUN fd until SIGINT/SIGTERM
//! tunwarp --args "-v -scan -rtt 800" --tun-fd 3
//!
//! # Keep stdout/stderr attached (no capture)
//! tunwarp --args "-v" --no-capture
//! ```

use anyhow::Context;
use clap::Parser;
use libtunwarp::capture;
use libtunwarp::engine::Engines;
use libtunwarp::{Configuration, HostOptions, SessionHost, StartRequest, TunwarpError};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exit code for invalid arguments and other startup failures
const EXIT_STARTUP: u8 = 2;

/// Tunnel session runner
#[derive(Parser, Debug)]
#[command(name = "tunwarp")]
#[command(version)]
#[command(about = "Run a supervised WireGuard-over-SOCKS tunnel session", long_about = None)]
struct Args {
    /// Session argument string, e.g. "-b 127.0.0.1:8086 -e 162.159.192.1:2408"
    #[arg(short, long, default_value = "", allow_hyphen_values = true)]
    args: String,

    /// Working directory for the session
    #[arg(short, long, default_value = ".")]
    workdir: PathBuf,

    /// File descriptor of an already open TUN device
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    tun_fd: i32,

    /// Host options file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cleanup timeout in milliseconds (overrides the options file)
    #[arg(long)]
    cleanup_timeout: Option<u64>,

    /// Keep stdout/stderr attached instead of capturing them
    #[arg(long)]
    no_capture: bool,

    /// Validate the argument string, print the resolved configuration and exit
    #[arg(long)]
    check: bool,

    /// Interval between log drains in milliseconds
    #[arg(long, default_value_t = 250)]
    log_interval: u64,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    // Resolve before any capture so argument errors reach the terminal
    let config = match Configuration::from_args(&args.args) {
        Ok(config) => config,
        Err(TunwarpError::HelpRequested(usage)) => {
            print!("{}", usage);
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(ExitCode::from(EXIT_STARTUP));
        }
    };

    if args.check {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    let mut options = match &args.config {
        Some(path) => HostOptions::load(path)
            .with_context(|| format!("Failed to load options from {:?}", path))?,
        None => HostOptions::default(),
    };
    if let Some(ms) = args.cleanup_timeout {
        options.supervisor.cleanup_timeout_ms = ms;
    }
    if args.no_capture {
        options.capture_stdio = false;
    }

    let host = Arc::new(SessionHost::new(Engines::default(), options));

    // Capture here rather than in the host so the original stderr stays ours
    let console: Box<dyn Write + Send> = if host.options().capture_stdio {
        match capture::capture_stdio(host.sink())? {
            Some(stderr) => Box::new(stderr),
            None => Box::new(io::stderr()),
        }
    } else {
        Box::new(io::stderr())
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tunwarp-worker")
        .build()
        .context("Failed to build Tokio runtime")?;

    let request = StartRequest {
        args: args.args.clone(),
        working_dir: args.workdir.clone(),
        tun_fd: args.tun_fd,
    };
    let interval = Duration::from_millis(args.log_interval.max(1));

    let (result, mut console) = runtime.block_on(async {
        let stop = CancellationToken::new();
        let pump = tokio::spawn(pump_logs(Arc::clone(&host), interval, console, stop.clone()));

        let result = host.start(request).await;

        stop.cancel();
        let console = pump.await.context("Log pump failed")?;
        Ok::<_, anyhow::Error>((result, console))
    })?;

    runtime.shutdown_timeout(host.supervisor().options().cleanup_timeout());

    match result {
        Ok(report) => {
            writeln!(
                console,
                "Session {} stopped ({:?}, cleanup {:?})",
                report.session_id, report.reason, report.cleanup
            )?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            writeln!(console, "Error: {}", e)?;
            let code = if e.is_startup_fatal() { EXIT_STARTUP } else { 1 };
            Ok(ExitCode::from(code))
        }
    }
}

/// Drain the log sink to `console` until `stop` fires, then once more
async fn pump_logs(
    host: Arc<SessionHost>,
    interval: Duration,
    mut console: Box<dyn Write + Send>,
    stop: CancellationToken,
) -> Box<dyn Write + Send> {
    loop {
        let done = tokio::select! {
            _ = stop.cancelled() => true,
            _ = tokio::time::sleep(interval) => false,
        };

        let logs = host.log_messages();
        if !logs.is_empty() {
            let _ = writeln!(console, "{}", logs);
            let _ = console.flush();
        }

        if done {
            return console;
        }
    }
}
