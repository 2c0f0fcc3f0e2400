//! tunwarp - Tunnel Session Library
//!
//! Lifecycle shim for a WireGuard-over-SOCKS tunnel on a TUN device:
//! - Argument string tokenizing and configuration resolution
//! - In-memory log capture (structured logs and raw stdout/stderr)
//! - Supervision of the tunnel and forwarding engines
//! - Graceful shutdown on signal or host request, with bounded cleanup
//!
//! Embedding applications use the [`api`] module (`start`, `shutdown`,
//! `get_log_messages`) or drive a [`SessionHost`] directly.

pub mod error;
pub mod args;
pub mod validation;
pub mod config;
pub mod options;
pub mod log_sink;
pub mod logging;
pub mod capture;
pub mod engine;
pub mod supervisor;
pub mod host;
pub mod api;

// Re-export commonly used types
pub use error::{TunwarpError, TunwarpResult};
pub use args::{tokenize, Token};
pub use config::{resolve, usage, Configuration};
pub use options::{HostOptions, SupervisorOptions};
pub use log_sink::LogSink;
pub use engine::{Engines, ForwardingEngine, ForwardingOptions, TunnelEngine};
pub use supervisor::{
    CleanupOutcome, Reservation, SessionReport, SessionState, SessionSupervisor,
    ShutdownReason,
};
pub use host::{SessionHost, StartRequest};
