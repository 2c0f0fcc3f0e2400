//! Engine seams for the tunnel session
//!
//! A session drives two external collaborators:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │         Session Supervisor          │
//! └──────────────┬──────────────────────┘
//!                │
//!        ┌───────┴────────┐
//!        │                │
//!        ▼                ▼
//! ┌────────────┐   ┌─────────────┐
//! │   Tunnel   │   │ Forwarding  │   <- external engines
//! │ (WireGuard)│   │ (TUN→SOCKS) │
//! └────────────┘   └─────────────┘
//! ```
//!
//! The tunnel engine runs asynchronously until its cancellation token fires
//! and exposes a SOCKS server on the bind address. The forwarding engine is
//! started and stopped synchronously and moves packets between the TUN
//! device and that SOCKS server.
//!
//! # Usage
//!
//! ```rust,no_run
//! use libtunwarp::engine::{Engines, idle::{IdleTunnelEngine, IdleForwardingEngine}};
//!
//! let engines = Engines::new(IdleTunnelEngine, IdleForwardingEngine::default());
//! ```

pub mod backend;
pub mod idle;

pub use backend::{
    Engines, ForwardingEngine, ForwardingOptions, TunnelEngine, FAKE_IP_RANGE, MTU_AUTO,
};
