use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Configuration;
use crate::error::TunwarpResult;
use super::idle::{IdleForwardingEngine, IdleTunnelEngine};

/// Address block used to synthesize placeholder destinations for DNS routing
pub const FAKE_IP_RANGE: &str = "24.0.0.0/8";

/// MTU value asking the forwarding engine to pick one itself
pub const MTU_AUTO: u32 = 0;

/// Options handed to the forwarding engine at session start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingOptions {
    /// File descriptor of the TUN device, owned by the host
    pub tun_fd: i32,
    /// SOCKS5 server the forwarded connections are sent to
    pub socks_server: String,
    pub fake_ip_range: String,
    pub mtu: u32,
    pub enable_ipv6: bool,
    /// Forward traffic destined to the local network too
    pub allow_lan: bool,
}

impl ForwardingOptions {
    /// Fixed forwarding options for a session
    pub fn for_session(config: &Configuration, tun_fd: i32) -> Self {
        Self {
            tun_fd,
            socks_server: config.socks_server_address(),
            fake_ip_range: FAKE_IP_RANGE.to_string(),
            mtu: MTU_AUTO,
            enable_ipv6: true,
            allow_lan: true,
        }
    }
}

/// The tunnel engine (WireGuard client with optional scanning and fallback
/// transports) serving SOCKS on the configured bind address
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TunnelEngine: Send + Sync {
    /// Run until `cancel` fires. Errors are logged by the supervisor and do
    /// not end the session.
    async fn run(&self, config: Arc<Configuration>, cancel: CancellationToken) -> TunwarpResult<()>;
}

/// The TUN-to-SOCKS packet forwarding engine
#[cfg_attr(test, mockall::automock)]
pub trait ForwardingEngine: Send + Sync {
    /// Start forwarding; may block while the engine initializes
    fn start(&self, options: &ForwardingOptions) -> TunwarpResult<()>;

    /// Stop forwarding and release the TUN association
    fn stop(&self) -> TunwarpResult<()>;
}

/// The pair of engines a session drives
#[derive(Clone)]
pub struct Engines {
    pub tunnel: Arc<dyn TunnelEngine>,
    pub forwarding: Arc<dyn ForwardingEngine>,
}

impl Engines {
    pub fn new(
        tunnel: impl TunnelEngine + 'static,
        forwarding: impl ForwardingEngine + 'static,
    ) -> Self {
        Self {
            tunnel: Arc::new(tunnel),
            forwarding: Arc::new(forwarding),
        }
    }
}

impl Default for Engines {
    /// Idle engines, used when no native engine is linked
    fn default() -> Self {
        Self::new(IdleTunnelEngine, IdleForwardingEngine::default())
    }
}

impl fmt::Debug for Engines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engines").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarding_options_for_session() {
        let config = Configuration::from_args("-b 0.0.0.0:9000").unwrap();
        let options = ForwardingOptions::for_session(&config, 42);

        assert_eq!(options.tun_fd, 42);
        assert_eq!(options.socks_server, "127.0.0.1:9000");
        assert_eq!(options.fake_ip_range, "24.0.0.0/8");
        assert_eq!(options.mtu, MTU_AUTO);
        assert!(options.enable_ipv6);
        assert!(options.allow_lan);
    }
}
