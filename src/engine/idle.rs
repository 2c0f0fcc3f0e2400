//! Idle engines
//!
//! Stand-ins used when no native tunnel or forwarding engine is linked into
//! the process. They keep the session lifecycle intact (start, wait, stop)
//! without carrying traffic.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Configuration;
use crate::error::{TunwarpError, TunwarpResult};
use super::backend::{ForwardingEngine, ForwardingOptions, TunnelEngine};

/// Tunnel engine that holds the session open until cancelled
#[derive(Debug, Clone, Copy, Default)]
pub struct IdleTunnelEngine;

#[async_trait]
impl TunnelEngine for IdleTunnelEngine {
    async fn run(&self, config: Arc<Configuration>, cancel: CancellationToken) -> TunwarpResult<()> {
        info!(
            bind = %config.bind_address,
            endpoint = %config.endpoint,
            scan = config.scan_enabled,
            "Idle tunnel engine started"
        );
        cancel.cancelled().await;
        info!("Idle tunnel engine stopped");
        Ok(())
    }
}

/// Forwarding engine that tracks start/stop calls without a TUN device
#[derive(Debug, Default)]
pub struct IdleForwardingEngine {
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl IdleForwardingEngine {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl ForwardingEngine for IdleForwardingEngine {
    fn start(&self, options: &ForwardingOptions) -> TunwarpResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TunwarpError::Engine("Forwarding already started".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        info!(
            tun_fd = options.tun_fd,
            socks = %options.socks_server,
            "Idle forwarding engine started"
        );
        debug!("Forwarding options: {:?}", options);
        Ok(())
    }

    fn stop(&self) -> TunwarpResult<()> {
        self.running.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
        info!("Idle forwarding engine stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_idle_tunnel_waits_for_cancel() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                IdleTunnelEngine
                    .run(Arc::new(Configuration::default()), cancel)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[test]
    fn test_idle_tunnel_returns_when_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio_test::block_on(
            IdleTunnelEngine.run(Arc::new(Configuration::default()), cancel),
        );
        tokio_test::assert_ok!(result);
    }

    #[test]
    fn test_idle_forwarding_counts_calls() {
        let engine = IdleForwardingEngine::default();
        let options = ForwardingOptions::for_session(&Configuration::default(), 7);

        assert!(!engine.is_running());
        engine.start(&options).unwrap();
        assert!(engine.is_running());
        assert!(engine.start(&options).is_err());

        engine.stop().unwrap();
        assert!(!engine.is_running());
        assert_eq!(engine.start_count(), 1);
        assert_eq!(engine.stop_count(), 1);
    }
}
