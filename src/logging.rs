//! Routing of `tracing` output into the log sink

use std::sync::OnceLock;
use tracing::{warn, Subscriber};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use crate::error::{TunwarpError, TunwarpResult};
use crate::log_sink::LogSink;

/// Reload handle of the process-wide filter, set by the first [`install`]
static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn filter_for(verbose: bool) -> EnvFilter {
    EnvFilter::new(if verbose { "debug" } else { "info" })
}

/// Build a subscriber writing into `sink`, for scoped use with
/// [`tracing::subscriber::set_default`]
pub fn subscriber(sink: &LogSink, verbose: bool) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry()
        .with(filter_for(verbose))
        .with(
            fmt::layer()
                .with_writer(sink.clone())
                .with_ansi(false)
                .with_target(false),
        )
}

/// Install the process-wide subscriber writing into `sink`.
///
/// Only the first call installs; later calls only switch verbosity. If the
/// host already installed its own global subscriber, logs keep going there.
pub fn install(sink: &LogSink, verbose: bool) -> TunwarpResult<()> {
    if FILTER_HANDLE.get().is_some() {
        return set_verbose(verbose);
    }

    let (filter, handle) = reload::Layer::new(filter_for(verbose));
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(sink.clone())
                .with_ansi(false)
                .with_target(false),
        )
        .try_init();

    match result {
        Ok(()) => {
            let _ = FILTER_HANDLE.set(handle);
        }
        Err(e) => warn!("Global subscriber already set, log sink not installed: {}", e),
    }
    Ok(())
}

/// Switch the installed subscriber between `info` and `debug`
pub fn set_verbose(verbose: bool) -> TunwarpResult<()> {
    if let Some(handle) = FILTER_HANDLE.get() {
        handle
            .reload(filter_for(verbose))
            .map_err(|e| TunwarpError::LogCapture(format!("Failed to update log filter: {}", e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tracing::{debug, info};

    #[test]
    fn test_scoped_subscriber_writes_to_sink() {
        let sink = LogSink::new();
        {
            let _guard = tracing::subscriber::set_default(subscriber(&sink, false));
            info!("tunnel ready");
            debug!("hidden detail");
        }

        let logs = sink.drain();
        assert!(logs.contains("tunnel ready"));
        assert!(!logs.contains("hidden detail"));
        assert!(!logs.contains('\u{1b}'), "output must be free of ANSI escapes");
    }

    #[test]
    fn test_verbose_subscriber_keeps_debug() {
        let sink = LogSink::new();
        {
            let _guard = tracing::subscriber::set_default(subscriber(&sink, true));
            debug!("handshake detail");
        }
        assert!(sink.drain().contains("handshake detail"));
    }

    #[test]
    #[serial]
    fn test_install_is_repeatable() {
        let sink = LogSink::new();
        assert!(install(&sink, false).is_ok());
        assert!(install(&sink, true).is_ok());
        assert!(set_verbose(false).is_ok());
    }
}
