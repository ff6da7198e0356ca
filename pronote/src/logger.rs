use std::sync::Arc;

/// Sink for protocol-level traces (one call per envelope, handshake stage or refresh)
pub trait ProtocolLogger: Send + Sync {
    fn exchange(&self, function: &str, counter: u64, compressed: bool, encrypted: bool);
    fn handshake(&self, stage: &str);
    fn refresh(&self, reason: &str);
}

/// Drops every trace
struct NullLogger;

impl ProtocolLogger for NullLogger {
    fn exchange(&self, _function: &str, _counter: u64, _compressed: bool, _encrypted: bool) {}
    fn handshake(&self, _stage: &str) {}
    fn refresh(&self, _reason: &str) {}
}

/// Tracing integration logger
struct TracingLogger;

impl ProtocolLogger for TracingLogger {
    fn exchange(&self, function: &str, counter: u64, compressed: bool, encrypted: bool) {
        tracing::debug!(
            function,
            counter,
            compressed,
            encrypted,
            "Sending envelope"
        );
    }

    fn handshake(&self, stage: &str) {
        tracing::info!("Login handshake: {}", stage);
    }

    fn refresh(&self, reason: &str) {
        tracing::info!("Have you tried turning it off and on again? {}", reason);
    }
}

/// Shared handle to the configured protocol logger
#[derive(Clone)]
pub struct LoggerHandle {
    logger: Arc<dyn ProtocolLogger>,
}

impl LoggerHandle {
    pub fn null() -> Self {
        LoggerHandle {
            logger: Arc::new(NullLogger),
        }
    }

    pub fn tracing() -> Self {
        LoggerHandle {
            logger: Arc::new(TracingLogger),
        }
    }

    pub fn custom(logger: Arc<dyn ProtocolLogger>) -> Self {
        LoggerHandle { logger }
    }

    pub(crate) fn exchange(&self, function: &str, counter: u64, compressed: bool, encrypted: bool) {
        self.logger.exchange(function, counter, compressed, encrypted);
    }

    pub(crate) fn handshake(&self, stage: &str) {
        self.logger.handshake(stage);
    }

    pub(crate) fn refresh(&self, reason: &str) {
        self.logger.refresh(reason);
    }
}

impl Default for LoggerHandle {
    fn default() -> Self {
        Self::tracing()
    }
}

impl std::fmt::Debug for LoggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LoggerHandle")
    }
}

/// Handshake trace with format arguments
macro_rules! lhandshake {
    ($logger:expr, $($arg:tt)*) => {
        $logger.handshake(&format!($($arg)*))
    };
}

pub(crate) use lhandshake;

/// First 30 characters of an identifier or token, for log lines
pub(crate) fn truncated(value: &str) -> &str {
    match value.char_indices().nth(30) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
