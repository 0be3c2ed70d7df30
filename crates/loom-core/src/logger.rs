/// Structured sink for the adapter's observability events: transaction
/// commit stats (§4.8), dangling-reference warnings during population
/// (§4.6, §7), and success-hook failures (§7). Kept as a trait rather than
/// a hard `tracing` dependency at call sites so hosts can route events
/// into their own telemetry.
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default [`Logger`] that forwards to the `tracing` facade, matching the
/// logging style already used at the edges of this workspace (the HTTP
/// and server binaries).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!("{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }
}

/// In-memory logger used by tests that need to assert on emitted
/// messages (e.g. the dangling-reference warning scenario).
#[derive(Debug, Default)]
pub struct CapturingLogger {
    pub messages: std::sync::Mutex<Vec<(&'static str, String)>>,
}

impl Logger for CapturingLogger {
    fn debug(&self, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push(("debug", message.to_string()));
    }

    fn warn(&self, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push(("warn", message.to_string()));
    }

    fn error(&self, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push(("error", message.to_string()));
    }
}
