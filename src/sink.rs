use parking_lot::Mutex;

/// Receiver for `{{~log(...)}}` values and recoverable-failure diagnostics.
/// Implementations must not panic; the renderer does not catch them.
pub trait LogSink: Send + Sync {
    /// Values passed to the `log` helper, already serialized.
    fn log(&self, values: &[serde_json::Value]);

    /// A tag failed to evaluate and rendered empty.
    fn warn(&self, message: &str);
}

/// Default sink: forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, values: &[serde_json::Value]) {
        let values = serde_json::Value::Array(values.to_vec());
        tracing::info!(target: "goatee::log", %values, "template log");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "goatee::render", "{message}");
    }
}

/// Sink that keeps everything in memory; handy for tests and for hosts
/// that want to surface diagnostics themselves.
#[derive(Debug, Default)]
pub struct MemorySink {
    logs: Mutex<Vec<Vec<serde_json::Value>>>,
    warnings: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// One entry per `log` call.
    pub fn logs(&self) -> Vec<Vec<serde_json::Value>> {
        self.logs.lock().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    pub fn clear(&self) {
        self.logs.lock().clear();
        self.warnings.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn log(&self, values: &[serde_json::Value]) {
        self.logs.lock().push(values.to_vec());
    }

    fn warn(&self, message: &str) {
        self.warnings.lock().push(message.to_string());
    }
}
