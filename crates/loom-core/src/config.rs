/// Runner-wide configuration threaded through the `Context` (see
/// `loom-engine::context`). Kept here, rather than in `loom-engine`,
/// because it has no dependency on the store binding and is useful to
/// coercion and query translation too (e.g. the default
/// `max_query_size`).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Back-off on contention retries is only applied against the
    /// emulator, never against the real store.
    pub emulator: bool,
    /// Fallback cap for relation dangling-reference queries when a model
    /// does not set its own `max_query_size`.
    pub default_max_query_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            emulator: false,
            default_max_query_size: 10,
        }
    }
}
