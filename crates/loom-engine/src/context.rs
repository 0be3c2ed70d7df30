use std::sync::Arc;

use loom_core::{Logger, Registry, RunnerConfig, TracingLogger};

/// Bundles the registry, logger, store binding, and runner configuration
/// that `Collection` and `coerce_to_reference` would otherwise have to
/// reach for through global or thread-local state.
#[derive(Clone)]
pub struct Context<S> {
    pub registry: Arc<Registry>,
    pub logger: Arc<dyn Logger>,
    pub store: Arc<S>,
    pub config: RunnerConfig,
}

impl<S> Context<S> {
    pub fn new(registry: Registry, store: S) -> Self {
        Self {
            registry: Arc::new(registry),
            logger: Arc::new(TracingLogger),
            store: Arc::new(store),
            config: RunnerConfig::default(),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }
}
