use crate::env;
use crate::memory::{MemoryConfig, MemoryPolicy};

/// Knobs of an execution session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub memory: MemoryConfig,
    /// Number of execution plans cached per session. Zero disables caching.
    pub plan_cache_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            plan_cache_capacity: 32,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by the `FLOWGRAPH_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if !env::array_cache_enabled() {
            config.memory.policy = MemoryPolicy::Arena;
        }
        if let Some(bytes) = env::cache_max_bytes() {
            config.memory.max_cache_bytes = bytes;
        }
        if let Some(bytes) = env::small_array_threshold() {
            config.memory.small_array_threshold = bytes;
        }
        if let Some(capacity) = env::plan_cache_capacity() {
            config.plan_cache_capacity = capacity;
        }
        config
    }

    pub fn with_memory_policy(mut self, policy: MemoryPolicy) -> Self {
        self.memory.policy = policy;
        self
    }

    pub fn with_plan_cache_capacity(mut self, capacity: usize) -> Self {
        self.plan_cache_capacity = capacity;
        self
    }
}
