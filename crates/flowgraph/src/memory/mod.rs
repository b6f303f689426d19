//! Buffer management for session runs.
//!
//! A run allocates every buffer through a [`MemoryManager`], tagging it with a [`Region`].
//! Working buffers belong to the run and are handed back as soon as their last consumer has
//! executed, or when the run's [`Scope`] is dropped. Output buffers leave with the caller and
//! are never reclaimed by the manager.

mod arena;
mod cache;
mod scope;

use crate::tensor::{DType, Tensor, TensorError};

pub use arena::ArenaMemoryManager;
pub use cache::CachingMemoryManager;
pub use scope::Scope;

/// Lifetime class of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Intermediates owned by the current run.
    Working,
    /// Values that outlive the run: requested outputs handed to the caller.
    Output,
}

/// Running counters kept by every manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes currently checked out in the working region.
    pub working_live_bytes: usize,
    /// High-water mark of `working_live_bytes`.
    pub peak_working_bytes: usize,
    /// Total bytes handed out in the output region.
    pub output_bytes: usize,
    pub allocations: usize,
    pub releases: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Bytes currently parked in a reuse cache.
    pub cached_bytes: usize,
}

impl MemoryStats {
    pub(crate) fn record_allocation(&mut self, region: Region, bytes: usize) {
        self.allocations += 1;
        match region {
            Region::Working => {
                self.working_live_bytes += bytes;
                self.peak_working_bytes = self.peak_working_bytes.max(self.working_live_bytes);
            }
            Region::Output => self.output_bytes += bytes,
        }
    }

    pub(crate) fn record_release(&mut self, bytes: usize) {
        self.releases += 1;
        self.working_live_bytes = self.working_live_bytes.saturating_sub(bytes);
    }
}

/// Arena-style allocator owned by exactly one session.
pub trait MemoryManager: Send {
    /// Hands out a buffer of `dtype`/`dims`. Contents are unspecified when a buffer is recycled.
    fn allocate(
        &mut self,
        region: Region,
        dtype: DType,
        dims: &[usize],
    ) -> Result<Tensor, TensorError>;

    /// Returns a working-region buffer whose last consumer has run.
    fn release(&mut self, tensor: Tensor);

    fn stats(&self) -> MemoryStats;

    /// Drops any cached buffers.
    fn clear(&mut self);
}

/// Which manager a session builds for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPolicy {
    /// Fresh buffer for every allocation.
    Arena,
    /// Recycle released working buffers of identical dtype and dims.
    Caching,
}

/// Parameters of the caching manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    pub policy: MemoryPolicy,
    /// Upper bound on bytes parked in the reuse cache.
    pub max_cache_bytes: usize,
    /// Buffers at or below this size are always admitted to the cache.
    pub small_array_threshold: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            policy: MemoryPolicy::Caching,
            max_cache_bytes: 256 * 1024 * 1024,
            small_array_threshold: 1024,
        }
    }
}

impl MemoryConfig {
    pub fn build(&self) -> Box<dyn MemoryManager> {
        match self.policy {
            MemoryPolicy::Arena => Box::new(ArenaMemoryManager::new()),
            MemoryPolicy::Caching => Box::new(CachingMemoryManager::new(
                self.max_cache_bytes,
                self.small_array_threshold,
            )),
        }
    }
}
