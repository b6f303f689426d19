//! Memory manager that recycles released working buffers.

use lru::LruCache;

use crate::tensor::{DType, Tensor, TensorError};

use super::{MemoryManager, MemoryStats, Region};

type BufferKey = (DType, Vec<usize>);

/// Keeps released working buffers keyed by `(dtype, dims)` and hands them back out on an
/// exact match.
///
/// The cache is bounded by `max_cache_bytes`; when it overflows, buffers of the least recently
/// released key are evicted first. Buffers at or below `small_array_threshold` bytes are always
/// admitted, larger ones only if they fit the budget on their own. Admission never lifts the
/// budget: every release ends with the cache at or under `max_cache_bytes`.
pub struct CachingMemoryManager {
    cache: LruCache<BufferKey, Vec<Tensor>>,
    max_cache_bytes: usize,
    small_array_threshold: usize,
    stats: MemoryStats,
}

impl CachingMemoryManager {
    pub fn new(max_cache_bytes: usize, small_array_threshold: usize) -> Self {
        Self {
            cache: LruCache::unbounded(),
            max_cache_bytes,
            small_array_threshold,
            stats: MemoryStats::default(),
        }
    }

    /// Number of buffers currently parked.
    pub fn cached_buffers(&self) -> usize {
        self.cache.iter().map(|(_, bucket)| bucket.len()).sum()
    }

    fn evict_to_budget(&mut self) {
        while self.stats.cached_bytes > self.max_cache_bytes {
            let Some(key) = self.cache.peek_lru().map(|(key, _)| key.clone()) else {
                break;
            };
            if let Some(evicted) = self.cache.peek_mut(&key).and_then(|bucket| bucket.pop()) {
                self.stats.cached_bytes -= evicted.size_in_bytes();
                log::trace!(
                    "evicted cached {} buffer {:?} ({} bytes)",
                    key.0,
                    key.1,
                    evicted.size_in_bytes()
                );
            }
            if self.cache.peek(&key).is_some_and(|bucket| bucket.is_empty()) {
                self.cache.pop(&key);
            }
        }
    }
}

impl MemoryManager for CachingMemoryManager {
    fn allocate(
        &mut self,
        region: Region,
        dtype: DType,
        dims: &[usize],
    ) -> Result<Tensor, TensorError> {
        if region == Region::Working {
            let key = (dtype, dims.to_vec());
            let reused = self.cache.get_mut(&key).and_then(|bucket| bucket.pop());
            if let Some(tensor) = reused {
                if self.cache.peek(&key).is_some_and(|bucket| bucket.is_empty()) {
                    self.cache.pop(&key);
                }
                self.stats.cached_bytes -= tensor.size_in_bytes();
                self.stats.cache_hits += 1;
                self.stats.record_allocation(region, tensor.size_in_bytes());
                return Ok(tensor);
            }
            self.stats.cache_misses += 1;
        }
        let tensor = Tensor::zeros(dtype, dims)?;
        self.stats.record_allocation(region, tensor.size_in_bytes());
        Ok(tensor)
    }

    fn release(&mut self, tensor: Tensor) {
        let bytes = tensor.size_in_bytes();
        self.stats.record_release(bytes);
        if bytes > self.small_array_threshold && bytes > self.max_cache_bytes {
            log::warn!("buffer of {bytes} bytes exceeds the cache budget; dropping");
            return;
        }
        let key = (tensor.dtype(), tensor.dims().to_vec());
        match self.cache.get_mut(&key) {
            Some(bucket) => bucket.push(tensor),
            None => {
                self.cache.put(key, vec![tensor]);
            }
        }
        self.stats.cached_bytes += bytes;
        self.evict_to_budget();
    }

    fn stats(&self) -> MemoryStats {
        self.stats.clone()
    }

    fn clear(&mut self) {
        self.cache.clear();
        self.stats.cached_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_buffer_is_reused_for_identical_request() {
        let mut memory = CachingMemoryManager::new(1 << 20, 1024);
        let first = memory.allocate(Region::Working, DType::Float, &[4, 4]).unwrap();
        memory.release(first);
        assert_eq!(memory.cached_buffers(), 1);

        let again = memory.allocate(Region::Working, DType::Float, &[4, 4]).unwrap();
        assert_eq!(again.dims(), &[4, 4]);
        let other = memory.allocate(Region::Working, DType::Float, &[2, 8]).unwrap();
        assert_eq!(other.dims(), &[2, 8]);

        let stats = memory.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.cached_bytes, 0);
        assert_eq!(memory.cached_buffers(), 0);
    }

    #[test]
    fn output_region_never_comes_from_cache() {
        let mut memory = CachingMemoryManager::new(1 << 20, 1024);
        let scratch = memory.allocate(Region::Working, DType::Float, &[8]).unwrap();
        memory.release(scratch);
        let out = memory.allocate(Region::Output, DType::Float, &[8]).unwrap();
        assert_eq!(out.len(), 8);
        assert_eq!(memory.cached_buffers(), 1);
        assert_eq!(memory.stats().output_bytes, 32);
    }

    #[test]
    fn eviction_keeps_cache_within_budget() {
        // 4 KiB buffers against a 10 KiB budget: at most two stay parked.
        let mut memory = CachingMemoryManager::new(10 * 1024, 1024);
        let buffers: Vec<Tensor> = (0..4)
            .map(|i| {
                memory
                    .allocate(Region::Working, DType::Float, &[1024 + i])
                    .unwrap()
            })
            .collect();
        for buffer in buffers {
            memory.release(buffer);
        }
        assert!(memory.stats().cached_bytes <= 10 * 1024);
        assert_eq!(memory.cached_buffers(), 2);
        // The two most recently released shapes survive.
        let hit = memory.allocate(Region::Working, DType::Float, &[1027]).unwrap();
        assert_eq!(hit.len(), 1027);
        assert_eq!(memory.stats().cache_hits, 1);
    }

    #[test]
    fn small_buffers_of_many_shapes_stay_within_budget() {
        let mut memory = CachingMemoryManager::new(1024, 1024);
        for i in 1..=64 {
            let buffer = memory.allocate(Region::Working, DType::Float, &[i]).unwrap();
            memory.release(buffer);
            assert!(memory.stats().cached_bytes <= 1024);
        }
        // 64 floats are the newest release and fit on their own.
        let hit = memory.allocate(Region::Working, DType::Float, &[64]).unwrap();
        assert_eq!(hit.len(), 64);
        assert_eq!(memory.stats().cache_hits, 1);
        let miss = memory.allocate(Region::Working, DType::Float, &[1]).unwrap();
        assert_eq!(miss.len(), 1);
        assert_eq!(memory.stats().cache_hits, 1);
    }
}
