//! RAII guard over the run-local value store.

use std::collections::HashMap;

use crate::graph::VarId;
use crate::tensor::{DType, Tensor, TensorError};

use super::{MemoryManager, Region};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Allocated(Region),
    /// Supplied by the caller (feeds); dropped, never returned to the manager.
    External,
}

/// Run-scoped store of computed values.
///
/// Every buffer allocated through the scope is tracked until it is released early or detached
/// to the caller. Dropping the scope, on success or on any error path, hands all remaining
/// working buffers back to the memory manager.
pub struct Scope<'m> {
    memory: &'m mut dyn MemoryManager,
    values: HashMap<VarId, (Tensor, Origin)>,
}

impl<'m> Scope<'m> {
    pub fn enter(memory: &'m mut dyn MemoryManager) -> Self {
        Scope {
            memory,
            values: HashMap::new(),
        }
    }

    /// Allocates an untracked buffer; pass it back through [`Scope::insert`] once filled.
    pub fn allocate(
        &mut self,
        region: Region,
        dtype: DType,
        dims: &[usize],
    ) -> Result<Tensor, TensorError> {
        self.memory.allocate(region, dtype, dims)
    }

    /// Returns a buffer obtained from [`Scope::allocate`] that never made it into the store.
    pub fn discard(&mut self, tensor: Tensor, region: Region) {
        if region == Region::Working {
            self.memory.release(tensor);
        }
    }

    /// Records the value computed for `var` in an allocated buffer.
    pub fn insert(&mut self, var: VarId, tensor: Tensor, region: Region) {
        self.store(var, tensor, Origin::Allocated(region));
    }

    /// Records a caller-owned value such as a feed.
    pub fn insert_external(&mut self, var: VarId, tensor: Tensor) {
        self.store(var, tensor, Origin::External);
    }

    fn store(&mut self, var: VarId, tensor: Tensor, origin: Origin) {
        if let Some((previous, origin)) = self.values.insert(var, (tensor, origin)) {
            self.reclaim(previous, origin);
        }
    }

    pub fn get(&self, var: VarId) -> Option<&Tensor> {
        self.values.get(&var).map(|(tensor, _)| tensor)
    }

    pub fn contains(&self, var: VarId) -> bool {
        self.values.contains_key(&var)
    }

    /// Releases `var` before the scope ends, once its last consumer has run.
    pub fn release(&mut self, var: VarId) {
        if let Some((tensor, origin)) = self.values.remove(&var) {
            self.reclaim(tensor, origin);
        }
    }

    /// Moves `var` out of the scope; the caller takes ownership.
    pub fn detach(&mut self, var: VarId) -> Option<Tensor> {
        self.values.remove(&var).map(|(tensor, _)| tensor)
    }

    /// Number of values currently held.
    pub fn live(&self) -> usize {
        self.values.len()
    }

    fn reclaim(&mut self, tensor: Tensor, origin: Origin) {
        if origin == Origin::Allocated(Region::Working) {
            self.memory.release(tensor);
        }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        let values: Vec<(Tensor, Origin)> = self.values.drain().map(|(_, v)| v).collect();
        for (tensor, origin) in values {
            self.reclaim(tensor, origin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ArenaMemoryManager, MemoryManager};

    #[test]
    fn drop_returns_working_buffers_only() {
        let mut memory = ArenaMemoryManager::new();
        {
            let mut scope = Scope::enter(&mut memory);
            let a = scope.allocate(Region::Working, DType::Float, &[4]).unwrap();
            let b = scope.allocate(Region::Output, DType::Float, &[4]).unwrap();
            scope.insert(VarId(0), a, Region::Working);
            scope.insert(VarId(1), b, Region::Output);
            scope.insert_external(VarId(2), Tensor::filled(&[2], 1.0f32));
        }
        let stats = memory.stats();
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.working_live_bytes, 0);
        assert_eq!(stats.output_bytes, 16);
    }

    #[test]
    fn detached_value_escapes_reclamation() {
        let mut memory = ArenaMemoryManager::new();
        let kept = {
            let mut scope = Scope::enter(&mut memory);
            let a = scope.allocate(Region::Working, DType::Float, &[3]).unwrap();
            scope.insert(VarId(7), a, Region::Working);
            scope.detach(VarId(7))
        };
        assert_eq!(kept.map(|t| t.len()), Some(3));
        assert_eq!(memory.stats().releases, 0);
    }

    #[test]
    fn error_path_still_reclaims() {
        fn failing_run(memory: &mut dyn MemoryManager) -> Result<(), String> {
            let mut scope = Scope::enter(memory);
            let a = scope
                .allocate(Region::Working, DType::Float, &[8])
                .map_err(|e| e.to_string())?;
            scope.insert(VarId(0), a, Region::Working);
            Err("kernel failed".to_string())
        }
        let mut memory = ArenaMemoryManager::new();
        assert!(failing_run(&mut memory).is_err());
        assert_eq!(memory.stats().working_live_bytes, 0);
    }
}
