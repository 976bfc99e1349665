use super::{Component, ComponentCore};
use crate::allocator::{AllocError, Allocation, MemAllocator};
use crate::sizing::{BufferBin, BufferBins};
use std::sync::Arc;
use tracing::{debug, info};

/// Pools of fixed-size buffers backed by one up-front allocation.
pub struct BufferManager {
    core: ComponentCore,
    manager_id: u32,
    bins: Vec<BufferBin>,
    storage: Option<Allocation>,
    allocator: Option<Arc<dyn MemAllocator>>,
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("core", &self.core)
            .field("manager_id", &self.manager_id)
            .field("bins", &self.bins)
            .field("storage", &self.storage.as_ref().map(Allocation::len))
            .finish()
    }
}

impl BufferManager {
    pub fn new(name: &str) -> Self {
        Self {
            core: ComponentCore::new(name),
            manager_id: 0,
            bins: Vec::new(),
            storage: None,
            allocator: None,
        }
    }

    /// Allocates the memory for every bin in one block. Failure here leaves
    /// the manager empty.
    pub fn setup(
        &mut self,
        manager_id: u32,
        identifier: u32,
        allocator: Arc<dyn MemAllocator>,
        bins: &BufferBins,
    ) -> Result<(), AllocError> {
        if self.storage.is_some() {
            return Err(AllocError::AlreadyHeld {
                owner: self.core.name().to_string(),
            });
        }

        let layout: Vec<BufferBin> = bins
            .iter()
            .filter(|bin| bin.buffer_count > 0 && bin.buffer_size > 0)
            .copied()
            .collect();
        let bytes = layout.iter().map(BufferBin::total_bytes).sum();

        let storage = allocator.allocate(identifier, bytes)?;
        info!(
            component = self.core.name(),
            manager_id,
            bins = layout.len(),
            bytes = storage.len(),
            "buffer pools allocated"
        );
        self.manager_id = manager_id;
        self.bins = layout;
        self.storage = Some(storage);
        self.allocator = Some(allocator);
        Ok(())
    }

    /// Returns the pool memory to the allocator given at setup.
    pub fn cleanup(&mut self) -> Result<(), AllocError> {
        let (storage, allocator) = match (self.storage.take(), self.allocator.take()) {
            (Some(storage), Some(allocator)) => (storage, allocator),
            _ => {
                return Err(AllocError::NothingHeld {
                    owner: self.core.name().to_string(),
                })
            }
        };
        self.bins.clear();
        let identifier = storage.identifier();
        allocator.deallocate(identifier, storage)?;
        debug!(component = self.core.name(), "buffer pools released");
        Ok(())
    }

    pub fn manager_id(&self) -> u32 {
        self.manager_id
    }

    pub fn bins(&self) -> impl Iterator<Item = &BufferBin> {
        self.bins.iter()
    }

    pub fn pool_bytes(&self) -> usize {
        self.storage.as_ref().map_or(0, Allocation::len)
    }
}

impl Component for BufferManager {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }
}
