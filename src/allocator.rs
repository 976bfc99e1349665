//! Memory allocator collaborator.
//!
//! Components that need memory at configuration time receive an allocator by
//! reference and give every [`Allocation`] back to the same allocator at
//! teardown. [`Allocation`] is move-only, so a block cannot be returned twice;
//! the allocator's ledger additionally rejects blocks it never handed out.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("allocator exhausted: {requested} bytes requested for id {identifier}, {available} available")]
    Exhausted {
        identifier: u32,
        requested: usize,
        available: usize,
    },
    #[error("system allocation of {requested} bytes failed for id {identifier}")]
    OutOfMemory { identifier: u32, requested: usize },
    #[error("zero-byte allocation requested for id {identifier}")]
    ZeroSize { identifier: u32 },
    #[error("allocation #{token} was not handed out by this allocator")]
    UnknownAllocation { token: u64 },
    #[error("`{owner}` already holds an allocation")]
    AlreadyHeld { owner: String },
    #[error("`{owner}` holds no allocation to release")]
    NothingHeld { owner: String },
}

/// A block of zeroed memory owned by one component until it is deallocated.
#[derive(Debug)]
pub struct Allocation {
    token: u64,
    identifier: u32,
    memory: Box<[u8]>,
}

impl Allocation {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn identifier(&self) -> u32 {
        self.identifier
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.memory
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.memory
    }
}

pub trait MemAllocator: Send + Sync {
    /// `identifier` is an opaque tag chosen by the caller.
    fn allocate(&self, identifier: u32, size: usize) -> Result<Allocation, AllocError>;

    fn deallocate(&self, identifier: u32, allocation: Allocation) -> Result<(), AllocError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AllocatorStats {
    pub allocations: u32,
    pub deallocations: u32,
    pub outstanding: usize,
    pub outstanding_bytes: usize,
    pub peak_bytes: usize,
}

#[derive(Debug, Default)]
struct Ledger {
    live: HashMap<u64, usize>,
    stats: AllocatorStats,
}

/// Heap-backed allocator with an optional byte budget.
///
/// The identifier tag is recorded in logs but otherwise ignored.
#[derive(Debug, Default)]
pub struct MallocAllocator {
    limit: Option<usize>,
    ledger: Mutex<Ledger>,
}

impl MallocAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses any allocation that would push outstanding bytes past `limit`.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn stats(&self) -> AllocatorStats {
        self.ledger().stats
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemAllocator for MallocAllocator {
    fn allocate(&self, identifier: u32, size: usize) -> Result<Allocation, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize { identifier });
        }

        let mut ledger = self.ledger();
        if let Some(limit) = self.limit {
            let available = limit.saturating_sub(ledger.stats.outstanding_bytes);
            if size > available {
                return Err(AllocError::Exhausted {
                    identifier,
                    requested: size,
                    available,
                });
            }
        }

        let mut memory = Vec::new();
        memory
            .try_reserve_exact(size)
            .map_err(|_| AllocError::OutOfMemory { identifier, requested: size })?;
        memory.resize(size, 0u8);

        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        ledger.live.insert(token, size);
        ledger.stats.allocations += 1;
        ledger.stats.outstanding += 1;
        ledger.stats.outstanding_bytes += size;
        ledger.stats.peak_bytes = ledger.stats.peak_bytes.max(ledger.stats.outstanding_bytes);
        trace!(identifier, size, token, "allocated");

        Ok(Allocation {
            token,
            identifier,
            memory: memory.into_boxed_slice(),
        })
    }

    fn deallocate(&self, identifier: u32, allocation: Allocation) -> Result<(), AllocError> {
        let mut ledger = self.ledger();
        let size = ledger
            .live
            .remove(&allocation.token)
            .ok_or(AllocError::UnknownAllocation { token: allocation.token })?;
        ledger.stats.deallocations += 1;
        ledger.stats.outstanding -= 1;
        ledger.stats.outstanding_bytes -= size;
        debug!(identifier, size, token = allocation.token, "deallocated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_zeroed_and_tracked() {
        let allocator = MallocAllocator::new();
        let block = allocator.allocate(7, 128).unwrap();
        assert_eq!(block.len(), 128);
        assert_eq!(block.identifier(), 7);
        assert!(block.as_slice().iter().all(|b| *b == 0));

        let stats = allocator.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.outstanding_bytes, 128);

        allocator.deallocate(7, block).unwrap();
        let stats = allocator.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.outstanding_bytes, 0);
        assert_eq!(stats.peak_bytes, 128);
    }

    #[test]
    fn test_limit_exhaustion() {
        let allocator = MallocAllocator::with_limit(100);
        let first = allocator.allocate(0, 60).unwrap();
        let err = allocator.allocate(0, 60).unwrap_err();
        assert_eq!(
            err,
            AllocError::Exhausted {
                identifier: 0,
                requested: 60,
                available: 40
            }
        );
        allocator.deallocate(0, first).unwrap();
        assert!(allocator.allocate(0, 60).is_ok());
    }

    #[test]
    fn test_foreign_allocation_rejected() {
        let ours = MallocAllocator::new();
        let theirs = MallocAllocator::new();
        let block = theirs.allocate(0, 16).unwrap();
        let err = ours.deallocate(0, block).unwrap_err();
        assert!(matches!(err, AllocError::UnknownAllocation { .. }));
        assert_eq!(ours.stats().deallocations, 0);
    }

    #[test]
    fn test_zero_size_rejected() {
        let allocator = MallocAllocator::new();
        assert_eq!(allocator.allocate(3, 0).unwrap_err(), AllocError::ZeroSize { identifier: 3 });
    }
}
