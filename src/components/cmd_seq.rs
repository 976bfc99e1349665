use super::task::{ActiveTask, Dispatch, SchedPort, TaskStats};
use super::{component_name, ActiveComponent, Component, ComponentCore};
use crate::allocator::{AllocError, Allocation, MemAllocator};
use std::sync::Arc;
use tracing::debug;

pub const CMD_SEQ_COMMANDS: &[&str] = &[
    "CS_RUN",
    "CS_VALIDATE",
    "CS_CANCEL",
    "CS_START",
    "CS_STEP",
    "CS_AUTO",
    "CS_MANUAL",
    "CS_JOIN_WAIT",
];

/// Command sequencer. Holds the buffer that sequence files are loaded into.
#[derive(Debug)]
pub struct CommandSequencer {
    core: ComponentCore,
    task: ActiveTask,
    buffer: Option<Allocation>,
}

impl CommandSequencer {
    pub fn new(name: &str, priority: u32) -> Self {
        Self {
            core: ComponentCore::new(name),
            task: ActiveTask::new(component_name(name), priority),
            buffer: None,
        }
    }

    pub fn allocate_buffer(&mut self, identifier: u32, allocator: &dyn MemAllocator, bytes: usize) -> Result<(), AllocError> {
        if self.buffer.is_some() {
            return Err(AllocError::AlreadyHeld {
                owner: self.core.name().to_string(),
            });
        }
        let allocation = allocator.allocate(identifier, bytes)?;
        debug!(component = self.core.name(), bytes = allocation.len(), "sequence buffer allocated");
        self.buffer = Some(allocation);
        Ok(())
    }

    /// Returns the buffer to the allocator it came from.
    pub fn deallocate_buffer(&mut self, allocator: &dyn MemAllocator) -> Result<(), AllocError> {
        let allocation = self.buffer.take().ok_or_else(|| AllocError::NothingHeld {
            owner: self.core.name().to_string(),
        })?;
        let identifier = allocation.identifier();
        allocator.deallocate(identifier, allocation)
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, Allocation::len)
    }

    pub fn sched_port(&self) -> Option<SchedPort> {
        self.task.port()
    }

    pub fn stats(&self) -> Arc<TaskStats> {
        self.task.stats()
    }
}

impl Component for CommandSequencer {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn initialize(&mut self, queue_depth: usize, instance: u32) {
        self.core.initialize(instance);
        self.task.initialize(queue_depth);
    }

    fn commands(&self) -> &'static [&'static str] {
        CMD_SEQ_COMMANDS
    }
}

impl ActiveComponent for CommandSequencer {
    fn task(&self) -> &ActiveTask {
        &self.task
    }

    fn task_mut(&mut self) -> &mut ActiveTask {
        &mut self.task
    }

    fn dispatcher(&self) -> Box<dyn Dispatch> {
        Box::new(|_context: u32, _tick: u64| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::MallocAllocator;

    #[test]
    fn test_buffer_round_trip_through_allocator() {
        let allocator = MallocAllocator::new();
        let mut seq = CommandSequencer::new("a_cmdSeq", 100);

        seq.allocate_buffer(0, &allocator, 5 * 1024).unwrap();
        assert_eq!(seq.buffer_capacity(), 5 * 1024);
        assert_eq!(allocator.stats().outstanding, 1);

        seq.deallocate_buffer(&allocator).unwrap();
        assert_eq!(seq.buffer_capacity(), 0);
        assert_eq!(allocator.stats().outstanding, 0);
    }

    #[test]
    fn test_second_release_is_reported() {
        let allocator = MallocAllocator::new();
        let mut seq = CommandSequencer::new("a_cmdSeq", 100);
        seq.allocate_buffer(0, &allocator, 64).unwrap();
        seq.deallocate_buffer(&allocator).unwrap();

        let err = seq.deallocate_buffer(&allocator).unwrap_err();
        assert!(matches!(err, AllocError::NothingHeld { .. }));
        assert_eq!(allocator.stats().deallocations, 1);
    }

    #[test]
    fn test_exhaustion_leaves_no_buffer() {
        let allocator = MallocAllocator::with_limit(1024);
        let mut seq = CommandSequencer::new("a_cmdSeq", 100);
        let err = seq.allocate_buffer(0, &allocator, 5 * 1024).unwrap_err();
        assert!(matches!(err, AllocError::Exhausted { .. }));
        assert_eq!(seq.buffer_capacity(), 0);
    }
}
