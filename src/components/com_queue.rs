use super::{Component, ComponentCore};
use crate::allocator::{AllocError, Allocation, MemAllocator};
use crate::queue::{MessageClass, QueueError, QueuePriorityTable, QUEUE_LANES};
use crate::sizing::FW_COM_BUFFER_MAX_SIZE;
use tracing::{debug, warn};

/// A ring of fixed-size slots inside the shared lane storage.
#[derive(Debug, Clone)]
struct Lane {
    first_slot: usize,
    depth: usize,
    head: usize,
    lengths: std::vec::Vec<usize>,
    len: usize,
}

impl Lane {
    fn new(first_slot: usize, depth: usize) -> Self {
        Self {
            first_slot,
            depth,
            head: 0,
            lengths: vec![0; depth],
            len: 0,
        }
    }
}

/// Downlink queue. All lanes share one allocation of
/// `total_depth * slot_size` bytes, taken at configuration.
#[derive(Debug)]
pub struct ComQueue {
    core: ComponentCore,
    table: Option<QueuePriorityTable>,
    lanes: std::vec::Vec<Lane>,
    slot_size: usize,
    storage: Option<Allocation>,
    overflows: [u64; QUEUE_LANES],
}

impl ComQueue {
    pub fn new(name: &str) -> Self {
        Self {
            core: ComponentCore::new(name),
            table: None,
            lanes: std::vec::Vec::new(),
            slot_size: FW_COM_BUFFER_MAX_SIZE,
            storage: None,
            overflows: [0; QUEUE_LANES],
        }
    }

    /// Takes ownership of the priority table and allocates lane storage.
    pub fn configure(
        &mut self,
        table: QueuePriorityTable,
        identifier: u32,
        allocator: &dyn MemAllocator,
    ) -> Result<(), AllocError> {
        if self.storage.is_some() {
            return Err(AllocError::AlreadyHeld {
                owner: self.core.name().to_string(),
            });
        }

        let storage = allocator.allocate(identifier, table.total_depth() * self.slot_size)?;
        let mut first_slot = 0;
        self.lanes = MessageClass::ALL
            .iter()
            .map(|class| {
                let depth = table.entry(*class).depth as usize;
                let lane = Lane::new(first_slot, depth);
                first_slot += depth;
                lane
            })
            .collect();
        debug!(
            component = self.core.name(),
            slots = first_slot,
            bytes = storage.len(),
            order = ?table.service_order(),
            "queue lanes configured"
        );
        self.table = Some(table);
        self.storage = Some(storage);
        self.overflows = [0; QUEUE_LANES];
        Ok(())
    }

    pub fn table(&self) -> Option<&QueuePriorityTable> {
        self.table.as_ref()
    }

    pub fn enqueue(&mut self, class: MessageClass, message: &[u8]) -> Result<(), QueueError> {
        if message.len() > self.slot_size {
            return Err(QueueError::PayloadTooLarge {
                len: message.len(),
                max: self.slot_size,
            });
        }
        let storage = self.storage.as_mut().ok_or(QueueError::NotConfigured)?;
        let lane = self.lanes.get_mut(class.index()).ok_or(QueueError::NotConfigured)?;
        if lane.len == lane.depth {
            self.overflows[class.index()] += 1;
            warn!(component = self.core.name(), lane = class.as_str(), "lane full, message dropped");
            return Err(QueueError::Full(class));
        }

        let position = (lane.head + lane.len) % lane.depth;
        let offset = (lane.first_slot + position) * self.slot_size;
        storage.as_mut_slice()[offset..offset + message.len()].copy_from_slice(message);
        lane.lengths[position] = message.len();
        lane.len += 1;
        Ok(())
    }

    /// Pops the oldest message of the highest-priority non-empty lane.
    pub fn dequeue(&mut self) -> Option<(MessageClass, std::vec::Vec<u8>)> {
        let table = self.table.as_ref()?;
        let lanes = &self.lanes;
        let class = table.next_ready(|class| lanes.get(class.index()).is_some_and(|lane| lane.len > 0))?;

        let storage = self.storage.as_ref()?;
        let lane = self.lanes.get_mut(class.index())?;
        let position = lane.head;
        let offset = (lane.first_slot + position) * self.slot_size;
        let message = storage.as_slice()[offset..offset + lane.lengths[position]].to_vec();
        lane.head = (lane.head + 1) % lane.depth;
        lane.len -= 1;
        Some((class, message))
    }

    pub fn pending(&self, class: MessageClass) -> usize {
        self.lanes.get(class.index()).map_or(0, |lane| lane.len)
    }

    pub fn overflows(&self, class: MessageClass) -> u64 {
        self.overflows[class.index()]
    }

    pub fn storage_bytes(&self) -> usize {
        self.storage.as_ref().map_or(0, Allocation::len)
    }

    pub fn release_storage(&mut self, allocator: &dyn MemAllocator) -> Result<(), AllocError> {
        let storage = self.storage.take().ok_or_else(|| AllocError::NothingHeld {
            owner: self.core.name().to_string(),
        })?;
        self.lanes.clear();
        self.table = None;
        let identifier = storage.identifier();
        allocator.deallocate(identifier, storage)
    }
}

impl Component for ComQueue {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::MallocAllocator;
    use crate::queue::QueueEntry;

    fn configured(allocator: &MallocAllocator, table: QueuePriorityTable) -> ComQueue {
        let mut queue = ComQueue::new("a_comQueue");
        queue.configure(table, 0, allocator).unwrap();
        queue
    }

    #[test]
    fn test_lanes_serviced_by_priority() {
        let allocator = MallocAllocator::new();
        let mut queue = configured(&allocator, QueuePriorityTable::reference());
        queue.enqueue(MessageClass::Telemetry, b"tlm").unwrap();
        queue.enqueue(MessageClass::FileDownlink, b"file").unwrap();
        queue.enqueue(MessageClass::Events, b"evr").unwrap();

        let order: Vec<MessageClass> = std::iter::from_fn(|| queue.dequeue().map(|(class, _)| class)).collect();
        assert_eq!(order, [MessageClass::Events, MessageClass::FileDownlink, MessageClass::Telemetry]);
    }

    #[test]
    fn test_lane_fifo_and_overflow() {
        let allocator = MallocAllocator::new();
        let small = QueueEntry { depth: 2, priority: 0 };
        let mut queue = configured(&allocator, QueuePriorityTable::new([small; QUEUE_LANES]).unwrap());

        queue.enqueue(MessageClass::Events, b"one").unwrap();
        queue.enqueue(MessageClass::Events, b"two").unwrap();
        assert_eq!(
            queue.enqueue(MessageClass::Events, b"three"),
            Err(QueueError::Full(MessageClass::Events))
        );
        assert_eq!(queue.overflows(MessageClass::Events), 1);
        assert_eq!(queue.dequeue().unwrap().1, b"one");
        queue.enqueue(MessageClass::Events, b"three").unwrap();
        assert_eq!(queue.dequeue().unwrap().1, b"two");
        assert_eq!(queue.dequeue().unwrap().1, b"three");
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_storage_released_once() {
        let allocator = MallocAllocator::new();
        let mut queue = configured(&allocator, QueuePriorityTable::reference());
        assert_eq!(queue.storage_bytes(), 700 * FW_COM_BUFFER_MAX_SIZE);
        queue.release_storage(&allocator).unwrap();
        assert!(matches!(queue.release_storage(&allocator), Err(AllocError::NothingHeld { .. })));
        assert_eq!(allocator.stats().outstanding, 0);
    }

    #[test]
    fn test_enqueue_before_configure() {
        let mut queue = ComQueue::new("a_comQueue");
        assert_eq!(queue.enqueue(MessageClass::Events, b"x"), Err(QueueError::NotConfigured));
    }
}
