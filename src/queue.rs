//! Priority lanes of the downlink queue.
//!
//! Lanes are index-correlated with [`MessageClass`]. A lower priority value
//! is serviced first; equal priorities are serviced in lane order.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const QUEUE_LANES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageClass {
    Events = 0,
    Telemetry = 1,
    FileDownlink = 2,
}

impl MessageClass {
    pub const ALL: [MessageClass; QUEUE_LANES] =
        [MessageClass::Events, MessageClass::Telemetry, MessageClass::FileDownlink];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageClass::Events => "events",
            MessageClass::Telemetry => "telemetry",
            MessageClass::FileDownlink => "file_downlink",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub depth: u32,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("lane `{}` has zero depth", .0.as_str())]
    ZeroDepth(MessageClass),
    #[error("lane `{}` is full", .0.as_str())]
    Full(MessageClass),
    #[error("message of {len} bytes exceeds the {max} byte slot")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("queue has no priority table bound")]
    NotConfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePriorityTable {
    entries: [QueueEntry; QUEUE_LANES],
}

impl QueuePriorityTable {
    pub fn new(entries: [QueueEntry; QUEUE_LANES]) -> Result<Self, QueueError> {
        for class in MessageClass::ALL {
            if entries[class.index()].depth == 0 {
                return Err(QueueError::ZeroDepth(class));
            }
        }
        Ok(Self { entries })
    }

    /// Events (100, 0), telemetry (500, 2), file downlink (100, 1).
    pub fn reference() -> Self {
        Self {
            entries: [
                QueueEntry { depth: 100, priority: 0 },
                QueueEntry { depth: 500, priority: 2 },
                QueueEntry { depth: 100, priority: 1 },
            ],
        }
    }

    pub fn entry(&self, class: MessageClass) -> QueueEntry {
        self.entries[class.index()]
    }

    pub fn entries(&self) -> &[QueueEntry; QUEUE_LANES] {
        &self.entries
    }

    pub fn service_order(&self) -> [MessageClass; QUEUE_LANES] {
        let mut order = MessageClass::ALL;
        order.sort_by_key(|class| (self.entry(*class).priority, class.index()));
        order
    }

    /// Highest-priority class for which `has_pending` holds.
    pub fn next_ready(&self, mut has_pending: impl FnMut(MessageClass) -> bool) -> Option<MessageClass> {
        self.service_order().into_iter().find(|class| has_pending(*class))
    }

    pub fn total_depth(&self) -> usize {
        self.entries.iter().map(|entry| entry.depth as usize).sum()
    }
}

impl Default for QueuePriorityTable {
    fn default() -> Self {
        Self::reference()
    }
}
