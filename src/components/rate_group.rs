//! Timing distribution: the interrupt source, the rate group driver that
//! divides its clock, and the active rate groups that fan out to members.

use super::task::{ActiveTask, Dispatch, SchedPort, TaskStats};
use super::{component_name, ActiveComponent, Component, ComponentCore};
use heapless::Vec;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Maximum number of divided outputs on the rate group driver.
pub const DIVIDER_SIZE: usize = 3;
/// Maximum fan-out of one rate group.
pub const CONNECTION_COUNT_MAX: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divider {
    pub divisor: u32,
    pub offset: u32,
}

impl Divider {
    pub const fn new(divisor: u32, offset: u32) -> Self {
        Self { divisor, offset }
    }

    pub fn fires_on(&self, tick: u64) -> bool {
        tick % u64::from(self.divisor) == u64::from(self.offset)
    }
}

pub type DividerSet = Vec<Divider, DIVIDER_SIZE>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateGroupError {
    #[error("divider {index} has a zero divisor")]
    ZeroDivisor { index: usize },
    #[error("divider {index} offset {offset} is not below its divisor {divisor}")]
    OffsetOutOfRange { index: usize, divisor: u32, offset: u32 },
    #[error("{requested} entries exceed the capacity of {capacity}")]
    TooMany { requested: usize, capacity: usize },
}

/// Stands in for the hardware interrupt. Each ISR call drives one cycle of
/// the rate group driver.
#[derive(Debug)]
pub struct BlockDriver {
    core: ComponentCore,
    cycle_connected: bool,
    isr_count: AtomicU64,
}

impl BlockDriver {
    pub fn new(name: &str) -> Self {
        Self {
            core: ComponentCore::new(name),
            cycle_connected: false,
            isr_count: AtomicU64::new(0),
        }
    }

    pub fn connect_cycle_out(&mut self) {
        self.cycle_connected = true;
    }

    pub fn call_isr(&self, driver: &RateGroupDriver) {
        self.isr_count.fetch_add(1, Ordering::AcqRel);
        if self.cycle_connected {
            driver.cycle();
        }
    }

    pub fn isr_count(&self) -> u64 {
        self.isr_count.load(Ordering::Acquire)
    }
}

impl Component for BlockDriver {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn initialize(&mut self, _queue_depth: usize, instance: u32) {
        self.core.initialize(instance);
        self.cycle_connected = false;
        self.isr_count.store(0, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct RateGroupDriver {
    core: ComponentCore,
    dividers: DividerSet,
    outputs: Vec<Option<SchedPort>, DIVIDER_SIZE>,
    ticks: AtomicU64,
}

impl RateGroupDriver {
    pub fn new(name: &str) -> Self {
        Self {
            core: ComponentCore::new(name),
            dividers: Vec::new(),
            outputs: Vec::new(),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn configure(&mut self, dividers: &[Divider]) -> Result<(), RateGroupError> {
        if dividers.len() > DIVIDER_SIZE {
            return Err(RateGroupError::TooMany {
                requested: dividers.len(),
                capacity: DIVIDER_SIZE,
            });
        }
        let mut set = DividerSet::new();
        for (index, divider) in dividers.iter().enumerate() {
            if divider.divisor == 0 {
                return Err(RateGroupError::ZeroDivisor { index });
            }
            if divider.offset >= divider.divisor {
                return Err(RateGroupError::OffsetOutOfRange {
                    index,
                    divisor: divider.divisor,
                    offset: divider.offset,
                });
            }
            let _ = set.push(*divider);
        }
        self.dividers = set;
        Ok(())
    }

    pub fn dividers(&self) -> &[Divider] {
        &self.dividers
    }

    pub fn connect(&mut self, index: usize, port: SchedPort) -> Result<(), RateGroupError> {
        if index >= DIVIDER_SIZE {
            return Err(RateGroupError::TooMany {
                requested: index + 1,
                capacity: DIVIDER_SIZE,
            });
        }
        while self.outputs.len() <= index {
            let _ = self.outputs.push(None);
        }
        self.outputs[index] = Some(port);
        Ok(())
    }

    /// One base clock tick. Output `i` fires when its divider matches.
    pub fn cycle(&self) {
        let tick = self.ticks.fetch_add(1, Ordering::AcqRel);
        for (divider, output) in self.dividers.iter().zip(self.outputs.iter()) {
            if !divider.fires_on(tick) {
                continue;
            }
            match output {
                Some(port) => port.invoke(0, tick),
                None => trace!(tick, "divided output not connected"),
            }
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }
}

impl Component for RateGroupDriver {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn initialize(&mut self, _queue_depth: usize, instance: u32) {
        self.core.initialize(instance);
        self.outputs.clear();
        self.ticks.store(0, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct ActiveRateGroup {
    core: ComponentCore,
    task: ActiveTask,
    contexts: Vec<u32, CONNECTION_COUNT_MAX>,
    members: Vec<SchedPort, CONNECTION_COUNT_MAX>,
}

impl ActiveRateGroup {
    pub fn new(name: &str, priority: u32) -> Self {
        Self {
            core: ComponentCore::new(name),
            task: ActiveTask::new(component_name(name), priority),
            contexts: Vec::new(),
            members: Vec::new(),
        }
    }

    /// Binds one context value per output slot.
    pub fn configure(&mut self, contexts: &[u32]) -> Result<(), RateGroupError> {
        self.contexts = Vec::from_slice(contexts).map_err(|()| RateGroupError::TooMany {
            requested: contexts.len(),
            capacity: CONNECTION_COUNT_MAX,
        })?;
        Ok(())
    }

    pub fn contexts(&self) -> &[u32] {
        &self.contexts
    }

    pub fn connect_member(&mut self, port: SchedPort) -> Result<(), RateGroupError> {
        self.members.push(port).map_err(|_| RateGroupError::TooMany {
            requested: CONNECTION_COUNT_MAX + 1,
            capacity: CONNECTION_COUNT_MAX,
        })
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(SchedPort::target)
    }

    pub fn cycle_port(&self) -> Option<SchedPort> {
        self.task.port()
    }

    pub fn stats(&self) -> Arc<TaskStats> {
        self.task.stats()
    }
}

impl Component for ActiveRateGroup {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn initialize(&mut self, queue_depth: usize, instance: u32) {
        self.core.initialize(instance);
        self.task.initialize(queue_depth);
        self.members.clear();
    }
}

impl ActiveComponent for ActiveRateGroup {
    fn task(&self) -> &ActiveTask {
        &self.task
    }

    fn task_mut(&mut self) -> &mut ActiveTask {
        &mut self.task
    }

    fn dispatcher(&self) -> Box<dyn Dispatch> {
        let members = self.members.clone();
        let contexts = self.contexts.clone();
        Box::new(move |_context: u32, tick: u64| {
            for (slot, member) in members.iter().enumerate() {
                let context = contexts.get(slot).copied().unwrap_or(0);
                member.invoke(context, tick);
            }
        })
    }
}
