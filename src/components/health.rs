use super::task::{ActiveTask, Dispatch, SchedPort, TaskStats};
use super::{component_name, ActiveComponent, Component, ComponentCore};
use crate::watchdog::WatchdogEntrySet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

pub const HEALTH_COMMANDS: &[&str] = &["HLTH_ENABLE", "HLTH_PING_ENABLE", "HLTH_CHNG_PING"];

/// Health monitor. Each scheduled run strokes the hardware watchdog with the
/// configured code.
#[derive(Debug)]
pub struct Health {
    core: ComponentCore,
    task: ActiveTask,
    entries: Option<WatchdogEntrySet>,
    strokes: Arc<AtomicU64>,
}

impl Health {
    pub fn new(name: &str, priority: u32) -> Self {
        Self {
            core: ComponentCore::new(name),
            task: ActiveTask::new(component_name(name), priority),
            entries: None,
            strokes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_ping_entries(&mut self, entries: WatchdogEntrySet) {
        self.entries = Some(entries);
    }

    pub fn ping_entries(&self) -> Option<&WatchdogEntrySet> {
        self.entries.as_ref()
    }

    pub fn watchdog_strokes(&self) -> u64 {
        self.strokes.load(Ordering::Acquire)
    }

    pub fn sched_port(&self) -> Option<SchedPort> {
        self.task.port()
    }

    pub fn stats(&self) -> Arc<TaskStats> {
        self.task.stats()
    }
}

impl Component for Health {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn initialize(&mut self, queue_depth: usize, instance: u32) {
        self.core.initialize(instance);
        self.task.initialize(queue_depth);
        self.strokes.store(0, Ordering::Release);
    }

    fn commands(&self) -> &'static [&'static str] {
        HEALTH_COMMANDS
    }
}

impl ActiveComponent for Health {
    fn task(&self) -> &ActiveTask {
        &self.task
    }

    fn task_mut(&mut self) -> &mut ActiveTask {
        &mut self.task
    }

    fn dispatcher(&self) -> Box<dyn Dispatch> {
        let strokes = Arc::clone(&self.strokes);
        let code = self.entries.as_ref().map_or(0, WatchdogEntrySet::watchdog_code);
        Box::new(move |_context: u32, tick: u64| {
            strokes.fetch_add(1, Ordering::AcqRel);
            trace!(code, tick, "watchdog stroke");
        })
    }
}
