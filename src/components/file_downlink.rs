use super::task::{ActiveTask, Dispatch, SchedPort, TaskStats};
use super::{component_name, ActiveComponent, Component, ComponentCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const FILE_DOWNLINK_COMMANDS: &[&str] = &["SendFile", "Cancel", "SendPartial"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDownlinkParams {
    pub timeout_ms: u32,
    pub cooldown_ms: u32,
    pub cycle_time_ms: u32,
    pub file_queue_depth: u32,
}

impl Default for FileDownlinkParams {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            cooldown_ms: 1000,
            cycle_time_ms: 1000,
            file_queue_depth: 10,
        }
    }
}

#[derive(Debug)]
pub struct FileDownlink {
    core: ComponentCore,
    task: ActiveTask,
    params: Option<FileDownlinkParams>,
}

impl FileDownlink {
    pub fn new(name: &str, priority: u32) -> Self {
        Self {
            core: ComponentCore::new(name),
            task: ActiveTask::new(component_name(name), priority),
            params: None,
        }
    }

    pub fn configure(&mut self, timeout_ms: u32, cooldown_ms: u32, cycle_time_ms: u32, file_queue_depth: u32) {
        self.params = Some(FileDownlinkParams {
            timeout_ms,
            cooldown_ms,
            cycle_time_ms,
            file_queue_depth,
        });
    }

    pub fn params(&self) -> Option<&FileDownlinkParams> {
        self.params.as_ref()
    }

    pub fn sched_port(&self) -> Option<SchedPort> {
        self.task.port()
    }

    pub fn stats(&self) -> Arc<TaskStats> {
        self.task.stats()
    }
}

impl Component for FileDownlink {
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
        FILE_DOWNLINK_COMMANDS
    }
}

impl ActiveComponent for FileDownlink {
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
