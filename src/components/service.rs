use super::task::{ActiveTask, Dispatch, SchedPort, TaskStats};
use super::{component_name, ActiveComponent, Component, ComponentCore};
use std::sync::Arc;

/// Active component whose engine lives outside this crate (event logger,
/// telemetry sender, file uplink, file manager). Only its lifecycle surface
/// and scheduled-run accounting are modelled here.
#[derive(Debug)]
pub struct ServiceComponent {
    core: ComponentCore,
    task: ActiveTask,
    commands: &'static [&'static str],
}

impl ServiceComponent {
    pub fn new(name: &str, priority: u32, commands: &'static [&'static str]) -> Self {
        Self {
            core: ComponentCore::new(name),
            task: ActiveTask::new(component_name(name), priority),
            commands,
        }
    }

    pub fn sched_port(&self) -> Option<SchedPort> {
        self.task.port()
    }

    pub fn stats(&self) -> Arc<TaskStats> {
        self.task.stats()
    }
}

impl Component for ServiceComponent {
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
        self.commands
    }
}

impl ActiveComponent for ServiceComponent {
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
