use super::task::{ActiveTask, Dispatch};
use super::{component_name, ActiveComponent, Component, ComponentCore, ComponentName};
use std::collections::BTreeMap;
use thiserror::Error;

pub const CMD_DISP_COMMANDS: &[&str] = &["CMD_NO_OP", "CMD_NO_OP_STRING", "CMD_TEST_CMD_1", "CMD_CLEAR_TRACKING"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("opcode {opcode:#06x} for `{command}` is already registered to `{owner}`")]
pub struct DuplicateOpcode {
    pub opcode: u32,
    pub command: &'static str,
    pub owner: ComponentName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandEntry {
    pub owner: ComponentName,
    pub mnemonic: &'static str,
}

/// Routes opcodes to the component that registered them.
#[derive(Debug)]
pub struct CommandDispatcher {
    core: ComponentCore,
    task: ActiveTask,
    table: BTreeMap<u32, CommandEntry>,
}

impl CommandDispatcher {
    pub fn new(name: &str, priority: u32) -> Self {
        Self {
            core: ComponentCore::new(name),
            task: ActiveTask::new(component_name(name), priority),
            table: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, opcode: u32, owner: &str, mnemonic: &'static str) -> Result<(), DuplicateOpcode> {
        if let Some(existing) = self.table.get(&opcode) {
            return Err(DuplicateOpcode {
                opcode,
                command: mnemonic,
                owner: existing.owner,
            });
        }
        self.table.insert(
            opcode,
            CommandEntry {
                owner: component_name(owner),
                mnemonic,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, opcode: u32) -> Option<&CommandEntry> {
        self.table.get(&opcode)
    }

    pub fn registered(&self) -> usize {
        self.table.len()
    }

    pub fn opcodes_for<'a>(&'a self, owner: &'a str) -> impl Iterator<Item = u32> + 'a {
        self.table
            .iter()
            .filter(move |(_, entry)| entry.owner.as_str() == owner)
            .map(|(opcode, _)| *opcode)
    }
}

impl Component for CommandDispatcher {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn initialize(&mut self, queue_depth: usize, instance: u32) {
        self.core.initialize(instance);
        self.task.initialize(queue_depth);
        self.table.clear();
    }

    fn commands(&self) -> &'static [&'static str] {
        CMD_DISP_COMMANDS
    }
}

impl ActiveComponent for CommandDispatcher {
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
