use super::{Component, ComponentCore};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Handled by this deployment's command dispatcher.
    Local,
    /// Forwarded to the hub link.
    Remote,
}

/// Routes uplinked commands by opcode: everything at or above the remote
/// base goes to the hub.
#[derive(Debug)]
pub struct CommandSplitter {
    core: ComponentCore,
    remote_base: Option<u32>,
    local: AtomicU64,
    remote: AtomicU64,
}

impl CommandSplitter {
    pub fn new(name: &str) -> Self {
        Self {
            core: ComponentCore::new(name),
            remote_base: None,
            local: AtomicU64::new(0),
            remote: AtomicU64::new(0),
        }
    }

    pub fn configure(&mut self, remote_base: u32) {
        self.remote_base = Some(remote_base);
    }

    pub fn remote_base(&self) -> Option<u32> {
        self.remote_base
    }

    /// Unconfigured splitters keep every command local.
    pub fn route(&self, opcode: u32) -> Route {
        match self.remote_base {
            Some(base) if opcode >= base => {
                self.remote.fetch_add(1, Ordering::Relaxed);
                Route::Remote
            }
            _ => {
                self.local.fetch_add(1, Ordering::Relaxed);
                Route::Local
            }
        }
    }

    pub fn routed(&self) -> (u64, u64) {
        (self.local.load(Ordering::Relaxed), self.remote.load(Ordering::Relaxed))
    }
}

impl Component for CommandSplitter {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn initialize(&mut self, _queue_depth: usize, instance: u32) {
        self.core.initialize(instance);
        self.remote_base = None;
        self.local.store(0, Ordering::Relaxed);
        self.remote.store(0, Ordering::Relaxed);
    }
}
