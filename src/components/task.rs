use super::ComponentName;
use arrayvec::ArrayString;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, trace, warn};

pub const MAX_TASK_NAME: usize = 32;

pub type TaskName = ArrayString<MAX_TASK_NAME>;

/// Scheduling parameters for one execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: TaskName,
    pub priority: u32,
    pub stack_size: usize,
}

impl TaskSpec {
    pub fn new(name: &str, priority: u32, stack_size: usize) -> Self {
        Self {
            name: super::component_name(name),
            priority,
            stack_size,
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task `{name}` started before its component was initialized")]
    NotInitialized { name: TaskName },
    #[error("task `{name}` is already running")]
    AlreadyRunning { name: TaskName },
    #[error("task `{name}` has no endpoint configured")]
    NotConfigured { name: TaskName },
    #[error("failed to spawn task `{name}`: {source}")]
    Spawn {
        name: TaskName,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind `{name}` to {address}: {source}")]
    Bind {
        name: TaskName,
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to build async runtime for `{name}`: {source}")]
    Runtime {
        name: TaskName,
        #[source]
        source: io::Error,
    },
    #[error("task `{name}` panicked before it could be joined")]
    Panicked { name: TaskName },
}

/// Messages delivered to an active component's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMessage {
    /// Scheduled run from a rate group (or the rate group driver).
    Sched { context: u32, tick: u64 },
    /// Ends the dispatch loop once every message queued before it has run.
    Exit,
}

#[derive(Debug, Default)]
pub struct TaskStats {
    runs: AtomicU64,
    dropped: AtomicU64,
    last_tick: AtomicU64,
}

impl TaskStats {
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Acquire)
    }

    /// Scheduled messages discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }

    pub fn last_tick(&self) -> u64 {
        self.last_tick.load(Ordering::Acquire)
    }
}

/// Work executed on the component's own thread for each scheduled message.
pub trait Dispatch: Send + 'static {
    fn dispatch(&mut self, context: u32, tick: u64);
}

impl<F> Dispatch for F
where
    F: FnMut(u32, u64) + Send + 'static,
{
    fn dispatch(&mut self, context: u32, tick: u64) {
        self(context, tick);
    }
}

/// Output port feeding another component's queue.
#[derive(Debug, Clone)]
pub struct SchedPort {
    target: ComponentName,
    sender: SyncSender<TaskMessage>,
    stats: Arc<TaskStats>,
}

impl SchedPort {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Non-blocking; a full queue drops the message and counts it.
    pub fn invoke(&self, context: u32, tick: u64) {
        match self.sender.try_send(TaskMessage::Sched { context, tick }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::AcqRel);
                warn!(target_component = %self.target, tick, "queue full, scheduled run dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!(target_component = %self.target, tick, "queue closed, scheduled run ignored");
            }
        }
    }
}

/// The thread of control behind an active component.
///
/// The queue exists from `initialize` on so ports can be wired before the
/// thread is started; `stop` and `join` on a task that never started do nothing.
#[derive(Debug)]
pub struct ActiveTask {
    owner: ComponentName,
    priority: u32,
    sender: Option<SyncSender<TaskMessage>>,
    receiver: Option<Receiver<TaskMessage>>,
    handle: Option<JoinHandle<()>>,
    stats: Arc<TaskStats>,
    spec: Option<TaskSpec>,
}

impl ActiveTask {
    pub fn new(owner: ComponentName, priority: u32) -> Self {
        Self {
            owner,
            priority,
            sender: None,
            receiver: None,
            handle: None,
            stats: Arc::new(TaskStats::default()),
            spec: None,
        }
    }

    /// Creates a fresh queue. Ports handed out by a previous cycle go stale.
    pub fn initialize(&mut self, queue_depth: usize) {
        let (sender, receiver) = mpsc::sync_channel(queue_depth.max(1));
        self.sender = Some(sender);
        self.receiver = Some(receiver);
        self.handle = None;
        self.spec = None;
        self.stats = Arc::new(TaskStats::default());
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn port(&self) -> Option<SchedPort> {
        self.sender.as_ref().map(|sender| SchedPort {
            target: self.owner,
            sender: sender.clone(),
            stats: Arc::clone(&self.stats),
        })
    }

    pub fn stats(&self) -> Arc<TaskStats> {
        Arc::clone(&self.stats)
    }

    pub fn spec(&self) -> Option<&TaskSpec> {
        self.spec.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, spec: TaskSpec, mut dispatch: Box<dyn Dispatch>) -> Result<(), TaskError> {
        if self.handle.is_some() {
            return Err(TaskError::AlreadyRunning { name: spec.name });
        }
        let receiver = self
            .receiver
            .take()
            .ok_or(TaskError::NotInitialized { name: spec.name })?;
        let stats = Arc::clone(&self.stats);

        let handle = thread::Builder::new()
            .name(spec.name.to_string())
            .stack_size(spec.stack_size)
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    match message {
                        TaskMessage::Sched { context, tick } => {
                            dispatch.dispatch(context, tick);
                            stats.last_tick.store(tick, Ordering::Release);
                            stats.runs.fetch_add(1, Ordering::AcqRel);
                        }
                        TaskMessage::Exit => break,
                    }
                }
            })
            .map_err(|source| TaskError::Spawn { name: spec.name, source })?;

        debug!(task = %spec.name, priority = spec.priority, stack = spec.stack_size, "task started");
        self.handle = Some(handle);
        self.spec = Some(spec);
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        if let Some(sender) = &self.sender {
            // Blocking send: the exit request must not be lost to a full queue.
            if sender.send(TaskMessage::Exit).is_err() {
                trace!(task = %self.owner, "queue already closed on stop");
            }
        }
    }

    pub fn join(&mut self) -> Result<(), TaskError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| TaskError::Panicked { name: self.owner }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::component_name;

    fn spec() -> TaskSpec {
        TaskSpec::new("test_task", 10, 256 * 1024)
    }

    #[test]
    fn test_stop_and_join_without_start_are_noops() {
        let mut task = ActiveTask::new(component_name("idle"), 1);
        task.initialize(4);
        task.stop();
        assert!(task.join().is_ok());
        assert!(!task.is_running());
    }

    #[test]
    fn test_start_requires_initialize() {
        let mut task = ActiveTask::new(component_name("raw"), 1);
        let result = task.start(spec(), Box::new(|_: u32, _: u64| {}));
        assert!(matches!(result, Err(TaskError::NotInitialized { .. })));
    }

    #[test]
    fn test_queued_runs_drain_before_exit() {
        let mut task = ActiveTask::new(component_name("worker"), 1);
        task.initialize(16);
        let port = task.port().unwrap();
        for tick in 0..5 {
            port.invoke(0, tick);
        }
        task.start(spec(), Box::new(|_: u32, _: u64| {})).unwrap();
        task.stop();
        task.join().unwrap();

        let stats = task.stats();
        assert_eq!(stats.runs(), 5);
        assert_eq!(stats.dropped(), 0);
        assert_eq!(stats.last_tick(), 4);
    }

    #[test]
    fn test_full_queue_counts_drops() {
        let mut task = ActiveTask::new(component_name("slow"), 1);
        task.initialize(2);
        let port = task.port().unwrap();
        for tick in 0..5 {
            port.invoke(0, tick);
        }
        assert_eq!(task.stats().dropped(), 3);
    }

    #[test]
    fn test_double_start_rejected() {
        let mut task = ActiveTask::new(component_name("twice"), 1);
        task.initialize(2);
        task.start(spec(), Box::new(|_: u32, _: u64| {})).unwrap();
        let second = task.start(spec(), Box::new(|_: u32, _: u64| {}));
        assert!(matches!(second, Err(TaskError::AlreadyRunning { .. })));
        task.stop();
        task.join().unwrap();
    }
}
