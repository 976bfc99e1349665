//! The obcA deployment context and its lifecycle.
//!
//! A [`Topology`] owns the configuration, the allocator and every component
//! instance. Setup runs as a fixed sequence of phases, each a public method
//! guarded by the current [`LifecycleState`]:
//!
//! ```text
//! Uninitialized ─initialize─▶ Initialized ─assign_ids─▶ IdsAssigned ─connect─▶ Wired
//!   ─register_commands─▶ CommandsRegistered ─configure─▶ Configured
//!   ─start_tasks─▶ TasksRunning ─teardown─▶ TasksStopped ─▶ TornDown
//! ```
//!
//! `TornDown` may be set up again. Teardown runs every step even when some
//! fail and reports all failures together.
//!
//! The simulated cycle flag belongs to the topology, not to a setup cycle.
//! It is created with the topology and stopped at most once; a stop request
//! made at any point, even before `setup`, is never undone.

use crate::allocator::{AllocError, MallocAllocator, MemAllocator};
use crate::binder::ConfigurationBinder;
use crate::clock::SimulatedClock;
use crate::components::cmd_disp::DuplicateOpcode;
use crate::components::rate_group::RateGroupError;
use crate::components::task::{SchedPort, TaskError};
use crate::components::{component_name, Component, ComponentName, ComponentSet};
use crate::config::{ConfigError, DeploymentConfig, TopologyState};
use crate::link::{self, LinkActivity};
use crate::network;
use crate::queue::QueueError;
use crate::sizing::SizingError;
use crate::watchdog::WatchdogError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Spacing between the id ranges of consecutive component instances.
pub const ID_BASE_STRIDE: u32 = 0x0100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    IdsAssigned,
    Wired,
    CommandsRegistered,
    Configured,
    TasksRunning,
    TasksStopped,
    TornDown,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initialized => "initialized",
            LifecycleState::IdsAssigned => "ids_assigned",
            LifecycleState::Wired => "wired",
            LifecycleState::CommandsRegistered => "commands_registered",
            LifecycleState::Configured => "configured",
            LifecycleState::TasksRunning => "tasks_running",
            LifecycleState::TasksStopped => "tasks_stopped",
            LifecycleState::TornDown => "torn_down",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn state_names(states: &[LifecycleState]) -> String {
    states.iter().map(LifecycleState::as_str).collect::<Vec<_>>().join(" | ")
}

const SETUP_FROM: &[LifecycleState] = &[LifecycleState::Uninitialized, LifecycleState::TornDown];
const ASSIGN_IDS_FROM: &[LifecycleState] = &[LifecycleState::Initialized];
const CONNECT_FROM: &[LifecycleState] = &[LifecycleState::IdsAssigned];
const REGISTER_FROM: &[LifecycleState] = &[LifecycleState::Wired];
const CONFIGURE_FROM: &[LifecycleState] = &[LifecycleState::CommandsRegistered];
const START_FROM: &[LifecycleState] = &[LifecycleState::Configured];
const CYCLE_FROM: &[LifecycleState] = &[LifecycleState::TasksRunning];
const TEARDOWN_FROM: &[LifecycleState] = &[
    LifecycleState::Initialized,
    LifecycleState::IdsAssigned,
    LifecycleState::Wired,
    LifecycleState::CommandsRegistered,
    LifecycleState::Configured,
    LifecycleState::TasksRunning,
    LifecycleState::TasksStopped,
];

/// Resources acquired during configuration, each released exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseAction {
    CommandSequenceBuffer,
    BufferManagerPools,
    ComQueueStorage,
}

impl ReleaseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseAction::CommandSequenceBuffer => "command sequence buffer",
            ReleaseAction::BufferManagerPools => "buffer manager pools",
            ReleaseAction::ComQueueStorage => "com queue storage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Phase(LifecycleState),
    Configured(ComponentName),
    Acquired(ReleaseAction),
    ParametersLoaded(usize),
    TaskStarted(ComponentName),
    NetworkStarted(&'static str),
    TaskStopped(ComponentName),
    Released(ReleaseAction),
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("`{phase}` requires state {}, but the topology is {actual}", state_names(.expected))]
    OutOfOrder {
        phase: &'static str,
        expected: &'static [LifecycleState],
        actual: LifecycleState,
    },
    #[error("resource allocation failed: {0}")]
    Allocation(#[from] AllocError),
    #[error("invalid health ping table: {0}")]
    Watchdog(#[from] WatchdogError),
    #[error("invalid queue configuration: {0}")]
    Queue(#[from] QueueError),
    #[error("invalid rate group configuration: {0}")]
    RateGroup(#[from] RateGroupError),
    #[error(transparent)]
    DuplicateOpcode(#[from] DuplicateOpcode),
    #[error("`{component}` has no input port to connect")]
    Unwired { component: ComponentName },
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sizing(#[from] SizingError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    pub step: String,
    pub message: String,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("teardown finished with {} failure(s)", .failures.len())]
pub struct TeardownReport {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    fn record(&mut self, step: impl Into<String>, message: impl fmt::Display) {
        let failure = TeardownFailure {
            step: step.into(),
            message: message.to_string(),
        };
        error!(step = %failure.step, error = %failure.message, "teardown step failed");
        self.failures.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Topology {
    config: DeploymentConfig,
    allocator: Arc<dyn MemAllocator>,
    components: ComponentSet,
    state: LifecycleState,
    history: Vec<LifecycleEvent>,
    releases: Vec<ReleaseAction>,
    clock: Arc<SimulatedClock>,
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("state", &self.state)
            .field("releases", &self.releases)
            .field("components", &self.components)
            .finish()
    }
}

impl Topology {
    pub fn new(config: DeploymentConfig) -> Self {
        Self::with_allocator(config, Arc::new(MallocAllocator::new()))
    }

    pub fn with_allocator(config: DeploymentConfig, allocator: Arc<dyn MemAllocator>) -> Self {
        Self {
            config,
            allocator,
            components: ComponentSet::new(),
            state: LifecycleState::Uninitialized,
            history: Vec::new(),
            releases: Vec::new(),
            clock: Arc::new(SimulatedClock::new()),
        }
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Events of the current setup cycle, oldest first.
    pub fn history(&self) -> &[LifecycleEvent] {
        &self.history
    }

    pub fn components(&self) -> &ComponentSet {
        &self.components
    }

    /// Resources currently held, in acquisition order.
    pub fn pending_releases(&self) -> &[ReleaseAction] {
        &self.releases
    }

    fn expect(&self, phase: &'static str, expected: &'static [LifecycleState]) -> Result<(), TopologyError> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(TopologyError::OutOfOrder {
                phase,
                expected,
                actual: self.state,
            })
        }
    }

    fn enter(&mut self, state: LifecycleState) {
        debug!(from = %self.state, to = %state, "lifecycle transition");
        self.state = state;
        self.history.push(LifecycleEvent::Phase(state));
    }

    /// Brings every instance to its initial state and starts a new history.
    pub fn initialize(&mut self, state: &TopologyState) -> Result<(), TopologyError> {
        self.expect("initialize", SETUP_FROM)?;
        self.history.clear();

        let depth = self.config.active_queue_depth;
        for (instance, component) in self.components.all_mut().into_iter().enumerate() {
            component.initialize(depth, instance as u32);
        }
        match state.uplink_endpoint() {
            Some((host, port)) => info!(host, port, "initializing topology with uplink"),
            None => info!("initializing topology without uplink"),
        }
        self.enter(LifecycleState::Initialized);
        Ok(())
    }

    pub fn assign_ids(&mut self) -> Result<(), TopologyError> {
        self.expect("assign_ids", ASSIGN_IDS_FROM)?;
        for (index, component) in self.components.all_mut().into_iter().enumerate() {
            component.set_id_base(ID_BASE_STRIDE * (index as u32 + 1));
        }
        self.enter(LifecycleState::IdsAssigned);
        Ok(())
    }

    /// Wires the fixed port graph of the deployment.
    pub fn connect(&mut self) -> Result<(), TopologyError> {
        self.expect("connect", CONNECT_FROM)?;
        let c = &mut self.components;

        c.block_drv.connect_cycle_out();
        let groups = [
            sched_port(&c.rate_group1, c.rate_group1.cycle_port())?,
            sched_port(&c.rate_group2, c.rate_group2.cycle_port())?,
            sched_port(&c.rate_group3, c.rate_group3.cycle_port())?,
        ];
        for (index, port) in groups.into_iter().enumerate() {
            c.rate_group_driver.connect(index, port)?;
        }

        c.rate_group1
            .connect_member(sched_port(&c.tlm_send, c.tlm_send.sched_port())?)?;
        c.rate_group1
            .connect_member(sched_port(&c.file_downlink, c.file_downlink.sched_port())?)?;
        c.rate_group2
            .connect_member(sched_port(&c.cmd_seq, c.cmd_seq.sched_port())?)?;
        c.rate_group3
            .connect_member(sched_port(&c.health, c.health.sched_port())?)?;

        c.com_driver.connect_recv(c.deframer.recv_port());
        c.hub_com_driver.connect_recv(c.hub_deframer.recv_port());

        self.enter(LifecycleState::Wired);
        Ok(())
    }

    /// Registers each component's commands at `id_base + index`.
    pub fn register_commands(&mut self) -> Result<(), TopologyError> {
        self.expect("register_commands", REGISTER_FROM)?;
        let mut registrations = Vec::new();
        for component in self.components.all() {
            let Some(base) = component.id_base() else {
                continue;
            };
            for (offset, mnemonic) in component.commands().iter().enumerate() {
                registrations.push((base + offset as u32, component_name(component.name()), *mnemonic));
            }
        }
        for &(opcode, owner, mnemonic) in &registrations {
            self.components.cmd_disp.register(opcode, &owner, mnemonic)?;
        }
        info!(commands = registrations.len(), "commands registered");
        self.enter(LifecycleState::CommandsRegistered);
        Ok(())
    }

    /// Applies the project configuration. Allocation failure aborts setup;
    /// anything acquired before the failure is still released by teardown.
    pub fn configure(&mut self) -> Result<(), TopologyError> {
        self.expect("configure", CONFIGURE_FROM)?;
        let mut binder =
            ConfigurationBinder::new(&self.config, &self.allocator, &mut self.history, &mut self.releases)?;
        binder.bind_all(&mut self.components)?;
        self.enter(LifecycleState::Configured);
        Ok(())
    }

    /// Checks loaded parameters against each component's id range. Opt-in
    /// through `DeploymentConfig::load_parameters`. Returns how many were matched.
    pub fn load_parameters(&mut self) -> Result<usize, TopologyError> {
        self.expect("load_parameters", START_FROM)?;
        let prm_db = &self.components.prm_db;
        let mut matched = 0;
        for component in self.components.all() {
            if let Some(base) = component.id_base() {
                let count = prm_db.count_in_range(base, ID_BASE_STRIDE);
                if count > 0 {
                    debug!(component = component.name(), count, "parameters available");
                }
                matched += count;
            }
        }
        let unmatched = prm_db.len().saturating_sub(matched);
        if unmatched > 0 {
            warn!(unmatched, "parameters with no owning component");
        }
        info!(matched, "parameters loaded");
        self.history.push(LifecycleEvent::ParametersLoaded(matched));
        Ok(matched)
    }

    /// Starts every active component, then the socket tasks.
    pub fn start_tasks(&mut self, state: &TopologyState) -> Result<(), TopologyError> {
        self.expect("start_tasks", START_FROM)?;
        let stack_size = self.config.task_stack_size;
        for component in self.components.active_mut() {
            let spec = component.task_spec(stack_size);
            component.start(spec)?;
            self.history
                .push(LifecycleEvent::TaskStarted(component_name(component.name())));
        }
        let started = network::start_network(&mut self.components, state, &self.config)?;
        self.history
            .extend(started.into_iter().map(LifecycleEvent::NetworkStarted));
        self.enter(LifecycleState::TasksRunning);
        Ok(())
    }

    /// Runs the full setup sequence.
    pub fn setup(&mut self, state: &TopologyState) -> Result<(), TopologyError> {
        self.initialize(state)?;
        self.assign_ids()?;
        self.connect()?;
        self.register_commands()?;
        self.configure()?;
        if self.config.load_parameters {
            self.load_parameters()?;
        }
        self.start_tasks(state)?;
        info!("topology setup complete");
        Ok(())
    }

    /// Stops and joins every task, then releases every held resource in
    /// reverse acquisition order. No step is skipped because another failed.
    pub fn teardown(&mut self, state: &TopologyState) -> Result<(), TeardownReport> {
        let mut report = TeardownReport::default();
        if let Err(e) = self.expect("teardown", TEARDOWN_FROM) {
            report.record("teardown", e);
            return Err(report);
        }
        debug!(uplink = state.uplink_endpoint().is_some(), "tearing down topology");

        for component in self.components.active_mut() {
            component.stop();
        }
        for component in self.components.active_mut() {
            let was_running = component.is_running();
            match component.join() {
                Ok(()) if was_running => self
                    .history
                    .push(LifecycleEvent::TaskStopped(component_name(component.name()))),
                Ok(()) => {}
                Err(e) => report.record(format!("join {}", component.name()), e),
            }
        }
        self.enter(LifecycleState::TasksStopped);

        for (task, e) in network::stop_network(&mut self.components) {
            report.record(format!("join {task}"), e);
        }

        while let Some(action) = self.releases.pop() {
            let result = match action {
                ReleaseAction::CommandSequenceBuffer => {
                    self.components.cmd_seq.deallocate_buffer(self.allocator.as_ref())
                }
                ReleaseAction::BufferManagerPools => self.components.buffer_manager.cleanup(),
                ReleaseAction::ComQueueStorage => {
                    self.components.com_queue.release_storage(self.allocator.as_ref())
                }
            };
            match result {
                Ok(()) => {
                    debug!(resource = action.as_str(), "released");
                    self.history.push(LifecycleEvent::Released(action));
                }
                Err(e) => report.record(format!("release {}", action.as_str()), e),
            }
        }

        self.enter(LifecycleState::TornDown);
        if report.is_empty() {
            info!("topology teardown complete");
            Ok(())
        } else {
            Err(report)
        }
    }

    /// One tick into the timing graph, as the hardware interrupt would deliver,
    /// followed by a pass over the command and downlink paths.
    pub fn tick(&mut self) -> LinkActivity {
        cycle(&mut self.components)
    }

    /// Drives the timing graph from the calling thread until
    /// [`stop_simulated_cycle`](Self::stop_simulated_cycle). Returns the tick count.
    pub fn start_simulated_cycle(&mut self, interval: Duration) -> Result<u64, TopologyError> {
        self.expect("start_simulated_cycle", CYCLE_FROM)?;
        let clock = Arc::clone(&self.clock);
        let components = &mut self.components;
        Ok(clock.start(interval, || {
            cycle(components);
        }))
    }

    pub fn stop_simulated_cycle(&self) {
        self.clock.stop();
    }

    /// Handle for stopping the cycle from another thread. Every handle refers
    /// to the same flag for the lifetime of the topology.
    pub fn cycle_control(&self) -> Arc<SimulatedClock> {
        Arc::clone(&self.clock)
    }
}

fn cycle(components: &mut ComponentSet) -> LinkActivity {
    components.tick();
    link::service(components)
}

fn sched_port<T: Component + ?Sized>(
    component: &T,
    port: Option<SchedPort>,
) -> Result<SchedPort, TopologyError> {
    port.ok_or_else(|| TopologyError::Unwired {
        component: component_name(component.name()),
    })
}

impl Drop for Topology {
    fn drop(&mut self) {
        if TEARDOWN_FROM.contains(&self.state) {
            warn!(state = %self.state, "topology dropped without teardown");
            if let Err(report) = self.teardown(&TopologyState::without_network()) {
                error!(failures = report.failures.len(), "teardown on drop reported failures");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> Topology {
        let config = DeploymentConfig {
            hub_address: "127.0.0.1".to_string(),
            hub_port: 0,
            ..DeploymentConfig::default()
        };
        Topology::new(config)
    }

    #[test]
    fn test_phases_reject_wrong_order() {
        let mut topology = topology();
        let err = topology.connect().unwrap_err();
        assert!(matches!(
            err,
            TopologyError::OutOfOrder {
                phase: "connect",
                actual: LifecycleState::Uninitialized,
                ..
            }
        ));
        assert!(err.to_string().contains("ids_assigned"));
    }

    #[test]
    fn test_teardown_before_setup_rejected() {
        let mut topology = topology();
        let report = topology.teardown(&TopologyState::without_network()).unwrap_err();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(topology.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn test_ids_are_distinct_ranges() {
        let mut topology = topology();
        topology.initialize(&TopologyState::without_network()).unwrap();
        topology.assign_ids().unwrap();
        let mut bases: Vec<u32> = topology
            .components()
            .all()
            .into_iter()
            .filter_map(|c| c.id_base())
            .collect();
        bases.dedup();
        assert_eq!(bases.len(), 23);
        assert!(bases.windows(2).all(|w| w[1] - w[0] == ID_BASE_STRIDE));
    }

    #[test]
    fn test_commands_registered_under_owner_range() {
        let mut topology = topology();
        topology.initialize(&TopologyState::without_network()).unwrap();
        topology.assign_ids().unwrap();
        topology.connect().unwrap();
        topology.register_commands().unwrap();

        let components = topology.components();
        let seq_base = components.cmd_seq.id_base().unwrap();
        let entry = components.cmd_disp.lookup(seq_base).unwrap();
        assert_eq!(entry.owner.as_str(), "a_cmdSeq");
        assert_eq!(entry.mnemonic, "CS_RUN");
        assert_eq!(components.cmd_disp.opcodes_for("a_health").count(), 3);
    }

    #[test]
    fn test_drop_releases_held_resources() {
        let allocator = Arc::new(MallocAllocator::new());
        {
            let shared: Arc<dyn MemAllocator> = allocator.clone();
            let mut topology = Topology::with_allocator(topology().config().clone(), shared);
            topology.setup(&TopologyState::without_network()).unwrap();
            assert_eq!(allocator.stats().outstanding, 3);
        }
        assert_eq!(allocator.stats().outstanding, 0);
    }
}
