//! Reference collaborators of the obcA topology.
//!
//! Each instance exposes the lifecycle surface the topology drives
//! (initialize, configure, start/stop/join, setup/cleanup) and just enough
//! behaviour to observe it. Active components run on their own thread
//! through [`task::ActiveTask`].

pub mod buffer_manager;
pub mod cmd_disp;
pub mod cmd_seq;
pub mod cmd_splitter;
pub mod com_queue;
pub mod file_downlink;
pub mod framing;
pub mod health;
pub mod prm_db;
pub mod rate_group;
pub mod service;
pub mod socket;
pub mod task;

pub use buffer_manager::BufferManager;
pub use cmd_disp::CommandDispatcher;
pub use cmd_seq::CommandSequencer;
pub use cmd_splitter::{CommandSplitter, Route};
pub use com_queue::ComQueue;
pub use file_downlink::FileDownlink;
pub use framing::{Deframer, Framer, RecvPort};
pub use health::Health;
pub use prm_db::ParamDb;
pub use rate_group::{ActiveRateGroup, BlockDriver, RateGroupDriver};
pub use service::ServiceComponent;
pub use socket::SocketDriver;
pub use task::{ActiveTask, TaskError, TaskSpec};

use arrayvec::ArrayString;
use task::Dispatch;

pub const MAX_COMPONENT_NAME: usize = 32;

pub type ComponentName = ArrayString<MAX_COMPONENT_NAME>;

/// Builds a fixed-capacity name, truncating at a character boundary.
pub fn component_name(name: &str) -> ComponentName {
    let mut out = ComponentName::new();
    for c in name.chars() {
        if out.try_push(c).is_err() {
            break;
        }
    }
    out
}

/// Identity shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentCore {
    name: ComponentName,
    instance: u32,
    id_base: Option<u32>,
    initialized: bool,
}

impl ComponentCore {
    pub fn new(name: &str) -> Self {
        Self {
            name: component_name(name),
            instance: 0,
            id_base: None,
            initialized: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    pub fn id_base(&self) -> Option<u32> {
        self.id_base
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Resets the identity for a fresh setup cycle.
    pub fn initialize(&mut self, instance: u32) {
        self.instance = instance;
        self.id_base = None;
        self.initialized = true;
    }

    pub fn set_id_base(&mut self, base: u32) {
        self.id_base = Some(base);
    }
}

pub trait Component {
    fn core(&self) -> &ComponentCore;

    fn core_mut(&mut self) -> &mut ComponentCore;

    fn initialize(&mut self, _queue_depth: usize, instance: u32) {
        self.core_mut().initialize(instance);
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn set_id_base(&mut self, base: u32) {
        self.core_mut().set_id_base(base);
    }

    fn id_base(&self) -> Option<u32> {
        self.core().id_base()
    }

    /// Command mnemonics, registered at `id_base + index`.
    fn commands(&self) -> &'static [&'static str] {
        &[]
    }
}

/// A component with its own thread and message queue.
pub trait ActiveComponent: Component {
    fn task(&self) -> &ActiveTask;

    fn task_mut(&mut self) -> &mut ActiveTask;

    /// Work run on the component thread for each scheduled message. Built
    /// at start, after wiring and configuration are complete.
    fn dispatcher(&self) -> Box<dyn Dispatch>;

    fn task_spec(&self, stack_size: usize) -> TaskSpec {
        TaskSpec::new(self.name(), self.task().priority(), stack_size)
    }

    fn start(&mut self, spec: TaskSpec) -> Result<(), TaskError> {
        let dispatch = self.dispatcher();
        self.task_mut().start(spec, dispatch)
    }

    fn stop(&mut self) {
        self.task_mut().stop();
    }

    fn join(&mut self) -> Result<(), TaskError> {
        self.task_mut().join()
    }

    fn is_running(&self) -> bool {
        self.task().is_running()
    }
}

pub const RATE_GROUP_1_PRIORITY: u32 = 120;
pub const RATE_GROUP_2_PRIORITY: u32 = 119;
pub const RATE_GROUP_3_PRIORITY: u32 = 118;
pub const CMD_DISP_PRIORITY: u32 = 101;
pub const CMD_SEQ_PRIORITY: u32 = 100;
pub const EVENT_LOGGER_PRIORITY: u32 = 98;
pub const TLM_SEND_PRIORITY: u32 = 97;
pub const FILE_UPLINK_PRIORITY: u32 = 100;
pub const FILE_DOWNLINK_PRIORITY: u32 = 100;
pub const FILE_MANAGER_PRIORITY: u32 = 100;
pub const PRM_DB_PRIORITY: u32 = 96;
pub const HEALTH_PRIORITY: u32 = 95;

const EVENT_LOGGER_COMMANDS: &[&str] = &["SET_EVENT_FILTER", "SET_ID_FILTER", "DUMP_FILTER_STATE"];
const TLM_SEND_COMMANDS: &[&str] = &[];
const FILE_UPLINK_COMMANDS: &[&str] = &[];
const FILE_MANAGER_COMMANDS: &[&str] = &[
    "CreateDirectory",
    "MoveFile",
    "RemoveDirectory",
    "RemoveFile",
    "ShellCommand",
    "AppendFile",
    "FileSize",
];

/// Every instance of the obcA deployment.
#[derive(Debug)]
pub struct ComponentSet {
    pub block_drv: BlockDriver,
    pub rate_group_driver: RateGroupDriver,
    pub rate_group1: ActiveRateGroup,
    pub rate_group2: ActiveRateGroup,
    pub rate_group3: ActiveRateGroup,
    pub cmd_disp: CommandDispatcher,
    pub cmd_seq: CommandSequencer,
    pub event_logger: ServiceComponent,
    pub tlm_send: ServiceComponent,
    pub file_uplink: ServiceComponent,
    pub file_downlink: FileDownlink,
    pub file_manager: ServiceComponent,
    pub prm_db: ParamDb,
    pub health: Health,
    pub buffer_manager: BufferManager,
    pub framer: Framer,
    pub deframer: Deframer,
    pub hub_framer: Framer,
    pub hub_deframer: Deframer,
    pub com_queue: ComQueue,
    pub cmd_splitter: CommandSplitter,
    pub com_driver: SocketDriver,
    pub hub_com_driver: SocketDriver,
}

impl ComponentSet {
    pub fn new() -> Self {
        Self {
            block_drv: BlockDriver::new("a_blockDrv"),
            rate_group_driver: RateGroupDriver::new("a_rateGroupDriver"),
            rate_group1: ActiveRateGroup::new("a_rateGroup1", RATE_GROUP_1_PRIORITY),
            rate_group2: ActiveRateGroup::new("a_rateGroup2", RATE_GROUP_2_PRIORITY),
            rate_group3: ActiveRateGroup::new("a_rateGroup3", RATE_GROUP_3_PRIORITY),
            cmd_disp: CommandDispatcher::new("a_cmdDisp", CMD_DISP_PRIORITY),
            cmd_seq: CommandSequencer::new("a_cmdSeq", CMD_SEQ_PRIORITY),
            event_logger: ServiceComponent::new("a_eventLogger", EVENT_LOGGER_PRIORITY, EVENT_LOGGER_COMMANDS),
            tlm_send: ServiceComponent::new("a_tlmSend", TLM_SEND_PRIORITY, TLM_SEND_COMMANDS),
            file_uplink: ServiceComponent::new("a_fileUplink", FILE_UPLINK_PRIORITY, FILE_UPLINK_COMMANDS),
            file_downlink: FileDownlink::new("a_fileDownlink", FILE_DOWNLINK_PRIORITY),
            file_manager: ServiceComponent::new("a_fileManager", FILE_MANAGER_PRIORITY, FILE_MANAGER_COMMANDS),
            prm_db: ParamDb::new("a_prmDb", PRM_DB_PRIORITY),
            health: Health::new("a_health", HEALTH_PRIORITY),
            buffer_manager: BufferManager::new("a_bufferManager"),
            framer: Framer::new("a_framer"),
            deframer: Deframer::new("a_deframer"),
            hub_framer: Framer::new("a_hubFramer"),
            hub_deframer: Deframer::new("a_hubDeframer"),
            com_queue: ComQueue::new("a_comQueue"),
            cmd_splitter: CommandSplitter::new("a_cmdSplitter"),
            com_driver: SocketDriver::client("a_comDriver"),
            hub_com_driver: SocketDriver::server("a_hubComDriver"),
        }
    }

    /// Every instance in declaration order.
    pub fn all(&self) -> [&dyn Component; 23] {
        [
            &self.block_drv,
            &self.rate_group_driver,
            &self.rate_group1,
            &self.rate_group2,
            &self.rate_group3,
            &self.cmd_disp,
            &self.cmd_seq,
            &self.event_logger,
            &self.tlm_send,
            &self.file_uplink,
            &self.file_downlink,
            &self.file_manager,
            &self.prm_db,
            &self.health,
            &self.buffer_manager,
            &self.framer,
            &self.deframer,
            &self.hub_framer,
            &self.hub_deframer,
            &self.com_queue,
            &self.cmd_splitter,
            &self.com_driver,
            &self.hub_com_driver,
        ]
    }

    pub fn all_mut(&mut self) -> [&mut dyn Component; 23] {
        [
            &mut self.block_drv,
            &mut self.rate_group_driver,
            &mut self.rate_group1,
            &mut self.rate_group2,
            &mut self.rate_group3,
            &mut self.cmd_disp,
            &mut self.cmd_seq,
            &mut self.event_logger,
            &mut self.tlm_send,
            &mut self.file_uplink,
            &mut self.file_downlink,
            &mut self.file_manager,
            &mut self.prm_db,
            &mut self.health,
            &mut self.buffer_manager,
            &mut self.framer,
            &mut self.deframer,
            &mut self.hub_framer,
            &mut self.hub_deframer,
            &mut self.com_queue,
            &mut self.cmd_splitter,
            &mut self.com_driver,
            &mut self.hub_com_driver,
        ]
    }

    /// Active instances in start order.
    pub fn active(&self) -> [&dyn ActiveComponent; 12] {
        [
            &self.rate_group1,
            &self.rate_group2,
            &self.rate_group3,
            &self.cmd_disp,
            &self.cmd_seq,
            &self.event_logger,
            &self.tlm_send,
            &self.file_uplink,
            &self.file_downlink,
            &self.file_manager,
            &self.prm_db,
            &self.health,
        ]
    }

    pub fn active_mut(&mut self) -> [&mut dyn ActiveComponent; 12] {
        [
            &mut self.rate_group1,
            &mut self.rate_group2,
            &mut self.rate_group3,
            &mut self.cmd_disp,
            &mut self.cmd_seq,
            &mut self.event_logger,
            &mut self.tlm_send,
            &mut self.file_uplink,
            &mut self.file_downlink,
            &mut self.file_manager,
            &mut self.prm_db,
            &mut self.health,
        ]
    }

    pub fn find(&self, name: &str) -> Option<&dyn Component> {
        self.all().into_iter().find(|component| component.name() == name)
    }

    /// One interrupt from the block driver into the timing graph.
    pub fn tick(&self) {
        self.block_drv.call_isr(&self.rate_group_driver);
    }
}

impl Default for ComponentSet {
    fn default() -> Self {
        Self::new()
    }
}
