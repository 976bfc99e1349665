//! Project-specific configuration of the component graph.
//!
//! Every binding runs exactly once per setup cycle, after command
//! registration and before any task starts. Allocations are recorded as
//! release actions as soon as they succeed, so a failure part-way through
//! still leaves teardown with a complete list of what to give back.

use crate::allocator::MemAllocator;
use crate::components::framing::{FprimeDeframing, FprimeFraming};
use crate::components::rate_group::CONNECTION_COUNT_MAX;
use crate::components::{component_name, Component, ComponentSet};
use crate::config::DeploymentConfig;
use crate::sizing::{ResourceSizingSpec, SizeClass, SizingError};
use crate::topology::{LifecycleEvent, ReleaseAction, TopologyError};
use crate::watchdog::WatchdogEntrySet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Allocation identifier passed to the allocator. The heap allocator ignores it.
pub const ALLOCATION_ID: u32 = 0;

pub struct ConfigurationBinder<'a> {
    config: &'a DeploymentConfig,
    allocator: &'a Arc<dyn MemAllocator>,
    sizing: ResourceSizingSpec,
    events: &'a mut Vec<LifecycleEvent>,
    releases: &'a mut Vec<ReleaseAction>,
}

impl<'a> ConfigurationBinder<'a> {
    pub fn new(
        config: &'a DeploymentConfig,
        allocator: &'a Arc<dyn MemAllocator>,
        events: &'a mut Vec<LifecycleEvent>,
        releases: &'a mut Vec<ReleaseAction>,
    ) -> Result<Self, SizingError> {
        Ok(Self {
            config,
            allocator,
            sizing: ResourceSizingSpec::try_compute(&config.platform)?,
            events,
            releases,
        })
    }

    pub fn sizing(&self) -> &ResourceSizingSpec {
        &self.sizing
    }

    fn bound(&mut self, component: &dyn Component) {
        debug!(component = component.name(), "configured");
        self.events.push(LifecycleEvent::Configured(component_name(component.name())));
    }

    fn acquired(&mut self, action: ReleaseAction) {
        self.releases.push(action);
        self.events.push(LifecycleEvent::Acquired(action));
    }

    /// Applies every binding in deployment order.
    pub fn bind_all(&mut self, components: &mut ComponentSet) -> Result<(), TopologyError> {
        let config = self.config;

        components
            .cmd_seq
            .allocate_buffer(ALLOCATION_ID, self.allocator.as_ref(), config.cmd_seq_buffer_size)?;
        self.acquired(ReleaseAction::CommandSequenceBuffer);
        self.bound(&components.cmd_seq);

        components.rate_group_driver.configure(&config.rate_group_dividers)?;
        self.bound(&components.rate_group_driver);

        let contexts = [0u32; CONNECTION_COUNT_MAX];
        for group in [
            &mut components.rate_group1,
            &mut components.rate_group2,
            &mut components.rate_group3,
        ] {
            group.configure(&contexts)?;
            self.bound(&*group);
        }

        let downlink = config.file_downlink;
        components.file_downlink.configure(
            downlink.timeout_ms,
            downlink.cooldown_ms,
            downlink.cycle_time_ms,
            downlink.file_queue_depth,
        );
        self.bound(&components.file_downlink);

        components.prm_db.configure(config.param_file.clone());
        match components.prm_db.read_param_file() {
            Ok(count) => debug!(count, "parameter file read"),
            Err(e) => warn!(error = %e, "parameter file not loaded, starting with an empty database"),
        }
        self.bound(&components.prm_db);

        let entries = WatchdogEntrySet::reference(config.health_watchdog_code, config.ping_warn, config.ping_fatal)?;
        components.health.set_ping_entries(entries);
        self.bound(&components.health);

        let bins = self.sizing.bins();
        components.buffer_manager.setup(
            config.buffer_manager_id,
            ALLOCATION_ID,
            Arc::clone(self.allocator),
            &bins,
        )?;
        self.acquired(ReleaseAction::BufferManagerPools);
        self.bound(&components.buffer_manager);

        let max_payload = self.sizing.largest_payload(SizeClass::Deframer);
        components.framer.setup(Box::new(FprimeFraming::new(max_payload)));
        components.deframer.setup(Box::new(FprimeDeframing::new(max_payload)));
        components.hub_framer.setup(Box::new(FprimeFraming::new(max_payload)));
        components.hub_deframer.setup(Box::new(FprimeDeframing::new(max_payload)));
        self.bound(&components.framer);
        self.bound(&components.deframer);
        self.bound(&components.hub_framer);
        self.bound(&components.hub_deframer);

        components
            .com_queue
            .configure(config.queue_table, ALLOCATION_ID, self.allocator.as_ref())?;
        self.acquired(ReleaseAction::ComQueueStorage);
        self.bound(&components.com_queue);

        info!(
            framer = self.sizing.bin(SizeClass::Framer).buffer_size,
            deframer = self.sizing.bin(SizeClass::Deframer).buffer_size,
            driver = self.sizing.bin(SizeClass::Driver).buffer_size,
            releases = self.releases.len(),
            "component configuration bound"
        );
        Ok(())
    }
}
