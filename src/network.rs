//! Socket tasks started after the component tasks.
//!
//! The uplink client starts only when the launch state names an endpoint.
//! The hub server is always configured and started. Both are stopped and
//! joined at teardown whether or not they ever ran.

use crate::components::task::{TaskError, TaskSpec};
use crate::components::ComponentSet;
use crate::config::{DeploymentConfig, TopologyState};
use std::time::Duration;
use tracing::{info, warn};

pub const UPLINK_TASK_NAME: &str = "ReceiveTask";
pub const HUB_TASK_NAME: &str = "hub";

/// Which socket tasks a launch state calls for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPlan {
    pub uplink: Option<(String, u16)>,
    pub hub: (String, u16),
}

impl NetworkPlan {
    pub fn from_state(state: &TopologyState, config: &DeploymentConfig) -> Self {
        Self {
            uplink: state
                .uplink_endpoint()
                .map(|(host, port)| (host.to_string(), port)),
            hub: (config.hub_address.clone(), config.hub_port),
        }
    }

    pub fn starts_uplink(&self) -> bool {
        self.uplink.is_some()
    }
}

/// Configures and starts the socket tasks. Returns the names of the tasks started.
pub fn start_network(
    components: &mut ComponentSet,
    state: &TopologyState,
    config: &DeploymentConfig,
) -> Result<Vec<&'static str>, TaskError> {
    let plan = NetworkPlan::from_state(state, config);
    let reconnect = Duration::from_millis(config.reconnect_interval_ms);
    let mut started = Vec::with_capacity(2);

    match &plan.uplink {
        Some((host, port)) => {
            components.com_driver.configure(host, *port);
            components.com_driver.set_reconnect_interval(reconnect);
            let spec = TaskSpec::new(UPLINK_TASK_NAME, config.comm_priority, config.task_stack_size);
            components.com_driver.start(&spec)?;
            started.push(UPLINK_TASK_NAME);
        }
        None => info!("no uplink endpoint given, running without uplink"),
    }

    let (hub_host, hub_port) = &plan.hub;
    components.hub_com_driver.configure(hub_host, *hub_port);
    components.cmd_splitter.configure(config.cmd_splitter_remote_base);
    let spec = TaskSpec::new(HUB_TASK_NAME, config.comm_priority, config.task_stack_size);
    components.hub_com_driver.start(&spec)?;
    started.push(HUB_TASK_NAME);

    Ok(started)
}

/// Stops and joins both socket tasks. Join failures are returned per driver
/// after both have been attempted.
pub fn stop_network(components: &mut ComponentSet) -> Vec<(&'static str, TaskError)> {
    let mut failures = Vec::new();
    for (name, driver) in [
        (UPLINK_TASK_NAME, &mut components.com_driver),
        (HUB_TASK_NAME, &mut components.hub_com_driver),
    ] {
        driver.stop();
        if let Err(e) = driver.join() {
            warn!(task = name, error = %e, "socket task did not join cleanly");
            failures.push((name, e));
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_follows_launch_state() {
        let config = DeploymentConfig::default();
        let plan = NetworkPlan::from_state(&TopologyState::without_network(), &config);
        assert!(!plan.starts_uplink());
        assert_eq!(plan.hub, ("0.0.0.0".to_string(), 50500));

        let plan = NetworkPlan::from_state(&TopologyState::new("127.0.0.1", 50000), &config);
        assert_eq!(plan.uplink, Some(("127.0.0.1".to_string(), 50000)));
    }

    #[test]
    fn test_stop_never_started_is_noop() {
        let mut components = ComponentSet::new();
        assert!(stop_network(&mut components).is_empty());
    }
}
