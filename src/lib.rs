//! # obcdeploy
//!
//! Deployment lifecycle for the obcA flight computer topology: brings a fixed
//! graph of components up in order, binds their project configuration, drives
//! a simulated clock when no hardware timer is present, and tears everything
//! down again without leaking what setup acquired.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use obcdeploy::{DeploymentConfig, Topology, TopologyState};
//! use std::time::Duration;
//!
//! let mut topology = Topology::new(DeploymentConfig::default());
//! let state = TopologyState::without_network();
//! topology.setup(&state)?;
//!
//! let control = topology.cycle_control();
//! std::thread::spawn(move || {
//!     std::thread::sleep(Duration::from_secs(5));
//!     control.stop();
//! });
//! topology.start_simulated_cycle(Duration::from_secs(1))?;
//!
//! topology.teardown(&state)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - [`topology`] - Deployment context and the lifecycle state machine
//! - [`binder`] - Project-specific configuration of each component
//! - [`sizing`] - Buffer pool sizing from platform limits
//! - [`queue`] - Downlink queue priority lanes
//! - [`watchdog`] - Health ping table
//! - [`clock`] - Simulated cycle source
//! - [`network`] - Uplink and hub socket tasks
//! - [`link`] - Command routing and response downlink each cycle
//! - [`components`] - The component instances the topology drives
//! - [`config`] - Launch state and deployment constants

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::new_without_default)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod allocator;
pub mod binder;
pub mod clock;
pub mod components;
pub mod config;
pub mod link;
pub mod logging;
pub mod network;
pub mod queue;
pub mod sizing;
pub mod topology;
pub mod watchdog;

// Re-export main public types for convenience
pub use allocator::{MallocAllocator, MemAllocator};
pub use clock::SimulatedClock;
pub use config::{DeploymentConfig, TopologyState};
pub use sizing::{PlatformConstants, ResourceSizingSpec, SizeClass};
pub use topology::{LifecycleEvent, LifecycleState, TeardownReport, Topology, TopologyError};
