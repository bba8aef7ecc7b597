//! `icsim-runtime` - device runtime for industrial-control testbeds.
//!
//! A testbed is a set of independently scheduled devices: one process
//! simulation owning the physics, controllers owning tags and serving them
//! over a register protocol, and operator panels reading them remotely. The
//! devices share no memory; tag state moves through a pluggable [`store`]
//! and the [`protocol`] register server each controller runs.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Testbed configuration.
pub mod config;
/// Device roles and the controller bridge.
pub mod device;
/// Runtime errors and fault classification.
pub mod error;
/// Cycle statistics.
pub mod metrics;
/// Noisy sensing and guarded actuation.
pub mod physics;
/// Register protocol client and server.
pub mod protocol;
/// Snapshot CSV recording.
pub mod recorder;
/// Fixed-period scheduling and clocks.
pub mod scheduler;
/// Tag stores.
pub mod store;
/// Tag descriptors and registry.
pub mod tag;
/// Tag values.
pub mod value;

pub use config::TestbedConfig;
pub use error::{DeviceFault, FaultKind, RuntimeError};
pub use physics::PhysicalIo;
pub use scheduler::{
    Clock, CycleTiming, DeviceHandle, DeviceRunner, DeviceState, ManualClock, SystemClock,
    TickBehavior,
};
pub use store::{SharedStore, Store, StoreDescriptor, StoreKind};
pub use tag::{ControllerId, Direction, TagDescriptor, TagRegistry, MAX_TAG_ID};
pub use value::TagValue;
