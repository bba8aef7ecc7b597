//! Device roles: process simulation, controllers and operator panels.
//!
//! Each role is a [`TickBehavior`](crate::scheduler::TickBehavior) driven by
//! its own [`DeviceRunner`](crate::scheduler::DeviceRunner). Devices share no
//! memory; they meet only through the store and the register protocol.

#![allow(missing_docs)]

use std::net::SocketAddr;

use indexmap::IndexMap;
use tracing::warn;

use crate::error::RuntimeError;
use crate::tag::ControllerId;

mod controller;
mod link;
mod panel;
mod process;

pub use controller::{Controller, ControllerDevice, ControllerLogic};
pub use link::NetworkLink;
pub use panel::{render_table, Panel, PanelDevice, PanelLogic, TableView};
pub use process::{ProcessModel, ProcessSimulation};

/// Register server address of every configured controller.
pub type ControllerAddresses = IndexMap<ControllerId, SocketAddr>;

/// Turn a transient failure into an absent result, keeping the device alive.
pub(crate) fn absorb_transient<T>(
    device: &str,
    tag: &str,
    result: Result<T, RuntimeError>,
) -> Result<Option<T>, RuntimeError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_transient() => {
            warn!(device, tag, error = %err, "tag access failed");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
