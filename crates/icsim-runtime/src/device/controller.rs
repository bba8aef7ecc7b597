//! Controller bridge: owned tags, embedded register server and store sync.

use std::net::SocketAddr;
use std::sync::Arc;

use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::error::RuntimeError;
use crate::physics::PhysicalIo;
use crate::protocol::RegisterServer;
use crate::recorder::{SnapshotColumn, SnapshotRecorder};
use crate::scheduler::{CycleTiming, TickBehavior};
use crate::store::SharedStore;
use crate::tag::{ControllerId, TagDescriptor, TagRegistry};
use crate::value::TagValue;

use super::{absorb_transient, ControllerAddresses, NetworkLink};

/// Mode value that forces the actuator off.
const MANUAL_OFF: f64 = 1.0;
/// Mode value that forces the actuator on.
const MANUAL_ON: f64 = 2.0;

/// A controller owning a subset of tags.
///
/// Local sensor tags are read through noisy physical I/O, other local tags
/// through the register image. Remote tags go over the network to their owner.
#[derive(Debug)]
pub struct Controller {
    id: ControllerId,
    name: SmolStr,
    tags: Arc<TagRegistry>,
    io: PhysicalIo,
    server: RegisterServer,
    link: NetworkLink,
}

impl Controller {
    pub fn new(
        id: ControllerId,
        name: impl Into<SmolStr>,
        tags: Arc<TagRegistry>,
        store: SharedStore,
        addresses: &ControllerAddresses,
    ) -> Result<Self, RuntimeError> {
        Self::with_io(id, name, tags, PhysicalIo::new(store), addresses)
    }

    /// Build with a caller-provided physical I/O, e.g. one with a fixed seed.
    ///
    /// Sensor and actuator registration is done here from the owned tags.
    pub fn with_io(
        id: ControllerId,
        name: impl Into<SmolStr>,
        tags: Arc<TagRegistry>,
        mut io: PhysicalIo,
        addresses: &ControllerAddresses,
    ) -> Result<Self, RuntimeError> {
        let name = name.into();
        let address = *addresses
            .get(&id)
            .ok_or(RuntimeError::UnknownController(id))?;
        let server = RegisterServer::new(address, tags.max_id().unwrap_or(0));
        for tag in tags.owned_by(id) {
            if tag.is_input() {
                io.register_sensor(tag.name.clone(), tag.fault_factor);
            } else {
                io.register_actuator(tag.name.clone());
                server.set(tag.id, &tag.default)?;
            }
        }
        let link = NetworkLink::new(tags.clone(), addresses, Some(id))?;
        info!(device = %name, controller = id, %address, "controller created");
        Ok(Self {
            id,
            name,
            tags,
            io,
            server,
            link,
        })
    }

    #[must_use]
    pub fn id(&self) -> ControllerId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn tags(&self) -> &Arc<TagRegistry> {
        &self.tags
    }

    #[must_use]
    pub fn io(&self) -> &PhysicalIo {
        &self.io
    }

    #[must_use]
    pub fn server(&self) -> &RegisterServer {
        &self.server
    }

    /// Tags owned by this controller, in registry order.
    pub fn local_tags(&self) -> impl Iterator<Item = &TagDescriptor> {
        self.tags.owned_by(self.id)
    }

    pub fn is_local(&self, tag: &str) -> Result<bool, RuntimeError> {
        Ok(self.tags.get(tag)?.owner == self.id)
    }

    /// Bind the register server and apply output defaults.
    pub fn start(&mut self) -> Result<SocketAddr, RuntimeError> {
        let bound = self.server.start()?;
        info!(device = %self.name, address = %bound, "register server listening");
        let outputs: Vec<(SmolStr, TagValue)> = self
            .local_tags()
            .filter(|tag| tag.is_output())
            .map(|tag| (tag.name.clone(), tag.default.clone()))
            .collect();
        for (tag, default) in outputs {
            self.set(&tag, &default)?;
        }
        Ok(bound)
    }

    pub fn stop(&mut self) {
        if self.server.is_running() {
            self.server.stop();
            info!(device = %self.name, "register server stopped");
        }
    }

    /// Bound register server address once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// Current value of `tag`, or `None` when a store or network call failed.
    pub fn get(&mut self, tag: &str) -> Result<Option<TagValue>, RuntimeError> {
        let descriptor = self.tags.get(tag)?;
        let result = if descriptor.owner != self.id {
            self.link.receive(tag)
        } else if descriptor.is_input() {
            self.io.read_sensor(tag).map(TagValue::Number)
        } else {
            self.server.get(descriptor.id)
        };
        absorb_transient(&self.name, tag, result)
    }

    /// Write `tag`: register image first, then the actuator for local outputs.
    /// Remote tags are sent to their owner.
    pub fn set(&mut self, tag: &str, value: &TagValue) -> Result<(), RuntimeError> {
        let descriptor = self.tags.get(tag)?;
        if descriptor.owner != self.id {
            let result = self.link.send(tag, value);
            absorb_transient(&self.name, tag, result)?;
            return Ok(());
        }
        self.server.set(descriptor.id, value)?;
        if descriptor.is_output() {
            let result = self.io.write_actuator(tag, value);
            absorb_transient(&self.name, tag, result)?;
        }
        Ok(())
    }

    /// Reconcile the register image with the store once.
    ///
    /// Outputs flow register -> store, inputs flow store -> register. Inputs
    /// carry the raw store value, so sensor noise never reaches the registers.
    /// Transient failures skip the affected tag until the next pass.
    pub fn sync_local_tags(&mut self) -> Result<(), RuntimeError> {
        let local: Vec<TagDescriptor> = self.local_tags().cloned().collect();
        for tag in local {
            if tag.is_output() {
                let value = self.server.get(tag.id)?;
                let result = self.io.write_actuator(&tag.name, &value);
                absorb_transient(&self.name, &tag.name, result)?;
            } else {
                let result = self.io.get(&tag.name);
                if let Some(value) = absorb_transient(&self.name, &tag.name, result)? {
                    self.server.set(tag.id, &value)?;
                }
            }
        }
        Ok(())
    }

    /// Operator bypass: mode `1` forces `actuator_tag` off, mode `2` forces it
    /// on. Returns whether the override was applied.
    pub fn check_manual_input(
        &mut self,
        mode_tag: &str,
        actuator_tag: &str,
    ) -> Result<bool, RuntimeError> {
        let mode = self.get(mode_tag)?.and_then(|mode| mode.as_f64());
        let forced = match mode {
            Some(mode) if mode == MANUAL_OFF => TagValue::ZERO,
            Some(mode) if mode == MANUAL_ON => TagValue::Number(1.0),
            _ => return Ok(false),
        };
        debug!(device = %self.name, mode_tag, actuator_tag, value = %forced, "manual override");
        self.set(actuator_tag, &forced)?;
        Ok(true)
    }

    /// Columns of a snapshot row, in registry order.
    #[must_use]
    pub fn snapshot_columns(&self) -> Vec<SnapshotColumn> {
        self.local_tags()
            .map(|tag| SnapshotColumn {
                name: tag.name.clone(),
                id: tag.id,
            })
            .collect()
    }

    /// Current value of every local tag, in registry order.
    pub fn snapshot_values(&mut self) -> Result<Vec<Option<TagValue>>, RuntimeError> {
        let names: Vec<SmolStr> = self.local_tags().map(|tag| tag.name.clone()).collect();
        names.iter().map(|name| self.get(name)).collect()
    }
}

/// Automatic control logic run once per controller tick.
pub trait ControllerLogic: Send + 'static {
    fn run(&mut self, controller: &mut Controller, timing: &CycleTiming)
        -> Result<(), RuntimeError>;
}

impl<F> ControllerLogic for F
where
    F: FnMut(&mut Controller, &CycleTiming) -> Result<(), RuntimeError> + Send + 'static,
{
    fn run(
        &mut self,
        controller: &mut Controller,
        timing: &CycleTiming,
    ) -> Result<(), RuntimeError> {
        self(controller, timing)
    }
}

/// Scheduler behavior wrapping a [`Controller`] and its logic.
#[derive(Debug)]
pub struct ControllerDevice<L> {
    controller: Controller,
    logic: L,
    recorder: Option<SnapshotRecorder>,
}

impl<L: ControllerLogic> ControllerDevice<L> {
    #[must_use]
    pub fn new(controller: Controller, logic: L) -> Self {
        Self {
            controller,
            logic,
            recorder: None,
        }
    }

    /// Record one snapshot row per tick.
    #[must_use]
    pub fn with_recorder(mut self, recorder: SnapshotRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    #[must_use]
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    fn record(&mut self, timing: &CycleTiming) -> Result<(), RuntimeError> {
        let Some(recorder) = self.recorder.as_mut() else {
            return Ok(());
        };
        let values = self.controller.snapshot_values()?;
        if let Err(err) = recorder.write_row(timing, &values) {
            warn!(device = %self.controller.name, error = %err, "snapshot not recorded");
        }
        Ok(())
    }
}

impl<L: ControllerLogic> TickBehavior for ControllerDevice<L> {
    fn name(&self) -> &str {
        self.controller.name()
    }

    fn before_start(&mut self, _timing: &CycleTiming) -> Result<(), RuntimeError> {
        self.controller.start()?;
        if let Some(recorder) = self.recorder.as_mut() {
            let columns = self.controller.snapshot_columns();
            if let Err(err) = recorder.write_header(&columns) {
                warn!(device = %self.controller.name, error = %err, "snapshot header not recorded");
            }
        }
        Ok(())
    }

    fn logic(&mut self, timing: &CycleTiming) -> Result<(), RuntimeError> {
        self.logic.run(&mut self.controller, timing)
    }

    fn post_tick(&mut self, timing: &CycleTiming) -> Result<(), RuntimeError> {
        self.controller.sync_local_tags()?;
        self.record(timing)
    }

    fn on_stop(&mut self) {
        self.controller.stop();
    }
}
