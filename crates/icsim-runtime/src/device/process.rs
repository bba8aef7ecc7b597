//! Process simulation: the device that owns the physics.

use std::time::Duration as StdDuration;

use smol_str::SmolStr;
use tracing::{info, warn};

use crate::error::RuntimeError;
use crate::scheduler::{CycleTiming, TickBehavior};
use crate::store::{SharedStore, Store};
use crate::tag::TagRegistry;

/// Physics advanced once per process tick.
///
/// `elapsed` is the time between the previous and the current cycle boundary,
/// so skipped cycles are folded into one larger step.
pub trait ProcessModel: Send + 'static {
    fn step(&mut self, store: &dyn Store, elapsed: StdDuration) -> Result<(), RuntimeError>;
}

impl<F> ProcessModel for F
where
    F: FnMut(&dyn Store, StdDuration) -> Result<(), RuntimeError> + Send + 'static,
{
    fn step(&mut self, store: &dyn Store, elapsed: StdDuration) -> Result<(), RuntimeError> {
        self(store, elapsed)
    }
}

/// Device that seeds the store and mutates physical tags directly.
pub struct ProcessSimulation<M> {
    name: SmolStr,
    store: SharedStore,
    model: M,
}

impl<M> std::fmt::Debug for ProcessSimulation<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSimulation")
            .field("name", &self.name)
            .field("store", &self.store.kind())
            .finish_non_exhaustive()
    }
}

impl<M: ProcessModel> ProcessSimulation<M> {
    /// Wipe the store and seed every tag default. Must run before any other
    /// device starts.
    pub fn new(
        name: impl Into<SmolStr>,
        tags: &TagRegistry,
        store: SharedStore,
        model: M,
    ) -> Result<Self, RuntimeError> {
        let name = name.into();
        store.initialize(&tags.defaults(), true)?;
        info!(device = %name, store = store.kind().as_str(), tags = tags.len(), "store initialized");
        Ok(Self { name, store, model })
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }
}

impl<M: ProcessModel> TickBehavior for ProcessSimulation<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn logic(&mut self, timing: &CycleTiming) -> Result<(), RuntimeError> {
        match self.model.step(self.store.as_ref(), timing.elapsed()) {
            Err(err) if err.is_transient() => {
                warn!(device = %self.name, error = %err, "process step skipped");
                Ok(())
            }
            other => other,
        }
    }
}
