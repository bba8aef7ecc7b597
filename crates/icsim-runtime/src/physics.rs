//! Physical I/O: noisy sensing and guarded actuation on top of a store.

#![allow(missing_docs)]

use indexmap::{IndexMap, IndexSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smol_str::SmolStr;
use tracing::trace;

use crate::error::RuntimeError;
use crate::store::SharedStore;
use crate::value::TagValue;

/// Sensor and actuator connector for one device.
///
/// Sensors read `base + U(-|base|, |base|) * fault_factor`; actuators only
/// accept writes for registered tags.
pub struct PhysicalIo {
    store: SharedStore,
    sensors: IndexMap<SmolStr, f64>,
    actuators: IndexSet<SmolStr>,
    rng: StdRng,
}

impl std::fmt::Debug for PhysicalIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalIo")
            .field("store", &self.store.kind())
            .field("sensors", &self.sensors)
            .field("actuators", &self.actuators)
            .finish_non_exhaustive()
    }
}

impl PhysicalIo {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self::with_rng(store, StdRng::from_entropy())
    }

    /// Deterministic noise source, for tests and reproducible runs.
    #[must_use]
    pub fn with_seed(store: SharedStore, seed: u64) -> Self {
        Self::with_rng(store, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: SharedStore, rng: StdRng) -> Self {
        Self {
            store,
            sensors: IndexMap::new(),
            actuators: IndexSet::new(),
            rng,
        }
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn register_sensor(&mut self, tag: impl Into<SmolStr>, fault_factor: f64) {
        self.sensors.insert(tag.into(), fault_factor.abs());
    }

    pub fn register_actuator(&mut self, tag: impl Into<SmolStr>) {
        self.actuators.insert(tag.into());
    }

    #[must_use]
    pub fn is_sensor(&self, tag: &str) -> bool {
        self.sensors.contains_key(tag)
    }

    #[must_use]
    pub fn is_actuator(&self, tag: &str) -> bool {
        self.actuators.contains(tag)
    }

    /// Noisy read of a registered sensor.
    pub fn read_sensor(&mut self, tag: &str) -> Result<f64, RuntimeError> {
        let fault_factor = *self
            .sensors
            .get(tag)
            .ok_or_else(|| RuntimeError::UnknownSensorTag(SmolStr::new(tag)))?;
        let stored = self.store.get(tag)?;
        let base = stored
            .as_f64()
            .filter(|value| value.is_finite())
            .ok_or_else(|| RuntimeError::NonNumericReading {
                tag: SmolStr::new(tag),
                value: SmolStr::new(stored.to_string()),
            })?;
        if fault_factor == 0.0 {
            return Ok(base);
        }
        let spread = base.abs();
        let noise = self.rng.gen_range(-spread..=spread) * fault_factor;
        trace!(tag, base, noise, "sensor read");
        Ok(base + noise)
    }

    /// Write a registered actuator. Unregistered tags never reach the store.
    pub fn write_actuator(&self, tag: &str, value: &TagValue) -> Result<TagValue, RuntimeError> {
        if !self.actuators.contains(tag) {
            return Err(RuntimeError::UnknownActuatorTag(SmolStr::new(tag)));
        }
        self.store.set(tag, value)
    }

    /// Unguarded store read, used by the process model that owns the physics.
    pub fn get(&self, tag: &str) -> Result<TagValue, RuntimeError> {
        self.store.get(tag)
    }

    /// Unguarded store write, used by the process model that owns the physics.
    pub fn set(&self, tag: &str, value: &TagValue) -> Result<TagValue, RuntimeError> {
        self.store.set(tag, value)
    }
}
