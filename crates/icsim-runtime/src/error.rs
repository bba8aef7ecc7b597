//! Runtime errors and fault classification.

#![allow(missing_docs)]

use smol_str::SmolStr;
use thiserror::Error;

/// Errors raised by stores, the register protocol and device logic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Configuration error.
    #[error("invalid config '{0}'")]
    InvalidConfig(SmolStr),

    /// Tag name not present in the tag registry.
    #[error("unknown tag '{0}'")]
    UnknownTag(SmolStr),

    /// Tag owner or client lookup for a controller that is not configured.
    #[error("unknown controller {0}")]
    UnknownController(u16),

    /// Two tags share the same register id.
    #[error("duplicate tag id {id} ('{first}' and '{second}')")]
    DuplicateTagId {
        id: u16,
        first: SmolStr,
        second: SmolStr,
    },

    /// Sensor read on a tag not registered as a sensor on this device.
    #[error("tag '{0}' is not registered as a sensor")]
    UnknownSensorTag(SmolStr),

    /// Actuator write on a tag not registered as an actuator on this device.
    #[error("tag '{0}' is not registered as an actuator")]
    UnknownActuatorTag(SmolStr),

    /// Stored sensor value cannot be interpreted as a real number.
    #[error("non-numeric reading for tag '{tag}': {value}")]
    NonNumericReading { tag: SmolStr, value: SmolStr },

    /// Text values cannot be placed in a numeric register.
    #[error("value '{0}' cannot be stored in a register")]
    NonNumericRegister(SmolStr),

    /// NaN or infinite number, which no persistent backend can round-trip.
    #[error("non-finite value for '{0}'")]
    NonFiniteValue(SmolStr),

    /// Store key was never initialized.
    #[error("store key '{0}' was never initialized")]
    UninitializedKey(SmolStr),

    /// Store backend failure (I/O, connectivity, encoding).
    #[error("store error '{0}'")]
    Store(SmolStr),

    /// Register protocol or transport failure.
    #[error("register protocol error '{0}'")]
    Register(SmolStr),

    /// Register address outside the server's register image.
    #[error("register address {0} out of range")]
    RegisterAddress(u16),

    /// Thread spawn error.
    #[error("thread spawn error '{0}'")]
    ThreadSpawn(SmolStr),

    /// Device logic failure raised from a tick.
    #[error("logic fault '{0}'")]
    Logic(SmolStr),

    /// Snapshot recorder failure.
    #[error("snapshot recorder error '{0}'")]
    Recorder(SmolStr),
}

/// Error taxonomy used to pick between fail-fast, degrade and crash-stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Malformed configuration or unknown names; fails at construction.
    Config,
    /// Store or network hiccup; callers log it and carry on.
    Transient,
    /// Defect in device logic; stops the device.
    Logic,
}

impl RuntimeError {
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::InvalidConfig(_)
            | Self::UnknownTag(_)
            | Self::UnknownController(_)
            | Self::DuplicateTagId { .. } => FaultKind::Config,
            Self::Store(_)
            | Self::Register(_)
            | Self::RegisterAddress(_)
            | Self::UninitializedKey(_)
            | Self::Recorder(_) => FaultKind::Transient,
            Self::UnknownSensorTag(_)
            | Self::UnknownActuatorTag(_)
            | Self::NonNumericReading { .. }
            | Self::NonNumericRegister(_)
            | Self::NonFiniteValue(_)
            | Self::ThreadSpawn(_)
            | Self::Logic(_) => FaultKind::Logic,
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), FaultKind::Transient)
    }

    pub(crate) fn store(context: impl std::fmt::Display) -> Self {
        Self::Store(SmolStr::new(context.to_string()))
    }

    pub(crate) fn register(context: impl std::fmt::Display) -> Self {
        Self::Register(SmolStr::new(context.to_string()))
    }
}

/// Fatal fault recorded when a device's tick logic fails.
///
/// The scheduler stops the device and keeps this around so a supervisor can
/// inspect it and decide whether to build a fresh device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFault {
    pub device: SmolStr,
    pub cycle_time_ms: u64,
    pub error: RuntimeError,
}

impl std::fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "device '{}' faulted at cycle {} ms: {}",
            self.device, self.cycle_time_ms, self.error
        )
    }
}

impl std::error::Error for DeviceFault {}
