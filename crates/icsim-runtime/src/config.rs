//! Testbed configuration loading.

#![allow(missing_docs)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use indexmap::IndexMap;
use serde::Deserialize;
use smol_str::SmolStr;

use crate::device::ControllerAddresses;
use crate::error::RuntimeError;
use crate::protocol::{resolve_address, RegisterProtocol};
use crate::store::{StoreDescriptor, StoreToml};
use crate::tag::{ControllerId, Direction, TagDescriptor, TagRegistry};
use crate::value::TagValue;

const DEFAULT_CONTROLLER_PERIOD_MS: u64 = 200;
const DEFAULT_PROCESS_PERIOD_MS: u64 = 100;
const DEFAULT_PANEL_PERIOD_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct TestbedConfig {
    pub store: StoreDescriptor,
    /// Directory receiving `snapshots_<controller>.csv` files.
    pub snapshot_dir: PathBuf,
    pub process: Option<ProcessConfig>,
    pub controllers: Vec<ControllerConfig>,
    pub panels: Vec<PanelConfig>,
    pub tags: Arc<TagRegistry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub id: ControllerId,
    pub name: SmolStr,
    pub address: SocketAddr,
    pub protocol: RegisterProtocol,
    pub period: StdDuration,
    pub record_snapshots: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    pub name: SmolStr,
    pub period: StdDuration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelConfig {
    pub name: SmolStr,
    pub period: StdDuration,
}

impl TestbedConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            RuntimeError::InvalidConfig(format!("{}: {err}", path.display()).into())
        })?;
        Self::from_toml_str(&text).map_err(|err| match err {
            RuntimeError::InvalidConfig(message) => {
                RuntimeError::InvalidConfig(format!("{}: {message}", path.display()).into())
            }
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, RuntimeError> {
        let raw: TestbedToml =
            toml::from_str(text).map_err(|err| RuntimeError::InvalidConfig(err.to_string().into()))?;
        raw.into_config()
    }

    /// Register server address per controller id.
    #[must_use]
    pub fn addresses(&self) -> ControllerAddresses {
        self.controllers
            .iter()
            .map(|controller| (controller.id, controller.address))
            .collect()
    }

    pub fn controller(&self, id: ControllerId) -> Result<&ControllerConfig, RuntimeError> {
        self.controllers
            .iter()
            .find(|controller| controller.id == id)
            .ok_or(RuntimeError::UnknownController(id))
    }

    pub fn panel(&self, name: &str) -> Result<&PanelConfig, RuntimeError> {
        self.panels
            .iter()
            .find(|panel| panel.name == name)
            .ok_or_else(|| RuntimeError::InvalidConfig(format!("unknown panel '{name}'").into()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TestbedToml {
    store: StoreToml,
    snapshot_dir: Option<String>,
    process: Option<ProcessToml>,
    #[serde(default)]
    controllers: Vec<ControllerToml>,
    #[serde(default)]
    panels: Vec<PanelToml>,
    #[serde(default)]
    tags: IndexMap<String, TagToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControllerToml {
    id: ControllerId,
    name: String,
    address: String,
    protocol: Option<String>,
    period_ms: Option<u64>,
    record_snapshots: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProcessToml {
    name: Option<String>,
    period_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PanelToml {
    name: String,
    period_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TagToml {
    id: u16,
    owner: ControllerId,
    direction: String,
    fault: Option<f64>,
    default: Option<TagValue>,
}

impl TestbedToml {
    fn into_config(self) -> Result<TestbedConfig, RuntimeError> {
        let store = self.store.into_descriptor()?;

        let mut controllers: Vec<ControllerConfig> = Vec::with_capacity(self.controllers.len());
        for raw in self.controllers {
            if controllers.iter().any(|existing| existing.id == raw.id) {
                return Err(RuntimeError::InvalidConfig(
                    format!("duplicate controller id {}", raw.id).into(),
                ));
            }
            let protocol = match raw.protocol.as_deref() {
                Some(text) => RegisterProtocol::parse(text)?,
                None => RegisterProtocol::ModbusTcp,
            };
            controllers.push(ControllerConfig {
                id: raw.id,
                address: resolve_address(&raw.address)?,
                period: period("controllers", &raw.name, raw.period_ms, DEFAULT_CONTROLLER_PERIOD_MS)?,
                name: raw.name.into(),
                protocol,
                record_snapshots: raw.record_snapshots.unwrap_or(false),
            });
        }

        let process = self
            .process
            .map(|raw| {
                let name = raw.name.unwrap_or_else(|| "process".into());
                Ok::<_, RuntimeError>(ProcessConfig {
                    period: period("process", &name, raw.period_ms, DEFAULT_PROCESS_PERIOD_MS)?,
                    name: name.into(),
                })
            })
            .transpose()?;

        let mut panels: Vec<PanelConfig> = Vec::with_capacity(self.panels.len());
        for raw in self.panels {
            if panels.iter().any(|existing| existing.name == raw.name) {
                return Err(RuntimeError::InvalidConfig(
                    format!("duplicate panel name '{}'", raw.name).into(),
                ));
            }
            panels.push(PanelConfig {
                period: period("panels", &raw.name, raw.period_ms, DEFAULT_PANEL_PERIOD_MS)?,
                name: raw.name.into(),
            });
        }

        let mut tags = Vec::with_capacity(self.tags.len());
        for (name, raw) in self.tags {
            if !controllers.iter().any(|controller| controller.id == raw.owner) {
                return Err(RuntimeError::InvalidConfig(
                    format!("tag '{name}' owner {} is not a configured controller", raw.owner)
                        .into(),
                ));
            }
            tags.push(TagDescriptor {
                direction: Direction::parse(&raw.direction)?,
                id: raw.id,
                owner: raw.owner,
                fault_factor: raw.fault.unwrap_or(0.0),
                default: raw.default.unwrap_or_default(),
                name: name.into(),
            });
        }

        Ok(TestbedConfig {
            store,
            snapshot_dir: self
                .snapshot_dir
                .map_or_else(|| PathBuf::from("."), PathBuf::from),
            process,
            controllers,
            panels,
            tags: Arc::new(TagRegistry::new(tags).map_err(|err| match err {
                RuntimeError::InvalidConfig(_) => err,
                other => RuntimeError::InvalidConfig(format!("tags: {other}").into()),
            })?),
        })
    }
}

fn period(
    section: &str,
    name: &str,
    period_ms: Option<u64>,
    default_ms: u64,
) -> Result<StdDuration, RuntimeError> {
    match period_ms.unwrap_or(default_ms) {
        0 => Err(RuntimeError::InvalidConfig(
            format!("{section}.{name}.period_ms must be >= 1").into(),
        )),
        ms => Ok(StdDuration::from_millis(ms)),
    }
}
