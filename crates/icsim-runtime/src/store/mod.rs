//! Tag stores: one key/value contract over interchangeable backends.
//!
//! A store holds one entry per tag name. Exactly one device seeds it with
//! [`Store::initialize`] before the others start; afterwards every device reads
//! and writes single keys. Backends guarantee per-key atomicity and
//! last-write-wins, nothing more.

#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use smol_str::SmolStr;

use crate::error::RuntimeError;
use crate::protocol::resolve_address;
use crate::tag::TagRegistry;
use crate::value::TagValue;

mod file;
mod hardware;
mod memcache;
mod memory;
mod sqlite;

pub use file::FileStore;
pub use hardware::HardwareStore;
pub use memcache::MemcacheStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Key/value contract every backend implements.
pub trait Store: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Create or open the backing structure and seed `initial`.
    ///
    /// With `clear_existing` any previously persisted state is destroyed first.
    fn initialize(
        &self,
        initial: &[(SmolStr, TagValue)],
        clear_existing: bool,
    ) -> Result<(), RuntimeError>;

    /// Persist `value` under `key`, returning the stored value.
    fn set(&self, key: &str, value: &TagValue) -> Result<TagValue, RuntimeError>;

    /// Most recently persisted value for `key`.
    fn get(&self, key: &str) -> Result<TagValue, RuntimeError>;
}

/// Store handle injected into devices.
pub type SharedStore = Arc<dyn Store>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Memcache,
    File,
    Hardware,
    Memory,
}

impl StoreKind {
    pub fn parse(text: &str) -> Result<Self, RuntimeError> {
        match text.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sql" => Ok(Self::Sqlite),
            "memcache" | "memcached" => Ok(Self::Memcache),
            "file" | "json" => Ok(Self::File),
            "hardware" | "hw" => Ok(Self::Hardware),
            "memory" | "mem" => Ok(Self::Memory),
            _ => Err(RuntimeError::InvalidConfig(
                format!(
                    "unsupported store type '{text}' (expected sqlite/memcache/file/hardware/memory)"
                )
                .into(),
            )),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memcache => "memcache",
            Self::File => "file",
            Self::Hardware => "hardware",
            Self::Memory => "memory",
        }
    }
}

/// Backend selector: `{type, path, name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDescriptor {
    pub kind: StoreKind,
    /// File path for sqlite/file, `host:port` for memcache/hardware.
    pub path: SmolStr,
    /// Table name for sqlite; informational for the other backends.
    pub name: SmolStr,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct StoreToml {
    #[serde(rename = "type")]
    kind: String,
    path: Option<String>,
    name: Option<String>,
}

impl StoreToml {
    pub(crate) fn into_descriptor(self) -> Result<StoreDescriptor, RuntimeError> {
        let descriptor = StoreDescriptor {
            kind: StoreKind::parse(&self.kind)?,
            path: self.path.unwrap_or_default().into(),
            name: self.name.unwrap_or_else(|| "tags".into()).into(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

impl StoreDescriptor {
    pub fn new(kind: StoreKind, path: impl Into<SmolStr>, name: impl Into<SmolStr>) -> Self {
        Self {
            kind,
            path: path.into(),
            name: name.into(),
        }
    }

    /// Check the descriptor without touching the backend.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        match self.kind {
            StoreKind::Sqlite => {
                let extension = Path::new(self.path.as_str())
                    .extension()
                    .and_then(|ext| ext.to_str());
                if extension != Some("sqlite") {
                    return Err(RuntimeError::InvalidConfig(
                        format!("store.path '{}' must end in .sqlite", self.path).into(),
                    ));
                }
                if !is_sql_identifier(&self.name) {
                    return Err(RuntimeError::InvalidConfig(
                        format!("store.name '{}' is not a valid table name", self.name).into(),
                    ));
                }
            }
            StoreKind::File => {
                if self.path.trim().is_empty() {
                    return Err(RuntimeError::InvalidConfig(
                        "store.path is required for file stores".into(),
                    ));
                }
            }
            StoreKind::Memcache | StoreKind::Hardware => {
                resolve_address(&self.path)?;
            }
            StoreKind::Memory => {}
        }
        Ok(())
    }

    /// Resolve the descriptor into a concrete backend.
    ///
    /// The tag registry is needed by the hardware backend, which addresses
    /// registers by tag id rather than by name.
    pub fn open(&self, tags: &TagRegistry) -> Result<SharedStore, RuntimeError> {
        self.validate()?;
        let store: SharedStore = match self.kind {
            StoreKind::Sqlite => Arc::new(SqliteStore::new(self.path.as_str(), self.name.clone())),
            StoreKind::Memcache => Arc::new(MemcacheStore::new(resolve_address(&self.path)?)),
            StoreKind::File => Arc::new(FileStore::new(self.path.as_str())),
            StoreKind::Hardware => Arc::new(HardwareStore::new(
                resolve_address(&self.path)?,
                tags.iter().map(|tag| (tag.name.clone(), tag.id)),
            )),
            StoreKind::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(store)
    }
}

/// Reject NaN and infinities before they are persisted as `null`.
pub(crate) fn ensure_finite(key: &str, value: &TagValue) -> Result<(), RuntimeError> {
    match value {
        TagValue::Number(number) if !number.is_finite() => {
            Err(RuntimeError::NonFiniteValue(SmolStr::new(key)))
        }
        _ => Ok(()),
    }
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(ch) if ch.is_ascii_alphabetic() || ch == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_aliases_resolve() {
        assert_eq!(StoreKind::parse("SQLite").unwrap(), StoreKind::Sqlite);
        assert_eq!(StoreKind::parse("memcached").unwrap(), StoreKind::Memcache);
        assert_eq!(StoreKind::parse(" json ").unwrap(), StoreKind::File);
        assert!(StoreKind::parse("redis").is_err());
    }

    #[test]
    fn sqlite_descriptor_requires_extension_and_table_name() {
        let bad_ext = StoreDescriptor::new(StoreKind::Sqlite, "storage/tags.db", "fp_table");
        assert!(bad_ext.validate().is_err());
        let bad_table = StoreDescriptor::new(StoreKind::Sqlite, "tags.sqlite", "fp table;");
        assert!(bad_table.validate().is_err());
        let good = StoreDescriptor::new(StoreKind::Sqlite, "tags.sqlite", "fp_table");
        assert!(good.validate().is_ok());
    }

    #[test]
    fn network_descriptors_need_an_address() {
        let bad = StoreDescriptor::new(StoreKind::Memcache, "not an address", "tags");
        assert!(matches!(bad.validate(), Err(RuntimeError::InvalidConfig(_))));
        let good = StoreDescriptor::new(StoreKind::Hardware, "127.0.0.1:5020", "tags");
        assert!(good.validate().is_ok());
    }
}
