//! In-process store.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use smol_str::SmolStr;

use crate::error::RuntimeError;
use crate::value::TagValue;

use super::{Store, StoreKind};

/// Map shared by every clone; suitable when all devices run in one process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Arc<RwLock<IndexMap<SmolStr, TagValue>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Memory
    }

    fn initialize(
        &self,
        initial: &[(SmolStr, TagValue)],
        clear_existing: bool,
    ) -> Result<(), RuntimeError> {
        let mut values = self.values.write();
        if clear_existing {
            values.clear();
        }
        for (key, value) in initial {
            values.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn set(&self, key: &str, value: &TagValue) -> Result<TagValue, RuntimeError> {
        let mut values = self.values.write();
        let slot = values
            .get_mut(key)
            .ok_or_else(|| RuntimeError::UninitializedKey(SmolStr::new(key)))?;
        *slot = value.clone();
        Ok(value.clone())
    }

    fn get(&self, key: &str) -> Result<TagValue, RuntimeError> {
        self.values
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| RuntimeError::UninitializedKey(SmolStr::new(key)))
    }
}
