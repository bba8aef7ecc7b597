//! Raw hardware link: tag values live in a remote device's registers.

use std::net::SocketAddr;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smol_str::SmolStr;

use crate::error::RuntimeError;
use crate::protocol::RegisterClient;
use crate::value::TagValue;

use super::{Store, StoreKind};

/// Keys are translated to register ids through the tag registry.
///
/// Hardware state cannot be wiped, so `clear_existing` only re-seeds.
#[derive(Debug)]
pub struct HardwareStore {
    client: Mutex<RegisterClient>,
    ids: IndexMap<SmolStr, u16>,
}

impl HardwareStore {
    pub fn new(address: SocketAddr, ids: impl IntoIterator<Item = (SmolStr, u16)>) -> Self {
        Self {
            client: Mutex::new(RegisterClient::new(address)),
            ids: ids.into_iter().collect(),
        }
    }

    fn id(&self, key: &str) -> Result<u16, RuntimeError> {
        self.ids
            .get(key)
            .copied()
            .ok_or_else(|| RuntimeError::UninitializedKey(SmolStr::new(key)))
    }
}

impl Store for HardwareStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Hardware
    }

    fn initialize(
        &self,
        initial: &[(SmolStr, TagValue)],
        _clear_existing: bool,
    ) -> Result<(), RuntimeError> {
        for (key, value) in initial {
            self.set(key, value)?;
        }
        Ok(())
    }

    fn set(&self, key: &str, value: &TagValue) -> Result<TagValue, RuntimeError> {
        let id = self.id(key)?;
        self.client.lock().send(id, value)?;
        Ok(value.clone())
    }

    fn get(&self, key: &str) -> Result<TagValue, RuntimeError> {
        let id = self.id(key)?;
        self.client.lock().receive(id)
    }
}
