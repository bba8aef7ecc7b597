//! Client pool for reaching tags owned by other controllers.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use indexmap::IndexMap;

use crate::error::RuntimeError;
use crate::protocol::RegisterClient;
use crate::tag::{ControllerId, TagDescriptor, TagRegistry};
use crate::value::TagValue;

use super::ControllerAddresses;

/// One register client per owning controller, created up front and held for
/// the device lifetime.
#[derive(Debug)]
pub struct NetworkLink {
    tags: Arc<TagRegistry>,
    clients: IndexMap<ControllerId, RegisterClient>,
}

impl NetworkLink {
    /// Build clients for every owner in `tags` except `local`.
    ///
    /// Fails when an owner has no configured address.
    pub fn new(
        tags: Arc<TagRegistry>,
        addresses: &ControllerAddresses,
        local: Option<ControllerId>,
    ) -> Result<Self, RuntimeError> {
        let mut clients = IndexMap::new();
        for owner in tags.owners() {
            if Some(owner) == local {
                continue;
            }
            let address = addresses
                .get(&owner)
                .ok_or(RuntimeError::UnknownController(owner))?;
            clients.insert(owner, RegisterClient::new(*address));
        }
        Ok(Self { tags, clients })
    }

    /// Apply a connect/read/write timeout to every client.
    #[must_use]
    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.clients = self
            .clients
            .into_iter()
            .map(|(owner, client)| (owner, client.with_timeout(timeout)))
            .collect();
        self
    }

    #[must_use]
    pub fn tags(&self) -> &Arc<TagRegistry> {
        &self.tags
    }

    pub fn descriptor(&self, tag: &str) -> Result<&TagDescriptor, RuntimeError> {
        self.tags.get(tag)
    }

    /// Network read of `tag` from its owner.
    pub fn receive(&mut self, tag: &str) -> Result<TagValue, RuntimeError> {
        let (owner, id) = self.route(tag)?;
        self.client(owner)?.receive(id)
    }

    /// Network write of `tag` to its owner.
    pub fn send(&mut self, tag: &str, value: &TagValue) -> Result<(), RuntimeError> {
        let (owner, id) = self.route(tag)?;
        self.client(owner)?.send(id, value)
    }

    fn route(&self, tag: &str) -> Result<(ControllerId, u16), RuntimeError> {
        let descriptor = self.tags.get(tag)?;
        Ok((descriptor.owner, descriptor.id))
    }

    fn client(&mut self, owner: ControllerId) -> Result<&mut RegisterClient, RuntimeError> {
        self.clients
            .get_mut(&owner)
            .ok_or(RuntimeError::UnknownController(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::Direction;

    fn registry() -> Arc<TagRegistry> {
        let tag = |name: &str, id, owner| TagDescriptor {
            name: name.into(),
            id,
            owner,
            direction: Direction::Output,
            fault_factor: 0.0,
            default: TagValue::ZERO,
        };
        Arc::new(TagRegistry::new([tag("a", 1, 1), tag("b", 2, 2)]).unwrap())
    }

    #[test]
    fn owners_without_address_are_config_errors() {
        let mut addresses = ControllerAddresses::new();
        addresses.insert(1, "127.0.0.1:5502".parse().unwrap());
        let err = NetworkLink::new(registry(), &addresses, None).unwrap_err();
        assert_eq!(err, RuntimeError::UnknownController(2));
        assert!(NetworkLink::new(registry(), &addresses, Some(2)).is_ok());
    }

    #[test]
    fn local_tags_have_no_client() {
        let mut addresses = ControllerAddresses::new();
        addresses.insert(1, "127.0.0.1:5502".parse().unwrap());
        let mut link = NetworkLink::new(registry(), &addresses, Some(2)).unwrap();
        assert_eq!(
            link.receive("b").unwrap_err(),
            RuntimeError::UnknownController(2)
        );
        assert_eq!(
            link.receive("missing").unwrap_err(),
            RuntimeError::UnknownTag("missing".into())
        );
    }
}
