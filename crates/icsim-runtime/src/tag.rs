//! Tag descriptors and the tag registry shared by every device.

#![allow(missing_docs)]

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::RuntimeError;
use crate::protocol::REGISTERS_PER_TAG;
use crate::value::TagValue;

/// Identifier of the controller that owns a tag.
pub type ControllerId = u16;

/// Largest tag id whose register pair still fits the 16-bit address space.
pub const MAX_TAG_ID: u16 = (u16::MAX - 1) / REGISTERS_PER_TAG;

/// Direction relative to the owning controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Produced by the physical world, read by the controller (a sensor).
    Input,
    /// Produced by the controller or the network, applied to the physical world (an actuator).
    Output,
}

impl Direction {
    pub fn parse(text: &str) -> Result<Self, RuntimeError> {
        match text.trim().to_ascii_lowercase().as_str() {
            "input" | "in" => Ok(Self::Input),
            "output" | "out" => Ok(Self::Output),
            _ => Err(RuntimeError::InvalidConfig(
                format!("invalid tag direction '{text}' (expected input/output)").into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagDescriptor {
    pub name: SmolStr,
    /// Register address on the owning controller; stable across restarts.
    pub id: u16,
    pub owner: ControllerId,
    pub direction: Direction,
    pub fault_factor: f64,
    pub default: TagValue,
}

impl TagDescriptor {
    #[must_use]
    pub fn is_input(&self) -> bool {
        self.direction == Direction::Input
    }

    #[must_use]
    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }
}

/// Validated, ordered set of tags.
///
/// Iteration order is the configuration order, which keeps snapshot columns
/// and panel rows stable.
#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    tags: IndexMap<SmolStr, TagDescriptor>,
}

impl TagRegistry {
    /// Build a registry, rejecting duplicate names, duplicate or unaddressable
    /// ids and bad fault factors.
    pub fn new(tags: impl IntoIterator<Item = TagDescriptor>) -> Result<Self, RuntimeError> {
        let mut registry = IndexMap::new();
        let mut ids: IndexMap<u16, SmolStr> = IndexMap::new();
        for tag in tags {
            if !(tag.fault_factor >= 0.0 && tag.fault_factor.is_finite()) {
                return Err(RuntimeError::InvalidConfig(
                    format!(
                        "tag '{}' fault factor must be a non-negative number",
                        tag.name
                    )
                    .into(),
                ));
            }
            if tag.id > MAX_TAG_ID {
                return Err(RuntimeError::InvalidConfig(
                    format!("tag '{}' id {} exceeds {MAX_TAG_ID}", tag.name, tag.id).into(),
                ));
            }
            if let Some(first) = ids.get(&tag.id) {
                return Err(RuntimeError::DuplicateTagId {
                    id: tag.id,
                    first: first.clone(),
                    second: tag.name.clone(),
                });
            }
            if registry.contains_key(&tag.name) {
                return Err(RuntimeError::InvalidConfig(
                    format!("duplicate tag name '{}'", tag.name).into(),
                ));
            }
            ids.insert(tag.id, tag.name.clone());
            registry.insert(tag.name.clone(), tag);
        }
        Ok(Self { tags: registry })
    }

    pub fn get(&self, name: &str) -> Result<&TagDescriptor, RuntimeError> {
        self.tags
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownTag(SmolStr::new(name)))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagDescriptor> {
        self.tags.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Tags owned by the given controller, in registry order.
    pub fn owned_by(&self, owner: ControllerId) -> impl Iterator<Item = &TagDescriptor> {
        self.tags.values().filter(move |tag| tag.owner == owner)
    }

    /// Distinct owners, in first-seen order.
    #[must_use]
    pub fn owners(&self) -> Vec<ControllerId> {
        let mut owners = Vec::new();
        for tag in self.tags.values() {
            if !owners.contains(&tag.owner) {
                owners.push(tag.owner);
            }
        }
        owners
    }

    /// Initial `(name, default)` pairs used to seed a store.
    #[must_use]
    pub fn defaults(&self) -> Vec<(SmolStr, TagValue)> {
        self.tags
            .values()
            .map(|tag| (tag.name.clone(), tag.default.clone()))
            .collect()
    }

    /// Highest register id in use, if any.
    #[must_use]
    pub fn max_id(&self) -> Option<u16> {
        self.tags.values().map(|tag| tag.id).max()
    }
}
