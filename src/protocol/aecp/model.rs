//! Entity model state seen by AEM command handlers.

use std::collections::BTreeSet;

use bytes::{Bytes, BytesMut};

use super::aem::{DescriptorKey, DescriptorType, EntityDescriptor};
use super::descriptors::{DescriptorStore, MAX_DESCRIPTOR_BODY};
use super::message::{AemCommandType, AemStatus};
use super::ownership::EntityOwnership;
use crate::protocol::adp::AvailableIndex;
use crate::protocol::codec::CodecError;
use crate::types::{AvdeccConfig, EntityId, duration_ns};

/// Decoded AEM command handed to a handler.
#[derive(Debug, Clone)]
pub struct AemCommand {
    /// Controller that sent the command.
    pub controller_id: EntityId,
    /// Sequence id of the command.
    pub sequence_id: u16,
    /// Command type.
    pub command_type: AemCommandType,
    /// Command specific data.
    pub payload: Bytes,
    /// Clock reading at receipt, in nanoseconds.
    pub now: u64,
}

/// Result of an AEM handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AemResponse {
    /// Status to answer with.
    pub status: AemStatus,
    /// Response payload.
    pub payload: Bytes,
    /// Whether entity model state changed.
    pub mutated: bool,
}

impl AemResponse {
    /// Successful read-only response.
    #[must_use]
    pub fn success(payload: Bytes) -> Self {
        Self {
            status: AemStatus::Success,
            payload,
            mutated: false,
        }
    }

    /// Successful response of a command that changed state when `changed` is set.
    #[must_use]
    pub fn mutation(payload: Bytes, changed: bool) -> Self {
        Self {
            status: AemStatus::Success,
            payload,
            mutated: changed,
        }
    }

    /// Failure echoing the command payload.
    #[must_use]
    pub fn rejected(status: AemStatus, command: &AemCommand) -> Self {
        Self::failed(status, command.payload.clone())
    }

    /// Failure carrying `payload`.
    #[must_use]
    pub fn failed(status: AemStatus, payload: Bytes) -> Self {
        Self {
            status,
            payload,
            mutated: false,
        }
    }
}

/// State of the local entity model.
#[derive(Debug, Clone)]
pub struct EntityState {
    entity_id: EntityId,
    available_index: AvailableIndex,
    /// Acquire and lock tables.
    pub ownership: EntityOwnership,
    /// Descriptor table.
    pub descriptors: DescriptorStore,
    current_configuration: u16,
    configurations: BTreeSet<u16>,
    unsolicited: BTreeSet<EntityId>,
}

impl EntityState {
    /// Build the model with an ENTITY descriptor describing `config`.
    #[must_use]
    pub fn new(config: &AvdeccConfig, entity_id: EntityId, available_index: AvailableIndex) -> Self {
        let entity = EntityDescriptor {
            entity_id,
            entity_model_id: config.entity_model_id,
            entity_capabilities: config.entity_capabilities,
            talker_stream_sources: config.talker_stream_sources,
            talker_capabilities: config.talker_capabilities,
            listener_stream_sinks: config.listener_stream_sinks,
            listener_capabilities: config.listener_capabilities,
            controller_capabilities: config.controller_capabilities,
            available_index: available_index.get(),
            configurations_count: 1,
            ..EntityDescriptor::default()
        };
        let mut descriptors = DescriptorStore::new();
        descriptors.insert(
            DescriptorKey::new(0, DescriptorType::ENTITY, 0),
            entity.body(),
            false,
        );
        Self {
            entity_id,
            available_index,
            ownership: EntityOwnership::new(duration_ns(config.lock_timeout)),
            descriptors,
            current_configuration: 0,
            configurations: BTreeSet::from([0]),
            unsolicited: BTreeSet::new(),
        }
    }

    /// Local entity id.
    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Current `available_index`.
    #[must_use]
    pub fn available_index(&self) -> u32 {
        self.available_index.get()
    }

    pub(crate) fn bump_available_index(&self) -> u32 {
        self.available_index.bump()
    }

    /// Active configuration index.
    #[must_use]
    pub fn current_configuration(&self) -> u16 {
        self.current_configuration
    }

    /// Registered configuration indices.
    #[must_use]
    pub fn configurations(&self) -> Vec<u16> {
        self.configurations.iter().copied().collect()
    }

    /// Make `index` selectable by SET_CONFIGURATION.
    pub fn register_configuration(&mut self, index: u16) {
        self.configurations.insert(index);
    }

    /// Switch the active configuration. Returns whether it changed.
    ///
    /// # Errors
    ///
    /// `NoSuchDescriptor` if `index` is not registered.
    pub fn set_current_configuration(&mut self, index: u16) -> Result<bool, AemStatus> {
        if !self.configurations.contains(&index) {
            return Err(AemStatus::NoSuchDescriptor);
        }
        let changed = self.current_configuration != index;
        self.current_configuration = index;
        Ok(changed)
    }

    /// Store a descriptor body. CONFIGURATION descriptors register their index.
    ///
    /// # Errors
    ///
    /// `CodecError::PayloadTooLarge` if the body cannot fit a READ_DESCRIPTOR response.
    pub fn set_descriptor(
        &mut self,
        key: DescriptorKey,
        body: Bytes,
        writable: bool,
    ) -> Result<(), CodecError> {
        if body.len() > MAX_DESCRIPTOR_BODY {
            return Err(CodecError::PayloadTooLarge {
                len: body.len(),
                max: MAX_DESCRIPTOR_BODY,
            });
        }
        if key.descriptor_type == DescriptorType::CONFIGURATION {
            self.register_configuration(key.descriptor_index);
        }
        self.descriptors.insert(key, body, writable);
        Ok(())
    }

    /// Descriptor body as served to controllers.
    ///
    /// The ENTITY descriptor reports the live `available_index`,
    /// configuration count and current configuration.
    #[must_use]
    pub fn read_descriptor(&self, key: &DescriptorKey) -> Option<Bytes> {
        let body = self.descriptors.get(key)?;
        if key.descriptor_type != DescriptorType::ENTITY
            || body.len() < EntityDescriptor::SIZE - 4
        {
            return Some(body.clone());
        }
        let mut live = BytesMut::from(&body[..]);
        let index = EntityDescriptor::BODY_AVAILABLE_INDEX;
        live[index..index + 4].copy_from_slice(&self.available_index().to_be_bytes());
        let count = u16::try_from(self.configurations.len()).unwrap_or(u16::MAX);
        let offset = EntityDescriptor::BODY_CONFIGURATIONS_COUNT;
        live[offset..offset + 2].copy_from_slice(&count.to_be_bytes());
        let offset = EntityDescriptor::BODY_CURRENT_CONFIGURATION;
        live[offset..offset + 2].copy_from_slice(&self.current_configuration.to_be_bytes());
        Some(live.freeze())
    }

    /// Add `controller` to the unsolicited notification list. Returns whether it was new.
    pub fn register_unsolicited(&mut self, controller: EntityId) -> bool {
        self.unsolicited.insert(controller)
    }

    /// Remove `controller` from the unsolicited notification list.
    pub fn deregister_unsolicited(&mut self, controller: EntityId) -> bool {
        self.unsolicited.remove(&controller)
    }

    /// Controllers registered for unsolicited notifications.
    #[must_use]
    pub fn unsolicited_controllers(&self) -> Vec<EntityId> {
        self.unsolicited.iter().copied().collect()
    }
}
