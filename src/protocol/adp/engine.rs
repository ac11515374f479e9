//! ADP advertising and discovery state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;

use super::message::{AdpMessageType, Adpdu};
use crate::protocol::EngineOutput;
use crate::protocol::codec::CodecError;
use crate::state::{DepartureReason, EntityEvent};
use crate::types::{AvdeccConfig, EntityId, duration_ns};

/// Nanoseconds in one `valid_time` unit.
const VALID_TIME_UNIT_NS: u64 = 2_000_000_000;

/// Shared handle to the local entity's `available_index`.
///
/// The enumeration engine bumps it after every visible state change and the
/// discovery engine reads it for each advertisement.
#[derive(Debug, Clone, Default)]
pub struct AvailableIndex(Arc<AtomicU32>);

impl AvailableIndex {
    /// Start at `value`.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Self(Arc::new(AtomicU32::new(value)))
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Increment (wrapping) and return the new value.
    pub fn bump(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}

/// A remote entity known through ADP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEntity {
    /// Entity id.
    pub entity_id: EntityId,
    /// Entity model id.
    pub entity_model_id: u64,
    /// `entity_capabilities` bits.
    pub entity_capabilities: u32,
    /// Stream sources.
    pub talker_stream_sources: u16,
    /// `talker_capabilities` bits.
    pub talker_capabilities: u16,
    /// Stream sinks.
    pub listener_stream_sinks: u16,
    /// `listener_capabilities` bits.
    pub listener_capabilities: u16,
    /// `controller_capabilities` bits.
    pub controller_capabilities: u32,
    /// Last advertised `available_index`.
    pub available_index: u32,
    /// gPTP grandmaster.
    pub gptp_grandmaster_id: u64,
    /// gPTP domain.
    pub gptp_domain_number: u8,
    /// Active configuration.
    pub current_configuration_index: u16,
    /// Association id.
    pub association_id: u64,
    /// Advertised validity in 2-second units.
    pub valid_time: u8,
    /// Clock reading of the last advertisement, in nanoseconds.
    pub last_seen: u64,
}

impl DiscoveredEntity {
    fn from_adpdu(pdu: &Adpdu, now: u64) -> Self {
        Self {
            entity_id: pdu.entity_id,
            entity_model_id: pdu.entity_model_id,
            entity_capabilities: pdu.entity_capabilities,
            talker_stream_sources: pdu.talker_stream_sources,
            talker_capabilities: pdu.talker_capabilities,
            listener_stream_sinks: pdu.listener_stream_sinks,
            listener_capabilities: pdu.listener_capabilities,
            controller_capabilities: pdu.controller_capabilities,
            available_index: pdu.available_index,
            gptp_grandmaster_id: pdu.gptp_grandmaster_id,
            gptp_domain_number: pdu.gptp_domain_number,
            current_configuration_index: pdu.current_configuration_index,
            association_id: pdu.association_id,
            valid_time: pdu.valid_time,
            last_seen: now,
        }
    }

    /// Whether the record has outlived its advertised validity at `now`.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.last_seen) > u64::from(self.valid_time) * VALID_TIME_UNIT_NS
    }

    /// Whether anything but `last_seen` differs.
    fn differs_from(&self, other: &Self) -> bool {
        Self {
            last_seen: other.last_seen,
            ..self.clone()
        } != *other
    }
}

/// Advertises the local entity and tracks remote ones.
#[derive(Debug)]
pub struct DiscoveryEngine {
    local: Adpdu,
    available_index: AvailableIndex,
    advertising: bool,
    interval_ns: u64,
    next_advertisement: u64,
    entities: HashMap<EntityId, DiscoveredEntity>,
}

impl DiscoveryEngine {
    /// Create an engine advertising `entity_id` with the identity in `config`.
    #[must_use]
    pub fn new(config: &AvdeccConfig, entity_id: EntityId, available_index: AvailableIndex) -> Self {
        let local = Adpdu {
            message_type: AdpMessageType::EntityAvailable,
            valid_time: config.valid_time,
            entity_id,
            entity_model_id: config.entity_model_id,
            entity_capabilities: config.entity_capabilities,
            talker_stream_sources: config.talker_stream_sources,
            talker_capabilities: config.talker_capabilities,
            listener_stream_sinks: config.listener_stream_sinks,
            listener_capabilities: config.listener_capabilities,
            controller_capabilities: config.controller_capabilities,
            gptp_domain_number: config.gptp_domain_number,
            ..Adpdu::default()
        };
        Self {
            local,
            available_index,
            advertising: false,
            interval_ns: duration_ns(config.advertisement_interval),
            next_advertisement: 0,
            entities: HashMap::new(),
        }
    }

    /// Local entity id.
    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        self.local.entity_id
    }

    /// Handle to the local `available_index`.
    #[must_use]
    pub fn available_index(&self) -> &AvailableIndex {
        &self.available_index
    }

    /// Whether periodic advertisement is on.
    #[must_use]
    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    /// Record a configuration change for subsequent advertisements.
    pub fn set_current_configuration(&mut self, index: u16) {
        self.local.current_configuration_index = index;
    }

    /// Record the gPTP grandmaster for subsequent advertisements.
    pub fn set_gptp_grandmaster(&mut self, id: u64) {
        self.local.gptp_grandmaster_id = id;
    }

    fn available_pdu(&self) -> Result<Bytes, CodecError> {
        Adpdu {
            available_index: self.available_index.get(),
            ..self.local.clone()
        }
        .encode()
    }

    /// Start periodic advertisement and return the first ENTITY_AVAILABLE.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the local identity does not encode.
    pub fn advertise(&mut self, now: u64) -> Result<Bytes, CodecError> {
        let frame = self.available_pdu()?;
        if !self.advertising {
            tracing::info!(entity_id = %self.local.entity_id, "Advertising started");
        }
        self.advertising = true;
        self.next_advertisement = now.saturating_add(self.interval_ns);
        Ok(frame)
    }

    /// Stop advertising; returns the ENTITY_DEPARTING to send if advertisement was on.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the local identity does not encode.
    pub fn stop_advertising(&mut self) -> Result<Option<Bytes>, CodecError> {
        if !self.advertising {
            return Ok(None);
        }
        self.advertising = false;
        tracing::info!(entity_id = %self.local.entity_id, "Advertising stopped");
        Adpdu {
            message_type: AdpMessageType::EntityDeparting,
            valid_time: 0,
            available_index: self.available_index.get(),
            ..self.local.clone()
        }
        .encode()
        .map(Some)
    }

    /// ENTITY_DISCOVERY_REQUEST for `target` (`EntityId::NONE` for all).
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if encoding fails.
    pub fn discover(&self, target: EntityId) -> Result<Bytes, CodecError> {
        tracing::debug!(target_id = %target, "Sending discovery request");
        Adpdu::discovery_request(target).encode()
    }

    /// Process an inbound ADPDU.
    pub fn handle(&mut self, pdu: &Adpdu, now: u64) -> EngineOutput {
        let mut out = EngineOutput::new();
        if pdu.entity_id == self.local.entity_id
            && pdu.message_type != AdpMessageType::EntityDiscoveryRequest
        {
            tracing::trace!("Ignoring own advertisement");
            return out;
        }
        match pdu.message_type {
            AdpMessageType::EntityAvailable => self.on_available(pdu, now, &mut out),
            AdpMessageType::EntityDeparting => {
                if self.entities.remove(&pdu.entity_id).is_some() {
                    tracing::info!(entity_id = %pdu.entity_id, "Entity departed");
                    out.event(EntityEvent::EntityDeparted {
                        entity_id: pdu.entity_id,
                        reason: DepartureReason::Departing,
                    });
                }
            }
            AdpMessageType::EntityDiscoveryRequest => {
                let addressed =
                    pdu.entity_id.is_none() || pdu.entity_id == self.local.entity_id;
                if addressed && self.advertising {
                    match self.available_pdu() {
                        Ok(frame) => out.frame(frame),
                        Err(e) => tracing::warn!("Failed to encode advertisement: {}", e),
                    }
                }
            }
        }
        out
    }

    fn on_available(&mut self, pdu: &Adpdu, now: u64, out: &mut EngineOutput) {
        let fresh = DiscoveredEntity::from_adpdu(pdu, now);
        match self.entities.insert(pdu.entity_id, fresh.clone()) {
            None => {
                tracing::info!(
                    entity_id = %pdu.entity_id,
                    available_index = pdu.available_index,
                    "Entity discovered"
                );
                out.event(EntityEvent::EntityDiscovered { entity: fresh });
            }
            Some(old) if fresh.available_index < old.available_index => {
                tracing::info!(
                    entity_id = %pdu.entity_id,
                    old_index = old.available_index,
                    new_index = fresh.available_index,
                    "Entity rebooted"
                );
                out.event(EntityEvent::EntityRebooted { entity: fresh });
            }
            Some(old) if fresh.differs_from(&old) => {
                tracing::debug!(
                    entity_id = %pdu.entity_id,
                    available_index = fresh.available_index,
                    "Entity updated"
                );
                out.event(EntityEvent::EntityUpdated { entity: fresh });
            }
            Some(_) => {}
        }
    }

    /// Periodic work: advertise when due and evict expired entities.
    pub fn tick(&mut self, now: u64) -> EngineOutput {
        let mut out = EngineOutput::new();
        if self.advertising && now >= self.next_advertisement {
            match self.advertise(now) {
                Ok(frame) => out.frame(frame),
                Err(e) => tracing::warn!("Failed to encode advertisement: {}", e),
            }
        }
        let expired: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.entity_id)
            .collect();
        for entity_id in expired {
            self.entities.remove(&entity_id);
            tracing::info!(entity_id = %entity_id, "Entity timed out");
            out.event(EntityEvent::EntityDeparted {
                entity_id,
                reason: DepartureReason::TimedOut,
            });
        }
        out
    }

    /// Record for `entity_id`, if known.
    #[must_use]
    pub fn entity(&self, entity_id: EntityId) -> Option<&DiscoveredEntity> {
        self.entities.get(&entity_id)
    }

    /// Every known entity.
    #[must_use]
    pub fn entities(&self) -> Vec<DiscoveredEntity> {
        self.entities.values().cloned().collect()
    }

    /// Forget every remote entity.
    pub fn clear(&mut self) {
        self.entities.clear();
    }
}
