//! ADPDU layout and encoding (IEEE 1722.1 Clause 6.2).

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::codec::{CodecError, ControlHeader, Reader, SUBTYPE_ADP, expect_header};
use crate::types::EntityId;

/// ADP message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AdpMessageType {
    /// Entity announces its presence (periodic or on request).
    EntityAvailable = 0x00,
    /// Entity is leaving the network.
    EntityDeparting = 0x01,
    /// Controller asks entities to announce themselves.
    EntityDiscoveryRequest = 0x02,
}

impl AdpMessageType {
    /// Parse from the lower 4 bits of a byte.
    pub fn from_nibble(value: u8) -> Result<Self, CodecError> {
        match value & 0x0F {
            0x00 => Ok(Self::EntityAvailable),
            0x01 => Ok(Self::EntityDeparting),
            0x02 => Ok(Self::EntityDiscoveryRequest),
            other => Err(CodecError::UnknownMessageType {
                subtype: SUBTYPE_ADP,
                value: other,
            }),
        }
    }
}

impl std::fmt::Display for AdpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EntityAvailable => write!(f, "ENTITY_AVAILABLE"),
            Self::EntityDeparting => write!(f, "ENTITY_DEPARTING"),
            Self::EntityDiscoveryRequest => write!(f, "ENTITY_DISCOVERY_REQUEST"),
        }
    }
}

/// ADP data unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adpdu {
    /// Message type.
    pub message_type: AdpMessageType,
    /// Validity of this advertisement in 2-second units (5 bits).
    pub valid_time: u8,
    /// Advertised (or, for discovery requests, addressed) entity.
    pub entity_id: EntityId,
    /// Entity model id.
    pub entity_model_id: u64,
    /// `entity_capabilities` bits.
    pub entity_capabilities: u32,
    /// Number of stream sources.
    pub talker_stream_sources: u16,
    /// `talker_capabilities` bits.
    pub talker_capabilities: u16,
    /// Number of stream sinks.
    pub listener_stream_sinks: u16,
    /// `listener_capabilities` bits.
    pub listener_capabilities: u16,
    /// `controller_capabilities` bits.
    pub controller_capabilities: u32,
    /// Counter bumped on every entity-model visible change.
    pub available_index: u32,
    /// gPTP grandmaster clock identity.
    pub gptp_grandmaster_id: u64,
    /// gPTP domain number.
    pub gptp_domain_number: u8,
    /// Current configuration.
    pub current_configuration_index: u16,
    /// IDENTIFY control descriptor index.
    pub identify_control_index: u16,
    /// AVB_INTERFACE the ADPDU was sent on.
    pub interface_index: u16,
    /// Association id.
    pub association_id: u64,
}

impl Adpdu {
    /// Bytes after the common header.
    pub const CONTROL_DATA_LENGTH: u16 = 56;
    /// Total PDU size.
    pub const SIZE: usize = ControlHeader::SIZE + Self::CONTROL_DATA_LENGTH as usize;

    /// ENTITY_DISCOVERY_REQUEST; `EntityId::NONE` addresses every entity.
    #[must_use]
    pub fn discovery_request(entity_id: EntityId) -> Self {
        Self {
            message_type: AdpMessageType::EntityDiscoveryRequest,
            valid_time: 0,
            entity_id,
            ..Self::empty()
        }
    }

    fn empty() -> Self {
        Self {
            message_type: AdpMessageType::EntityAvailable,
            valid_time: 0,
            entity_id: EntityId::NONE,
            entity_model_id: 0,
            entity_capabilities: 0,
            talker_stream_sources: 0,
            talker_capabilities: 0,
            listener_stream_sinks: 0,
            listener_capabilities: 0,
            controller_capabilities: 0,
            available_index: 0,
            gptp_grandmaster_id: 0,
            gptp_domain_number: 0,
            current_configuration_index: 0,
            identify_control_index: 0,
            interface_index: 0,
            association_id: 0,
        }
    }

    /// Encode to bytes.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        ControlHeader {
            subtype: SUBTYPE_ADP,
            sv: false,
            version: 0,
            message_type: self.message_type as u8,
            status: self.valid_time,
            control_data_length: Self::CONTROL_DATA_LENGTH,
            id: self.entity_id.get(),
        }
        .encode(&mut buf)
        .map_err(|e| match e {
            CodecError::FieldOutOfRange { value, .. } => CodecError::FieldOutOfRange {
                field: "valid_time",
                value,
            },
            other => other,
        })?;
        buf.put_u64(self.entity_model_id);
        buf.put_u32(self.entity_capabilities);
        buf.put_u16(self.talker_stream_sources);
        buf.put_u16(self.talker_capabilities);
        buf.put_u16(self.listener_stream_sinks);
        buf.put_u16(self.listener_capabilities);
        buf.put_u32(self.controller_capabilities);
        buf.put_u32(self.available_index);
        buf.put_u64(self.gptp_grandmaster_id);
        buf.put_u8(self.gptp_domain_number);
        buf.put_u8(0); // reserved
        buf.put_u16(self.current_configuration_index);
        buf.put_u16(self.identify_control_index);
        buf.put_u16(self.interface_index);
        buf.put_u64(self.association_id);
        buf.put_u32(0); // reserved
        Ok(buf.freeze())
    }

    /// Decode from bytes. Trailing bytes (frame padding) are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < Self::SIZE {
            return Err(CodecError::TooShort {
                needed: Self::SIZE,
                have: data.len(),
            });
        }
        let mut r = Reader::new(data);
        let header = expect_header(&mut r, SUBTYPE_ADP)?;
        let message_type = AdpMessageType::from_nibble(header.message_type)?;
        if header.control_data_length != Self::CONTROL_DATA_LENGTH {
            return Err(CodecError::InvalidLength {
                value: header.control_data_length,
                expected: "56",
            });
        }
        let entity_model_id = r.u64()?;
        let entity_capabilities = r.u32()?;
        let talker_stream_sources = r.u16()?;
        let talker_capabilities = r.u16()?;
        let listener_stream_sinks = r.u16()?;
        let listener_capabilities = r.u16()?;
        let controller_capabilities = r.u32()?;
        let available_index = r.u32()?;
        let gptp_grandmaster_id = r.u64()?;
        let gptp_domain_number = r.u8()?;
        r.skip(1)?;
        let current_configuration_index = r.u16()?;
        let identify_control_index = r.u16()?;
        let interface_index = r.u16()?;
        let association_id = r.u64()?;
        r.skip(4)?;
        Ok(Self {
            message_type,
            valid_time: header.status,
            entity_id: EntityId(header.id),
            entity_model_id,
            entity_capabilities,
            talker_stream_sources,
            talker_capabilities,
            listener_stream_sinks,
            listener_capabilities,
            controller_capabilities,
            available_index,
            gptp_grandmaster_id,
            gptp_domain_number,
            current_configuration_index,
            identify_control_index,
            interface_index,
            association_id,
        })
    }
}

impl Default for Adpdu {
    fn default() -> Self {
        Self::empty()
    }
}
