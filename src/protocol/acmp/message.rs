//! ACMPDU layout and encoding (IEEE 1722.1 Clause 8.2).

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::codec::{CodecError, ControlHeader, Reader, SUBTYPE_ACMP, expect_header};
use crate::types::{EntityId, MacAddress, StreamId};

/// ACMP message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AcmpMessageType {
    /// Listener to talker: start transmitting to me.
    ConnectTxCommand = 0,
    /// Talker answer to `ConnectTxCommand`.
    ConnectTxResponse = 1,
    /// Listener to talker: stop transmitting to me.
    DisconnectTxCommand = 2,
    /// Talker answer to `DisconnectTxCommand`.
    DisconnectTxResponse = 3,
    /// Query a talker source.
    GetTxStateCommand = 4,
    /// Talker source state.
    GetTxStateResponse = 5,
    /// Controller to listener: connect to a talker.
    ConnectRxCommand = 6,
    /// Listener answer to `ConnectRxCommand`.
    ConnectRxResponse = 7,
    /// Controller to listener: disconnect.
    DisconnectRxCommand = 8,
    /// Listener answer to `DisconnectRxCommand`.
    DisconnectRxResponse = 9,
    /// Query a listener sink.
    GetRxStateCommand = 10,
    /// Listener sink state.
    GetRxStateResponse = 11,
    /// Query one connection of a talker source.
    GetTxConnectionCommand = 12,
    /// Connection at the requested index.
    GetTxConnectionResponse = 13,
}

impl AcmpMessageType {
    /// Parse from the lower 4 bits of a byte.
    pub fn from_nibble(value: u8) -> Result<Self, CodecError> {
        Ok(match value & 0x0F {
            0 => Self::ConnectTxCommand,
            1 => Self::ConnectTxResponse,
            2 => Self::DisconnectTxCommand,
            3 => Self::DisconnectTxResponse,
            4 => Self::GetTxStateCommand,
            5 => Self::GetTxStateResponse,
            6 => Self::ConnectRxCommand,
            7 => Self::ConnectRxResponse,
            8 => Self::DisconnectRxCommand,
            9 => Self::DisconnectRxResponse,
            10 => Self::GetRxStateCommand,
            11 => Self::GetRxStateResponse,
            12 => Self::GetTxConnectionCommand,
            13 => Self::GetTxConnectionResponse,
            other => {
                return Err(CodecError::UnknownMessageType {
                    subtype: SUBTYPE_ACMP,
                    value: other,
                });
            }
        })
    }

    /// Commands have even values, responses odd.
    #[must_use]
    pub fn is_command(self) -> bool {
        (self as u8) & 1 == 0
    }

    /// The response type answering this command (identity for responses).
    #[must_use]
    pub fn response(self) -> Self {
        match self {
            Self::ConnectTxCommand => Self::ConnectTxResponse,
            Self::DisconnectTxCommand => Self::DisconnectTxResponse,
            Self::GetTxStateCommand => Self::GetTxStateResponse,
            Self::ConnectRxCommand => Self::ConnectRxResponse,
            Self::DisconnectRxCommand => Self::DisconnectRxResponse,
            Self::GetRxStateCommand => Self::GetRxStateResponse,
            Self::GetTxConnectionCommand => Self::GetTxConnectionResponse,
            other => other,
        }
    }

    /// Whether a talker answers this message (as opposed to a listener).
    #[must_use]
    pub fn is_talker_message(self) -> bool {
        matches!(
            self,
            Self::ConnectTxCommand
                | Self::ConnectTxResponse
                | Self::DisconnectTxCommand
                | Self::DisconnectTxResponse
                | Self::GetTxStateCommand
                | Self::GetTxStateResponse
                | Self::GetTxConnectionCommand
                | Self::GetTxConnectionResponse
        )
    }
}

/// ACMP status codes (IEEE 1722.1 Table 8.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcmpStatus {
    /// Command succeeded.
    Success,
    /// Listener does not have the addressed sink.
    ListenerUnknownId,
    /// Talker does not have the addressed source.
    TalkerUnknownId,
    /// Talker could not allocate a destination MAC.
    TalkerDestMacFail,
    /// Talker has no free stream index.
    TalkerNoStreamIndex,
    /// Talker has no bandwidth.
    TalkerNoBandwidth,
    /// Talker source exclusively connected.
    TalkerExclusive,
    /// Listener timed out waiting for the talker.
    ListenerTalkerTimeout,
    /// Listener sink exclusively connected.
    ListenerExclusive,
    /// State temporarily unavailable.
    StateUnavailable,
    /// Stream not connected.
    NotConnected,
    /// No connection at the given index.
    NoSuchConnection,
    /// Responder could not send a message.
    CouldNotSendMessage,
    /// Talker misbehaving.
    TalkerMisbehaving,
    /// Listener misbehaving.
    ListenerMisbehaving,
    /// Controller not authorized.
    ControllerNotAuthorized,
    /// Incompatible request.
    IncompatibleRequest,
    /// Not supported.
    NotSupported,
    /// Value not defined by the standard.
    Other(u8),
}

impl AcmpStatus {
    /// Wire value.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::ListenerUnknownId => 1,
            Self::TalkerUnknownId => 2,
            Self::TalkerDestMacFail => 3,
            Self::TalkerNoStreamIndex => 4,
            Self::TalkerNoBandwidth => 5,
            Self::TalkerExclusive => 6,
            Self::ListenerTalkerTimeout => 7,
            Self::ListenerExclusive => 8,
            Self::StateUnavailable => 9,
            Self::NotConnected => 10,
            Self::NoSuchConnection => 11,
            Self::CouldNotSendMessage => 12,
            Self::TalkerMisbehaving => 13,
            Self::ListenerMisbehaving => 14,
            Self::ControllerNotAuthorized => 16,
            Self::IncompatibleRequest => 17,
            Self::NotSupported => 31,
            Self::Other(raw) => raw,
        }
    }
}

impl From<u8> for AcmpStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Success,
            1 => Self::ListenerUnknownId,
            2 => Self::TalkerUnknownId,
            3 => Self::TalkerDestMacFail,
            4 => Self::TalkerNoStreamIndex,
            5 => Self::TalkerNoBandwidth,
            6 => Self::TalkerExclusive,
            7 => Self::ListenerTalkerTimeout,
            8 => Self::ListenerExclusive,
            9 => Self::StateUnavailable,
            10 => Self::NotConnected,
            11 => Self::NoSuchConnection,
            12 => Self::CouldNotSendMessage,
            13 => Self::TalkerMisbehaving,
            14 => Self::ListenerMisbehaving,
            16 => Self::ControllerNotAuthorized,
            17 => Self::IncompatibleRequest,
            31 => Self::NotSupported,
            other => Self::Other(other),
        }
    }
}

/// ACMPDU `flags` bits.
pub mod flags {
    /// Stream uses SR class B.
    pub const CLASS_B: u16 = 0x0001;
    /// Fast connect at listener startup.
    pub const FAST_CONNECT: u16 = 0x0002;
    /// Connection saved by the listener.
    pub const SAVED_STATE: u16 = 0x0004;
    /// Listener waits before streaming.
    pub const STREAMING_WAIT: u16 = 0x0008;
    /// Encrypted PDUs supported.
    pub const SUPPORTS_ENCRYPTED: u16 = 0x0010;
    /// Stream is encrypted.
    pub const ENCRYPTED_PDU: u16 = 0x0020;
    /// Talker failed to register the stream.
    pub const TALKER_FAILED: u16 = 0x0040;
}

/// ACMP data unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acmpdu {
    /// Message type.
    pub message_type: AcmpMessageType,
    /// Status (responses).
    pub status: AcmpStatus,
    /// Stream id.
    pub stream_id: StreamId,
    /// Controller that initiated the exchange.
    pub controller_entity_id: EntityId,
    /// Talker entity.
    pub talker_entity_id: EntityId,
    /// Listener entity.
    pub listener_entity_id: EntityId,
    /// Stream source index on the talker.
    pub talker_unique_id: u16,
    /// Stream sink index on the listener.
    pub listener_unique_id: u16,
    /// Stream destination MAC.
    pub stream_dest_mac: MacAddress,
    /// Connection count (talker) or connection index (`GET_TX_CONNECTION`).
    pub connection_count: u16,
    /// Correlation id.
    pub sequence_id: u16,
    /// `flags` bits.
    pub flags: u16,
    /// Stream VLAN id.
    pub stream_vlan_id: u16,
}

impl Acmpdu {
    /// Bytes after the common header.
    pub const CONTROL_DATA_LENGTH: u16 = 44;
    /// Total PDU size.
    pub const SIZE: usize = ControlHeader::SIZE + Self::CONTROL_DATA_LENGTH as usize;

    /// A zeroed command of `message_type`.
    #[must_use]
    pub fn command(message_type: AcmpMessageType) -> Self {
        Self {
            message_type,
            status: AcmpStatus::Success,
            stream_id: StreamId::default(),
            controller_entity_id: EntityId::NONE,
            talker_entity_id: EntityId::NONE,
            listener_entity_id: EntityId::NONE,
            talker_unique_id: 0,
            listener_unique_id: 0,
            stream_dest_mac: MacAddress::ZERO,
            connection_count: 0,
            sequence_id: 0,
            flags: 0,
            stream_vlan_id: 0,
        }
    }

    /// Copy of this command turned into its response with `status`.
    #[must_use]
    pub fn to_response(&self, status: AcmpStatus) -> Self {
        Self {
            message_type: self.message_type.response(),
            status,
            ..self.clone()
        }
    }

    /// Encode to bytes.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        ControlHeader {
            subtype: SUBTYPE_ACMP,
            sv: false,
            version: 0,
            message_type: self.message_type as u8,
            status: self.status.to_u8(),
            control_data_length: Self::CONTROL_DATA_LENGTH,
            id: self.stream_id.get(),
        }
        .encode(&mut buf)?;
        buf.put_u64(self.controller_entity_id.get());
        buf.put_u64(self.talker_entity_id.get());
        buf.put_u64(self.listener_entity_id.get());
        buf.put_u16(self.talker_unique_id);
        buf.put_u16(self.listener_unique_id);
        buf.put_slice(&self.stream_dest_mac.octets());
        buf.put_u16(self.connection_count);
        buf.put_u16(self.sequence_id);
        buf.put_u16(self.flags);
        buf.put_u16(self.stream_vlan_id);
        buf.put_u16(0); // reserved
        Ok(buf.freeze())
    }

    /// Decode from bytes. Trailing bytes are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < Self::SIZE {
            return Err(CodecError::TooShort {
                needed: Self::SIZE,
                have: data.len(),
            });
        }
        let mut r = Reader::new(data);
        let header = expect_header(&mut r, SUBTYPE_ACMP)?;
        let message_type = AcmpMessageType::from_nibble(header.message_type)?;
        if header.control_data_length != Self::CONTROL_DATA_LENGTH {
            return Err(CodecError::InvalidLength {
                value: header.control_data_length,
                expected: "44",
            });
        }
        let controller_entity_id = EntityId(r.u64()?);
        let talker_entity_id = EntityId(r.u64()?);
        let listener_entity_id = EntityId(r.u64()?);
        let talker_unique_id = r.u16()?;
        let listener_unique_id = r.u16()?;
        let stream_dest_mac = MacAddress(r.array()?);
        let connection_count = r.u16()?;
        let sequence_id = r.u16()?;
        let flags = r.u16()?;
        let stream_vlan_id = r.u16()?;
        r.skip(2)?;
        Ok(Self {
            message_type,
            status: AcmpStatus::from(header.status),
            stream_id: StreamId(header.id),
            controller_entity_id,
            talker_entity_id,
            listener_entity_id,
            talker_unique_id,
            listener_unique_id,
            stream_dest_mac,
            connection_count,
            sequence_id,
            flags,
            stream_vlan_id,
        })
    }
}
