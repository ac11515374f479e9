//! AECPDU layout and encoding (IEEE 1722.1 Clause 9.2).
//!
//! ```text
//!  0..12   common header (id = target_entity_id, status = AECP status)
//!  12..20  controller_entity_id
//!  20..22  sequence_id
//!  AEM only:
//!  22..24  u(1) | command_type(15)
//!  24..    command specific data (up to 512 bytes)
//! ```
//!
//! `control_data_length` counts every byte from `controller_entity_id` on.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::codec::{CodecError, ControlHeader, Reader, SUBTYPE_AECP, expect_header};
use crate::types::EntityId;

/// AECP message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AecpMessageType {
    /// AEM command.
    AemCommand = 0,
    /// AEM response.
    AemResponse = 1,
    /// Address access command.
    AddressAccessCommand = 2,
    /// Address access response.
    AddressAccessResponse = 3,
    /// AV/C command.
    AvcCommand = 4,
    /// AV/C response.
    AvcResponse = 5,
    /// Vendor unique command.
    VendorUniqueCommand = 6,
    /// Vendor unique response.
    VendorUniqueResponse = 7,
    /// HDCP APM command.
    HdcpApmCommand = 8,
    /// HDCP APM response.
    HdcpApmResponse = 9,
    /// Extended command.
    ExtendedCommand = 14,
    /// Extended response.
    ExtendedResponse = 15,
}

impl AecpMessageType {
    /// Parse from the lower 4 bits of a byte.
    pub fn from_nibble(value: u8) -> Result<Self, CodecError> {
        Ok(match value & 0x0F {
            0 => Self::AemCommand,
            1 => Self::AemResponse,
            2 => Self::AddressAccessCommand,
            3 => Self::AddressAccessResponse,
            4 => Self::AvcCommand,
            5 => Self::AvcResponse,
            6 => Self::VendorUniqueCommand,
            7 => Self::VendorUniqueResponse,
            8 => Self::HdcpApmCommand,
            9 => Self::HdcpApmResponse,
            14 => Self::ExtendedCommand,
            15 => Self::ExtendedResponse,
            other => {
                return Err(CodecError::UnknownMessageType {
                    subtype: SUBTYPE_AECP,
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
            Self::AemCommand => Self::AemResponse,
            Self::AddressAccessCommand => Self::AddressAccessResponse,
            Self::AvcCommand => Self::AvcResponse,
            Self::VendorUniqueCommand => Self::VendorUniqueResponse,
            Self::HdcpApmCommand => Self::HdcpApmResponse,
            Self::ExtendedCommand => Self::ExtendedResponse,
            other => other,
        }
    }

    /// Whether the PDU carries an AEM command type field.
    #[must_use]
    pub fn is_aem(self) -> bool {
        matches!(self, Self::AemCommand | Self::AemResponse)
    }
}

/// AEM command type (15 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AemCommandType(pub u16);

impl AemCommandType {
    /// Largest encodable command type.
    pub const MAX: u16 = 0x7FFF;

    /// ACQUIRE_ENTITY
    pub const ACQUIRE_ENTITY: Self = Self(0x0000);
    /// LOCK_ENTITY
    pub const LOCK_ENTITY: Self = Self(0x0001);
    /// ENTITY_AVAILABLE
    pub const ENTITY_AVAILABLE: Self = Self(0x0002);
    /// CONTROLLER_AVAILABLE
    pub const CONTROLLER_AVAILABLE: Self = Self(0x0003);
    /// READ_DESCRIPTOR
    pub const READ_DESCRIPTOR: Self = Self(0x0004);
    /// WRITE_DESCRIPTOR
    pub const WRITE_DESCRIPTOR: Self = Self(0x0005);
    /// SET_CONFIGURATION
    pub const SET_CONFIGURATION: Self = Self(0x0006);
    /// GET_CONFIGURATION
    pub const GET_CONFIGURATION: Self = Self(0x0007);
    /// SET_STREAM_FORMAT
    pub const SET_STREAM_FORMAT: Self = Self(0x0008);
    /// GET_STREAM_FORMAT
    pub const GET_STREAM_FORMAT: Self = Self(0x0009);
    /// SET_NAME
    pub const SET_NAME: Self = Self(0x0010);
    /// GET_NAME
    pub const GET_NAME: Self = Self(0x0011);
    /// START_STREAMING
    pub const START_STREAMING: Self = Self(0x0022);
    /// STOP_STREAMING
    pub const STOP_STREAMING: Self = Self(0x0023);
    /// REGISTER_UNSOLICITED_NOTIFICATION
    pub const REGISTER_UNSOLICITED_NOTIFICATION: Self = Self(0x0024);
    /// DEREGISTER_UNSOLICITED_NOTIFICATION
    pub const DEREGISTER_UNSOLICITED_NOTIFICATION: Self = Self(0x0025);
    /// IDENTIFY_NOTIFICATION
    pub const IDENTIFY_NOTIFICATION: Self = Self(0x0026);
    /// GET_AVB_INFO
    pub const GET_AVB_INFO: Self = Self(0x0027);
    /// GET_COUNTERS
    pub const GET_COUNTERS: Self = Self(0x0029);
    /// REBOOT
    pub const REBOOT: Self = Self(0x002A);
    /// AUTH_ADD_KEY
    pub const AUTH_ADD_KEY: Self = Self(0x0037);
    /// AUTH_DELETE_KEY
    pub const AUTH_DELETE_KEY: Self = Self(0x0038);
    /// AUTH_GET_KEY_LIST
    pub const AUTH_GET_KEY_LIST: Self = Self(0x0039);
    /// AUTH_GET_KEY
    pub const AUTH_GET_KEY: Self = Self(0x003A);
    /// AUTH_ADD_KEY_TO_CHAIN
    pub const AUTH_ADD_KEY_TO_CHAIN: Self = Self(0x003B);
    /// AUTH_DELETE_KEY_FROM_CHAIN
    pub const AUTH_DELETE_KEY_FROM_CHAIN: Self = Self(0x003C);
    /// AUTH_GET_KEYCHAIN_LIST
    pub const AUTH_GET_KEYCHAIN_LIST: Self = Self(0x003D);
    /// AUTH_GET_IDENTITY
    pub const AUTH_GET_IDENTITY: Self = Self(0x003E);
    /// AUTH_ADD_TOKEN
    pub const AUTH_ADD_TOKEN: Self = Self(0x003F);
    /// AUTH_DELETE_TOKEN
    pub const AUTH_DELETE_TOKEN: Self = Self(0x0040);
    /// AUTHENTICATE
    pub const AUTHENTICATE: Self = Self(0x0041);
    /// DEAUTHENTICATE
    pub const DEAUTHENTICATE: Self = Self(0x0042);

    /// Whether the command changes entity state visible to controllers.
    ///
    /// Such commands are refused while another controller holds the entity.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Self::WRITE_DESCRIPTOR
                | Self::SET_CONFIGURATION
                | Self::SET_STREAM_FORMAT
                | Self::SET_NAME
                | Self::START_STREAMING
                | Self::STOP_STREAMING
                | Self::REBOOT
        )
    }
}

impl std::fmt::Display for AemCommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            Self::ACQUIRE_ENTITY => "ACQUIRE_ENTITY",
            Self::LOCK_ENTITY => "LOCK_ENTITY",
            Self::ENTITY_AVAILABLE => "ENTITY_AVAILABLE",
            Self::CONTROLLER_AVAILABLE => "CONTROLLER_AVAILABLE",
            Self::READ_DESCRIPTOR => "READ_DESCRIPTOR",
            Self::WRITE_DESCRIPTOR => "WRITE_DESCRIPTOR",
            Self::SET_CONFIGURATION => "SET_CONFIGURATION",
            Self::GET_CONFIGURATION => "GET_CONFIGURATION",
            Self::REGISTER_UNSOLICITED_NOTIFICATION => "REGISTER_UNSOLICITED_NOTIFICATION",
            Self::DEREGISTER_UNSOLICITED_NOTIFICATION => "DEREGISTER_UNSOLICITED_NOTIFICATION",
            other => return write!(f, "AEM_COMMAND(0x{:04X})", other.0),
        };
        f.write_str(name)
    }
}

/// AEM status codes (IEEE 1722.1 Table 7.126).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AemStatus {
    /// Command succeeded.
    Success,
    /// No handler for the command.
    NotImplemented,
    /// Descriptor does not exist.
    NoSuchDescriptor,
    /// Entity locked by another controller.
    EntityLocked,
    /// Entity acquired by another controller.
    EntityAcquired,
    /// Controller not authenticated.
    NotAuthenticated,
    /// Authentication disabled.
    AuthenticationDisabled,
    /// Arguments malformed or out of range.
    BadArguments,
    /// Resources exhausted.
    NoResources,
    /// Command accepted, still in progress.
    InProgress,
    /// Entity misbehaving.
    EntityMisbehaving,
    /// Command not supported for this object.
    NotSupported,
    /// Stream is running.
    StreamIsRunning,
    /// Value not defined by the standard.
    Other(u8),
}

impl AemStatus {
    /// Wire value.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::NotImplemented => 1,
            Self::NoSuchDescriptor => 2,
            Self::EntityLocked => 3,
            Self::EntityAcquired => 4,
            Self::NotAuthenticated => 5,
            Self::AuthenticationDisabled => 6,
            Self::BadArguments => 7,
            Self::NoResources => 8,
            Self::InProgress => 9,
            Self::EntityMisbehaving => 10,
            Self::NotSupported => 11,
            Self::StreamIsRunning => 12,
            Self::Other(raw) => raw,
        }
    }
}

impl From<u8> for AemStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Success,
            1 => Self::NotImplemented,
            2 => Self::NoSuchDescriptor,
            3 => Self::EntityLocked,
            4 => Self::EntityAcquired,
            5 => Self::NotAuthenticated,
            6 => Self::AuthenticationDisabled,
            7 => Self::BadArguments,
            8 => Self::NoResources,
            9 => Self::InProgress,
            10 => Self::EntityMisbehaving,
            11 => Self::NotSupported,
            12 => Self::StreamIsRunning,
            other => Self::Other(other),
        }
    }
}

impl std::fmt::Display for AemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::NotImplemented => write!(f, "NOT_IMPLEMENTED"),
            Self::NoSuchDescriptor => write!(f, "NO_SUCH_DESCRIPTOR"),
            Self::EntityLocked => write!(f, "ENTITY_LOCKED"),
            Self::EntityAcquired => write!(f, "ENTITY_ACQUIRED"),
            Self::NotAuthenticated => write!(f, "NOT_AUTHENTICATED"),
            Self::AuthenticationDisabled => write!(f, "AUTHENTICATION_DISABLED"),
            Self::BadArguments => write!(f, "BAD_ARGUMENTS"),
            Self::NoResources => write!(f, "NO_RESOURCES"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::EntityMisbehaving => write!(f, "ENTITY_MISBEHAVING"),
            Self::NotSupported => write!(f, "NOT_SUPPORTED"),
            Self::StreamIsRunning => write!(f, "STREAM_IS_RUNNING"),
            Self::Other(raw) => write!(f, "STATUS({raw})"),
        }
    }
}

/// Message specific part of an AECPDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AecpBody {
    /// AEM command or response.
    Aem {
        /// Unsolicited response flag.
        unsolicited: bool,
        /// Command type.
        command_type: AemCommandType,
        /// Command specific data.
        payload: Bytes,
    },
    /// Any other AECP message type, carried opaquely.
    Other {
        /// Bytes after `sequence_id`.
        payload: Bytes,
    },
}

/// AECP data unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aecpdu {
    /// Message type.
    pub message_type: AecpMessageType,
    /// Status (responses).
    pub status: AemStatus,
    /// Entity addressed by the command.
    pub target_entity_id: EntityId,
    /// Controller that sent the command.
    pub controller_entity_id: EntityId,
    /// Correlation id.
    pub sequence_id: u16,
    /// Message specific part.
    pub body: AecpBody,
}

impl Aecpdu {
    /// Bytes of `control_data_length` before any message specific data.
    pub const COMMON_LENGTH: u16 = 10;
    /// Largest `control_data_length` accepted.
    pub const MAX_CONTROL_DATA_LENGTH: u16 = 524;
    /// Largest AEM command specific payload.
    pub const MAX_AEM_PAYLOAD: usize = 512;
    /// Smallest encoded AEM PDU.
    pub const MIN_AEM_SIZE: usize = ControlHeader::SIZE + 12;

    /// Build an AEM command.
    #[must_use]
    pub fn aem_command(
        target_entity_id: EntityId,
        controller_entity_id: EntityId,
        sequence_id: u16,
        command_type: AemCommandType,
        payload: Bytes,
    ) -> Self {
        Self {
            message_type: AecpMessageType::AemCommand,
            status: AemStatus::Success,
            target_entity_id,
            controller_entity_id,
            sequence_id,
            body: AecpBody::Aem {
                unsolicited: false,
                command_type,
                payload,
            },
        }
    }

    /// Response to this command carrying `status` and `payload`.
    #[must_use]
    pub fn to_response(&self, status: AemStatus, payload: Bytes) -> Self {
        let body = match &self.body {
            AecpBody::Aem { command_type, .. } => AecpBody::Aem {
                unsolicited: false,
                command_type: *command_type,
                payload,
            },
            AecpBody::Other { .. } => AecpBody::Other { payload },
        };
        Self {
            message_type: self.message_type.response(),
            status,
            target_entity_id: self.target_entity_id,
            controller_entity_id: self.controller_entity_id,
            sequence_id: self.sequence_id,
            body,
        }
    }

    /// AEM command type, if this is an AEM message.
    #[must_use]
    pub fn command_type(&self) -> Option<AemCommandType> {
        match &self.body {
            AecpBody::Aem { command_type, .. } => Some(*command_type),
            AecpBody::Other { .. } => None,
        }
    }

    /// Message specific payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        match &self.body {
            AecpBody::Aem { payload, .. } | AecpBody::Other { payload } => payload,
        }
    }

    /// Whether this is an unsolicited AEM response.
    #[must_use]
    pub fn is_unsolicited(&self) -> bool {
        matches!(
            self.body,
            AecpBody::Aem {
                unsolicited: true,
                ..
            }
        )
    }

    /// Encode to bytes.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let (fixed, payload) = match &self.body {
            AecpBody::Aem { payload, .. } => {
                if payload.len() > Self::MAX_AEM_PAYLOAD {
                    return Err(CodecError::PayloadTooLarge {
                        len: payload.len(),
                        max: Self::MAX_AEM_PAYLOAD,
                    });
                }
                (Self::COMMON_LENGTH + 2, payload)
            }
            AecpBody::Other { payload } => {
                let max = usize::from(Self::MAX_CONTROL_DATA_LENGTH - Self::COMMON_LENGTH);
                if payload.len() > max {
                    return Err(CodecError::PayloadTooLarge {
                        len: payload.len(),
                        max,
                    });
                }
                (Self::COMMON_LENGTH, payload)
            }
        };
        let cdl = u16::try_from(payload.len())
            .map(|len| fixed + len)
            .map_err(|_| CodecError::PayloadTooLarge {
                len: payload.len(),
                max: Self::MAX_AEM_PAYLOAD,
            })?;

        let mut buf = BytesMut::with_capacity(ControlHeader::SIZE + usize::from(cdl));
        ControlHeader {
            subtype: SUBTYPE_AECP,
            sv: false,
            version: 0,
            message_type: self.message_type as u8,
            status: self.status.to_u8(),
            control_data_length: cdl,
            id: self.target_entity_id.get(),
        }
        .encode(&mut buf)?;
        buf.put_u64(self.controller_entity_id.get());
        buf.put_u16(self.sequence_id);
        if let AecpBody::Aem {
            unsolicited,
            command_type,
            ..
        } = &self.body
        {
            if command_type.0 > AemCommandType::MAX {
                return Err(CodecError::FieldOutOfRange {
                    field: "command_type",
                    value: u64::from(command_type.0),
                });
            }
            buf.put_u16((u16::from(*unsolicited) << 15) | command_type.0);
        }
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Decode from bytes. Bytes past `control_data_length` are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        let header = expect_header(&mut r, SUBTYPE_AECP)?;
        let message_type = AecpMessageType::from_nibble(header.message_type)?;
        let cdl = header.control_data_length;
        let min = if message_type.is_aem() {
            Self::COMMON_LENGTH + 2
        } else {
            Self::COMMON_LENGTH
        };
        if cdl < min || cdl > Self::MAX_CONTROL_DATA_LENGTH {
            return Err(CodecError::InvalidLength {
                value: cdl,
                expected: if message_type.is_aem() {
                    "12..=524"
                } else {
                    "10..=524"
                },
            });
        }
        r.require(usize::from(cdl))?;

        let controller_entity_id = EntityId(r.u64()?);
        let sequence_id = r.u16()?;
        let body = if message_type.is_aem() {
            let word = r.u16()?;
            let payload = r.bytes(usize::from(cdl - min))?;
            AecpBody::Aem {
                unsolicited: word & 0x8000 != 0,
                command_type: AemCommandType(word & AemCommandType::MAX),
                payload: Bytes::copy_from_slice(payload),
            }
        } else {
            let payload = r.bytes(usize::from(cdl - min))?;
            AecpBody::Other {
                payload: Bytes::copy_from_slice(payload),
            }
        };
        Ok(Self {
            message_type,
            status: AemStatus::from(header.status),
            target_entity_id: EntityId(header.id),
            controller_entity_id,
            sequence_id,
            body,
        })
    }
}
