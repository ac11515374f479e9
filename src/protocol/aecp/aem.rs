//! AEM command payloads and the ENTITY descriptor.
//!
//! Only the payloads the enumeration engine interprets are typed here; every
//! other command travels as raw bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::codec::{CodecError, Reader};
use crate::types::EntityId;

/// AEM descriptor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorType(pub u16);

impl DescriptorType {
    /// ENTITY
    pub const ENTITY: Self = Self(0x0000);
    /// CONFIGURATION
    pub const CONFIGURATION: Self = Self(0x0001);
    /// AUDIO_UNIT
    pub const AUDIO_UNIT: Self = Self(0x0002);
    /// VIDEO_UNIT
    pub const VIDEO_UNIT: Self = Self(0x0003);
    /// SENSOR_UNIT
    pub const SENSOR_UNIT: Self = Self(0x0004);
    /// STREAM_INPUT
    pub const STREAM_INPUT: Self = Self(0x0005);
    /// STREAM_OUTPUT
    pub const STREAM_OUTPUT: Self = Self(0x0006);
    /// JACK_INPUT
    pub const JACK_INPUT: Self = Self(0x0007);
    /// JACK_OUTPUT
    pub const JACK_OUTPUT: Self = Self(0x0008);
    /// AVB_INTERFACE
    pub const AVB_INTERFACE: Self = Self(0x0009);
    /// CLOCK_SOURCE
    pub const CLOCK_SOURCE: Self = Self(0x000A);
    /// MEMORY_OBJECT
    pub const MEMORY_OBJECT: Self = Self(0x000B);
    /// LOCALE
    pub const LOCALE: Self = Self(0x000C);
    /// STRINGS
    pub const STRINGS: Self = Self(0x000D);
    /// STREAM_PORT_INPUT
    pub const STREAM_PORT_INPUT: Self = Self(0x000E);
    /// STREAM_PORT_OUTPUT
    pub const STREAM_PORT_OUTPUT: Self = Self(0x000F);
    /// AUDIO_CLUSTER
    pub const AUDIO_CLUSTER: Self = Self(0x0014);
    /// AUDIO_MAP
    pub const AUDIO_MAP: Self = Self(0x0017);
    /// CONTROL
    pub const CONTROL: Self = Self(0x001A);
    /// CLOCK_DOMAIN
    pub const CLOCK_DOMAIN: Self = Self(0x0024);

    /// Whether descriptors of this type live outside any configuration.
    #[must_use]
    pub fn is_top_level(self) -> bool {
        matches!(self, Self::ENTITY | Self::CONFIGURATION)
    }
}

/// ACQUIRE_ENTITY flag bits.
pub mod acquire_flags {
    /// Survive the owning controller's departure.
    pub const PERSISTENT: u32 = 0x0000_0001;
    /// Release instead of acquire.
    pub const RELEASE: u32 = 0x8000_0000;
}

/// LOCK_ENTITY flag bits.
pub mod lock_flags {
    /// Unlock instead of lock.
    pub const UNLOCK: u32 = 0x0000_0001;
}

/// ACQUIRE_ENTITY command and response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireEntity {
    /// Flag bits, see [`acquire_flags`].
    pub flags: u32,
    /// Owner reported in the response.
    pub owner_id: EntityId,
    /// Descriptor being acquired.
    pub descriptor_type: DescriptorType,
    /// Index of that descriptor.
    pub descriptor_index: u16,
}

impl AcquireEntity {
    /// Encoded size.
    pub const SIZE: usize = 16;

    /// Acquire (or release) the ENTITY descriptor.
    #[must_use]
    pub fn entity(flags: u32) -> Self {
        Self {
            flags,
            owner_id: EntityId::NONE,
            descriptor_type: DescriptorType::ENTITY,
            descriptor_index: 0,
        }
    }

    /// Whether `PERSISTENT` is set.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.flags & acquire_flags::PERSISTENT != 0
    }

    /// Whether `RELEASE` is set.
    #[must_use]
    pub fn is_release(&self) -> bool {
        self.flags & acquire_flags::RELEASE != 0
    }

    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u32(self.flags);
        buf.put_u64(self.owner_id.get());
        buf.put_u16(self.descriptor_type.0);
        buf.put_u16(self.descriptor_index);
        buf.freeze()
    }

    /// Decode from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        r.require(Self::SIZE)?;
        Ok(Self {
            flags: r.u32()?,
            owner_id: EntityId(r.u64()?),
            descriptor_type: DescriptorType(r.u16()?),
            descriptor_index: r.u16()?,
        })
    }
}

/// LOCK_ENTITY command and response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockEntity {
    /// Flag bits, see [`lock_flags`].
    pub flags: u32,
    /// Lock holder reported in the response.
    pub locked_id: EntityId,
    /// Descriptor being locked.
    pub descriptor_type: DescriptorType,
    /// Index of that descriptor.
    pub descriptor_index: u16,
}

impl LockEntity {
    /// Encoded size.
    pub const SIZE: usize = 16;

    /// Lock (or unlock) the ENTITY descriptor.
    #[must_use]
    pub fn entity(flags: u32) -> Self {
        Self {
            flags,
            locked_id: EntityId::NONE,
            descriptor_type: DescriptorType::ENTITY,
            descriptor_index: 0,
        }
    }

    /// Whether `UNLOCK` is set.
    #[must_use]
    pub fn is_unlock(&self) -> bool {
        self.flags & lock_flags::UNLOCK != 0
    }

    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u32(self.flags);
        buf.put_u64(self.locked_id.get());
        buf.put_u16(self.descriptor_type.0);
        buf.put_u16(self.descriptor_index);
        buf.freeze()
    }

    /// Decode from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        r.require(Self::SIZE)?;
        Ok(Self {
            flags: r.u32()?,
            locked_id: EntityId(r.u64()?),
            descriptor_type: DescriptorType(r.u16()?),
            descriptor_index: r.u16()?,
        })
    }
}

/// Address of one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorKey {
    /// Configuration the descriptor belongs to.
    pub configuration_index: u16,
    /// Descriptor type.
    pub descriptor_type: DescriptorType,
    /// Descriptor index.
    pub descriptor_index: u16,
}

impl DescriptorKey {
    /// Encoded size (`configuration_index`, reserved, type, index).
    pub const SIZE: usize = 8;

    /// Create a key.
    #[must_use]
    pub fn new(configuration_index: u16, descriptor_type: DescriptorType, descriptor_index: u16) -> Self {
        Self {
            configuration_index,
            descriptor_type,
            descriptor_index,
        }
    }

    /// Key with `configuration_index` forced to 0 for descriptors outside any configuration.
    #[must_use]
    pub fn normalized(self) -> Self {
        if self.descriptor_type.is_top_level() {
            Self {
                configuration_index: 0,
                ..self
            }
        } else {
            self
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16(self.configuration_index);
        buf.put_u16(0); // reserved
        buf.put_u16(self.descriptor_type.0);
        buf.put_u16(self.descriptor_index);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        r.require(Self::SIZE)?;
        let configuration_index = r.u16()?;
        r.skip(2)?;
        Ok(Self {
            configuration_index,
            descriptor_type: DescriptorType(r.u16()?),
            descriptor_index: r.u16()?,
        })
    }
}

/// READ_DESCRIPTOR command payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadDescriptorCommand {
    /// Descriptor to read.
    pub key: DescriptorKey,
}

impl ReadDescriptorCommand {
    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DescriptorKey::SIZE);
        self.key.put(&mut buf);
        buf.freeze()
    }

    /// Decode from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        Ok(Self {
            key: DescriptorKey::read(&mut r)?,
        })
    }
}

/// READ_DESCRIPTOR response and WRITE_DESCRIPTOR command/response payload.
///
/// On the wire the descriptor begins with its own type and index, which are
/// the last two fields of `key`; `body` holds the bytes that follow them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPayload {
    /// Descriptor address.
    pub key: DescriptorKey,
    /// Descriptor fields after `descriptor_type` and `descriptor_index`.
    pub body: Bytes,
}

impl DescriptorPayload {
    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DescriptorKey::SIZE + self.body.len());
        self.key.put(&mut buf);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Decode from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        let key = DescriptorKey::read(&mut r)?;
        Ok(Self {
            key,
            body: Bytes::copy_from_slice(r.rest()),
        })
    }

    /// The descriptor as transmitted: type, index, then body.
    #[must_use]
    pub fn descriptor(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.body.len());
        buf.put_u16(self.key.descriptor_type.0);
        buf.put_u16(self.key.descriptor_index);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

/// GET_CONFIGURATION response and SET_CONFIGURATION command/response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigurationPayload {
    /// Configuration index.
    pub configuration_index: u16,
}

impl ConfigurationPayload {
    /// Encoded size.
    pub const SIZE: usize = 4;

    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u16(0); // reserved
        buf.put_u16(self.configuration_index);
        buf.freeze()
    }

    /// Decode from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        r.require(Self::SIZE)?;
        r.skip(2)?;
        Ok(Self {
            configuration_index: r.u16()?,
        })
    }
}

/// Fixed-width UTF-8 string field, NUL padded.
fn put_string(buf: &mut BytesMut, value: &str) {
    let mut field = [0u8; EntityDescriptor::STRING_LEN];
    let mut len = value.len().min(field.len());
    while !value.is_char_boundary(len) {
        len -= 1;
    }
    field[..len].copy_from_slice(&value.as_bytes()[..len]);
    buf.put_slice(&field);
}

fn read_string(r: &mut Reader<'_>) -> Result<String, CodecError> {
    let raw = r.array::<{ EntityDescriptor::STRING_LEN }>()?;
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// ENTITY descriptor (IEEE 1722.1 Clause 7.2.1).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityDescriptor {
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
    /// Current `available_index`.
    pub available_index: u32,
    /// Association id.
    pub association_id: u64,
    /// User-settable name.
    pub entity_name: String,
    /// Localized string reference for the vendor name.
    pub vendor_name_string: u16,
    /// Localized string reference for the model name.
    pub model_name_string: u16,
    /// Firmware version.
    pub firmware_version: String,
    /// Group name.
    pub group_name: String,
    /// Serial number.
    pub serial_number: String,
    /// Number of CONFIGURATION descriptors.
    pub configurations_count: u16,
    /// Active configuration.
    pub current_configuration: u16,
}

impl EntityDescriptor {
    /// Encoded size including `descriptor_type` and `descriptor_index`.
    pub const SIZE: usize = 312;
    /// Width of each string field.
    pub const STRING_LEN: usize = 64;
    /// Offset of `available_index` in the body (after type and index).
    pub(crate) const BODY_AVAILABLE_INDEX: usize = 32;
    /// Offset of `configurations_count` in the body.
    pub(crate) const BODY_CONFIGURATIONS_COUNT: usize = 304;
    /// Offset of `current_configuration` in the body.
    pub(crate) const BODY_CURRENT_CONFIGURATION: usize = 306;

    /// Full descriptor bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u16(DescriptorType::ENTITY.0);
        buf.put_u16(0);
        buf.put_u64(self.entity_id.get());
        buf.put_u64(self.entity_model_id);
        buf.put_u32(self.entity_capabilities);
        buf.put_u16(self.talker_stream_sources);
        buf.put_u16(self.talker_capabilities);
        buf.put_u16(self.listener_stream_sinks);
        buf.put_u16(self.listener_capabilities);
        buf.put_u32(self.controller_capabilities);
        buf.put_u32(self.available_index);
        buf.put_u64(self.association_id);
        put_string(&mut buf, &self.entity_name);
        buf.put_u16(self.vendor_name_string);
        buf.put_u16(self.model_name_string);
        put_string(&mut buf, &self.firmware_version);
        put_string(&mut buf, &self.group_name);
        put_string(&mut buf, &self.serial_number);
        buf.put_u16(self.configurations_count);
        buf.put_u16(self.current_configuration);
        buf.freeze()
    }

    /// Body bytes as stored in a descriptor table (without type and index).
    #[must_use]
    pub fn body(&self) -> Bytes {
        self.encode().slice(4..)
    }

    /// Decode full descriptor bytes.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(data);
        r.require(Self::SIZE)?;
        let descriptor_type = r.u16()?;
        if descriptor_type != DescriptorType::ENTITY.0 {
            return Err(CodecError::FieldOutOfRange {
                field: "descriptor_type",
                value: u64::from(descriptor_type),
            });
        }
        r.skip(2)?;
        Ok(Self {
            entity_id: EntityId(r.u64()?),
            entity_model_id: r.u64()?,
            entity_capabilities: r.u32()?,
            talker_stream_sources: r.u16()?,
            talker_capabilities: r.u16()?,
            listener_stream_sinks: r.u16()?,
            listener_capabilities: r.u16()?,
            controller_capabilities: r.u32()?,
            available_index: r.u32()?,
            association_id: r.u64()?,
            entity_name: read_string(&mut r)?,
            vendor_name_string: r.u16()?,
            model_name_string: r.u16()?,
            firmware_version: read_string(&mut r)?,
            group_name: read_string(&mut r)?,
            serial_number: read_string(&mut r)?,
            configurations_count: r.u16()?,
            current_configuration: r.u16()?,
        })
    }
}
