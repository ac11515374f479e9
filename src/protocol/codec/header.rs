use bytes::BufMut;

use super::CodecError;
use super::cursor::Reader;

/// The 12-byte AVTP control header shared by ADPDU, ACMPDU and AECPDU.
///
/// ```text
///  byte 0      subtype
///  byte 1      sv(1) | version(3) | message_type(4)
///  bytes 2-3   status / valid_time (5) | control_data_length (11)
///  bytes 4-11  entity_id / stream_id / target_entity_id
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    /// AVTP subtype.
    pub subtype: u8,
    /// Stream-valid bit (header specific).
    pub sv: bool,
    /// AVTP version (0 for AVDECC).
    pub version: u8,
    /// Protocol specific message type, 4 bits.
    pub message_type: u8,
    /// Status (ACMP, AECP) or `valid_time` (ADP), 5 bits.
    pub status: u8,
    /// Bytes following the 12-byte header that belong to the PDU.
    pub control_data_length: u16,
    /// First 64-bit identifier of the PDU.
    pub id: u64,
}

impl ControlHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 12;
    /// Largest encodable `status`/`valid_time`.
    pub const MAX_STATUS: u8 = 0x1F;
    /// Largest encodable `control_data_length`.
    pub const MAX_CONTROL_DATA_LENGTH: u16 = 0x07FF;

    /// Append the header to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), CodecError> {
        if self.status > Self::MAX_STATUS {
            return Err(CodecError::FieldOutOfRange {
                field: "status",
                value: u64::from(self.status),
            });
        }
        if self.control_data_length > Self::MAX_CONTROL_DATA_LENGTH {
            return Err(CodecError::FieldOutOfRange {
                field: "control_data_length",
                value: u64::from(self.control_data_length),
            });
        }
        buf.put_u8(self.subtype);
        buf.put_u8(
            (u8::from(self.sv) << 7) | ((self.version & 0x07) << 4) | (self.message_type & 0x0F),
        );
        buf.put_u16((u16::from(self.status) << 11) | self.control_data_length);
        buf.put_u64(self.id);
        Ok(())
    }

    /// Read the header from the start of `reader`.
    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        reader.require(Self::SIZE)?;
        let subtype = reader.u8()?;
        let b1 = reader.u8()?;
        let word = reader.u16()?;
        let id = reader.u64()?;
        Ok(Self {
            subtype,
            sv: b1 & 0x80 != 0,
            version: (b1 >> 4) & 0x07,
            message_type: b1 & 0x0F,
            status: (word >> 11) as u8,
            control_data_length: word & Self::MAX_CONTROL_DATA_LENGTH,
            id,
        })
    }
}
