//! AVDECC wire codec.
//!
//! Encodes and decodes the three AVDECC PDU families carried in AVTP
//! control frames (EtherType `0x22F0`, destination `91:E0:F0:01:00:00`):
//!
//! | subtype | PDU    | fixed size                     |
//! |---------|--------|--------------------------------|
//! | `0xFA`  | ADPDU  | 68 bytes                       |
//! | `0xFB`  | AECPDU | 12 + `control_data_length`     |
//! | `0xFC`  | ACMPDU | 56 bytes                       |
//!
//! All multi-byte fields are big-endian. Decoding checks the buffer length
//! before any field is read and rejects unknown message types.

pub mod cursor;
mod header;

#[cfg(test)]
mod tests;

use bytes::Bytes;

pub use cursor::Reader;
pub use header::ControlHeader;

use super::acmp::Acmpdu;
use super::adp::Adpdu;
use super::aecp::Aecpdu;

/// EtherType of AVTP frames.
pub const AVTP_ETHERTYPE: u16 = 0x22F0;

/// AVTP subtype for ADP.
pub const SUBTYPE_ADP: u8 = 0xFA;
/// AVTP subtype for AECP.
pub const SUBTYPE_AECP: u8 = 0xFB;
/// AVTP subtype for ACMP.
pub const SUBTYPE_ACMP: u8 = 0xFC;

/// Errors from AVDECC PDU encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Buffer shorter than the structure being decoded.
    #[error("packet too short: need {needed} bytes, have {have}")]
    TooShort {
        /// Minimum bytes needed.
        needed: usize,
        /// Bytes actually available.
        have: usize,
    },
    /// Subtype is not one of ADP/AECP/ACMP.
    #[error("unknown AVTP subtype: 0x{0:02X}")]
    UnknownSubtype(u8),
    /// Buffer carries a different PDU family than the decoder expects.
    #[error("unexpected subtype 0x{found:02X}, expected 0x{expected:02X}")]
    UnexpectedSubtype {
        /// Subtype the decoder handles.
        expected: u8,
        /// Subtype found in the buffer.
        found: u8,
    },
    /// Message type nibble not defined for the subtype.
    #[error("unknown message type {value} for subtype 0x{subtype:02X}")]
    UnknownMessageType {
        /// Subtype of the PDU.
        subtype: u8,
        /// Raw message type.
        value: u8,
    },
    /// `control_data_length` is inconsistent with the PDU family.
    #[error("invalid control_data_length {value} (expected {expected})")]
    InvalidLength {
        /// Value found.
        value: u16,
        /// Description of the accepted range.
        expected: &'static str,
    },
    /// A field does not fit its wire width.
    #[error("field {field} out of range: {value}")]
    FieldOutOfRange {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u64,
    },
    /// Command specific payload exceeds the maximum.
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Maximum allowed.
        max: usize,
    },
}

/// Any AVDECC PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    /// Discovery.
    Adp(Adpdu),
    /// Connection management.
    Acmp(Acmpdu),
    /// Enumeration and control.
    Aecp(Aecpdu),
}

impl Pdu {
    /// Decode a PDU, dispatching on the subtype byte.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < ControlHeader::SIZE {
            return Err(CodecError::TooShort {
                needed: ControlHeader::SIZE,
                have: data.len(),
            });
        }
        match data[0] {
            SUBTYPE_ADP => Adpdu::decode(data).map(Self::Adp),
            SUBTYPE_ACMP => Acmpdu::decode(data).map(Self::Acmp),
            SUBTYPE_AECP => Aecpdu::decode(data).map(Self::Aecp),
            other => Err(CodecError::UnknownSubtype(other)),
        }
    }

    /// Encode to a frame payload.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        match self {
            Self::Adp(pdu) => pdu.encode(),
            Self::Acmp(pdu) => pdu.encode(),
            Self::Aecp(pdu) => pdu.encode(),
        }
    }

    /// AVTP subtype of this PDU.
    #[must_use]
    pub fn subtype(&self) -> u8 {
        match self {
            Self::Adp(_) => SUBTYPE_ADP,
            Self::Acmp(_) => SUBTYPE_ACMP,
            Self::Aecp(_) => SUBTYPE_AECP,
        }
    }
}

impl From<Adpdu> for Pdu {
    fn from(pdu: Adpdu) -> Self {
        Self::Adp(pdu)
    }
}

impl From<Acmpdu> for Pdu {
    fn from(pdu: Acmpdu) -> Self {
        Self::Acmp(pdu)
    }
}

impl From<Aecpdu> for Pdu {
    fn from(pdu: Aecpdu) -> Self {
        Self::Aecp(pdu)
    }
}

/// Decode a header and check it carries `expected` as subtype.
pub(crate) fn expect_header(
    reader: &mut Reader<'_>,
    expected: u8,
) -> Result<ControlHeader, CodecError> {
    let header = ControlHeader::decode(reader)?;
    if header.subtype != expected {
        return Err(CodecError::UnexpectedSubtype {
            expected,
            found: header.subtype,
        });
    }
    Ok(header)
}
