use serde::{Deserialize, Serialize};

/// 64-bit EUI-64 derived identifier of an AVDECC entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    /// The all-zero id. In a discovery request it addresses every entity.
    pub const NONE: Self = Self(0);

    /// Create from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw 64-bit value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the all-zero id.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Derive an EUI-64 from a MAC address (`xx:xx:xx:FF:FE:xx:xx:xx`).
    #[must_use]
    pub fn from_mac(mac: MacAddress) -> Self {
        let m = mac.0;
        Self(u64::from_be_bytes([
            m[0], m[1], m[2], 0xFF, 0xFE, m[3], m[4], m[5],
        ]))
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// 64-bit stream identifier: talker MAC (48 bits) followed by the talker unique id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub u64);

impl StreamId {
    /// Create from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw 64-bit value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Build the stream id a talker with `mac` uses for its source `unique_id`.
    #[must_use]
    pub fn from_talker(mac: MacAddress, unique_id: u16) -> Self {
        let m = mac.0;
        let uid = unique_id.to_be_bytes();
        Self(u64::from_be_bytes([
            m[0], m[1], m[2], m[3], m[4], m[5], uid[0], uid[1],
        ]))
    }
}

impl From<u64> for StreamId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Multicast destination for all AVDECC control frames.
    pub const AVDECC_MULTICAST: Self = Self([0x91, 0xE0, 0xF0, 0x01, 0x00, 0x00]);

    /// All-zero address.
    pub const ZERO: Self = Self([0; 6]);

    /// Octets in transmission order.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Locally chosen stream destination inside the AVTP multicast block.
    ///
    /// MAAP allocation is out of scope; talkers derive the address from the
    /// stream unique id instead.
    #[must_use]
    pub fn stream_destination(unique_id: u16) -> Self {
        let uid = unique_id.to_be_bytes();
        Self([0x91, 0xE0, 0xF0, 0x00, uid[0], uid[1]])
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// One stream source or sink: the owning entity and its unique id on that entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamEndpoint {
    /// Entity that owns the stream source/sink.
    pub entity_id: EntityId,
    /// Stream index on that entity.
    pub unique_id: u16,
}

impl StreamEndpoint {
    /// Create a new endpoint.
    #[must_use]
    pub const fn new(entity_id: EntityId, unique_id: u16) -> Self {
        Self {
            entity_id,
            unique_id,
        }
    }
}

impl std::fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.unique_id)
    }
}
