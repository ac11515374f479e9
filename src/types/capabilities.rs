//! Capability bit constants advertised in ADPDUs (IEEE 1722.1 Tables 6.2-6.5).

/// `entity_capabilities` bits.
pub mod entity {
    /// Firmware update mode.
    pub const EFU_MODE: u32 = 0x0000_0001;
    /// Address access commands supported.
    pub const ADDRESS_ACCESS_SUPPORTED: u32 = 0x0000_0002;
    /// Entity is a gateway.
    pub const GATEWAY_ENTITY: u32 = 0x0000_0004;
    /// AVDECC Entity Model supported.
    pub const AEM_SUPPORTED: u32 = 0x0000_0008;
    /// Legacy AV/C supported.
    pub const LEGACY_AVC: u32 = 0x0000_0010;
    /// `association_id` supported.
    pub const ASSOCIATION_ID_SUPPORTED: u32 = 0x0000_0020;
    /// `association_id` field is valid.
    pub const ASSOCIATION_ID_VALID: u32 = 0x0000_0040;
    /// Vendor unique commands supported.
    pub const VENDOR_UNIQUE_SUPPORTED: u32 = 0x0000_0080;
    /// Class A streams supported.
    pub const CLASS_A_SUPPORTED: u32 = 0x0000_0100;
    /// Class B streams supported.
    pub const CLASS_B_SUPPORTED: u32 = 0x0000_0200;
    /// gPTP supported.
    pub const GPTP_SUPPORTED: u32 = 0x0000_0400;
    /// AEM authentication supported.
    pub const AEM_AUTHENTICATION_SUPPORTED: u32 = 0x0000_0800;
    /// AEM authentication required.
    pub const AEM_AUTHENTICATION_REQUIRED: u32 = 0x0000_1000;
    /// Persistent ACQUIRE_ENTITY supported.
    pub const AEM_PERSISTENT_ACQUIRE_SUPPORTED: u32 = 0x0000_2000;
    /// `identify_control_index` field is valid.
    pub const AEM_IDENTIFY_CONTROL_INDEX_VALID: u32 = 0x0000_4000;
    /// `interface_index` field is valid.
    pub const AEM_INTERFACE_INDEX_VALID: u32 = 0x0000_8000;
    /// General controllers should ignore this entity.
    pub const GENERAL_CONTROLLER_IGNORE: u32 = 0x0001_0000;
    /// Entity is not ready to be enumerated.
    pub const ENTITY_NOT_READY: u32 = 0x0002_0000;
}

/// `talker_capabilities` bits.
pub mod talker {
    /// Talker functionality implemented.
    pub const IMPLEMENTED: u16 = 0x0001;
    /// Other source.
    pub const OTHER_SOURCE: u16 = 0x0200;
    /// Control source.
    pub const CONTROL_SOURCE: u16 = 0x0400;
    /// Media clock source.
    pub const MEDIA_CLOCK_SOURCE: u16 = 0x0800;
    /// SMPTE source.
    pub const SMPTE_SOURCE: u16 = 0x1000;
    /// MIDI source.
    pub const MIDI_SOURCE: u16 = 0x2000;
    /// Audio source.
    pub const AUDIO_SOURCE: u16 = 0x4000;
    /// Video source.
    pub const VIDEO_SOURCE: u16 = 0x8000;
}

/// `listener_capabilities` bits.
pub mod listener {
    /// Listener functionality implemented.
    pub const IMPLEMENTED: u16 = 0x0001;
    /// Other sink.
    pub const OTHER_SINK: u16 = 0x0200;
    /// Control sink.
    pub const CONTROL_SINK: u16 = 0x0400;
    /// Media clock sink.
    pub const MEDIA_CLOCK_SINK: u16 = 0x0800;
    /// SMPTE sink.
    pub const SMPTE_SINK: u16 = 0x1000;
    /// MIDI sink.
    pub const MIDI_SINK: u16 = 0x2000;
    /// Audio sink.
    pub const AUDIO_SINK: u16 = 0x4000;
    /// Video sink.
    pub const VIDEO_SINK: u16 = 0x8000;
}

/// `controller_capabilities` bits.
pub mod controller {
    /// Controller functionality implemented.
    pub const IMPLEMENTED: u32 = 0x0000_0001;
}
