use bytes::Bytes;

use crate::protocol::aecp::aem::*;
use crate::protocol::codec::CodecError;
use crate::types::EntityId;

fn entity() -> EntityDescriptor {
    EntityDescriptor {
        entity_id: EntityId(0x0102_0304_0506_0708),
        entity_model_id: 0x42,
        entity_capabilities: 0x8,
        talker_stream_sources: 1,
        listener_stream_sinks: 2,
        available_index: 9,
        entity_name: "Stage Box".to_string(),
        firmware_version: "1.0.3".to_string(),
        configurations_count: 1,
        current_configuration: 0,
        ..EntityDescriptor::default()
    }
}

// ===== Acquire / lock =====

#[test]
fn test_acquire_entity_layout() {
    let bytes = AcquireEntity {
        owner_id: EntityId(0xAABB),
        ..AcquireEntity::entity(acquire_flags::PERSISTENT)
    }
    .encode();
    assert_eq!(bytes.len(), AcquireEntity::SIZE);
    assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
    assert_eq!(&bytes[4..12], &0xAABBu64.to_be_bytes());
    assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
}

#[test]
fn test_acquire_entity_flags() {
    let release = AcquireEntity::decode(&AcquireEntity::entity(acquire_flags::RELEASE).encode()).unwrap();
    assert!(release.is_release());
    assert!(!release.is_persistent());
}

#[test]
fn test_acquire_entity_too_short() {
    assert_eq!(
        AcquireEntity::decode(&[0; 15]),
        Err(CodecError::TooShort {
            needed: 16,
            have: 15
        })
    );
}

#[test]
fn test_lock_entity_unlock_flag() {
    let unlock = LockEntity::decode(&LockEntity::entity(lock_flags::UNLOCK).encode()).unwrap();
    assert!(unlock.is_unlock());
    assert_eq!(unlock.descriptor_type, DescriptorType::ENTITY);
}

// ===== Descriptor addressing =====

#[test]
fn test_descriptor_key_normalization() {
    let key = DescriptorKey::new(2, DescriptorType::CONFIGURATION, 2);
    assert_eq!(key.normalized().configuration_index, 0);
    let key = DescriptorKey::new(2, DescriptorType::STREAM_OUTPUT, 0);
    assert_eq!(key.normalized(), key);
}

#[test]
fn test_read_descriptor_command_layout() {
    let key = DescriptorKey::new(1, DescriptorType::STREAM_INPUT, 3);
    let bytes = ReadDescriptorCommand { key }.encode();
    assert_eq!(bytes.as_ref(), &[0, 1, 0, 0, 0, 5, 0, 3]);
    assert_eq!(ReadDescriptorCommand::decode(&bytes).unwrap().key, key);
}

#[test]
fn test_descriptor_payload() {
    let payload = DescriptorPayload {
        key: DescriptorKey::new(0, DescriptorType::AUDIO_UNIT, 1),
        body: Bytes::from_static(b"xyz"),
    };
    let bytes = payload.encode();
    assert_eq!(bytes.len(), 11);
    assert_eq!(DescriptorPayload::decode(&bytes).unwrap(), payload);
    assert_eq!(payload.descriptor().as_ref(), &[0, 2, 0, 1, b'x', b'y', b'z']);
}

#[test]
fn test_descriptor_payload_empty_body() {
    let payload = DescriptorPayload {
        key: DescriptorKey::new(0, DescriptorType::LOCALE, 0),
        body: Bytes::new(),
    };
    assert_eq!(DescriptorPayload::decode(&payload.encode()).unwrap(), payload);
    assert!(DescriptorPayload::decode(&[0; 7]).is_err());
}

#[test]
fn test_configuration_payload() {
    let bytes = ConfigurationPayload {
        configuration_index: 3,
    }
    .encode();
    assert_eq!(bytes.as_ref(), &[0, 0, 0, 3]);
    assert_eq!(ConfigurationPayload::decode(&bytes).unwrap().configuration_index, 3);
}

// ===== ENTITY descriptor =====

#[test]
fn test_entity_descriptor_size_and_offsets() {
    let bytes = entity().encode();
    assert_eq!(bytes.len(), EntityDescriptor::SIZE);
    assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
    assert_eq!(&bytes[4..12], &0x0102_0304_0506_0708u64.to_be_bytes());
    let body = entity().body();
    assert_eq!(body.len(), 308);
    assert_eq!(
        &body[EntityDescriptor::BODY_AVAILABLE_INDEX..EntityDescriptor::BODY_AVAILABLE_INDEX + 4],
        &9u32.to_be_bytes()
    );
    assert_eq!(&body[44..53], b"Stage Box");
    assert_eq!(body[53], 0);
}

#[test]
fn test_entity_descriptor_roundtrip() {
    let descriptor = entity();
    assert_eq!(EntityDescriptor::decode(&descriptor.encode()).unwrap(), descriptor);
}

#[test]
fn test_entity_descriptor_truncates_long_names() {
    let descriptor = EntityDescriptor {
        entity_name: "é".repeat(40),
        ..entity()
    };
    let decoded = EntityDescriptor::decode(&descriptor.encode()).unwrap();
    assert_eq!(decoded.entity_name, "é".repeat(32));
}

#[test]
fn test_entity_descriptor_rejects_other_type() {
    let mut bytes = entity().encode().to_vec();
    bytes[1] = 1;
    assert!(matches!(
        EntityDescriptor::decode(&bytes),
        Err(CodecError::FieldOutOfRange { .. })
    ));
}
