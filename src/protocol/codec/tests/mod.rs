use bytes::Bytes;
use proptest::prelude::*;

use super::*;
use crate::protocol::acmp::{AcmpMessageType, AcmpStatus};
use crate::protocol::adp::AdpMessageType;
use crate::protocol::aecp::{AecpBody, AecpMessageType, AemCommandType, AemStatus};
use crate::types::{EntityId, MacAddress, StreamId};

fn adp_message_type() -> impl Strategy<Value = AdpMessageType> {
    prop_oneof![
        Just(AdpMessageType::EntityAvailable),
        Just(AdpMessageType::EntityDeparting),
        Just(AdpMessageType::EntityDiscoveryRequest),
    ]
}

prop_compose! {
    fn adpdu()(
        message_type in adp_message_type(),
        valid_time in 0u8..32,
        entity_id in any::<u64>(),
        entity_model_id in any::<u64>(),
        caps in any::<(u32, u16, u16, u32)>(),
        counts in any::<(u16, u16)>(),
        available_index in any::<u32>(),
        gptp in any::<(u64, u8)>(),
        indices in any::<(u16, u16, u16)>(),
        association_id in any::<u64>(),
    ) -> Adpdu {
        Adpdu {
            message_type,
            valid_time,
            entity_id: EntityId(entity_id),
            entity_model_id,
            entity_capabilities: caps.0,
            talker_stream_sources: counts.0,
            talker_capabilities: caps.1,
            listener_stream_sinks: counts.1,
            listener_capabilities: caps.2,
            controller_capabilities: caps.3,
            available_index,
            gptp_grandmaster_id: gptp.0,
            gptp_domain_number: gptp.1,
            current_configuration_index: indices.0,
            identify_control_index: indices.1,
            interface_index: indices.2,
            association_id,
        }
    }
}

prop_compose! {
    fn acmpdu()(
        message_type in (0u8..14).prop_map(|v| AcmpMessageType::from_nibble(v).unwrap()),
        status in (0u8..32).prop_map(AcmpStatus::from),
        ids in any::<(u64, u64, u64, u64)>(),
        unique_ids in any::<(u16, u16)>(),
        mac in any::<[u8; 6]>(),
        words in any::<(u16, u16, u16, u16)>(),
    ) -> Acmpdu {
        Acmpdu {
            message_type,
            status,
            stream_id: StreamId(ids.0),
            controller_entity_id: EntityId(ids.1),
            talker_entity_id: EntityId(ids.2),
            listener_entity_id: EntityId(ids.3),
            talker_unique_id: unique_ids.0,
            listener_unique_id: unique_ids.1,
            stream_dest_mac: MacAddress(mac),
            connection_count: words.0,
            sequence_id: words.1,
            flags: words.2,
            stream_vlan_id: words.3,
        }
    }
}

prop_compose! {
    fn aem_pdu()(
        is_command in any::<bool>(),
        status in (0u8..32).prop_map(AemStatus::from),
        ids in any::<(u64, u64)>(),
        sequence_id in any::<u16>(),
        unsolicited in any::<bool>(),
        command_type in 0u16..=AemCommandType::MAX,
        payload in proptest::collection::vec(any::<u8>(), 0..=512),
    ) -> Aecpdu {
        Aecpdu {
            message_type: if is_command {
                AecpMessageType::AemCommand
            } else {
                AecpMessageType::AemResponse
            },
            status,
            target_entity_id: EntityId(ids.0),
            controller_entity_id: EntityId(ids.1),
            sequence_id,
            body: AecpBody::Aem {
                unsolicited,
                command_type: AemCommandType(command_type),
                payload: Bytes::from(payload),
            },
        }
    }
}

proptest! {
    #[test]
    fn test_adp_roundtrip(pdu in adpdu()) {
        let encoded = pdu.encode().unwrap();
        prop_assert_eq!(encoded.len(), Adpdu::SIZE);
        prop_assert_eq!(Adpdu::decode(&encoded).unwrap(), pdu);
    }

    #[test]
    fn test_acmp_roundtrip(pdu in acmpdu()) {
        let encoded = pdu.encode().unwrap();
        prop_assert_eq!(encoded.len(), Acmpdu::SIZE);
        prop_assert_eq!(Acmpdu::decode(&encoded).unwrap(), pdu);
    }

    #[test]
    fn test_aem_roundtrip(pdu in aem_pdu()) {
        let encoded = pdu.encode().unwrap();
        prop_assert_eq!(encoded.len(), Aecpdu::MIN_AEM_SIZE + pdu.payload().len());
        prop_assert_eq!(Aecpdu::decode(&encoded).unwrap(), pdu.clone());
        prop_assert_eq!(Pdu::decode(&encoded).unwrap(), Pdu::Aecp(pdu));
    }

    #[test]
    fn test_decode_any_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..600)) {
        // Must not panic.
        let _ = Pdu::decode(&bytes);
    }

    #[test]
    fn test_truncated_adp_too_short(pdu in adpdu(), cut in 0usize..Adpdu::SIZE) {
        let encoded = pdu.encode().unwrap();
        let is_too_short = matches!(Adpdu::decode(&encoded[..cut]), Err(CodecError::TooShort { .. }));
        prop_assert!(is_too_short);
    }

    #[test]
    fn test_truncated_aem_too_short(pdu in aem_pdu(), frac in 0.0f64..1.0) {
        let encoded = pdu.encode().unwrap();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let cut = (encoded.len() as f64 * frac) as usize;
        let is_too_short = matches!(Aecpdu::decode(&encoded[..cut]), Err(CodecError::TooShort { .. }));
        prop_assert!(is_too_short);
    }
}

// ===== Header =====

#[test]
fn test_header_bit_layout() {
    let mut buf = Vec::new();
    ControlHeader {
        subtype: SUBTYPE_ACMP,
        sv: true,
        version: 0,
        message_type: 0x0A,
        status: 0x1F,
        control_data_length: 44,
        id: 0x0102_0304_0506_0708,
    }
    .encode(&mut buf)
    .unwrap();
    assert_eq!(buf, [0xFC, 0x8A, 0xF8, 0x2C, 1, 2, 3, 4, 5, 6, 7, 8]);

    let header = ControlHeader::decode(&mut Reader::new(&buf)).unwrap();
    assert!(header.sv);
    assert_eq!(header.message_type, 0x0A);
    assert_eq!(header.status, 0x1F);
    assert_eq!(header.control_data_length, 44);
}

#[test]
fn test_header_rejects_wide_fields() {
    let header = ControlHeader {
        subtype: SUBTYPE_AECP,
        sv: false,
        version: 0,
        message_type: 0,
        status: 32,
        control_data_length: 0,
        id: 0,
    };
    assert!(matches!(
        header.encode(&mut Vec::new()),
        Err(CodecError::FieldOutOfRange { field: "status", value: 32 })
    ));
    let header = ControlHeader {
        status: 0,
        control_data_length: 0x0800,
        ..header
    };
    assert!(matches!(
        header.encode(&mut Vec::new()),
        Err(CodecError::FieldOutOfRange { field: "control_data_length", .. })
    ));
}

// ===== Dispatch =====

#[test]
fn test_pdu_dispatch_by_subtype() {
    let adp = Adpdu::discovery_request(EntityId::NONE);
    let frame = Pdu::from(adp.clone()).encode().unwrap();
    assert_eq!(Pdu::decode(&frame).unwrap(), Pdu::Adp(adp));

    let acmp = Acmpdu::command(AcmpMessageType::GetRxStateCommand);
    let frame = Pdu::from(acmp.clone()).encode().unwrap();
    let pdu = Pdu::decode(&frame).unwrap();
    assert_eq!(pdu.subtype(), SUBTYPE_ACMP);
    assert_eq!(pdu, Pdu::Acmp(acmp));
}

#[test]
fn test_unknown_subtype() {
    let mut frame = Adpdu::discovery_request(EntityId::NONE).encode().unwrap().to_vec();
    frame[0] = 0x7F;
    assert_eq!(Pdu::decode(&frame), Err(CodecError::UnknownSubtype(0x7F)));
}

#[test]
fn test_short_buffer_rejected_before_dispatch() {
    assert_eq!(
        Pdu::decode(&[SUBTYPE_ADP; 11]),
        Err(CodecError::TooShort { needed: 12, have: 11 })
    );
    assert!(matches!(Pdu::decode(&[]), Err(CodecError::TooShort { .. })));
}

#[test]
fn test_decoder_rejects_other_family() {
    let frame = Acmpdu::command(AcmpMessageType::ConnectRxCommand).encode().unwrap();
    assert_eq!(
        Aecpdu::decode(&frame),
        Err(CodecError::UnexpectedSubtype {
            expected: SUBTYPE_AECP,
            found: SUBTYPE_ACMP,
        })
    );
}

// ===== Edge values =====

#[test]
fn test_extreme_entity_ids() {
    for raw in [0, u64::MAX] {
        let adp = Adpdu {
            entity_id: EntityId(raw),
            ..Adpdu::discovery_request(EntityId(raw))
        };
        let decoded = Adpdu::decode(&adp.encode().unwrap()).unwrap();
        assert_eq!(decoded.entity_id, EntityId(raw));
    }
}

#[test]
fn test_aem_payload_bounds() {
    for len in [0, 512] {
        let pdu = Aecpdu::aem_command(
            EntityId(1),
            EntityId(2),
            3,
            AemCommandType::READ_DESCRIPTOR,
            Bytes::from(vec![0xAB; len]),
        );
        let frame = pdu.encode().unwrap();
        assert_eq!(frame.len(), 24 + len);
        assert_eq!(Aecpdu::decode(&frame).unwrap(), pdu);
    }
}

#[test]
fn test_padding_ignored() {
    let mut frame = Acmpdu::command(AcmpMessageType::ConnectTxCommand)
        .encode()
        .unwrap()
        .to_vec();
    frame.extend_from_slice(&[0; 8]);
    assert!(Acmpdu::decode(&frame).is_ok());
}
