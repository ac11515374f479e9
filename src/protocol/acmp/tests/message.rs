use crate::protocol::acmp::message::*;
use crate::protocol::codec::CodecError;
use crate::types::{EntityId, MacAddress, StreamId};

fn sample() -> Acmpdu {
    Acmpdu {
        message_type: AcmpMessageType::ConnectRxCommand,
        status: AcmpStatus::Success,
        stream_id: StreamId(0x0A0B_0C0D_0E0F_1011),
        controller_entity_id: EntityId(0x1111_1111_1111_1111),
        talker_entity_id: EntityId(0x2222_2222_2222_2222),
        listener_entity_id: EntityId(0x3333_3333_3333_3333),
        talker_unique_id: 4,
        listener_unique_id: 5,
        stream_dest_mac: MacAddress([0x91, 0xE0, 0xF0, 0x00, 0x12, 0x34]),
        connection_count: 2,
        sequence_id: 0xBEEF,
        flags: flags::CLASS_B | flags::STREAMING_WAIT,
        stream_vlan_id: 2,
    }
}

// ===== AcmpMessageType =====

#[test]
fn test_message_type_command_response_pairs() {
    for value in (0..14).step_by(2) {
        let command = AcmpMessageType::from_nibble(value).unwrap();
        assert!(command.is_command());
        let response = command.response();
        assert!(!response.is_command());
        assert_eq!(response as u8, value + 1);
        assert_eq!(response.response(), response);
    }
}

#[test]
fn test_message_type_unknown() {
    assert_eq!(
        AcmpMessageType::from_nibble(14),
        Err(CodecError::UnknownMessageType {
            subtype: 0xFC,
            value: 14
        })
    );
    assert!(AcmpMessageType::from_nibble(15).is_err());
}

#[test]
fn test_talker_messages() {
    assert!(AcmpMessageType::ConnectTxCommand.is_talker_message());
    assert!(AcmpMessageType::GetTxConnectionResponse.is_talker_message());
    assert!(!AcmpMessageType::ConnectRxCommand.is_talker_message());
    assert!(!AcmpMessageType::GetRxStateResponse.is_talker_message());
}

// ===== AcmpStatus =====

#[test]
fn test_status_values() {
    assert_eq!(AcmpStatus::Success.to_u8(), 0);
    assert_eq!(AcmpStatus::ListenerExclusive.to_u8(), 8);
    assert_eq!(AcmpStatus::ControllerNotAuthorized.to_u8(), 16);
    assert_eq!(AcmpStatus::NotSupported.to_u8(), 31);
    assert_eq!(AcmpStatus::from(15), AcmpStatus::Other(15));
    assert_eq!(AcmpStatus::from(AcmpStatus::Other(20).to_u8()), AcmpStatus::Other(20));
}

// ===== Layout =====

#[test]
fn test_encode_layout() {
    let bytes = sample().encode().unwrap();
    assert_eq!(bytes.len(), Acmpdu::SIZE);
    assert_eq!(bytes.len(), 56);
    assert_eq!(bytes[0], 0xFC);
    assert_eq!(bytes[1], 6);
    assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), 44);
    assert_eq!(&bytes[4..12], &0x0A0B_0C0D_0E0F_1011u64.to_be_bytes());
    assert_eq!(&bytes[12..20], &[0x11; 8]);
    assert_eq!(&bytes[20..28], &[0x22; 8]);
    assert_eq!(&bytes[28..36], &[0x33; 8]);
    assert_eq!(&bytes[36..38], &4u16.to_be_bytes());
    assert_eq!(&bytes[38..40], &5u16.to_be_bytes());
    assert_eq!(&bytes[40..46], &[0x91, 0xE0, 0xF0, 0x00, 0x12, 0x34]);
    assert_eq!(&bytes[46..48], &2u16.to_be_bytes());
    assert_eq!(&bytes[48..50], &0xBEEFu16.to_be_bytes());
    assert_eq!(&bytes[50..52], &0x0009u16.to_be_bytes());
    assert_eq!(&bytes[52..54], &2u16.to_be_bytes());
    assert_eq!(&bytes[54..56], &[0, 0]);
}

#[test]
fn test_status_in_header() {
    let pdu = sample().to_response(AcmpStatus::TalkerExclusive);
    let bytes = pdu.encode().unwrap();
    assert_eq!(bytes[1], 7);
    assert_eq!(bytes[2] >> 3, 6);
    assert_eq!(Acmpdu::decode(&bytes).unwrap().status, AcmpStatus::TalkerExclusive);
}

#[test]
fn test_roundtrip() {
    let pdu = sample();
    assert_eq!(Acmpdu::decode(&pdu.encode().unwrap()).unwrap(), pdu);
}

#[test]
fn test_to_response_keeps_fields() {
    let rsp = sample().to_response(AcmpStatus::NotConnected);
    assert_eq!(rsp.message_type, AcmpMessageType::ConnectRxResponse);
    assert_eq!(rsp.status, AcmpStatus::NotConnected);
    assert_eq!(rsp.sequence_id, 0xBEEF);
    assert_eq!(rsp.listener_unique_id, 5);
}

#[test]
fn test_command_is_zeroed() {
    let pdu = Acmpdu::command(AcmpMessageType::GetTxStateCommand);
    let bytes = pdu.encode().unwrap();
    assert_eq!(bytes[1], 4);
    assert!(bytes[4..].iter().all(|&b| b == 0));
}

// ===== Errors =====

#[test]
fn test_decode_too_short() {
    let bytes = sample().encode().unwrap();
    assert_eq!(
        Acmpdu::decode(&bytes[..55]),
        Err(CodecError::TooShort {
            needed: 56,
            have: 55
        })
    );
}

#[test]
fn test_decode_bad_control_data_length() {
    let mut bytes = sample().encode().unwrap().to_vec();
    bytes[3] = 45;
    assert!(matches!(
        Acmpdu::decode(&bytes),
        Err(CodecError::InvalidLength { value: 45, .. })
    ));
}

#[test]
fn test_decode_wrong_subtype() {
    let mut bytes = sample().encode().unwrap().to_vec();
    bytes[0] = 0xFA;
    assert!(matches!(
        Acmpdu::decode(&bytes),
        Err(CodecError::UnexpectedSubtype { found: 0xFA, .. })
    ));
}

#[test]
fn test_encode_status_out_of_range() {
    let pdu = sample().to_response(AcmpStatus::Other(32));
    assert!(matches!(
        pdu.encode(),
        Err(CodecError::FieldOutOfRange { .. })
    ));
}
