use crate::protocol::adp::engine::*;
use crate::protocol::adp::message::*;
use crate::state::{DepartureReason, EntityEvent};
use crate::types::{AvdeccConfig, EntityId};

const LOCAL: EntityId = EntityId(0x0001_0203_0405_0607);
const REMOTE: EntityId = EntityId(0x0102_0304_0506_0708);
const SEC: u64 = 1_000_000_000;

fn engine() -> DiscoveryEngine {
    let config = AvdeccConfig::builder()
        .entity_model_id(0x42)
        .valid_time(5)
        .build();
    DiscoveryEngine::new(&config, LOCAL, AvailableIndex::new(3))
}

fn available(id: EntityId, index: u32) -> Adpdu {
    Adpdu {
        message_type: AdpMessageType::EntityAvailable,
        valid_time: 5,
        entity_id: id,
        available_index: index,
        ..Adpdu::default()
    }
}

fn departing(id: EntityId) -> Adpdu {
    Adpdu {
        message_type: AdpMessageType::EntityDeparting,
        ..available(id, 0)
    }
}

// ===== AvailableIndex =====

#[test]
fn test_available_index_shared_between_clones() {
    let index = AvailableIndex::new(0);
    let clone = index.clone();
    assert_eq!(clone.bump(), 1);
    assert_eq!(index.get(), 1);
}

#[test]
fn test_available_index_wraps() {
    let index = AvailableIndex::new(u32::MAX);
    assert_eq!(index.bump(), 0);
}

// ===== Advertising =====

#[test]
fn test_advertise_carries_local_identity() {
    let mut adp = engine();
    let frame = adp.advertise(0).unwrap();
    let pdu = Adpdu::decode(&frame).unwrap();
    assert_eq!(pdu.message_type, AdpMessageType::EntityAvailable);
    assert_eq!(pdu.entity_id, LOCAL);
    assert_eq!(pdu.entity_model_id, 0x42);
    assert_eq!(pdu.valid_time, 5);
    assert_eq!(pdu.available_index, 3);
    assert!(adp.is_advertising());
}

#[test]
fn test_periodic_advertisement() {
    let mut adp = engine();
    adp.advertise(0).unwrap();
    assert!(adp.tick(SEC).frames.is_empty());
    assert_eq!(adp.tick(2 * SEC).frames.len(), 1);
    assert!(adp.tick(3 * SEC).frames.is_empty());
    assert_eq!(adp.tick(4 * SEC).frames.len(), 1);
}

#[test]
fn test_no_advertisement_when_idle() {
    let mut adp = engine();
    assert!(adp.tick(10 * SEC).frames.is_empty());
}

#[test]
fn test_advertisement_reflects_bumped_index() {
    let mut adp = engine();
    adp.available_index().bump();
    let pdu = Adpdu::decode(&adp.advertise(0).unwrap()).unwrap();
    assert_eq!(pdu.available_index, 4);
}

#[test]
fn test_stop_advertising_sends_departing_once() {
    let mut adp = engine();
    adp.advertise(0).unwrap();
    let frame = adp.stop_advertising().unwrap().unwrap();
    let pdu = Adpdu::decode(&frame).unwrap();
    assert_eq!(pdu.message_type, AdpMessageType::EntityDeparting);
    assert_eq!(pdu.valid_time, 0);
    assert!(adp.stop_advertising().unwrap().is_none());
    assert!(adp.tick(100 * SEC).frames.is_empty());
}

// ===== Discovery requests =====

#[test]
fn test_discovery_request_answered_immediately() {
    let mut adp = engine();
    adp.advertise(0).unwrap();
    let out = adp.handle(&Adpdu::discovery_request(EntityId::NONE), SEC / 2);
    assert_eq!(out.frames.len(), 1);
    // The periodic timer is independent.
    assert_eq!(adp.tick(2 * SEC).frames.len(), 1);
}

#[test]
fn test_targeted_discovery_request() {
    let mut adp = engine();
    adp.advertise(0).unwrap();
    assert_eq!(adp.handle(&Adpdu::discovery_request(LOCAL), 0).frames.len(), 1);
    assert!(adp.handle(&Adpdu::discovery_request(REMOTE), 0).frames.is_empty());
}

#[test]
fn test_discovery_request_ignored_when_not_advertising() {
    let mut adp = engine();
    assert!(adp.handle(&Adpdu::discovery_request(EntityId::NONE), 0).frames.is_empty());
}

#[test]
fn test_discover_encodes_request() {
    let adp = engine();
    let pdu = Adpdu::decode(&adp.discover(REMOTE).unwrap()).unwrap();
    assert_eq!(pdu.message_type, AdpMessageType::EntityDiscoveryRequest);
    assert_eq!(pdu.entity_id, REMOTE);
}

// ===== Remote entities =====

#[test]
fn test_available_inserts_entity() {
    let mut adp = engine();
    let out = adp.handle(&available(REMOTE, 7), SEC);
    assert!(matches!(
        out.events.as_slice(),
        [EntityEvent::EntityDiscovered { entity }] if entity.entity_id == REMOTE
    ));
    let record = adp.entity(REMOTE).unwrap();
    assert_eq!(record.available_index, 7);
    assert_eq!(record.last_seen, SEC);
}

#[test]
fn test_repeated_available_is_one_record() {
    let mut adp = engine();
    adp.handle(&available(REMOTE, 7), 0);
    let out = adp.handle(&available(REMOTE, 7), SEC);
    assert!(out.events.is_empty());
    assert_eq!(adp.entities().len(), 1);
    assert_eq!(adp.entity(REMOTE).unwrap().last_seen, SEC);
}

#[test]
fn test_index_increase_is_update() {
    let mut adp = engine();
    adp.handle(&available(REMOTE, 7), 0);
    let out = adp.handle(&available(REMOTE, 8), 0);
    assert!(matches!(out.events.as_slice(), [EntityEvent::EntityUpdated { .. }]));
}

#[test]
fn test_index_decrease_is_reboot() {
    let mut adp = engine();
    adp.handle(&available(REMOTE, 7), 0);
    let out = adp.handle(&available(REMOTE, 2), 0);
    assert!(matches!(
        out.events.as_slice(),
        [EntityEvent::EntityRebooted { entity }] if entity.available_index == 2
    ));
    assert_eq!(adp.entity(REMOTE).unwrap().available_index, 2);
}

#[test]
fn test_self_messages_ignored() {
    let mut adp = engine();
    let out = adp.handle(&available(LOCAL, 1), 0);
    assert!(out.is_empty());
    assert!(adp.entity(LOCAL).is_none());
}

#[test]
fn test_departing_removes_entity() {
    let mut adp = engine();
    adp.handle(&available(REMOTE, 1), 0);
    let out = adp.handle(&departing(REMOTE), 0);
    assert!(matches!(
        out.events.as_slice(),
        [EntityEvent::EntityDeparted {
            entity_id: REMOTE,
            reason: DepartureReason::Departing
        }]
    ));
    assert!(adp.entity(REMOTE).is_none());
}

#[test]
fn test_departing_unknown_entity_is_silent() {
    let mut adp = engine();
    assert!(adp.handle(&departing(REMOTE), 0).events.is_empty());
}

#[test]
fn test_eviction_after_valid_time() {
    let mut adp = engine();
    adp.handle(&available(REMOTE, 1), 0);
    // valid_time 5 => 10 seconds.
    assert!(adp.tick(10 * SEC).events.is_empty());
    let out = adp.tick(10 * SEC + 1);
    assert!(matches!(
        out.events.as_slice(),
        [EntityEvent::EntityDeparted {
            reason: DepartureReason::TimedOut,
            ..
        }]
    ));
    assert!(adp.entities().is_empty());
}

#[test]
fn test_refresh_postpones_eviction() {
    let mut adp = engine();
    adp.handle(&available(REMOTE, 1), 0);
    adp.handle(&available(REMOTE, 1), 8 * SEC);
    assert!(adp.tick(12 * SEC).events.is_empty());
    assert!(adp.entity(REMOTE).is_some());
}
