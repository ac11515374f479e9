use bytes::Bytes;

use crate::error::AcmpError;
use crate::protocol::EngineOutput;
use crate::protocol::acmp::engine::*;
use crate::protocol::acmp::message::*;
use crate::state::{ConnectionLossReason, EntityEvent};
use crate::types::{AvdeccConfig, EntityId, MacAddress, StreamEndpoint, StreamId};

const CONTROLLER: EntityId = EntityId(0x00C0_0000_0000_0001);
const LISTENER: EntityId = EntityId(0x0011_0000_0000_0002);
const TALKER: EntityId = EntityId(0x007A_0000_0000_0003);
const TALKER_MAC: MacAddress = MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x7A]);
const SEC: u64 = 1_000_000_000;

const SOURCE: StreamEndpoint = StreamEndpoint::new(TALKER, 0);
const SINK: StreamEndpoint = StreamEndpoint::new(LISTENER, 0);

fn config() -> AvdeccConfig {
    AvdeccConfig::builder()
        .talker_stream_sources(2)
        .listener_stream_sinks(2)
        .build()
}

struct Net {
    controller: ConnectionEngine,
    listener: ConnectionEngine,
    talker: ConnectionEngine,
}

impl Net {
    fn new(config: &AvdeccConfig) -> Self {
        Self {
            controller: ConnectionEngine::new(config, CONTROLLER, MacAddress([2, 0, 0, 0, 0, 0xC0])),
            listener: ConnectionEngine::new(config, LISTENER, MacAddress([2, 0, 0, 0, 0, 0x11])),
            talker: ConnectionEngine::new(config, TALKER, TALKER_MAC),
        }
    }

    /// Deliver `frames` to every engine until nothing more is sent.
    fn settle(&mut self, frames: Vec<Bytes>, now: u64) -> Vec<EntityEvent> {
        let mut events = Vec::new();
        let mut queue = frames;
        while !queue.is_empty() {
            let mut next = Vec::new();
            for frame in &queue {
                let pdu = decode(frame);
                for engine in [&mut self.controller, &mut self.listener, &mut self.talker] {
                    let out = engine.handle(&pdu, now);
                    next.extend(out.frames);
                    events.extend(out.events);
                }
            }
            queue = next;
        }
        events
    }

    fn connect(&mut self) -> Acmpdu {
        let (frame, mut rx) = self.controller.connect(SOURCE, SINK, 0).unwrap();
        self.settle(vec![frame], 0);
        rx.try_recv().unwrap().unwrap()
    }
}

fn decode(frame: &Bytes) -> Acmpdu {
    Acmpdu::decode(frame).unwrap()
}

fn only(out: &EngineOutput) -> Acmpdu {
    assert_eq!(out.frames.len(), 1, "expected exactly one frame");
    decode(&out.frames[0])
}

fn connect_tx(listener: StreamEndpoint, source: u16) -> Acmpdu {
    Acmpdu {
        talker_entity_id: TALKER,
        talker_unique_id: source,
        listener_entity_id: listener.entity_id,
        listener_unique_id: listener.unique_id,
        controller_entity_id: CONTROLLER,
        sequence_id: 9,
        ..Acmpdu::command(AcmpMessageType::ConnectTxCommand)
    }
}

fn connect_rx(talker: StreamEndpoint, sink: u16) -> Acmpdu {
    Acmpdu {
        talker_entity_id: talker.entity_id,
        talker_unique_id: talker.unique_id,
        listener_entity_id: LISTENER,
        listener_unique_id: sink,
        controller_entity_id: CONTROLLER,
        sequence_id: 77,
        ..Acmpdu::command(AcmpMessageType::ConnectRxCommand)
    }
}

// ===== Connect =====

#[test]
fn test_connect_marks_connecting() {
    let mut net = Net::new(&config());
    let (frame, _rx) = net.controller.connect(SOURCE, SINK, 0).unwrap();
    let pdu = decode(&frame);
    assert_eq!(pdu.message_type, AcmpMessageType::ConnectRxCommand);
    assert_eq!(pdu.controller_entity_id, CONTROLLER);
    assert_eq!(pdu.listener_entity_id, LISTENER);
    assert_eq!(
        net.controller.connection(SINK).unwrap().state,
        ConnectionState::Connecting
    );
}

#[test]
fn test_listener_forwards_connect_tx() {
    let mut net = Net::new(&config());
    let (frame, _rx) = net.controller.connect(SOURCE, SINK, 0).unwrap();
    let fwd = only(&net.listener.handle(&decode(&frame), 0));
    assert_eq!(fwd.message_type, AcmpMessageType::ConnectTxCommand);
    assert_eq!(fwd.talker_entity_id, TALKER);
    assert_eq!(fwd.listener_entity_id, LISTENER);
    assert_eq!(net.listener.in_flight(), 1);
}

#[test]
fn test_connect_full_exchange() {
    let mut net = Net::new(&config());
    let (frame, mut rx) = net.controller.connect(SOURCE, SINK, 0).unwrap();
    let events = net.settle(vec![frame], 0);

    let rsp = rx.try_recv().unwrap().unwrap();
    assert_eq!(rsp.message_type, AcmpMessageType::ConnectRxResponse);
    assert_eq!(rsp.stream_id, StreamId::from_talker(TALKER_MAC, 0));
    assert_eq!(rsp.stream_dest_mac, MacAddress::stream_destination(0));
    assert_eq!(rsp.connection_count, 1);

    assert!(matches!(
        events.as_slice(),
        [EntityEvent::ConnectionEstablished { connection }] if connection.listener == SINK
    ));
    let conn = net.controller.connection(SINK).unwrap();
    assert_eq!(conn.state, ConnectionState::Connected);
    assert_eq!(conn.talker, SOURCE);
    assert_eq!(net.controller.connected_count(), 1);
    assert_eq!(net.listener.sink_talker(0), Some(SOURCE));
    assert_eq!(net.talker.source_listeners(0), &[SINK]);
    assert_eq!(net.listener.in_flight(), 0);
    assert_eq!(net.controller.in_flight(), 0);
}

#[test]
fn test_connect_unknown_sink() {
    let mut net = Net::new(&config());
    let sink = StreamEndpoint::new(LISTENER, 5);
    let (frame, mut rx) = net.controller.connect(SOURCE, sink, 0).unwrap();
    net.settle(vec![frame], 0);
    assert_eq!(rx.try_recv().unwrap(), Err(AcmpError::ListenerUnknownId));
    assert!(net.controller.connection(sink).is_none());
}

#[test]
fn test_connect_unknown_source() {
    let mut net = Net::new(&config());
    let source = StreamEndpoint::new(TALKER, 9);
    let (frame, mut rx) = net.controller.connect(source, SINK, 0).unwrap();
    net.settle(vec![frame], 0);
    assert_eq!(rx.try_recv().unwrap(), Err(AcmpError::TalkerUnknownId));
    assert!(net.listener.sink_talker(0).is_none());
}

#[test]
fn test_listener_exclusive_refuses_other_talker() {
    let mut net = Net::new(&config());
    net.connect();
    let other = StreamEndpoint::new(TALKER, 1);
    let (frame, mut rx) = net.controller.connect(other, SINK, 0).unwrap();
    net.settle(vec![frame], 0);
    assert_eq!(rx.try_recv().unwrap(), Err(AcmpError::ListenerExclusive));
    // The existing connection survives the refused attempt.
    let conn = net.controller.connection(SINK).unwrap();
    assert_eq!(conn.state, ConnectionState::Connected);
    assert_eq!(conn.talker, SOURCE);
}

#[test]
fn test_listener_reconnect_same_talker_when_shared() {
    let config = AvdeccConfig::builder()
        .listener_stream_sinks(1)
        .listener_exclusive(false)
        .build();
    let mut listener = ConnectionEngine::new(&config, LISTENER, MacAddress::ZERO);
    let tx_rsp = {
        let fwd = only(&listener.handle(&connect_rx(SOURCE, 0), 0));
        Acmpdu {
            stream_id: StreamId(0x55),
            ..fwd.to_response(AcmpStatus::Success)
        }
    };
    assert_eq!(only(&listener.handle(&tx_rsp, 0)).status, AcmpStatus::Success);

    let again = listener.handle(&connect_rx(SOURCE, 0), SEC);
    let rsp = only(&again);
    assert_eq!(rsp.message_type, AcmpMessageType::ConnectRxResponse);
    assert_eq!(rsp.status, AcmpStatus::Success);
    assert_eq!(rsp.stream_id, StreamId(0x55));
    assert_eq!(listener.in_flight(), 0);

    let other = listener.handle(&connect_rx(StreamEndpoint::new(TALKER, 1), 0), SEC);
    assert_eq!(only(&other).status, AcmpStatus::ListenerExclusive);
}

#[test]
fn test_listener_ignores_commands_while_forwarding() {
    let mut net = Net::new(&config());
    assert_eq!(net.listener.handle(&connect_rx(SOURCE, 0), 0).frames.len(), 1);
    assert!(net.listener.handle(&connect_rx(SOURCE, 0), 0).is_empty());
}

// ===== Talker role =====

#[test]
fn test_talker_connect_is_idempotent() {
    let mut net = Net::new(&config());
    let first = only(&net.talker.handle(&connect_tx(SINK, 0), 0));
    let second = only(&net.talker.handle(&connect_tx(SINK, 0), 0));
    assert_eq!(first.status, AcmpStatus::Success);
    assert_eq!(second.status, AcmpStatus::Success);
    assert_eq!(second.connection_count, 1);
    assert_eq!(net.talker.source_listeners(0).len(), 1);
}

#[test]
fn test_talker_fan_out() {
    let mut net = Net::new(&config());
    net.talker.handle(&connect_tx(SINK, 0), 0);
    let rsp = only(&net.talker.handle(&connect_tx(StreamEndpoint::new(LISTENER, 1), 0), 0));
    assert_eq!(rsp.status, AcmpStatus::Success);
    assert_eq!(rsp.connection_count, 2);
}

#[test]
fn test_talker_exclusive() {
    let config = AvdeccConfig::builder()
        .talker_stream_sources(1)
        .talker_exclusive(true)
        .build();
    let mut talker = ConnectionEngine::new(&config, TALKER, TALKER_MAC);
    talker.handle(&connect_tx(SINK, 0), 0);
    let rsp = only(&talker.handle(&connect_tx(StreamEndpoint::new(LISTENER, 1), 0), 0));
    assert_eq!(rsp.status, AcmpStatus::TalkerExclusive);
    assert_eq!(talker.source_listeners(0), &[SINK]);
}

#[test]
fn test_talker_disconnect_unknown_listener() {
    let mut net = Net::new(&config());
    let cmd = Acmpdu {
        message_type: AcmpMessageType::DisconnectTxCommand,
        ..connect_tx(SINK, 0)
    };
    assert_eq!(only(&net.talker.handle(&cmd, 0)).status, AcmpStatus::NotConnected);
}

#[test]
fn test_get_tx_connection() {
    let mut net = Net::new(&config());
    net.connect();

    let (frame, mut rx) = net.controller.get_tx_connection(SOURCE, 0, 0).unwrap();
    net.settle(vec![frame], 0);
    let rsp = rx.try_recv().unwrap().unwrap();
    assert_eq!(rsp.listener_entity_id, LISTENER);
    assert_eq!(rsp.listener_unique_id, 0);

    let (frame, mut rx) = net.controller.get_tx_connection(SOURCE, 1, 0).unwrap();
    net.settle(vec![frame], 0);
    assert_eq!(rx.try_recv().unwrap(), Err(AcmpError::NoSuchConnection));
}

#[test]
fn test_get_tx_state_counts_listeners() {
    let mut net = Net::new(&config());
    net.connect();
    let (frame, mut rx) = net.controller.get_tx_state(SOURCE, 0).unwrap();
    net.settle(vec![frame], 0);
    let state = StreamState::from(&rx.try_recv().unwrap().unwrap());
    assert_eq!(state.connection_count, 1);
    assert_eq!(state.stream_id, StreamId::from_talker(TALKER_MAC, 0));
}

#[test]
fn test_get_rx_state() {
    let mut net = Net::new(&config());
    let (frame, mut rx) = net.controller.get_rx_state(SINK, 0).unwrap();
    net.settle(vec![frame], 0);
    assert_eq!(rx.try_recv().unwrap().unwrap().connection_count, 0);

    net.connect();
    let (frame, mut rx) = net.controller.get_rx_state(SINK, 0).unwrap();
    net.settle(vec![frame], 0);
    let rsp = rx.try_recv().unwrap().unwrap();
    assert_eq!(rsp.connection_count, 1);
    assert_eq!(rsp.talker_entity_id, TALKER);
}

// ===== Disconnect =====

#[test]
fn test_disconnect_full_exchange() {
    let mut net = Net::new(&config());
    let connected = net.connect();

    let mut issued = net.controller.disconnect(connected.stream_id, SEC).unwrap();
    assert_eq!(issued.len(), 1);
    let (frame, mut rx) = issued.remove(0);
    assert_eq!(
        net.controller.connection(SINK).unwrap().state,
        ConnectionState::Disconnecting
    );

    let events = net.settle(vec![frame], SEC);
    assert!(rx.try_recv().unwrap().is_ok());
    assert!(matches!(
        events.as_slice(),
        [EntityEvent::ConnectionLost {
            reason: ConnectionLossReason::Disconnected,
            ..
        }]
    ));
    assert!(net.controller.connection(SINK).is_none());
    assert!(net.listener.sink_talker(0).is_none());
    assert!(net.talker.source_listeners(0).is_empty());
}

#[test]
fn test_disconnect_relays_talker_status() {
    let mut net = Net::new(&config());
    let connected = net.connect();
    // The talker has lost track of the listener.
    net.talker.peer_departed(LISTENER);

    let (frame, mut rx) = net.controller.disconnect(connected.stream_id, SEC).unwrap().remove(0);
    net.settle(vec![frame], SEC);

    assert_eq!(rx.try_recv().unwrap(), Err(AcmpError::NotConnected));
    assert!(net.listener.sink_talker(0).is_none());
    assert!(net.controller.connection(SINK).is_none());
}

#[test]
fn test_disconnect_unknown_stream() {
    let mut net = Net::new(&config());
    assert_eq!(
        net.controller.disconnect(StreamId(0x99), 0).unwrap_err(),
        AcmpError::NotConnected
    );
}

#[test]
fn test_listener_disconnect_when_not_connected() {
    let mut net = Net::new(&config());
    let cmd = Acmpdu {
        message_type: AcmpMessageType::DisconnectRxCommand,
        ..connect_rx(SOURCE, 0)
    };
    assert_eq!(only(&net.listener.handle(&cmd, 0)).status, AcmpStatus::NotConnected);
}

// ===== Timeouts =====

#[test]
fn test_controller_timeout_after_retries() {
    let mut net = Net::new(&config());
    let (frame, mut rx) = net.controller.connect(SOURCE, SINK, 0).unwrap();

    assert!(net.controller.tick(SEC).is_empty());
    let retry = net.controller.tick(2 * SEC);
    assert_eq!(retry.frames, vec![frame.clone()]);
    assert_eq!(net.controller.tick(4 * SEC).frames, vec![frame]);
    assert!(rx.try_recv().is_err());

    assert!(net.controller.tick(6 * SEC).frames.is_empty());
    assert_eq!(rx.try_recv().unwrap(), Err(AcmpError::Timeout));
    assert!(net.controller.connection(SINK).is_none());
}

#[test]
fn test_listener_reports_talker_timeout() {
    let mut net = Net::new(&config());
    let fwd = net.listener.handle(&connect_rx(SOURCE, 0), 0);
    // Forwarded commands wait half the controller timeout and retry once.
    assert_eq!(net.listener.tick(SEC).frames, fwd.frames);
    let rsp = only(&net.listener.tick(2 * SEC));
    assert_eq!(rsp.message_type, AcmpMessageType::ConnectRxResponse);
    assert_eq!(rsp.status, AcmpStatus::ListenerTalkerTimeout);
    assert_eq!(rsp.sequence_id, 77);
    assert!(net.listener.sink_talker(0).is_none());
}

#[test]
fn test_listener_timeout_reaches_controller_before_retry() {
    let mut net = Net::new(&config());
    let (frame, mut rx) = net.controller.connect(SOURCE, SINK, 0).unwrap();
    // The talker never answers.
    let fwd = net.listener.handle(&decode(&frame), 0);
    assert_eq!(fwd.frames.len(), 1);
    net.listener.tick(SEC);
    let reply = net.listener.tick(2 * SEC - 1);
    assert!(reply.is_empty());
    let reply = net.listener.tick(2 * SEC);
    net.controller.handle(&only(&reply), 2 * SEC);
    assert_eq!(rx.try_recv().unwrap(), Err(AcmpError::ListenerTalkerTimeout));
}

// ===== Response matching =====

#[test]
fn test_response_for_other_controller_ignored() {
    let mut net = Net::new(&config());
    let (frame, mut rx) = net.controller.connect(SOURCE, SINK, 0).unwrap();
    let mut rsp = decode(&frame).to_response(AcmpStatus::Success);
    rsp.controller_entity_id = EntityId(0xDEAD);
    assert!(net.controller.handle(&rsp, 0).is_empty());
    assert!(rx.try_recv().is_err());
    assert_eq!(net.controller.in_flight(), 1);
}

#[test]
fn test_response_with_wrong_type_ignored() {
    let mut net = Net::new(&config());
    let (frame, mut rx) = net.controller.connect(SOURCE, SINK, 0).unwrap();
    let mut rsp = decode(&frame).to_response(AcmpStatus::Success);
    rsp.message_type = AcmpMessageType::GetRxStateResponse;
    net.controller.handle(&rsp, 0);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_commands_for_other_entities_ignored() {
    let mut net = Net::new(&config());
    let mut cmd = connect_rx(SOURCE, 0);
    cmd.listener_entity_id = EntityId(0x4444);
    assert!(net.listener.handle(&cmd, 0).is_empty());
    assert!(net.talker.handle(&cmd, 0).is_empty());
}

#[test]
fn test_abandon_resolves_waiter() {
    let mut net = Net::new(&config());
    let (frame, mut rx) = net.controller.get_tx_state(SOURCE, 0).unwrap();
    net.controller.abandon(&frame, AcmpError::Cancelled);
    assert_eq!(rx.try_recv().unwrap(), Err(AcmpError::Cancelled));
    assert_eq!(net.controller.in_flight(), 0);
}

// ===== Departures =====

#[test]
fn test_talker_departure_drops_connections() {
    let mut net = Net::new(&config());
    net.connect();
    let (_frame, mut rx) = net.controller.get_tx_state(SOURCE, SEC).unwrap();

    let out = net.controller.peer_departed(TALKER);
    assert!(matches!(
        out.events.as_slice(),
        [EntityEvent::ConnectionLost {
            reason: ConnectionLossReason::PeerDeparted(TALKER),
            ..
        }]
    ));
    assert_eq!(rx.try_recv().unwrap(), Err(AcmpError::PeerDeparted(TALKER)));
    assert!(net.controller.connections().is_empty());

    net.listener.peer_departed(TALKER);
    assert!(net.listener.sink_talker(0).is_none());
}

#[test]
fn test_listener_departure_clears_talker_source() {
    let mut net = Net::new(&config());
    net.connect();
    net.talker.peer_departed(LISTENER);
    assert!(net.talker.source_listeners(0).is_empty());
}

#[test]
fn test_talker_departure_fails_forward() {
    let mut net = Net::new(&config());
    net.listener.handle(&connect_rx(SOURCE, 0), 0);
    let rsp = only(&net.listener.peer_departed(TALKER));
    assert_eq!(rsp.status, AcmpStatus::ListenerTalkerTimeout);
    assert_eq!(net.listener.in_flight(), 0);
}

#[test]
fn test_controller_departure_drops_forward_silently() {
    let mut net = Net::new(&config());
    net.listener.handle(&connect_rx(SOURCE, 0), 0);
    assert!(net.listener.peer_departed(CONTROLLER).is_empty());
    assert_eq!(net.listener.in_flight(), 0);
}

#[test]
fn test_cancel_all() {
    let mut net = Net::new(&config());
    let (_frame, mut rx) = net.controller.connect(SOURCE, SINK, 0).unwrap();
    net.controller.cancel_all();
    assert_eq!(rx.try_recv().unwrap(), Err(AcmpError::Cancelled));
}
