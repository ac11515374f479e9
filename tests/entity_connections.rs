use std::time::Duration;

use avdecc::protocol::Pdu;
use avdecc::protocol::acmp::{AcmpMessageType, ConnectionState};
use avdecc::state::ConnectionLossReason;
use avdecc::{AcmpError, EntityEvent, LifecycleState, StreamEndpoint, StreamId};

#[macro_use]
mod common;
use common::{CONTROLLER_MAC, Fixture, LISTENER_MAC, TALKER_MAC, next_event};

fn acmp_commands(frames: &[bytes::Bytes], message_type: AcmpMessageType) -> usize {
    frames
        .iter()
        .filter(|f| matches!(Pdu::decode(f), Ok(Pdu::Acmp(pdu)) if pdu.message_type == message_type))
        .count()
}

// ===== Connect =====

#[tokio::test(start_paused = true)]
async fn test_connect_stream() {
    let fixture = Fixture::started().await;

    let stream_id = fixture
        .controller
        .connect_stream(fixture.source(), fixture.sink())
        .await
        .unwrap();
    assert_eq!(stream_id, StreamId::from_talker(TALKER_MAC, 0));

    let connections = fixture.controller.connections().await;
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].talker, fixture.source());
    assert_eq!(connections[0].listener, fixture.sink());
    assert_eq!(connections[0].state, ConnectionState::Connected);

    // The listener relayed the request to the talker.
    let forwarded = fixture.network.sent_by(LISTENER_MAC);
    assert_eq!(acmp_commands(&forwarded, AcmpMessageType::ConnectTxCommand), 1);
    assert_eq!(acmp_commands(&forwarded, AcmpMessageType::ConnectRxResponse), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_publishes_event() {
    let fixture = Fixture::started().await;
    let mut events = fixture.controller.subscribe();

    fixture
        .controller
        .connect(fixture.source(), fixture.sink())
        .await
        .unwrap();

    let event = next_event(&mut events, |e| {
        matches!(e, EntityEvent::ConnectionEstablished { .. })
    })
    .await;
    let EntityEvent::ConnectionEstablished { connection } = event else {
        unreachable!()
    };
    assert_eq!(connection.listener, fixture.sink());
}

#[tokio::test(start_paused = true)]
async fn test_second_connect_refused_by_exclusive_listener() {
    let fixture = Fixture::started().await;
    fixture
        .controller
        .connect_stream(fixture.source(), fixture.sink())
        .await
        .unwrap();

    let second = fixture
        .controller
        .connect_stream(fixture.source(), fixture.sink())
        .await;
    assert_eq!(second, Err(AcmpError::ListenerExclusive));

    // The established connection is untouched.
    let connections = fixture.controller.connections().await;
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].state, ConnectionState::Connected);
    assert_eq!(fixture.controller.state(), LifecycleState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_unknown_sink() {
    let fixture = Fixture::started().await;
    let result = fixture
        .controller
        .connect_stream(
            fixture.source(),
            StreamEndpoint::new(fixture.listener.entity_id(), 5),
        )
        .await;
    assert_eq!(result, Err(AcmpError::ListenerUnknownId));
    assert_eq!(fixture.controller.state(), LifecycleState::Available);
}

#[tokio::test(start_paused = true)]
async fn test_connect_unknown_source() {
    let fixture = Fixture::started().await;
    let result = fixture
        .controller
        .connect_stream(
            StreamEndpoint::new(fixture.talker.entity_id(), 3),
            fixture.sink(),
        )
        .await;
    assert_eq!(result, Err(AcmpError::TalkerUnknownId));
}

// ===== Disconnect =====

#[tokio::test(start_paused = true)]
async fn test_disconnect_stream() {
    let fixture = Fixture::started().await;
    let stream_id = fixture
        .controller
        .connect_stream(fixture.source(), fixture.sink())
        .await
        .unwrap();

    fixture.controller.disconnect_stream(stream_id).await.unwrap();

    assert!(
        fixture
            .controller
            .connections()
            .await
            .iter()
            .all(|c| c.state != ConnectionState::Connected)
    );
    assert_eq!(fixture.controller.state(), LifecycleState::Available);

    let rx_state = fixture.controller.get_rx_state(fixture.sink()).await.unwrap();
    assert_eq!(rx_state.connection_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_twice_reports_not_connected() {
    let fixture = Fixture::started().await;
    let stream_id = fixture
        .controller
        .connect_stream(fixture.source(), fixture.sink())
        .await
        .unwrap();

    fixture.controller.disconnect_stream(stream_id).await.unwrap();
    assert_eq!(
        fixture.controller.disconnect_stream(stream_id).await,
        Err(AcmpError::NotConnected)
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_unknown_stream() {
    let fixture = Fixture::started().await;
    assert_eq!(
        fixture.controller.disconnect_stream(StreamId::new(0xDEAD)).await,
        Err(AcmpError::NotConnected)
    );
}

// ===== State queries =====

#[tokio::test(start_paused = true)]
async fn test_stream_state_queries() {
    let fixture = Fixture::started().await;
    let stream_id = fixture
        .controller
        .connect_stream(fixture.source(), fixture.sink())
        .await
        .unwrap();

    let tx = fixture.controller.get_tx_state(fixture.source()).await.unwrap();
    assert_eq!(tx.stream_id, stream_id);
    assert_eq!(tx.connection_count, 1);

    let rx = fixture.controller.get_rx_state(fixture.sink()).await.unwrap();
    assert_eq!(rx.stream_id, stream_id);
    assert_eq!(rx.talker, fixture.source());

    let conn = fixture
        .controller
        .get_tx_connection(fixture.source(), 0)
        .await
        .unwrap();
    assert_eq!(conn.listener, fixture.sink());
}

// ===== Timeouts =====

#[tokio::test(start_paused = true)]
async fn test_connect_times_out_after_retries() {
    let fixture = Fixture::started().await;
    fixture.network.set_drop_filter(LISTENER_MAC, |_| true);
    fixture.network.clear_sent();
    let started = tokio::time::Instant::now();

    let result = fixture
        .controller
        .connect_stream(fixture.source(), fixture.sink())
        .await;

    assert_eq!(result, Err(AcmpError::Timeout));
    let sent = fixture.network.sent_by(CONTROLLER_MAC);
    assert_eq!(acmp_commands(&sent, AcmpMessageType::ConnectRxCommand), 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(6000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(6300), "{elapsed:?}");
    assert_eq!(fixture.controller.state(), LifecycleState::Available);
}

// ===== Departure =====

#[tokio::test(start_paused = true)]
async fn test_talker_departure_drops_connection() {
    let fixture = Fixture::started().await;
    fixture
        .controller
        .connect_stream(fixture.source(), fixture.sink())
        .await
        .unwrap();
    assert_eq!(fixture.controller.state(), LifecycleState::Connected);
    let mut events = fixture.controller.subscribe();

    fixture.talker.shutdown().await.unwrap();

    let event = next_event(&mut events, |e| {
        matches!(e, EntityEvent::ConnectionLost { .. })
    })
    .await;
    let EntityEvent::ConnectionLost { connection, reason } = event else {
        unreachable!()
    };
    assert_eq!(connection.talker, fixture.source());
    assert_eq!(
        reason,
        ConnectionLossReason::PeerDeparted(fixture.talker.entity_id())
    );
    eventually!(fixture.controller.state() == LifecycleState::Available);
    assert!(fixture.controller.connections().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_departure_cascades_to_connection_and_pending_read() {
    let fixture = Fixture::started().await;
    let talker = fixture.talker.entity_id();
    fixture
        .controller
        .connect_stream(fixture.source(), fixture.sink())
        .await
        .unwrap();
    let mut events = fixture.controller.subscribe();
    // The talker never answers AECP, so the read stays pending.
    fixture
        .network
        .set_drop_filter(TALKER_MAC, |f| matches!(Pdu::decode(f), Ok(Pdu::Aecp(_))));

    let read = fixture
        .controller
        .read_descriptor(talker, avdecc::DescriptorType::ENTITY, 0);
    let depart = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        fixture.talker.shutdown().await.unwrap();
    };
    let (result, ()) = tokio::join!(read, depart);

    assert_eq!(result, Err(avdecc::AemError::PeerDeparted(talker)));
    let event = next_event(&mut events, |e| {
        matches!(e, EntityEvent::ConnectionLost { .. })
    })
    .await;
    assert!(matches!(
        event,
        EntityEvent::ConnectionLost {
            reason: ConnectionLossReason::PeerDeparted(id),
            ..
        } if id == talker
    ));
    assert!(fixture.controller.discovered_entity(talker).await.is_none());
}
