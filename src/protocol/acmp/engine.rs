//! ACMP controller, talker and listener roles.
//!
//! The controller side keeps a connection table keyed by listener sink and
//! resolves the caller's completion channel when the listener answers. The
//! listener side answers CONNECT_RX/DISCONNECT_RX by forwarding
//! CONNECT_TX/DISCONNECT_TX to the talker, and the talker side answers those
//! from its per-source listener lists.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::message::{AcmpMessageType, AcmpStatus, Acmpdu};
use crate::error::AcmpError;
use crate::protocol::EngineOutput;
use crate::protocol::sequence::{PendingRequest, RetryPolicy, SequenceTracker};
use crate::state::{ConnectionLossReason, EntityEvent};
use crate::types::{AvdeccConfig, EntityId, MacAddress, StreamEndpoint, StreamId, duration_ns};

/// Completion of one controller command.
pub type AcmpResult = Result<Acmpdu, AcmpError>;

/// Receiving half handed to the caller of a controller command.
pub type AcmpReceiver = oneshot::Receiver<AcmpResult>;

/// Controller-side state of a stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// CONNECT_RX sent, waiting for the listener
    Connecting,
    /// Listener reported success
    Connected,
    /// DISCONNECT_RX sent, waiting for the listener
    Disconnecting,
    /// Connect attempt failed
    Failed,
}

/// A stream connection tracked by this controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConnection {
    /// Stream source.
    pub talker: StreamEndpoint,
    /// Stream sink.
    pub listener: StreamEndpoint,
    /// Stream id reported by the listener.
    pub stream_id: StreamId,
    /// Stream destination MAC.
    pub stream_dest_mac: MacAddress,
    /// Talker connection count when connected.
    pub connection_count: u16,
    /// ACMP flags.
    pub flags: u16,
    /// Stream VLAN id.
    pub stream_vlan_id: u16,
    /// Current state.
    pub state: ConnectionState,
}

impl StreamConnection {
    fn connecting(talker: StreamEndpoint, listener: StreamEndpoint) -> Self {
        Self {
            talker,
            listener,
            stream_id: StreamId::default(),
            stream_dest_mac: MacAddress::ZERO,
            connection_count: 0,
            flags: 0,
            stream_vlan_id: 0,
            state: ConnectionState::Connecting,
        }
    }

    fn connected(pdu: &Acmpdu) -> Self {
        Self {
            talker: StreamEndpoint::new(pdu.talker_entity_id, pdu.talker_unique_id),
            listener: StreamEndpoint::new(pdu.listener_entity_id, pdu.listener_unique_id),
            stream_id: pdu.stream_id,
            stream_dest_mac: pdu.stream_dest_mac,
            connection_count: pdu.connection_count,
            flags: pdu.flags,
            stream_vlan_id: pdu.stream_vlan_id,
            state: ConnectionState::Connected,
        }
    }
}

/// Stream state reported by a GET_TX_STATE, GET_RX_STATE or GET_TX_CONNECTION response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    /// Stream source.
    pub talker: StreamEndpoint,
    /// Stream sink (or the listener at the requested index).
    pub listener: StreamEndpoint,
    /// Stream id.
    pub stream_id: StreamId,
    /// Stream destination MAC.
    pub stream_dest_mac: MacAddress,
    /// Connection count.
    pub connection_count: u16,
    /// ACMP flags.
    pub flags: u16,
    /// Stream VLAN id.
    pub stream_vlan_id: u16,
}

impl From<&Acmpdu> for StreamState {
    fn from(pdu: &Acmpdu) -> Self {
        Self {
            talker: StreamEndpoint::new(pdu.talker_entity_id, pdu.talker_unique_id),
            listener: StreamEndpoint::new(pdu.listener_entity_id, pdu.listener_unique_id),
            stream_id: pdu.stream_id,
            stream_dest_mac: pdu.stream_dest_mac,
            connection_count: pdu.connection_count,
            flags: pdu.flags,
            stream_vlan_id: pdu.stream_vlan_id,
        }
    }
}

#[derive(Debug)]
enum Waiter {
    Controller(oneshot::Sender<AcmpResult>),
    Listener { rx_command: Acmpdu },
}

/// Context stored with each in-flight ACMP command.
#[derive(Debug)]
pub struct AcmpPending {
    command: AcmpMessageType,
    talker: StreamEndpoint,
    listener: StreamEndpoint,
    waiter: Waiter,
}

impl AcmpPending {
    fn involves(&self, entity_id: EntityId) -> bool {
        self.talker.entity_id == entity_id
            || self.listener.entity_id == entity_id
            || matches!(&self.waiter, Waiter::Listener { rx_command } if rx_command.controller_entity_id == entity_id)
    }
}

#[derive(Debug, Clone)]
struct SinkConnection {
    talker: StreamEndpoint,
    stream_id: StreamId,
    stream_dest_mac: MacAddress,
    stream_vlan_id: u16,
    flags: u16,
    controller: EntityId,
}

#[derive(Debug, Default)]
struct ListenerSink {
    connected: Option<SinkConnection>,
    forwarding: bool,
}

/// ACMP state machine for one local entity.
#[derive(Debug)]
pub struct ConnectionEngine {
    local_id: EntityId,
    local_mac: MacAddress,
    listener_exclusive: bool,
    talker_exclusive: bool,
    sources: Vec<Vec<StreamEndpoint>>,
    sinks: Vec<ListenerSink>,
    connections: HashMap<StreamEndpoint, StreamConnection>,
    tracker: SequenceTracker<AcmpPending>,
    forward_policy: RetryPolicy,
}

impl ConnectionEngine {
    /// Create an engine for `local_id` with the stream counts and policies in `config`.
    #[must_use]
    pub fn new(config: &AvdeccConfig, local_id: EntityId, local_mac: MacAddress) -> Self {
        let timeout_ns = duration_ns(config.acmp_timeout);
        Self {
            local_id,
            local_mac,
            listener_exclusive: config.listener_exclusive,
            talker_exclusive: config.talker_exclusive,
            sources: vec![Vec::new(); usize::from(config.talker_stream_sources)],
            sinks: (0..config.listener_stream_sinks)
                .map(|_| ListenerSink::default())
                .collect(),
            connections: HashMap::new(),
            tracker: SequenceTracker::new(timeout_ns, config.max_retries, config.max_in_flight),
            // The talker exchange must finish within the controller's first attempt.
            forward_policy: RetryPolicy {
                timeout_ns: timeout_ns / 2,
                max_retries: 1,
            },
        }
    }

    // ===== Controller commands =====

    fn issue(
        &mut self,
        mut pdu: Acmpdu,
        target: EntityId,
        now: u64,
    ) -> Result<(Bytes, AcmpReceiver), AcmpError> {
        let (tx, rx) = oneshot::channel();
        pdu.controller_entity_id = self.local_id;
        let pending = AcmpPending {
            command: pdu.message_type,
            talker: StreamEndpoint::new(pdu.talker_entity_id, pdu.talker_unique_id),
            listener: StreamEndpoint::new(pdu.listener_entity_id, pdu.listener_unique_id),
            waiter: Waiter::Controller(tx),
        };
        let (_, frame) = self.tracker.issue(target, now, pending, |seq| {
            pdu.sequence_id = seq;
            pdu.encode().map_err(AcmpError::from)
        })?;
        tracing::debug!(command = ?pdu.message_type, target_id = %target, "ACMP command issued");
        Ok((frame, rx))
    }

    /// Start connecting `talker` to `listener` (CONNECT_RX to the listener).
    ///
    /// # Errors
    ///
    /// Returns `AcmpError::Exhausted` when the in-flight window is full.
    pub fn connect(
        &mut self,
        talker: StreamEndpoint,
        listener: StreamEndpoint,
        now: u64,
    ) -> Result<(Bytes, AcmpReceiver), AcmpError> {
        let mut pdu = Acmpdu::command(AcmpMessageType::ConnectRxCommand);
        pdu.talker_entity_id = talker.entity_id;
        pdu.talker_unique_id = talker.unique_id;
        pdu.listener_entity_id = listener.entity_id;
        pdu.listener_unique_id = listener.unique_id;
        let issued = self.issue(pdu, listener.entity_id, now)?;
        self.connections
            .entry(listener)
            .or_insert_with(|| StreamConnection::connecting(talker, listener));
        Ok(issued)
    }

    /// Start disconnecting every connection carrying `stream_id`.
    ///
    /// # Errors
    ///
    /// Returns `AcmpError::NotConnected` if no connected entry carries the id.
    pub fn disconnect(
        &mut self,
        stream_id: StreamId,
        now: u64,
    ) -> Result<Vec<(Bytes, AcmpReceiver)>, AcmpError> {
        let targets: Vec<StreamConnection> = self
            .connections
            .values()
            .filter(|c| c.stream_id == stream_id && c.state == ConnectionState::Connected)
            .cloned()
            .collect();
        if targets.is_empty() {
            return Err(AcmpError::NotConnected);
        }
        let mut issued = Vec::with_capacity(targets.len());
        for conn in targets {
            let mut pdu = Acmpdu::command(AcmpMessageType::DisconnectRxCommand);
            pdu.stream_id = conn.stream_id;
            pdu.talker_entity_id = conn.talker.entity_id;
            pdu.talker_unique_id = conn.talker.unique_id;
            pdu.listener_entity_id = conn.listener.entity_id;
            pdu.listener_unique_id = conn.listener.unique_id;
            issued.push(self.issue(pdu, conn.listener.entity_id, now)?);
            if let Some(entry) = self.connections.get_mut(&conn.listener) {
                entry.state = ConnectionState::Disconnecting;
            }
        }
        Ok(issued)
    }

    /// Query a talker source (GET_TX_STATE).
    ///
    /// # Errors
    ///
    /// Returns `AcmpError::Exhausted` when the in-flight window is full.
    pub fn get_tx_state(
        &mut self,
        talker: StreamEndpoint,
        now: u64,
    ) -> Result<(Bytes, AcmpReceiver), AcmpError> {
        let mut pdu = Acmpdu::command(AcmpMessageType::GetTxStateCommand);
        pdu.talker_entity_id = talker.entity_id;
        pdu.talker_unique_id = talker.unique_id;
        self.issue(pdu, talker.entity_id, now)
    }

    /// Query a listener sink (GET_RX_STATE).
    ///
    /// # Errors
    ///
    /// Returns `AcmpError::Exhausted` when the in-flight window is full.
    pub fn get_rx_state(
        &mut self,
        listener: StreamEndpoint,
        now: u64,
    ) -> Result<(Bytes, AcmpReceiver), AcmpError> {
        let mut pdu = Acmpdu::command(AcmpMessageType::GetRxStateCommand);
        pdu.listener_entity_id = listener.entity_id;
        pdu.listener_unique_id = listener.unique_id;
        self.issue(pdu, listener.entity_id, now)
    }

    /// Query connection `index` of a talker source (GET_TX_CONNECTION).
    ///
    /// # Errors
    ///
    /// Returns `AcmpError::Exhausted` when the in-flight window is full.
    pub fn get_tx_connection(
        &mut self,
        talker: StreamEndpoint,
        index: u16,
        now: u64,
    ) -> Result<(Bytes, AcmpReceiver), AcmpError> {
        let mut pdu = Acmpdu::command(AcmpMessageType::GetTxConnectionCommand);
        pdu.talker_entity_id = talker.entity_id;
        pdu.talker_unique_id = talker.unique_id;
        pdu.connection_count = index;
        self.issue(pdu, talker.entity_id, now)
    }

    /// Drop a command whose frame could not be sent, resolving it with `error`.
    pub fn abandon(&mut self, frame: &Bytes, error: AcmpError) {
        let Ok(pdu) = Acmpdu::decode(frame) else {
            return;
        };
        let target = if pdu.message_type.is_talker_message() {
            pdu.talker_entity_id
        } else {
            pdu.listener_entity_id
        };
        if let Some(req) = self.tracker.complete(target, pdu.sequence_id) {
            self.fail_controller_request(req, error, &mut EngineOutput::new());
        }
    }

    // ===== Inbound =====

    /// Process an inbound ACMPDU.
    pub fn handle(&mut self, pdu: &Acmpdu, now: u64) -> EngineOutput {
        let mut out = EngineOutput::new();
        if pdu.message_type.is_command() {
            if pdu.message_type.is_talker_message() {
                if pdu.talker_entity_id == self.local_id {
                    self.talker_command(pdu, &mut out);
                }
            } else if pdu.listener_entity_id == self.local_id {
                self.listener_command(pdu, now, &mut out);
            }
        } else {
            self.response(pdu, &mut out);
        }
        out
    }

    fn response(&mut self, pdu: &Acmpdu, out: &mut EngineOutput) {
        let target = if pdu.message_type.is_talker_message() {
            pdu.talker_entity_id
        } else {
            pdu.listener_entity_id
        };
        let matches = self
            .tracker
            .peek(target, pdu.sequence_id)
            .is_some_and(|req| {
                req.context.command.response() == pdu.message_type
                    && match &req.context.waiter {
                        Waiter::Controller(_) => pdu.controller_entity_id == self.local_id,
                        Waiter::Listener { .. } => pdu.listener_entity_id == self.local_id,
                    }
            });
        if !matches {
            tracing::trace!(
                response = ?pdu.message_type,
                sequence_id = pdu.sequence_id,
                "Ignoring unmatched ACMP response"
            );
            return;
        }
        let Some(req) = self.tracker.complete(target, pdu.sequence_id) else {
            return;
        };
        match req.context.waiter {
            Waiter::Controller(tx) => {
                self.controller_response(req.context.command, pdu, out);
                let _ = tx.send(AcmpError::check(pdu.status).map(|()| pdu.clone()));
            }
            Waiter::Listener { rx_command } => {
                self.forward_response(req.context.command, &rx_command, pdu, out);
            }
        }
    }

    fn controller_response(&mut self, command: AcmpMessageType, pdu: &Acmpdu, out: &mut EngineOutput) {
        let listener = StreamEndpoint::new(pdu.listener_entity_id, pdu.listener_unique_id);
        match command {
            AcmpMessageType::ConnectRxCommand => {
                if pdu.status == AcmpStatus::Success {
                    let conn = StreamConnection::connected(pdu);
                    tracing::info!(
                        talker = %conn.talker,
                        listener = %conn.listener,
                        stream_id = %conn.stream_id,
                        "Stream connected"
                    );
                    self.connections.insert(listener, conn.clone());
                    out.event(EntityEvent::ConnectionEstablished { connection: conn });
                } else {
                    tracing::info!(listener = %listener, status = ?pdu.status, "Connect refused");
                    self.revert(command, listener);
                }
            }
            AcmpMessageType::DisconnectRxCommand => {
                if matches!(pdu.status, AcmpStatus::Success | AcmpStatus::NotConnected) {
                    if let Some(mut conn) = self.connections.remove(&listener) {
                        tracing::info!(listener = %listener, "Stream disconnected");
                        conn.state = ConnectionState::Disconnected;
                        out.event(EntityEvent::ConnectionLost {
                            connection: conn,
                            reason: ConnectionLossReason::Disconnected,
                        });
                    }
                } else {
                    self.revert(command, listener);
                }
            }
            _ => {}
        }
    }

    /// Undo the state change made when `command` was issued.
    fn revert(&mut self, command: AcmpMessageType, listener: StreamEndpoint) {
        match command {
            AcmpMessageType::ConnectRxCommand => {
                if self
                    .connections
                    .get(&listener)
                    .is_some_and(|c| c.state == ConnectionState::Connecting)
                {
                    self.connections.remove(&listener);
                }
            }
            AcmpMessageType::DisconnectRxCommand => {
                if let Some(conn) = self.connections.get_mut(&listener) {
                    if conn.state == ConnectionState::Disconnecting {
                        conn.state = ConnectionState::Connected;
                    }
                }
            }
            _ => {}
        }
    }

    fn fail_controller_request(
        &mut self,
        req: PendingRequest<AcmpPending>,
        error: AcmpError,
        out: &mut EngineOutput,
    ) {
        match req.context.waiter {
            Waiter::Controller(tx) => {
                self.revert(req.context.command, req.context.listener);
                let _ = tx.send(Err(error));
            }
            Waiter::Listener { rx_command } => {
                self.forward_failed(req.context.command, &rx_command, out);
            }
        }
    }

    // ===== Talker role =====

    fn respond(pdu: &Acmpdu, out: &mut EngineOutput) {
        match pdu.encode() {
            Ok(frame) => out.frame(frame),
            Err(e) => tracing::warn!("Failed to encode ACMP response: {}", e),
        }
    }

    fn talker_command(&mut self, cmd: &Acmpdu, out: &mut EngineOutput) {
        let uid = cmd.talker_unique_id;
        let Some(listeners) = self.sources.get_mut(usize::from(uid)) else {
            Self::respond(&cmd.to_response(AcmpStatus::TalkerUnknownId), out);
            return;
        };
        let listener = StreamEndpoint::new(cmd.listener_entity_id, cmd.listener_unique_id);
        let mut rsp = cmd.to_response(AcmpStatus::Success);
        rsp.stream_id = StreamId::from_talker(self.local_mac, uid);
        rsp.stream_dest_mac = MacAddress::stream_destination(uid);

        match cmd.message_type {
            AcmpMessageType::ConnectTxCommand => {
                if !listeners.contains(&listener) {
                    if self.talker_exclusive && !listeners.is_empty() {
                        rsp.status = AcmpStatus::TalkerExclusive;
                    } else {
                        listeners.push(listener);
                        tracing::info!(source = uid, listener = %listener, "Talker source connected");
                    }
                }
            }
            AcmpMessageType::DisconnectTxCommand => {
                if let Some(pos) = listeners.iter().position(|l| *l == listener) {
                    listeners.remove(pos);
                    tracing::info!(source = uid, listener = %listener, "Talker source disconnected");
                } else {
                    rsp.status = AcmpStatus::NotConnected;
                }
            }
            AcmpMessageType::GetTxStateCommand => {}
            AcmpMessageType::GetTxConnectionCommand => {
                match listeners.get(usize::from(cmd.connection_count)) {
                    Some(l) => {
                        rsp.listener_entity_id = l.entity_id;
                        rsp.listener_unique_id = l.unique_id;
                    }
                    None => rsp.status = AcmpStatus::NoSuchConnection,
                }
            }
            _ => return,
        }
        if cmd.message_type != AcmpMessageType::GetTxConnectionCommand {
            rsp.connection_count = u16::try_from(listeners.len()).unwrap_or(u16::MAX);
        }
        Self::respond(&rsp, out);
    }

    // ===== Listener role =====

    fn listener_command(&mut self, cmd: &Acmpdu, now: u64, out: &mut EngineOutput) {
        let uid = cmd.listener_unique_id;
        let listener_exclusive = self.listener_exclusive;
        let Some(sink) = self.sinks.get_mut(usize::from(uid)) else {
            Self::respond(&cmd.to_response(AcmpStatus::ListenerUnknownId), out);
            return;
        };
        if sink.forwarding && cmd.message_type != AcmpMessageType::GetRxStateCommand {
            tracing::debug!(sink = uid, "Sink busy, ignoring repeated command");
            return;
        }
        let talker = StreamEndpoint::new(cmd.talker_entity_id, cmd.talker_unique_id);
        match cmd.message_type {
            AcmpMessageType::ConnectRxCommand => {
                if let Some(existing) = &sink.connected {
                    let mut rsp = cmd.to_response(AcmpStatus::ListenerExclusive);
                    if !listener_exclusive && existing.talker == talker {
                        rsp.status = AcmpStatus::Success;
                        rsp.stream_id = existing.stream_id;
                        rsp.stream_dest_mac = existing.stream_dest_mac;
                        rsp.stream_vlan_id = existing.stream_vlan_id;
                        rsp.flags = existing.flags;
                        rsp.connection_count = 1;
                    }
                    Self::respond(&rsp, out);
                    return;
                }
                let mut fwd = cmd.clone();
                fwd.message_type = AcmpMessageType::ConnectTxCommand;
                self.forward(fwd, cmd, now, out);
            }
            AcmpMessageType::DisconnectRxCommand => {
                let Some(existing) = &sink.connected else {
                    Self::respond(&cmd.to_response(AcmpStatus::NotConnected), out);
                    return;
                };
                let mut fwd = cmd.clone();
                fwd.message_type = AcmpMessageType::DisconnectTxCommand;
                fwd.stream_id = existing.stream_id;
                fwd.talker_entity_id = existing.talker.entity_id;
                fwd.talker_unique_id = existing.talker.unique_id;
                self.forward(fwd, cmd, now, out);
            }
            AcmpMessageType::GetRxStateCommand => {
                let mut rsp = cmd.to_response(AcmpStatus::Success);
                if let Some(existing) = &sink.connected {
                    rsp.talker_entity_id = existing.talker.entity_id;
                    rsp.talker_unique_id = existing.talker.unique_id;
                    rsp.stream_id = existing.stream_id;
                    rsp.stream_dest_mac = existing.stream_dest_mac;
                    rsp.stream_vlan_id = existing.stream_vlan_id;
                    rsp.flags = existing.flags;
                    rsp.controller_entity_id = cmd.controller_entity_id;
                    rsp.connection_count = 1;
                } else {
                    rsp.connection_count = 0;
                }
                Self::respond(&rsp, out);
            }
            _ => {}
        }
    }

    fn forward(&mut self, mut fwd: Acmpdu, rx_command: &Acmpdu, now: u64, out: &mut EngineOutput) {
        let talker = StreamEndpoint::new(fwd.talker_entity_id, fwd.talker_unique_id);
        let listener = StreamEndpoint::new(fwd.listener_entity_id, fwd.listener_unique_id);
        let pending = AcmpPending {
            command: fwd.message_type,
            talker,
            listener,
            waiter: Waiter::Listener {
                rx_command: rx_command.clone(),
            },
        };
        let policy = self.forward_policy;
        let issued = self.tracker.issue_with::<AcmpError, _>(
            talker.entity_id,
            now,
            policy,
            pending,
            |seq| {
                fwd.sequence_id = seq;
                fwd.encode().map_err(AcmpError::from)
            },
        );
        match issued {
            Ok((_, frame)) => {
                if let Some(sink) = self.sinks.get_mut(usize::from(listener.unique_id)) {
                    sink.forwarding = true;
                }
                tracing::debug!(command = ?fwd.message_type, talker = %talker, "Forwarding to talker");
                out.frame(frame);
            }
            Err(e) => {
                tracing::warn!("Could not forward to talker: {}", e);
                Self::respond(&rx_command.to_response(AcmpStatus::CouldNotSendMessage), out);
            }
        }
    }

    fn forward_response(
        &mut self,
        command: AcmpMessageType,
        rx_command: &Acmpdu,
        tx_response: &Acmpdu,
        out: &mut EngineOutput,
    ) {
        let Some(sink) = self.sinks.get_mut(usize::from(rx_command.listener_unique_id)) else {
            return;
        };
        sink.forwarding = false;
        let mut rsp = rx_command.to_response(tx_response.status);
        match command {
            AcmpMessageType::ConnectTxCommand => {
                rsp.stream_id = tx_response.stream_id;
                rsp.stream_dest_mac = tx_response.stream_dest_mac;
                rsp.stream_vlan_id = tx_response.stream_vlan_id;
                rsp.connection_count = tx_response.connection_count;
                if tx_response.status == AcmpStatus::Success {
                    sink.connected = Some(SinkConnection {
                        talker: StreamEndpoint::new(
                            tx_response.talker_entity_id,
                            tx_response.talker_unique_id,
                        ),
                        stream_id: tx_response.stream_id,
                        stream_dest_mac: tx_response.stream_dest_mac,
                        stream_vlan_id: tx_response.stream_vlan_id,
                        flags: rx_command.flags,
                        controller: rx_command.controller_entity_id,
                    });
                    tracing::info!(
                        sink = rx_command.listener_unique_id,
                        stream_id = %tx_response.stream_id,
                        "Listener sink connected"
                    );
                }
            }
            AcmpMessageType::DisconnectTxCommand => {
                // The sink stops listening whatever the talker answered.
                if tx_response.status != AcmpStatus::Success {
                    tracing::debug!(status = ?tx_response.status, "Talker refused disconnect");
                }
                sink.connected = None;
                rsp.stream_id = tx_response.stream_id;
                tracing::info!(sink = rx_command.listener_unique_id, "Listener sink disconnected");
            }
            _ => return,
        }
        Self::respond(&rsp, out);
    }

    fn forward_failed(&mut self, command: AcmpMessageType, rx_command: &Acmpdu, out: &mut EngineOutput) {
        let Some(sink) = self.sinks.get_mut(usize::from(rx_command.listener_unique_id)) else {
            return;
        };
        sink.forwarding = false;
        let status = match command {
            AcmpMessageType::ConnectTxCommand => AcmpStatus::ListenerTalkerTimeout,
            AcmpMessageType::DisconnectTxCommand => {
                sink.connected = None;
                AcmpStatus::Success
            }
            _ => return,
        };
        tracing::debug!(command = ?command, status = ?status, "Talker did not answer");
        Self::respond(&rx_command.to_response(status), out);
    }

    // ===== Periodic and cascades =====

    /// Retransmit or expire commands whose deadline passed.
    pub fn tick(&mut self, now: u64) -> EngineOutput {
        let mut out = EngineOutput::new();
        let sweep = self.tracker.sweep(now);
        out.frames.extend(sweep.retransmit);
        for req in sweep.expired {
            tracing::debug!(
                command = ?req.context.command,
                target_id = %req.target,
                "ACMP command timed out"
            );
            self.fail_controller_request(req, AcmpError::Timeout, &mut out);
        }
        out
    }

    /// Remove everything that references `entity_id` after it departed.
    pub fn peer_departed(&mut self, entity_id: EntityId) -> EngineOutput {
        let mut out = EngineOutput::new();

        let lost: Vec<StreamEndpoint> = self
            .connections
            .values()
            .filter(|c| c.talker.entity_id == entity_id || c.listener.entity_id == entity_id)
            .map(|c| c.listener)
            .collect();
        for key in lost {
            if let Some(mut conn) = self.connections.remove(&key) {
                tracing::info!(listener = %conn.listener, departed = %entity_id, "Connection lost");
                conn.state = ConnectionState::Disconnected;
                out.event(EntityEvent::ConnectionLost {
                    connection: conn,
                    reason: ConnectionLossReason::PeerDeparted(entity_id),
                });
            }
        }

        for req in self
            .tracker
            .remove_where(|req| req.target == entity_id || req.context.involves(entity_id))
        {
            let controller_gone = matches!(
                &req.context.waiter,
                Waiter::Listener { rx_command } if rx_command.controller_entity_id == entity_id
            );
            if controller_gone {
                if let Some(sink) = self.sinks.get_mut(usize::from(req.context.listener.unique_id)) {
                    sink.forwarding = false;
                }
            } else {
                self.fail_controller_request(req, AcmpError::PeerDeparted(entity_id), &mut out);
            }
        }

        for sink in &mut self.sinks {
            if sink
                .connected
                .as_ref()
                .is_some_and(|c| c.talker.entity_id == entity_id)
            {
                sink.connected = None;
            }
        }
        for listeners in &mut self.sources {
            listeners.retain(|l| l.entity_id != entity_id);
        }
        out
    }

    /// Fail every in-flight command with `Cancelled`.
    pub fn cancel_all(&mut self) {
        for req in self.tracker.drain() {
            if let Waiter::Controller(tx) = req.context.waiter {
                let _ = tx.send(Err(AcmpError::Cancelled));
            }
        }
        for sink in &mut self.sinks {
            sink.forwarding = false;
        }
    }

    // ===== Queries =====

    /// Connections tracked by this controller.
    #[must_use]
    pub fn connections(&self) -> Vec<StreamConnection> {
        self.connections.values().cloned().collect()
    }

    /// Connection into `listener`, if tracked.
    #[must_use]
    pub fn connection(&self, listener: StreamEndpoint) -> Option<&StreamConnection> {
        self.connections.get(&listener)
    }

    /// Number of connections in `Connected` or `Disconnecting` state.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| {
                matches!(
                    c.state,
                    ConnectionState::Connected | ConnectionState::Disconnecting
                )
            })
            .count()
    }

    /// Connected entries carrying `stream_id`.
    #[must_use]
    pub fn connections_with_stream(&self, stream_id: StreamId) -> usize {
        self.connections
            .values()
            .filter(|c| c.stream_id == stream_id && c.state == ConnectionState::Connected)
            .count()
    }

    /// Listeners connected to local source `unique_id` (talker role).
    #[must_use]
    pub fn source_listeners(&self, unique_id: u16) -> &[StreamEndpoint] {
        self.sources
            .get(usize::from(unique_id))
            .map_or(&[], Vec::as_slice)
    }

    /// Talker feeding local sink `unique_id` (listener role).
    #[must_use]
    pub fn sink_talker(&self, unique_id: u16) -> Option<StreamEndpoint> {
        self.sinks
            .get(usize::from(unique_id))
            .and_then(|s| s.connected.as_ref())
            .map(|c| c.talker)
    }

    /// Commands in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}
