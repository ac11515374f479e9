//! AEM command dispatch for the local entity and controller-side command tracking.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::aem::{AcquireEntity, DescriptorKey, ReadDescriptorCommand};
use super::handlers::{self, AemHandler};
use super::message::{AecpBody, AecpMessageType, AemCommandType, AemStatus, Aecpdu};
use super::model::{AemCommand, AemResponse, EntityState};
use crate::error::AemError;
use crate::protocol::EngineOutput;
use crate::protocol::adp::AvailableIndex;
use crate::protocol::codec::CodecError;
use crate::protocol::sequence::SequenceTracker;
use crate::state::EntityEvent;
use crate::types::{AvdeccConfig, EntityId, duration_ns};

/// Completion of one AEM command: the response payload on `SUCCESS`.
pub type AemResult = Result<Bytes, AemError>;

/// Receiving half handed to the caller of an AEM command.
pub type AemReceiver = oneshot::Receiver<AemResult>;

/// Context stored with each in-flight AEM command.
#[derive(Debug)]
pub struct AemPending {
    command_type: AemCommandType,
    key: Option<DescriptorKey>,
    waiter: oneshot::Sender<AemResult>,
}

/// AECP state machine for one local entity.
pub struct EnumerationEngine {
    state: EntityState,
    handlers: HashMap<AemCommandType, AemHandler>,
    tracker: SequenceTracker<AemPending>,
    cache: HashMap<EntityId, HashMap<DescriptorKey, Bytes>>,
    remote_index: HashMap<EntityId, u32>,
    acquired: HashMap<EntityId, bool>,
    unsolicited_sequence: u16,
}

impl std::fmt::Debug for EnumerationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnumerationEngine")
            .field("state", &self.state)
            .field("handlers", &self.handlers.len())
            .field("in_flight", &self.tracker.len())
            .field("cached_entities", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl EnumerationEngine {
    /// Create an engine serving the entity model described by `config`.
    #[must_use]
    pub fn new(config: &AvdeccConfig, local_id: EntityId, available_index: AvailableIndex) -> Self {
        Self {
            state: EntityState::new(config, local_id, available_index),
            handlers: handlers::builtin(),
            tracker: SequenceTracker::new(
                duration_ns(config.aecp_timeout),
                config.max_retries,
                config.max_in_flight,
            ),
            cache: HashMap::new(),
            remote_index: HashMap::new(),
            acquired: HashMap::new(),
            unsolicited_sequence: 0,
        }
    }

    /// Local entity model.
    #[must_use]
    pub fn state(&self) -> &EntityState {
        &self.state
    }

    /// Mutable local entity model.
    pub fn state_mut(&mut self) -> &mut EntityState {
        &mut self.state
    }

    /// Install or replace the handler for `command_type`. Returns the previous handler.
    pub fn register_handler<F>(&mut self, command_type: AemCommandType, handler: F) -> Option<AemHandler>
    where
        F: Fn(&mut EntityState, &AemCommand) -> AemResponse + Send + Sync + 'static,
    {
        self.handlers.insert(command_type, Box::new(handler))
    }

    /// Whether a handler is installed for `command_type`.
    #[must_use]
    pub fn has_handler(&self, command_type: AemCommandType) -> bool {
        self.handlers.contains_key(&command_type)
    }

    // ===== Controller commands =====

    fn issue(
        &mut self,
        target: EntityId,
        command_type: AemCommandType,
        payload: Bytes,
        key: Option<DescriptorKey>,
        now: u64,
    ) -> Result<(Bytes, AemReceiver), AemError> {
        let (tx, rx) = oneshot::channel();
        let local = self.state.entity_id();
        let pending = AemPending {
            command_type,
            key,
            waiter: tx,
        };
        let (_, frame) = self.tracker.issue(target, now, pending, |seq| {
            Aecpdu::aem_command(target, local, seq, command_type, payload)
                .encode()
                .map_err(AemError::from)
        })?;
        tracing::debug!(command = %command_type, target_id = %target, "AEM command issued");
        Ok((frame, rx))
    }

    /// Send an arbitrary AEM command to `target`.
    ///
    /// # Errors
    ///
    /// `Exhausted` when the in-flight window is full, `Malformed` if the
    /// payload does not fit an AECPDU.
    pub fn command(
        &mut self,
        target: EntityId,
        command_type: AemCommandType,
        payload: Bytes,
        now: u64,
    ) -> Result<(Bytes, AemReceiver), AemError> {
        self.issue(target, command_type, payload, None, now)
    }

    /// Send READ_DESCRIPTOR for `key`. Successful responses are cached.
    ///
    /// # Errors
    ///
    /// Same as [`command`](Self::command).
    pub fn read_descriptor(
        &mut self,
        target: EntityId,
        key: DescriptorKey,
        now: u64,
    ) -> Result<(Bytes, AemReceiver), AemError> {
        let payload = ReadDescriptorCommand { key }.encode();
        self.issue(target, AemCommandType::READ_DESCRIPTOR, payload, Some(key), now)
    }

    /// Cached READ_DESCRIPTOR response payload for `key` on `target`.
    #[must_use]
    pub fn cached_descriptor(&self, target: EntityId, key: &DescriptorKey) -> Option<Bytes> {
        self.cache.get(&target)?.get(&key.normalized()).cloned()
    }

    /// Remote entities this controller currently holds, with their persistent flag.
    #[must_use]
    pub fn acquired_entities(&self) -> Vec<(EntityId, bool)> {
        self.acquired.iter().map(|(id, p)| (*id, *p)).collect()
    }

    /// Drop a command whose frame could not be sent, resolving it with `error`.
    pub fn abandon(&mut self, frame: &Bytes, error: AemError) {
        let Ok(pdu) = Aecpdu::decode(frame) else {
            return;
        };
        if let Some(req) = self.tracker.complete(pdu.target_entity_id, pdu.sequence_id) {
            let _ = req.context.waiter.send(Err(error));
        }
    }

    // ===== Inbound =====

    /// Process an inbound AECPDU.
    pub fn handle(&mut self, pdu: &Aecpdu, now: u64) -> EngineOutput {
        let mut out = EngineOutput::new();
        if pdu.message_type.is_command() {
            if pdu.target_entity_id == self.state.entity_id() {
                self.respond(pdu, now, &mut out);
            }
        } else if pdu.message_type == AecpMessageType::AemResponse {
            self.response(pdu, &mut out);
        }
        out
    }

    fn respond(&mut self, cmd: &Aecpdu, now: u64, out: &mut EngineOutput) {
        let AecpBody::Aem {
            command_type,
            payload,
            ..
        } = &cmd.body
        else {
            tracing::debug!(message_type = ?cmd.message_type, "Non-AEM command not implemented");
            Self::send(out, &cmd.to_response(AemStatus::NotImplemented, cmd.payload().clone()));
            return;
        };
        let request = AemCommand {
            controller_id: cmd.controller_entity_id,
            sequence_id: cmd.sequence_id,
            command_type: *command_type,
            payload: payload.clone(),
            now,
        };
        let response = self.dispatch(&request);
        tracing::debug!(
            command = %request.command_type,
            controller = %request.controller_id,
            status = %response.status,
            "AEM command handled"
        );

        if response.status == AemStatus::Success && response.mutated {
            let index = self.state.bump_available_index();
            tracing::info!(command = %request.command_type, available_index = index, "Entity model changed");
            self.notify(&request, &response.payload, out);
        }
        Self::send(out, &cmd.to_response(response.status, response.payload));
    }

    fn dispatch(&mut self, request: &AemCommand) -> AemResponse {
        if request.command_type.is_mutating() {
            if let Err(status) = self
                .state
                .ownership
                .check_mutable(request.controller_id, request.now)
            {
                return AemResponse::rejected(status, request);
            }
        }
        match self.handlers.get(&request.command_type) {
            Some(handler) => handler(&mut self.state, request),
            None => AemResponse::rejected(AemStatus::NotImplemented, request),
        }
    }

    /// Queue unsolicited responses to every registered controller except the requester.
    fn notify(&mut self, request: &AemCommand, payload: &Bytes, out: &mut EngineOutput) {
        for controller in self.state.unsolicited_controllers() {
            if controller == request.controller_id {
                continue;
            }
            let sequence_id = self.unsolicited_sequence;
            self.unsolicited_sequence = self.unsolicited_sequence.wrapping_add(1);
            let pdu = Aecpdu {
                message_type: AecpMessageType::AemResponse,
                status: AemStatus::Success,
                target_entity_id: self.state.entity_id(),
                controller_entity_id: controller,
                sequence_id,
                body: AecpBody::Aem {
                    unsolicited: true,
                    command_type: request.command_type,
                    payload: payload.clone(),
                },
            };
            Self::send(out, &pdu);
        }
    }

    fn send(out: &mut EngineOutput, pdu: &Aecpdu) {
        match pdu.encode() {
            Ok(frame) => out.frame(frame),
            Err(e) => {
                tracing::warn!("Failed to encode AEM response: {}", e);
                if let CodecError::PayloadTooLarge { .. } = e {
                    let fallback = Aecpdu {
                        status: AemStatus::NoResources,
                        body: match &pdu.body {
                            AecpBody::Aem {
                                unsolicited,
                                command_type,
                                ..
                            } => AecpBody::Aem {
                                unsolicited: *unsolicited,
                                command_type: *command_type,
                                payload: Bytes::new(),
                            },
                            AecpBody::Other { .. } => AecpBody::Other {
                                payload: Bytes::new(),
                            },
                        },
                        ..pdu.clone()
                    };
                    if let Ok(frame) = fallback.encode() {
                        out.frame(frame);
                    }
                }
            }
        }
    }

    fn response(&mut self, pdu: &Aecpdu, out: &mut EngineOutput) {
        let local = self.state.entity_id();
        if pdu.controller_entity_id != local {
            return;
        }
        let target = pdu.target_entity_id;
        let Some(command_type) = pdu.command_type() else {
            return;
        };
        if pdu.is_unsolicited() {
            tracing::debug!(entity_id = %target, command = %command_type, "Unsolicited notification");
            self.cache.remove(&target);
            out.event(EntityEvent::UnsolicitedNotification {
                entity_id: target,
                command_type,
                payload: pdu.payload().clone(),
            });
            return;
        }
        let matches = self
            .tracker
            .peek(target, pdu.sequence_id)
            .is_some_and(|req| req.context.command_type == command_type);
        if !matches {
            tracing::trace!(
                entity_id = %target,
                sequence_id = pdu.sequence_id,
                "Ignoring unmatched AEM response"
            );
            return;
        }
        if pdu.status == AemStatus::InProgress {
            tracing::trace!(entity_id = %target, command = %command_type, "Command in progress");
            return;
        }
        let Some(req) = self.tracker.complete(target, pdu.sequence_id) else {
            return;
        };
        let result = AemError::check(pdu.status).map(|()| pdu.payload().clone());
        if result.is_ok() {
            self.record_success(target, command_type, req.context.key, pdu.payload());
        }
        let _ = req.context.waiter.send(result);
    }

    fn record_success(
        &mut self,
        target: EntityId,
        command_type: AemCommandType,
        key: Option<DescriptorKey>,
        payload: &Bytes,
    ) {
        match command_type {
            AemCommandType::READ_DESCRIPTOR => {
                if let Some(key) = key {
                    self.cache
                        .entry(target)
                        .or_default()
                        .insert(key.normalized(), payload.clone());
                }
            }
            AemCommandType::ACQUIRE_ENTITY => {
                if let Ok(acquire) = AcquireEntity::decode(payload) {
                    if acquire.is_release() {
                        self.acquired.remove(&target);
                    } else {
                        self.acquired.insert(target, acquire.is_persistent());
                    }
                }
            }
            _ if command_type.is_mutating() => {
                if self.cache.remove(&target).is_some() {
                    tracing::trace!(entity_id = %target, command = %command_type, "Descriptor cache dropped after change");
                }
            }
            _ => {}
        }
    }

    // ===== Periodic and cascades =====

    /// Retransmit or expire commands, and drop lapsed locks.
    pub fn tick(&mut self, now: u64) -> EngineOutput {
        let mut out = EngineOutput::new();
        let sweep = self.tracker.sweep(now);
        out.frames.extend(sweep.retransmit);
        for req in sweep.expired {
            tracing::debug!(
                command = %req.context.command_type,
                target_id = %req.target,
                "AEM command timed out"
            );
            let _ = req.context.waiter.send(Err(AemError::Timeout));
        }
        if self.state.ownership.expire(now) {
            self.state.bump_available_index();
        }
        out
    }

    /// Remote `entity_id` advertised `available_index`; stale cache entries are dropped.
    pub fn observe_available_index(&mut self, entity_id: EntityId, available_index: u32) {
        let previous = self.remote_index.insert(entity_id, available_index);
        if previous.is_some_and(|p| p != available_index) {
            self.cache.remove(&entity_id);
        }
    }

    /// Remote `entity_id` rebooted: drop everything learned about it and
    /// everything it held on the local entity.
    pub fn peer_rebooted(&mut self, entity_id: EntityId) {
        self.cache.remove(&entity_id);
        if self.acquired.remove(&entity_id).is_some() {
            tracing::info!(entity_id = %entity_id, "Acquisition lost to reboot");
        }
        self.state.deregister_unsolicited(entity_id);
        if self.state.ownership.controller_reset(entity_id) {
            let index = self.state.bump_available_index();
            tracing::info!(controller = %entity_id, available_index = index, "Released rebooted controller");
        }
    }

    /// Remote `entity_id` departed: fail its commands and release what it held locally.
    pub fn peer_departed(&mut self, entity_id: EntityId) {
        for req in self.tracker.remove_target(entity_id) {
            let _ = req.context.waiter.send(Err(AemError::PeerDeparted(entity_id)));
        }
        self.cache.remove(&entity_id);
        self.remote_index.remove(&entity_id);
        self.acquired.remove(&entity_id);
        self.state.deregister_unsolicited(entity_id);
        if self.state.ownership.controller_departed(entity_id) {
            let index = self.state.bump_available_index();
            tracing::info!(controller = %entity_id, available_index = index, "Released departed controller");
        }
    }

    /// Fail every in-flight command with `Cancelled`.
    pub fn cancel_all(&mut self) {
        for req in self.tracker.drain() {
            let _ = req.context.waiter.send(Err(AemError::Cancelled));
        }
    }

    /// Commands in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}
