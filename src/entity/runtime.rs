use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::lifecycle::{EntityLifecycle, LifecycleEvent, LifecycleState, Transition};
use crate::error::{AcmpError, AemError, AvdeccError, TransportError};
use crate::net::{Clock, NetworkTransport, TokioClock};
use crate::protocol::acmp::{AcmpReceiver, Acmpdu, ConnectionEngine, StreamConnection, StreamState};
use crate::protocol::adp::{AvailableIndex, DiscoveredEntity, DiscoveryEngine};
use crate::protocol::aecp::{
    AcquireEntity, AemCommand, AemCommandType, AemHandler, AemReceiver, AemResponse,
    ConfigurationPayload, DescriptorKey, DescriptorPayload, DescriptorType, EntityDescriptor,
    EntityState, EnumerationEngine, LockEntity, acquire_flags, lock_flags,
};
use crate::protocol::{CodecError, EngineOutput, Pdu};
use crate::state::{EntityEvent, EventBus, EventFilter};
use crate::types::{AvdeccConfig, EntityId, StreamEndpoint, StreamId};

/// State shared between the public handle and its background tasks.
struct Shared {
    config: AvdeccConfig,
    entity_id: EntityId,
    transport: Arc<dyn NetworkTransport>,
    clock: Arc<dyn Clock>,
    available_index: AvailableIndex,
    lifecycle: StdMutex<EntityLifecycle>,
    adp: Mutex<DiscoveryEngine>,
    acmp: Mutex<ConnectionEngine>,
    aecp: Mutex<EnumerationEngine>,
    events: EventBus,
    /// Controller connect/disconnect calls awaiting their responses.
    connection_ops: AtomicUsize,
}

/// Holds `connection_ops` raised for the duration of a controller operation.
struct ConnectionOp<'a>(&'a AtomicUsize);

impl<'a> ConnectionOp<'a> {
    fn begin(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ConnectionOp<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Shared {
    fn now(&self) -> u64 {
        self.clock.now_ns()
    }

    fn lifecycle(&self) -> MutexGuard<'_, EntityLifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle().state()
    }

    fn active(&self) -> Result<(), LifecycleState> {
        let state = self.state();
        if state.is_active() { Ok(()) } else { Err(state) }
    }

    fn publish(&self, transitions: impl IntoIterator<Item = Transition>) {
        for t in transitions {
            self.events.emit(EntityEvent::LifecycleChanged {
                from: t.from,
                to: t.to,
            });
        }
    }

    fn fire(&self, event: LifecycleEvent) -> Result<(), AvdeccError> {
        let transition = self.lifecycle().fire(event)?;
        self.publish([transition]);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        match self.transport.send(frame).await {
            Ok(()) => {
                tracing::trace!(len = frame.len(), "Frame sent");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(len = frame.len(), "Failed to send frame: {}", e);
                Err(e)
            }
        }
    }

    /// Transmit queued frames, then publish queued events.
    async fn flush(&self, out: EngineOutput) {
        for frame in out.frames {
            // Retransmission covers lost sends for tracked commands.
            let _ = self.send(&frame).await;
        }
        for event in out.events {
            self.events.emit(event);
        }
    }

    /// Flush discovery output and propagate its consequences to the other engines.
    async fn discovery_output(&self, out: EngineOutput) {
        let cascades = out.events.clone();
        self.flush(out).await;
        for event in &cascades {
            self.cascade(event).await;
        }
    }

    async fn cascade(&self, event: &EntityEvent) {
        match event {
            EntityEvent::EntityDiscovered { entity } | EntityEvent::EntityUpdated { entity } => {
                self.aecp
                    .lock()
                    .await
                    .observe_available_index(entity.entity_id, entity.available_index);
            }
            EntityEvent::EntityRebooted { entity } => {
                let mut aecp = self.aecp.lock().await;
                aecp.peer_rebooted(entity.entity_id);
                aecp.observe_available_index(entity.entity_id, entity.available_index);
            }
            EntityEvent::EntityDeparted { entity_id, reason } => {
                tracing::debug!(entity_id = %entity_id, ?reason, "Cascading departure");
                let lost = self.acmp.lock().await.peer_departed(*entity_id);
                self.aecp.lock().await.peer_departed(*entity_id);
                self.flush(lost).await;
                self.settle().await;
            }
            _ => {}
        }
    }

    /// Align the lifecycle with the connection table once no controller call is pending.
    async fn settle(&self) {
        if self.connection_ops.load(Ordering::Acquire) > 0 {
            return;
        }
        let connected = self.acmp.lock().await.connected_count() > 0;
        let transitions = self.lifecycle().settle(connected);
        self.publish(transitions);
    }

    async fn dispatch(&self, frame: &[u8]) {
        if let Err(state) = self.active() {
            tracing::trace!(?state, len = frame.len(), "Dropping frame while inactive");
            return;
        }
        let now = self.now();
        match Pdu::decode(frame) {
            Err(error) => {
                tracing::debug!(len = frame.len(), "Dropping malformed frame: {}", error);
                self.events.emit(EntityEvent::MalformedPacket {
                    error,
                    len: frame.len(),
                });
            }
            Ok(Pdu::Adp(pdu)) => {
                let out = self.adp.lock().await.handle(&pdu, now);
                self.discovery_output(out).await;
            }
            Ok(Pdu::Acmp(pdu)) => {
                let out = self.acmp.lock().await.handle(&pdu, now);
                self.flush(out).await;
                self.settle().await;
            }
            Ok(Pdu::Aecp(pdu)) => {
                let (out, configuration) = {
                    let mut aecp = self.aecp.lock().await;
                    let out = aecp.handle(&pdu, now);
                    (out, aecp.state().current_configuration())
                };
                self.adp.lock().await.set_current_configuration(configuration);
                self.flush(out).await;
            }
        }
    }

    async fn tick(&self) {
        if self.active().is_err() {
            return;
        }
        let now = self.now();
        let out = self.adp.lock().await.tick(now);
        self.discovery_output(out).await;
        let out = self.acmp.lock().await.tick(now);
        let expired = !out.events.is_empty();
        self.flush(out).await;
        if expired {
            self.settle().await;
        }
        let out = self.aecp.lock().await.tick(now);
        self.flush(out).await;
    }

    async fn cancel_all(&self) {
        self.acmp.lock().await.cancel_all();
        self.aecp.lock().await.cancel_all();
    }

    /// The transport went away underneath a running entity.
    async fn fatal(&self) {
        if let Err(e) = self.fire(LifecycleEvent::FatalError) {
            tracing::debug!("Ignoring transport loss: {}", e);
            return;
        }
        // Nothing can be sent, so the departing frame is discarded.
        let _ = self.adp.lock().await.stop_advertising();
        self.cancel_all().await;
    }

    async fn await_acmp(&self, frame: Bytes, rx: AcmpReceiver) -> Result<Acmpdu, AcmpError> {
        if let Err(e) = self.send(&frame).await {
            self.acmp.lock().await.abandon(&frame, AcmpError::Transport(e));
        }
        rx.await.unwrap_or(Err(AcmpError::Cancelled))
    }

    async fn acmp_request<F>(&self, issue: F) -> Result<Acmpdu, AcmpError>
    where
        F: FnOnce(&mut ConnectionEngine, u64) -> Result<(Bytes, AcmpReceiver), AcmpError>,
    {
        self.active().map_err(AcmpError::Inactive)?;
        let now = self.now();
        let (frame, rx) = issue(&mut *self.acmp.lock().await, now)?;
        self.await_acmp(frame, rx).await
    }

    async fn aem_request<F>(&self, issue: F) -> Result<Bytes, AemError>
    where
        F: FnOnce(&mut EnumerationEngine, u64) -> Result<(Bytes, AemReceiver), AemError>,
    {
        self.active().map_err(AemError::Inactive)?;
        let now = self.now();
        let (frame, rx) = issue(&mut *self.aecp.lock().await, now)?;
        if let Err(e) = self.send(&frame).await {
            self.aecp.lock().await.abandon(&frame, AemError::Transport(e));
        }
        rx.await.unwrap_or(Err(AemError::Cancelled))
    }
}

async fn receive_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!(entity_id = %shared.entity_id, "Receive task started");
    loop {
        tokio::select! {
            result = shared.transport.recv() => match result {
                Ok(frame) => shared.dispatch(&frame).await,
                Err(TransportError::Closed) => {
                    tracing::warn!(entity_id = %shared.entity_id, "Transport closed");
                    shared.fatal().await;
                    break;
                }
                Err(e) => tracing::warn!("Receive failed: {}", e),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!(entity_id = %shared.entity_id, "Receive task stopped");
}

async fn tick_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(shared.config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => shared.tick().await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// A local AVDECC entity bound to one network interface.
///
/// The entity advertises itself, answers ADP, ACMP and AECP traffic and acts
/// as a controller for remote entities. Two background tasks run once
/// [`start`](Self::start) succeeds: one feeds received frames to the
/// engines, the other drives advertisements and command timeouts every
/// `tick_interval`.
///
/// # Example
///
/// ```no_run
/// # async fn example(transport: std::sync::Arc<dyn avdecc::net::NetworkTransport>) -> Result<(), avdecc::AvdeccError> {
/// use avdecc::{AvdeccConfig, AvdeccEntity};
///
/// let entity = AvdeccEntity::new(AvdeccConfig::default(), transport)?;
/// entity.start().await?;
/// entity.discover_all().await?;
/// for remote in entity.discovered_entities().await {
///     println!("{}", remote.entity_id);
/// }
/// entity.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct AvdeccEntity {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl AvdeccEntity {
    /// Create an entity timed by the tokio clock.
    ///
    /// # Errors
    ///
    /// Returns `AvdeccError::Config` if `config` fails validation.
    pub fn new(
        config: AvdeccConfig,
        transport: Arc<dyn NetworkTransport>,
    ) -> Result<Self, AvdeccError> {
        Self::with_clock(config, transport, Arc::new(TokioClock::new()))
    }

    /// Create an entity with an explicit clock.
    ///
    /// When `config.entity_id` is unset the id is derived from the
    /// transport's MAC address.
    ///
    /// # Errors
    ///
    /// Returns `AvdeccError::Config` if `config` fails validation.
    pub fn with_clock(
        config: AvdeccConfig,
        transport: Arc<dyn NetworkTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AvdeccError> {
        config.validate()?;
        let local_mac = transport.local_mac();
        let entity_id = if config.entity_id.is_none() {
            EntityId::from_mac(local_mac)
        } else {
            config.entity_id
        };
        let available_index = AvailableIndex::new(0);
        let shared = Shared {
            adp: Mutex::new(DiscoveryEngine::new(&config, entity_id, available_index.clone())),
            acmp: Mutex::new(ConnectionEngine::new(&config, entity_id, local_mac)),
            aecp: Mutex::new(EnumerationEngine::new(
                &config,
                entity_id,
                available_index.clone(),
            )),
            events: EventBus::new(config.event_capacity),
            lifecycle: StdMutex::new(EntityLifecycle::new()),
            connection_ops: AtomicUsize::new(0),
            available_index,
            entity_id,
            transport,
            clock,
            config,
        };
        tracing::info!(entity_id = %entity_id, mac = %local_mac, "AVDECC entity created");
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(shared),
            shutdown,
            tasks: StdMutex::new(Vec::new()),
        })
    }

    // ===== Lifecycle =====

    /// Bring the entity up: discovery request, first advertisement, background tasks.
    ///
    /// # Errors
    ///
    /// `Lifecycle` if the entity was already started, `Transport` if the
    /// startup frames could not be sent. A failed start leaves the entity
    /// in `ErrorState`, from which [`reinitialize`](Self::reinitialize) retries.
    pub async fn start(&self) -> Result<(), AvdeccError> {
        self.shared.fire(LifecycleEvent::Initialize)?;
        self.bring_up().await
    }

    /// Restart after a failure.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start); the entity must be in `ErrorState`.
    pub async fn reinitialize(&self) -> Result<(), AvdeccError> {
        self.shared.fire(LifecycleEvent::Reinitialize)?;
        self.bring_up().await
    }

    async fn bring_up(&self) -> Result<(), AvdeccError> {
        let shared = &self.shared;
        let request = shared.adp.lock().await.discover(EntityId::NONE);
        let sent = match request {
            Ok(frame) => shared.send(&frame).await.map_err(AvdeccError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            shared.fire(LifecycleEvent::ProtocolsFailed)?;
            return Err(e);
        }
        shared.fire(LifecycleEvent::ProtocolsReady)?;
        shared.fire(LifecycleEvent::DiscoveryComplete)?;

        let advertisement = shared.adp.lock().await.advertise(shared.now());
        let sent = match advertisement {
            Ok(frame) => shared.send(&frame).await.map_err(AvdeccError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = sent {
            let _ = shared.adp.lock().await.stop_advertising();
            shared.fire(LifecycleEvent::FatalError)?;
            return Err(e);
        }
        shared.fire(LifecycleEvent::AdvertisingStarted)?;
        self.spawn_tasks();
        Ok(())
    }

    fn spawn_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() && tasks.iter().all(|t| !t.is_finished()) {
            return;
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        tasks.push(tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(tick_loop(
            Arc::clone(&self.shared),
            self.shutdown.subscribe(),
        )));
    }

    /// Announce departure, cancel outstanding commands and stop the background tasks.
    ///
    /// Calling it again once shut down does nothing.
    ///
    /// # Errors
    ///
    /// `Transport` if the ENTITY_DEPARTING frame could not be sent. The
    /// entity is shut down either way.
    pub async fn shutdown(&self) -> Result<(), AvdeccError> {
        if self.shared.state() == LifecycleState::ShuttingDown {
            return Ok(());
        }
        self.shared.fire(LifecycleEvent::ShutdownRequested)?;
        let departing = self.shared.adp.lock().await.stop_advertising();
        let sent = match departing {
            Ok(Some(frame)) => self.shared.send(&frame).await.map_err(AvdeccError::from),
            Ok(None) => Ok(()),
            Err(e) => Err(e.into()),
        };
        self.shared.cancel_all().await;
        let _ = self.shutdown.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Background task failed: {}", e);
            }
        }
        tracing::info!(entity_id = %self.shared.entity_id, "AVDECC entity shut down");
        sent
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    /// Local entity id.
    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        self.shared.entity_id
    }

    /// Configuration the entity was created with.
    #[must_use]
    pub fn config(&self) -> &AvdeccConfig {
        &self.shared.config
    }

    /// Current `available_index` of the local entity.
    #[must_use]
    pub fn available_index(&self) -> u32 {
        self.shared.available_index.get()
    }

    // ===== Discovery =====

    /// Send ENTITY_AVAILABLE now and keep advertising periodically.
    ///
    /// # Errors
    ///
    /// `Inactive` outside the active states, `Transport` if the send fails.
    pub async fn advertise(&self) -> Result<(), AvdeccError> {
        self.shared.active().map_err(AvdeccError::Inactive)?;
        let frame = self.shared.adp.lock().await.advertise(self.shared.now())?;
        self.shared.send(&frame).await?;
        Ok(())
    }

    /// Send ENTITY_DEPARTING and stop periodic advertisements.
    ///
    /// # Errors
    ///
    /// `Transport` if the send fails.
    pub async fn stop_advertising(&self) -> Result<(), AvdeccError> {
        let departing = self.shared.adp.lock().await.stop_advertising()?;
        if let Some(frame) = departing {
            self.shared.send(&frame).await?;
        }
        Ok(())
    }

    /// Ask every entity on the network to advertise.
    ///
    /// # Errors
    ///
    /// `Inactive` outside the active states, `Transport` if the send fails.
    pub async fn discover_all(&self) -> Result<(), AvdeccError> {
        self.discover(EntityId::NONE).await
    }

    /// Ask `target` to advertise.
    ///
    /// # Errors
    ///
    /// Same as [`discover_all`](Self::discover_all).
    pub async fn discover(&self, target: EntityId) -> Result<(), AvdeccError> {
        self.shared.active().map_err(AvdeccError::Inactive)?;
        let frame = self.shared.adp.lock().await.discover(target)?;
        self.shared.send(&frame).await?;
        Ok(())
    }

    /// Every remote entity currently known.
    pub async fn discovered_entities(&self) -> Vec<DiscoveredEntity> {
        self.shared.adp.lock().await.entities()
    }

    /// Record for one remote entity.
    pub async fn discovered_entity(&self, entity_id: EntityId) -> Option<DiscoveredEntity> {
        self.shared.adp.lock().await.entity(entity_id).cloned()
    }

    // ===== Connection management =====

    /// Connect `talker` to `listener` and return the resulting connection.
    ///
    /// # Errors
    ///
    /// The listener's or talker's failure status, `Timeout` after every
    /// retry went unanswered, `Inactive` outside the active states.
    pub async fn connect(
        &self,
        talker: StreamEndpoint,
        listener: StreamEndpoint,
    ) -> Result<StreamConnection, AcmpError> {
        self.shared.active().map_err(AcmpError::Inactive)?;
        let op = ConnectionOp::begin(&self.shared.connection_ops);
        let transition = self.shared.lifecycle().connection_requested();
        self.shared.publish(transition);

        let result = match self
            .shared
            .acmp_request(|acmp, now| acmp.connect(talker, listener, now))
            .await
        {
            Ok(_) => self
                .shared
                .acmp
                .lock()
                .await
                .connection(listener)
                .cloned()
                .ok_or(AcmpError::NotConnected),
            Err(e) => Err(e),
        };
        drop(op);
        self.shared.settle().await;
        result
    }

    /// Connect `talker` to `listener` and return the stream id carried by the connection.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_stream(
        &self,
        talker: StreamEndpoint,
        listener: StreamEndpoint,
    ) -> Result<StreamId, AcmpError> {
        self.connect(talker, listener).await.map(|c| c.stream_id)
    }

    /// Disconnect every listener receiving `stream_id`.
    ///
    /// # Errors
    ///
    /// `NotConnected` if no connection carries the id, otherwise the first
    /// failure among the listeners.
    pub async fn disconnect_stream(&self, stream_id: StreamId) -> Result<(), AcmpError> {
        self.shared.active().map_err(AcmpError::Inactive)?;
        let op = ConnectionOp::begin(&self.shared.connection_ops);
        let now = self.shared.now();
        let (issued, last) = {
            let mut acmp = self.shared.acmp.lock().await;
            let last = acmp.connected_count() <= acmp.connections_with_stream(stream_id);
            (acmp.disconnect(stream_id, now)?, last)
        };
        let transition = self.shared.lifecycle().disconnect_requested(last);
        self.shared.publish(transition);

        let mut waiting = Vec::with_capacity(issued.len());
        for (frame, rx) in issued {
            if let Err(e) = self.shared.send(&frame).await {
                self.shared
                    .acmp
                    .lock()
                    .await
                    .abandon(&frame, AcmpError::Transport(e));
            }
            waiting.push(rx);
        }
        let mut result = Ok(());
        for rx in waiting {
            if let Err(e) = rx.await.unwrap_or(Err(AcmpError::Cancelled)) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        drop(op);
        self.shared.settle().await;
        result
    }

    /// Query a talker source.
    ///
    /// # Errors
    ///
    /// The talker's failure status or `Timeout`.
    pub async fn get_tx_state(&self, talker: StreamEndpoint) -> Result<StreamState, AcmpError> {
        let rsp = self
            .shared
            .acmp_request(|acmp, now| acmp.get_tx_state(talker, now))
            .await?;
        Ok(StreamState::from(&rsp))
    }

    /// Query a listener sink.
    ///
    /// # Errors
    ///
    /// The listener's failure status or `Timeout`.
    pub async fn get_rx_state(&self, listener: StreamEndpoint) -> Result<StreamState, AcmpError> {
        let rsp = self
            .shared
            .acmp_request(|acmp, now| acmp.get_rx_state(listener, now))
            .await?;
        Ok(StreamState::from(&rsp))
    }

    /// Query connection `index` of a talker source.
    ///
    /// # Errors
    ///
    /// The talker's failure status or `Timeout`.
    pub async fn get_tx_connection(
        &self,
        talker: StreamEndpoint,
        index: u16,
    ) -> Result<StreamState, AcmpError> {
        let rsp = self
            .shared
            .acmp_request(|acmp, now| acmp.get_tx_connection(talker, index, now))
            .await?;
        Ok(StreamState::from(&rsp))
    }

    /// Connections this controller has set up.
    pub async fn connections(&self) -> Vec<StreamConnection> {
        self.shared.acmp.lock().await.connections()
    }

    // ===== Enumeration and control =====

    /// Send any AEM command and return the success response payload.
    ///
    /// # Errors
    ///
    /// `Status` for a failure response, `Timeout` after every retry went
    /// unanswered, `PeerDeparted` if `target` left meanwhile.
    pub async fn send_aem_command(
        &self,
        target: EntityId,
        command_type: AemCommandType,
        payload: Bytes,
    ) -> Result<Bytes, AemError> {
        self.shared
            .aem_request(|aecp, now| aecp.command(target, command_type, payload, now))
            .await
    }

    /// Acquire `target` for this controller. Acquiring an entity already held succeeds.
    ///
    /// # Errors
    ///
    /// `Status(EntityAcquired)` if another controller holds it.
    pub async fn acquire_entity(&self, target: EntityId) -> Result<(), AemError> {
        self.acquire_entity_with(target, 0).await.map(|_| ())
    }

    /// ACQUIRE_ENTITY with explicit flags; returns the echoed payload.
    ///
    /// # Errors
    ///
    /// Same as [`acquire_entity`](Self::acquire_entity).
    pub async fn acquire_entity_with(
        &self,
        target: EntityId,
        flags: u32,
    ) -> Result<AcquireEntity, AemError> {
        let payload = AcquireEntity::entity(flags).encode();
        let rsp = self
            .send_aem_command(target, AemCommandType::ACQUIRE_ENTITY, payload)
            .await?;
        Ok(AcquireEntity::decode(&rsp)?)
    }

    /// Release an entity acquired by this controller.
    ///
    /// # Errors
    ///
    /// `Status(EntityAcquired)` if another controller holds it.
    pub async fn release_entity(&self, target: EntityId) -> Result<(), AemError> {
        self.acquire_entity_with(target, acquire_flags::RELEASE)
            .await
            .map(|_| ())
    }

    /// Lock `target` for this controller.
    ///
    /// # Errors
    ///
    /// `Status(EntityLocked)` if another controller holds the lock.
    pub async fn lock_entity(&self, target: EntityId) -> Result<(), AemError> {
        self.lock_with(target, 0).await
    }

    /// Release a lock held by this controller.
    ///
    /// # Errors
    ///
    /// `Status(EntityLocked)` if another controller holds the lock.
    pub async fn unlock_entity(&self, target: EntityId) -> Result<(), AemError> {
        self.lock_with(target, lock_flags::UNLOCK).await
    }

    async fn lock_with(&self, target: EntityId, flags: u32) -> Result<(), AemError> {
        let payload = LockEntity::entity(flags).encode();
        self.send_aem_command(target, AemCommandType::LOCK_ENTITY, payload)
            .await
            .map(|_| ())
    }

    /// Read descriptor `descriptor_type`/`descriptor_index` of configuration 0.
    ///
    /// Returns the descriptor bytes, starting at `descriptor_type`. Cached
    /// until `target` changes its `available_index` or reboots.
    ///
    /// # Errors
    ///
    /// `Status(NoSuchDescriptor)` if the target has no such descriptor.
    pub async fn read_descriptor(
        &self,
        target: EntityId,
        descriptor_type: DescriptorType,
        descriptor_index: u16,
    ) -> Result<Bytes, AemError> {
        self.read_descriptor_at(target, DescriptorKey::new(0, descriptor_type, descriptor_index))
            .await
    }

    /// Read the descriptor at `key`.
    ///
    /// # Errors
    ///
    /// Same as [`read_descriptor`](Self::read_descriptor).
    pub async fn read_descriptor_at(
        &self,
        target: EntityId,
        key: DescriptorKey,
    ) -> Result<Bytes, AemError> {
        self.shared.active().map_err(AemError::Inactive)?;
        let cached = self.shared.aecp.lock().await.cached_descriptor(target, &key);
        let payload = match cached {
            Some(payload) => {
                tracing::trace!(target_id = %target, ?key, "Descriptor served from cache");
                payload
            }
            None => {
                self.shared
                    .aem_request(|aecp, now| aecp.read_descriptor(target, key, now))
                    .await?
            }
        };
        Ok(DescriptorPayload::decode(&payload)?.descriptor())
    }

    /// Read and decode `target`'s ENTITY descriptor.
    ///
    /// # Errors
    ///
    /// Same as [`read_descriptor`](Self::read_descriptor), or `Malformed`
    /// if the descriptor is truncated.
    pub async fn read_entity_descriptor(&self, target: EntityId) -> Result<EntityDescriptor, AemError> {
        let bytes = self.read_descriptor(target, DescriptorType::ENTITY, 0).await?;
        Ok(EntityDescriptor::decode(&bytes)?)
    }

    /// Overwrite a writable descriptor body on `target`.
    ///
    /// # Errors
    ///
    /// `Status(NotSupported)` for read-only descriptors.
    pub async fn write_descriptor(
        &self,
        target: EntityId,
        key: DescriptorKey,
        body: Bytes,
    ) -> Result<(), AemError> {
        let payload = DescriptorPayload { key, body }.encode();
        self.send_aem_command(target, AemCommandType::WRITE_DESCRIPTOR, payload)
            .await
            .map(|_| ())
    }

    /// Active configuration of `target`.
    ///
    /// # Errors
    ///
    /// `Status` or `Timeout` as for any AEM command.
    pub async fn get_configuration(&self, target: EntityId) -> Result<u16, AemError> {
        let rsp = self
            .send_aem_command(target, AemCommandType::GET_CONFIGURATION, Bytes::new())
            .await?;
        Ok(ConfigurationPayload::decode(&rsp)?.configuration_index)
    }

    /// Switch `target` to configuration `index`; returns the now-active index.
    ///
    /// # Errors
    ///
    /// `Status(NoSuchDescriptor)` for an unknown configuration,
    /// `Status(EntityAcquired)` if another controller holds the target.
    pub async fn set_configuration(&self, target: EntityId, index: u16) -> Result<u16, AemError> {
        let payload = ConfigurationPayload {
            configuration_index: index,
        }
        .encode();
        let rsp = self
            .send_aem_command(target, AemCommandType::SET_CONFIGURATION, payload)
            .await?;
        Ok(ConfigurationPayload::decode(&rsp)?.configuration_index)
    }

    /// Ask `target` to send unsolicited notifications to this controller.
    ///
    /// # Errors
    ///
    /// `Status` or `Timeout` as for any AEM command.
    pub async fn register_unsolicited(&self, target: EntityId) -> Result<(), AemError> {
        self.send_aem_command(
            target,
            AemCommandType::REGISTER_UNSOLICITED_NOTIFICATION,
            Bytes::new(),
        )
        .await
        .map(|_| ())
    }

    /// Stop unsolicited notifications from `target`.
    ///
    /// # Errors
    ///
    /// `Status` or `Timeout` as for any AEM command.
    pub async fn deregister_unsolicited(&self, target: EntityId) -> Result<(), AemError> {
        self.send_aem_command(
            target,
            AemCommandType::DEREGISTER_UNSOLICITED_NOTIFICATION,
            Bytes::new(),
        )
        .await
        .map(|_| ())
    }

    // ===== Local entity model =====

    /// Install or replace the handler for inbound `command_type` commands.
    pub async fn register_handler<F>(
        &self,
        command_type: AemCommandType,
        handler: F,
    ) -> Option<AemHandler>
    where
        F: Fn(&mut EntityState, &AemCommand) -> AemResponse + Send + Sync + 'static,
    {
        self.shared
            .aecp
            .lock()
            .await
            .register_handler(command_type, handler)
    }

    /// Add or replace a descriptor in the local model.
    ///
    /// # Errors
    ///
    /// `PayloadTooLarge` if the body cannot fit a READ_DESCRIPTOR response.
    pub async fn set_descriptor(
        &self,
        key: DescriptorKey,
        body: Bytes,
        writable: bool,
    ) -> Result<(), CodecError> {
        self.shared
            .aecp
            .lock()
            .await
            .state_mut()
            .set_descriptor(key, body, writable)
    }

    /// Declare configuration `index` in the local model.
    pub async fn register_configuration(&self, index: u16) {
        self.shared
            .aecp
            .lock()
            .await
            .state_mut()
            .register_configuration(index);
    }

    // ===== Events =====

    /// Stream of every event from now on.
    pub fn events(&self) -> impl Stream<Item = EntityEvent> + Send + use<> {
        EventFilter::all(&self.shared.events).into_stream()
    }

    /// Raw broadcast receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.shared.events.subscribe()
    }

    /// Event bus, for building filtered subscriptions.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.shared.events
    }
}

impl std::fmt::Debug for AvdeccEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvdeccEntity")
            .field("entity_id", &self.shared.entity_id)
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}
