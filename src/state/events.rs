//! Event bus for entity events

use bytes::Bytes;
use futures::Stream;
use tokio::sync::broadcast;

use crate::entity::LifecycleState;
use crate::protocol::acmp::StreamConnection;
use crate::protocol::adp::DiscoveredEntity;
use crate::protocol::aecp::AemCommandType;
use crate::protocol::codec::CodecError;
use crate::types::EntityId;

/// Why a remote entity left the discovered table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartureReason {
    /// It sent ENTITY_DEPARTING
    Departing,
    /// No advertisement within `valid_time`
    TimedOut,
}

/// Why a stream connection went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLossReason {
    /// Disconnected on request
    Disconnected,
    /// Talker or listener departed
    PeerDeparted(EntityId),
}

/// Entity events
#[derive(Debug, Clone)]
pub enum EntityEvent {
    // Discovery events
    /// A new entity was discovered
    EntityDiscovered {
        /// The discovered entity
        entity: DiscoveredEntity,
    },
    /// A known entity advertised changed state
    EntityUpdated {
        /// Latest record
        entity: DiscoveredEntity,
    },
    /// A known entity's `available_index` went backwards
    EntityRebooted {
        /// Latest record
        entity: DiscoveredEntity,
    },
    /// An entity left
    EntityDeparted {
        /// Id of the departed entity
        entity_id: EntityId,
        /// How it was noticed
        reason: DepartureReason,
    },

    // Connection events
    /// A stream connection made by this controller is up
    ConnectionEstablished {
        /// The connection
        connection: StreamConnection,
    },
    /// A stream connection went away
    ConnectionLost {
        /// The connection as last known
        connection: StreamConnection,
        /// Why
        reason: ConnectionLossReason,
    },

    // Control events
    /// An entity sent an unsolicited AEM response
    UnsolicitedNotification {
        /// Sender
        entity_id: EntityId,
        /// Command that changed its state
        command_type: AemCommandType,
        /// Command specific payload
        payload: Bytes,
    },

    // Local events
    /// The local lifecycle state changed
    LifecycleChanged {
        /// Old state
        from: LifecycleState,
        /// New state
        to: LifecycleState,
    },
    /// An inbound frame failed to decode and was dropped
    MalformedPacket {
        /// Decode failure
        error: CodecError,
        /// Frame length
        len: usize,
    },
}

/// Event bus for distributing events
#[derive(Debug, Clone)]
pub struct EventBus {
    /// Broadcast sender
    tx: broadcast::Sender<EntityEvent>,
}

impl EventBus {
    /// Create a new event bus holding up to `capacity` undelivered events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    pub fn emit(&self, event: EntityEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    /// Get subscriber count
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Event filter for selective subscription
pub struct EventFilter {
    rx: broadcast::Receiver<EntityEvent>,
    filter: Box<dyn Fn(&EntityEvent) -> bool + Send>,
}

impl EventFilter {
    /// Create a filtered event receiver
    pub fn new<F>(bus: &EventBus, filter: F) -> Self
    where
        F: Fn(&EntityEvent) -> bool + Send + 'static,
    {
        Self {
            rx: bus.subscribe(),
            filter: Box::new(filter),
        }
    }

    /// Receive next matching event
    pub async fn recv(&mut self) -> Option<EntityEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if (self.filter)(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Turn into a `Stream` of matching events
    pub fn into_stream(self) -> impl Stream<Item = EntityEvent> + Send {
        futures::stream::unfold(self, |mut filter| async move {
            filter.recv().await.map(|event| (event, filter))
        })
    }
}

/// Helper functions for common filters
impl EventFilter {
    /// Every event
    #[must_use]
    pub fn all(bus: &EventBus) -> Self {
        Self::new(bus, |_| true)
    }

    /// Filter for discovery events only
    #[must_use]
    pub fn discovery_events(bus: &EventBus) -> Self {
        Self::new(bus, |e| {
            matches!(
                e,
                EntityEvent::EntityDiscovered { .. }
                    | EntityEvent::EntityUpdated { .. }
                    | EntityEvent::EntityRebooted { .. }
                    | EntityEvent::EntityDeparted { .. }
            )
        })
    }

    /// Filter for connection events only
    #[must_use]
    pub fn connection_events(bus: &EventBus) -> Self {
        Self::new(bus, |e| {
            matches!(
                e,
                EntityEvent::ConnectionEstablished { .. } | EntityEvent::ConnectionLost { .. }
            )
        })
    }

    /// Filter for lifecycle events only
    #[must_use]
    pub fn lifecycle_events(bus: &EventBus) -> Self {
        Self::new(bus, |e| matches!(e, EntityEvent::LifecycleChanged { .. }))
    }
}
