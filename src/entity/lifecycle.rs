//! Top-level state machine of a local AVDECC entity.

use crate::error::LifecycleError;

/// Lifecycle state of the local entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Created, nothing running
    Uninitialized,
    /// Tasks starting
    Initializing,
    /// Startup discovery request sent
    Discovering,
    /// First advertisement sent
    Advertising,
    /// Idle and serving commands
    Available,
    /// A stream connection is being established
    Connecting,
    /// At least one stream connection is up
    Connected,
    /// The last stream connection is being torn down
    Disconnecting,
    /// Unrecoverable failure; only `Reinitialize` leaves this state
    ErrorState,
    /// Terminal
    ShuttingDown,
}

impl LifecycleState {
    /// Whether the protocol engines process packets and accept commands
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Available | Self::Connecting | Self::Connected | Self::Disconnecting
        )
    }
}

/// Inputs to the lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Begin startup
    Initialize,
    /// Transport and tasks are up
    ProtocolsReady,
    /// Startup failed
    ProtocolsFailed,
    /// Startup discovery finished
    DiscoveryComplete,
    /// First advertisement sent
    AdvertisingStarted,
    /// A connect was requested with no connection up
    ConnectionRequested,
    /// Connect succeeded
    Established,
    /// Connect failed
    Failed,
    /// Disconnect of the last connection was requested
    DisconnectRequested,
    /// Disconnect finished
    Complete,
    /// Stop everything
    ShutdownRequested,
    /// Unrecoverable failure
    FatalError,
    /// Recover from `ErrorState`
    Reinitialize,
}

/// Compute the successor of `state` under `event`.
///
/// # Errors
///
/// Returns `LifecycleError::InvalidTransition` when the table has no entry.
pub fn next_state(
    state: LifecycleState,
    event: LifecycleEvent,
) -> Result<LifecycleState, LifecycleError> {
    use LifecycleEvent as E;
    use LifecycleState as S;

    let next = match (state, event) {
        (S::ShuttingDown, E::ShutdownRequested) => S::ShuttingDown,
        (S::ShuttingDown, _) => return Err(LifecycleError::InvalidTransition { state, event }),
        (_, E::ShutdownRequested) => S::ShuttingDown,
        (_, E::FatalError) => S::ErrorState,
        (S::Uninitialized, E::Initialize) => S::Initializing,
        (S::Initializing, E::ProtocolsReady) => S::Discovering,
        (S::Initializing, E::ProtocolsFailed) => S::ErrorState,
        (S::Discovering, E::DiscoveryComplete) => S::Advertising,
        (S::Advertising, E::AdvertisingStarted) => S::Available,
        (S::Available, E::ConnectionRequested) => S::Connecting,
        (S::Connecting, E::Established) => S::Connected,
        (S::Connecting, E::Failed) => S::Available,
        (S::Connected, E::DisconnectRequested) => S::Disconnecting,
        (S::Disconnecting, E::Complete) => S::Available,
        (S::ErrorState, E::Reinitialize) => S::Initializing,
        _ => return Err(LifecycleError::InvalidTransition { state, event }),
    };
    Ok(next)
}

/// One applied transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before
    pub from: LifecycleState,
    /// State after
    pub to: LifecycleState,
    /// Event applied
    pub event: LifecycleEvent,
}

/// Holder of the current lifecycle state
#[derive(Debug)]
pub struct EntityLifecycle {
    state: LifecycleState,
}

impl Default for EntityLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityLifecycle {
    /// Start in `Uninitialized`
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether engines are active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Apply `event`.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::InvalidTransition` and leaves the state unchanged
    /// when `event` is not valid in the current state.
    pub fn fire(&mut self, event: LifecycleEvent) -> Result<Transition, LifecycleError> {
        let from = self.state;
        let to = next_state(from, event)?;
        self.state = to;
        tracing::info!(?from, ?to, ?event, "Lifecycle transition");
        Ok(Transition { from, to, event })
    }

    /// A connect is about to be sent.
    pub fn connection_requested(&mut self) -> Option<Transition> {
        if self.state == LifecycleState::Available {
            self.fire(LifecycleEvent::ConnectionRequested).ok()
        } else {
            None
        }
    }

    /// A disconnect is about to be sent; `last` is true when it targets the only connection.
    pub fn disconnect_requested(&mut self, last: bool) -> Option<Transition> {
        if last && self.state == LifecycleState::Connected {
            self.fire(LifecycleEvent::DisconnectRequested).ok()
        } else {
            None
        }
    }

    /// Bring the state in line with whether any connection is up.
    ///
    /// Only fires events that are legal from the current state.
    pub fn settle(&mut self, connected: bool) -> Vec<Transition> {
        use LifecycleEvent as E;
        use LifecycleState as S;

        let path: &[LifecycleEvent] = match (self.state, connected) {
            (S::Connecting, true) => &[E::Established],
            (S::Connecting, false) => &[E::Failed],
            (S::Connected, false) => &[E::DisconnectRequested, E::Complete],
            (S::Disconnecting, false) => &[E::Complete],
            (S::Disconnecting, true) => &[E::Complete, E::ConnectionRequested, E::Established],
            (S::Available, true) => &[E::ConnectionRequested, E::Established],
            _ => &[],
        };
        path.iter().filter_map(|&e| self.fire(e).ok()).collect()
    }
}
