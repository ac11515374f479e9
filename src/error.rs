use thiserror::Error;

use crate::entity::{LifecycleEvent, LifecycleState};
use crate::protocol::acmp::AcmpStatus;
use crate::protocol::aecp::AemStatus;
use crate::protocol::codec::CodecError;

/// Failures reported by the `NetworkTransport` collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport was closed and will not deliver further frames
    #[error("transport closed")]
    Closed,

    /// Frame exceeds what the link can carry
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// Attempted length
        len: usize,
        /// Link limit
        max: usize,
    },

    /// Underlying I/O failure
    #[error("transport I/O error: {message}")]
    Io {
        /// Description of the failure
        message: String,
    },
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

/// The in-flight window of a `SequenceTracker` is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// No sequence id can be allocated without colliding with a pending request
    #[error("sequence id space exhausted ({in_flight} requests in flight)")]
    Exhausted {
        /// Requests currently pending
        in_flight: usize,
    },
}

/// Outcome of an ACMP operation that did not succeed
///
/// Each wire status except `SUCCESS` has its own variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcmpError {
    /// Listener does not have the addressed sink
    #[error("listener unknown id")]
    ListenerUnknownId,
    /// Talker does not have the addressed source
    #[error("talker unknown id")]
    TalkerUnknownId,
    /// Talker could not allocate a destination MAC
    #[error("talker destination MAC allocation failed")]
    TalkerDestMacFail,
    /// Talker has no free stream index
    #[error("talker has no stream index")]
    TalkerNoStreamIndex,
    /// Talker has no bandwidth for the stream
    #[error("talker has no bandwidth")]
    TalkerNoBandwidth,
    /// Talker source is already exclusively connected
    #[error("talker exclusive")]
    TalkerExclusive,
    /// Listener timed out waiting for the talker
    #[error("listener timed out waiting for talker")]
    ListenerTalkerTimeout,
    /// Listener sink is already exclusively connected
    #[error("listener exclusive")]
    ListenerExclusive,
    /// State is temporarily unavailable
    #[error("state unavailable")]
    StateUnavailable,
    /// The stream is not connected
    #[error("not connected")]
    NotConnected,
    /// No connection at the requested index
    #[error("no such connection")]
    NoSuchConnection,
    /// The responder could not send a message
    #[error("could not send message")]
    CouldNotSendMessage,
    /// Talker misbehaving
    #[error("talker misbehaving")]
    TalkerMisbehaving,
    /// Listener misbehaving
    #[error("listener misbehaving")]
    ListenerMisbehaving,
    /// Controller is not authorized
    #[error("controller not authorized")]
    ControllerNotAuthorized,
    /// Request is incompatible with current state
    #[error("incompatible request")]
    IncompatibleRequest,
    /// Command not supported
    #[error("not supported")]
    NotSupported,
    /// Status value not defined by the standard
    #[error("unknown ACMP status 0x{0:02X}")]
    UnknownStatus(u8),

    /// No response after all retransmissions
    #[error("ACMP command timed out")]
    Timeout,
    /// Peer sent ENTITY_DEPARTING while the request was pending
    #[error("peer {0} departed")]
    PeerDeparted(crate::types::EntityId),
    /// Sending failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The entity is not in a state where it accepts commands
    #[error("entity inactive in state {0:?}")]
    Inactive(LifecycleState),
    /// In-flight window full
    #[error("{0}")]
    Exhausted(#[from] SequenceError),
    /// Command could not be encoded
    #[error("malformed command: {0}")]
    Malformed(#[from] CodecError),
    /// The completion was dropped before a result arrived
    #[error("request cancelled")]
    Cancelled,
}

impl AcmpError {
    /// Map a wire status to `Ok` for `SUCCESS` and the matching variant otherwise.
    ///
    /// # Errors
    ///
    /// Returns the variant named after the status for every non-success value.
    pub fn check(status: AcmpStatus) -> std::result::Result<(), Self> {
        let err = match status {
            AcmpStatus::Success => return Ok(()),
            AcmpStatus::ListenerUnknownId => Self::ListenerUnknownId,
            AcmpStatus::TalkerUnknownId => Self::TalkerUnknownId,
            AcmpStatus::TalkerDestMacFail => Self::TalkerDestMacFail,
            AcmpStatus::TalkerNoStreamIndex => Self::TalkerNoStreamIndex,
            AcmpStatus::TalkerNoBandwidth => Self::TalkerNoBandwidth,
            AcmpStatus::TalkerExclusive => Self::TalkerExclusive,
            AcmpStatus::ListenerTalkerTimeout => Self::ListenerTalkerTimeout,
            AcmpStatus::ListenerExclusive => Self::ListenerExclusive,
            AcmpStatus::StateUnavailable => Self::StateUnavailable,
            AcmpStatus::NotConnected => Self::NotConnected,
            AcmpStatus::NoSuchConnection => Self::NoSuchConnection,
            AcmpStatus::CouldNotSendMessage => Self::CouldNotSendMessage,
            AcmpStatus::TalkerMisbehaving => Self::TalkerMisbehaving,
            AcmpStatus::ListenerMisbehaving => Self::ListenerMisbehaving,
            AcmpStatus::ControllerNotAuthorized => Self::ControllerNotAuthorized,
            AcmpStatus::IncompatibleRequest => Self::IncompatibleRequest,
            AcmpStatus::NotSupported => Self::NotSupported,
            AcmpStatus::Other(raw) => Self::UnknownStatus(raw),
        };
        Err(err)
    }

    /// Whether this is a standard-defined negative response rather than a local failure
    #[must_use]
    pub fn is_protocol_status(&self) -> bool {
        !matches!(
            self,
            Self::Timeout
                | Self::PeerDeparted(_)
                | Self::Transport(_)
                | Self::Inactive(_)
                | Self::Exhausted(_)
                | Self::Malformed(_)
                | Self::Cancelled
        )
    }
}

/// Outcome of an AECP operation that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AemError {
    /// The target answered with a non-success AEM status
    #[error("AEM status: {0}")]
    Status(AemStatus),
    /// No response after all retransmissions
    #[error("AECP command timed out")]
    Timeout,
    /// Target sent ENTITY_DEPARTING while the request was pending
    #[error("peer {0} departed")]
    PeerDeparted(crate::types::EntityId),
    /// Sending failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The entity is not in a state where it accepts commands
    #[error("entity inactive in state {0:?}")]
    Inactive(LifecycleState),
    /// In-flight window full
    #[error("{0}")]
    Exhausted(#[from] SequenceError),
    /// Response payload could not be interpreted
    #[error("malformed response: {0}")]
    Malformed(#[from] CodecError),
    /// The completion was dropped before a result arrived
    #[error("request cancelled")]
    Cancelled,
}

impl AemError {
    /// Map a wire status to `Ok` for `SUCCESS`.
    ///
    /// # Errors
    ///
    /// Returns `AemError::Status` for every non-success value.
    pub fn check(status: AemStatus) -> std::result::Result<(), Self> {
        if status == AemStatus::Success {
            Ok(())
        } else {
            Err(Self::Status(status))
        }
    }

    /// The AEM status carried by this error, if it came from the peer
    #[must_use]
    pub fn status(&self) -> Option<AemStatus> {
        match self {
            Self::Status(s) => Some(*s),
            _ => None,
        }
    }
}

/// Rejected lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// Event not valid in the current state
    #[error("invalid lifecycle transition: {event:?} in state {state:?}")]
    InvalidTransition {
        /// Current state
        state: LifecycleState,
        /// Rejected event
        event: LifecycleEvent,
    },
}

/// Errors that can occur during AVDECC operations
#[derive(Debug, Error)]
pub enum AvdeccError {
    /// Wire encoding or decoding failed
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport collaborator failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Connection management failed
    #[error("ACMP error: {0}")]
    Acmp(#[from] AcmpError),

    /// Enumeration and control failed
    #[error("AECP error: {0}")]
    Aem(#[from] AemError),

    /// In-flight window full
    #[error("{0}")]
    Sequence(#[from] SequenceError),

    /// Lifecycle event not valid in the current state
    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    /// The entity is not in a state where it accepts commands
    #[error("entity inactive in state {0:?}")]
    Inactive(LifecycleState),

    /// Configuration is invalid
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },
}

impl AvdeccError {
    /// Check if this error is recoverable by retrying
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Acmp(AcmpError::Timeout | AcmpError::Exhausted(_))
                | Self::Aem(AemError::Timeout | AemError::Exhausted(_))
                | Self::Sequence(_)
                | Self::Codec(_)
        )
    }
}

/// Result type alias for AVDECC operations
pub type Result<T> = std::result::Result<T, AvdeccError>;
