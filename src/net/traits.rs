//! Collaborator traits consumed by the entity runtime

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;
use crate::types::MacAddress;

/// Link carrying AVDECC PDUs to and from the AVDECC multicast group
#[async_trait]
pub trait NetworkTransport: Send + Sync {
    /// Transmit one PDU.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the frame could not be handed to the link.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next inbound PDU.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` once the link will deliver nothing more.
    async fn recv(&self) -> Result<Bytes, TransportError>;

    /// MAC address of the local interface.
    fn local_mac(&self) -> MacAddress;
}

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary fixed origin. Never decreases.
    fn now_ns(&self) -> u64;

    /// Whether the clock is slaved to a gPTP grandmaster.
    fn is_synchronized(&self) -> bool {
        false
    }
}
