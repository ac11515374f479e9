//! Network and clock collaborators
//!
//! The entity runtime never touches sockets itself. It consumes a
//! [`NetworkTransport`] that carries AVTP control payloads (the transport
//! adds Ethernet framing, EtherType `0x22F0` and the AVDECC multicast
//! destination) and a [`Clock`] for its timers.

mod tokio_impl;
mod traits;


pub use tokio_impl::TokioClock;
pub use traits::{Clock, NetworkTransport};

/// Largest AVTP control payload carried in one Ethernet frame.
pub const MAX_FRAME_PAYLOAD: usize = 1500;
