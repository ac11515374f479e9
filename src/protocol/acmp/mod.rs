//! AVDECC Connection Management Protocol (IEEE 1722.1 Clause 8).
//!
//! A controller asks a listener to connect to a talker (CONNECT_RX); the
//! listener forwards the request to the talker (CONNECT_TX) and relays the
//! talker's answer back. Disconnects follow the same path.

pub mod engine;
pub mod message;

#[cfg(test)]
mod tests;

pub use engine::{
    AcmpPending, AcmpReceiver, AcmpResult, ConnectionEngine, ConnectionState, StreamConnection,
    StreamState,
};
pub use message::{AcmpMessageType, AcmpStatus, Acmpdu, flags};
