//! In-memory collaborators for tests and demos
//!
//! [`MemoryNetwork`] is a multicast hub: every frame one endpoint sends
//! reaches every other endpoint unless a drop filter discards it.
//! [`ManualClock`] only moves when told to.

mod clock;
mod memory;

pub use clock::ManualClock;
pub use memory::{MemoryEndpoint, MemoryNetwork, SentFrame};

use crate::types::MacAddress;

/// Locally administered MAC address numbered `n`, for test endpoints.
#[must_use]
pub fn test_mac(n: u8) -> MacAddress {
    MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, n])
}
