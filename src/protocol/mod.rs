//! AVDECC protocol engines and wire codec.
//!
//! Each engine is a synchronous state machine: callers hand it decoded PDUs
//! or a clock reading and get back an [`EngineOutput`] listing the frames to
//! transmit and the events to publish. Engines never touch the transport, so
//! the runtime can release an engine's lock before sending.

pub mod acmp;
pub mod adp;
pub mod aecp;
pub mod codec;
pub mod sequence;

use bytes::Bytes;

use crate::state::EntityEvent;

pub use codec::{CodecError, Pdu};
pub use sequence::{PendingRequest, RetryPolicy, SequenceTracker, Sweep};

/// Frames to send and events to publish after an engine call.
#[derive(Debug, Default)]
pub struct EngineOutput {
    /// Encoded PDUs, in send order.
    pub frames: Vec<Bytes>,
    /// Events, in emission order.
    pub events: Vec<EntityEvent>,
}

impl EngineOutput {
    /// Nothing to do.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame.
    pub fn frame(&mut self, frame: Bytes) {
        self.frames.push(frame);
    }

    /// Queue an event.
    pub fn event(&mut self, event: EntityEvent) {
        self.events.push(event);
    }

    /// Append everything from `other`.
    pub fn extend(&mut self, other: Self) {
        self.frames.extend(other.frames);
        self.events.extend(other.events);
    }

    /// Whether there is nothing to send or publish.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.events.is_empty()
    }
}
