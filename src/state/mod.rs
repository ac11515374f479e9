//! Events published by a running entity

mod events;

pub use events::{ConnectionLossReason, DepartureReason, EntityEvent, EventBus, EventFilter};
