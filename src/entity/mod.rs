//! Local AVDECC entity
//!
//! [`AvdeccEntity`] owns the three protocol engines, feeds them inbound
//! frames from a [`NetworkTransport`](crate::net::NetworkTransport), drives
//! their timers and exposes the controller API. [`EntityLifecycle`] governs
//! when the engines are active.

mod lifecycle;
mod runtime;

pub use lifecycle::{EntityLifecycle, LifecycleEvent, LifecycleState, Transition, next_state};
pub use runtime::AvdeccEntity;
