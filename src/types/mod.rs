//! Core types: identifiers, capability bits and configuration

pub mod capabilities;
mod config;
mod ids;


pub use config::{AvdeccConfig, AvdeccConfigBuilder};
pub(crate) use config::duration_ns;
pub use ids::{EntityId, MacAddress, StreamEndpoint, StreamId};
