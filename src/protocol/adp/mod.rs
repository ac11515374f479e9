//! AVDECC Discovery Protocol (IEEE 1722.1 Clause 6).
//!
//! Entities announce themselves with ENTITY_AVAILABLE every
//! `advertisement_interval` and whenever a matching ENTITY_DISCOVERY_REQUEST
//! arrives, and say goodbye with ENTITY_DEPARTING. Remote advertisements
//! populate the discovered-entity table, which evicts records whose
//! `valid_time` has lapsed.

pub mod engine;
pub mod message;

#[cfg(test)]
mod tests;

pub use engine::{AvailableIndex, DiscoveredEntity, DiscoveryEngine};
pub use message::{AdpMessageType, Adpdu};
