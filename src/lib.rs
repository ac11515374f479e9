//! # avdecc
//!
//! A pure Rust IEEE 1722.1 (AVDECC) protocol engine.
//!
//! ## Features
//!
//! - Entity discovery and advertisement (ADP)
//! - Stream connection management as controller, talker and listener (ACMP)
//! - Entity model enumeration and control: acquire, lock, descriptors,
//!   configurations and unsolicited notifications (AECP/AEM)
//! - Retransmission with per-command timeouts
//! - Pluggable transport and clock, with in-memory versions for tests
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use avdecc::testing::{MemoryNetwork, test_mac};
//! use avdecc::{AvdeccConfig, AvdeccEntity, StreamEndpoint};
//!
//! # async fn example() -> Result<(), avdecc::AvdeccError> {
//! let network = MemoryNetwork::new();
//! let entity = AvdeccEntity::new(AvdeccConfig::default(), Arc::new(network.endpoint(test_mac(1))))?;
//! entity.start().await?;
//! entity.discover_all().await?;
//!
//! if let [talker, listener, ..] = entity.discovered_entities().await.as_slice() {
//!     let stream_id = entity
//!         .connect_stream(
//!             StreamEndpoint::new(talker.entity_id, 0),
//!             StreamEndpoint::new(listener.entity_id, 0),
//!         )
//!         .await?;
//!     entity.disconnect_stream(stream_id).await?;
//! }
//! entity.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Runtime**: [`AvdeccEntity`] owns the engines, the transport and the
//!   background tasks
//! - **Engines**: [`protocol`] holds one synchronous state machine per
//!   protocol plus the wire codec
//! - **Collaborators**: [`net`] defines the transport and clock seams

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
/// Error types
pub mod error;
/// Events
pub mod state;
/// Core types
pub mod types;

/// Testing utilities
pub mod testing;

pub mod entity;
pub mod net;
pub mod protocol;

// Re-exports
pub use entity::{AvdeccEntity, LifecycleState};
pub use error::{AcmpError, AemError, AvdeccError};
pub use protocol::acmp::{StreamConnection, StreamState};
pub use protocol::adp::DiscoveredEntity;
pub use protocol::aecp::{AemCommandType, AemStatus, DescriptorKey, DescriptorType};
pub use state::{EntityEvent, EventFilter};
pub use types::{AvdeccConfig, AvdeccConfigBuilder, EntityId, MacAddress, StreamEndpoint, StreamId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
///
/// Convenient re-exports
pub mod prelude {
    pub use crate::{
        AcmpError, AemError, AvdeccConfig, AvdeccEntity, AvdeccError, DescriptorType,
        EntityEvent, EntityId, StreamEndpoint, StreamId,
    };
}
