//! AVDECC Enumeration and Control Protocol (IEEE 1722.1 Clause 9).
//!
//! Only the AEM (entity model) message types are interpreted. The local
//! entity answers AEM commands through a handler table keyed by command
//! type; every other AECP command is answered with `NOT_IMPLEMENTED`.

pub mod aem;
pub mod descriptors;
pub mod engine;
pub mod handlers;
pub mod message;
pub mod model;
pub mod ownership;

#[cfg(test)]
mod tests;

pub use aem::{
    AcquireEntity, ConfigurationPayload, DescriptorKey, DescriptorPayload, DescriptorType,
    EntityDescriptor, LockEntity, ReadDescriptorCommand, acquire_flags, lock_flags,
};
pub use descriptors::DescriptorStore;
pub use engine::{AemPending, AemReceiver, AemResult, EnumerationEngine};
pub use handlers::AemHandler;
pub use message::{AecpBody, AecpMessageType, AemCommandType, AemStatus, Aecpdu};
pub use model::{AemCommand, AemResponse, EntityState};
pub use ownership::{Acquisition, EntityLock, EntityOwnership};
