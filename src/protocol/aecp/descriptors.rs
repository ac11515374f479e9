//! Local descriptor table served by READ_DESCRIPTOR and WRITE_DESCRIPTOR.

use std::collections::HashMap;

use bytes::Bytes;

use super::aem::DescriptorKey;
use super::message::{AemStatus, Aecpdu};

/// Largest descriptor body a READ_DESCRIPTOR response can carry.
pub const MAX_DESCRIPTOR_BODY: usize = Aecpdu::MAX_AEM_PAYLOAD - DescriptorKey::SIZE;

#[derive(Debug, Clone)]
struct StoredDescriptor {
    body: Bytes,
    writable: bool,
}

/// Descriptor bodies keyed by normalized [`DescriptorKey`].
#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    entries: HashMap<DescriptorKey, StoredDescriptor>,
}

impl DescriptorStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a descriptor. Returns the previous body.
    pub fn insert(&mut self, key: DescriptorKey, body: Bytes, writable: bool) -> Option<Bytes> {
        self.entries
            .insert(key.normalized(), StoredDescriptor { body, writable })
            .map(|old| old.body)
    }

    /// Body stored under `key`.
    #[must_use]
    pub fn get(&self, key: &DescriptorKey) -> Option<&Bytes> {
        self.entries.get(&key.normalized()).map(|d| &d.body)
    }

    /// Whether a descriptor exists under `key`.
    #[must_use]
    pub fn contains(&self, key: &DescriptorKey) -> bool {
        self.entries.contains_key(&key.normalized())
    }

    /// Replace the body of a writable descriptor.
    ///
    /// # Errors
    ///
    /// `NoSuchDescriptor` if absent, `NotSupported` if not writable.
    pub fn write(&mut self, key: &DescriptorKey, body: Bytes) -> Result<(), AemStatus> {
        let entry = self
            .entries
            .get_mut(&key.normalized())
            .ok_or(AemStatus::NoSuchDescriptor)?;
        if !entry.writable {
            return Err(AemStatus::NotSupported);
        }
        entry.body = body;
        Ok(())
    }

    /// Remove a descriptor.
    pub fn remove(&mut self, key: &DescriptorKey) -> Option<Bytes> {
        self.entries.remove(&key.normalized()).map(|d| d.body)
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
