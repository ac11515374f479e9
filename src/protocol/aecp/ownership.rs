//! ACQUIRE_ENTITY and LOCK_ENTITY bookkeeping for the local entity.
//!
//! Acquisition and locking are tracked independently. A controller that
//! already holds either one may repeat the request without changing state,
//! so only real transitions report `true` and bump `available_index`.

use crate::protocol::aecp::message::AemStatus;
use crate::types::EntityId;

/// Controller that acquired the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquisition {
    /// Owning controller.
    pub owner: EntityId,
    /// Survives the owner's departure.
    pub persistent: bool,
}

/// Controller that locked the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLock {
    /// Locking controller.
    pub owner: EntityId,
    /// Clock reading at which the lock lapses.
    pub expires_at: u64,
}

/// Acquire and lock tables.
#[derive(Debug, Clone)]
pub struct EntityOwnership {
    acquired: Option<Acquisition>,
    locked: Option<EntityLock>,
    lock_timeout_ns: u64,
}

impl EntityOwnership {
    /// Empty tables; locks lapse after `lock_timeout_ns`.
    #[must_use]
    pub fn new(lock_timeout_ns: u64) -> Self {
        Self {
            acquired: None,
            locked: None,
            lock_timeout_ns,
        }
    }

    /// Current acquisition.
    #[must_use]
    pub fn acquisition(&self) -> Option<Acquisition> {
        self.acquired
    }

    /// Current lock, unless it lapsed before `now`.
    #[must_use]
    pub fn lock_at(&self, now: u64) -> Option<EntityLock> {
        self.locked.filter(|lock| now < lock.expires_at)
    }

    /// Controller holding the acquisition, or `EntityId::NONE`.
    #[must_use]
    pub fn owner(&self) -> EntityId {
        self.acquired.map_or(EntityId::NONE, |a| a.owner)
    }

    fn locked_by_other(&self, controller: EntityId, now: u64) -> Option<EntityId> {
        self.lock_at(now)
            .map(|lock| lock.owner)
            .filter(|owner| *owner != controller)
    }

    fn acquired_by_other(&self, controller: EntityId) -> Option<EntityId> {
        self.acquired
            .map(|a| a.owner)
            .filter(|owner| *owner != controller)
    }

    /// Grant the acquisition to `controller`.
    ///
    /// Returns whether the table changed.
    ///
    /// # Errors
    ///
    /// `EntityAcquired` when another controller holds it. A lock held by
    /// another controller does not prevent acquisition.
    pub fn acquire(&mut self, controller: EntityId, persistent: bool) -> Result<bool, AemStatus> {
        if self.acquired_by_other(controller).is_some() {
            return Err(AemStatus::EntityAcquired);
        }
        let next = Acquisition {
            owner: controller,
            persistent,
        };
        let changed = self.acquired.is_none();
        self.acquired = Some(next);
        Ok(changed)
    }

    /// Release the acquisition held by `controller`.
    ///
    /// Releasing an entity nobody holds succeeds without change.
    ///
    /// # Errors
    ///
    /// `EntityAcquired` when another controller holds it.
    pub fn release(&mut self, controller: EntityId) -> Result<bool, AemStatus> {
        match self.acquired {
            None => Ok(false),
            Some(a) if a.owner == controller => {
                self.acquired = None;
                Ok(true)
            }
            Some(_) => Err(AemStatus::EntityAcquired),
        }
    }

    /// Lock for `controller`, refreshing the expiry if it already holds the lock.
    ///
    /// # Errors
    ///
    /// `EntityLocked` when another controller holds an unexpired lock. An
    /// acquisition held by another controller does not prevent locking.
    pub fn lock(&mut self, controller: EntityId, now: u64) -> Result<bool, AemStatus> {
        if self.locked_by_other(controller, now).is_some() {
            return Err(AemStatus::EntityLocked);
        }
        let changed = self.lock_at(now).is_none();
        self.locked = Some(EntityLock {
            owner: controller,
            expires_at: now.saturating_add(self.lock_timeout_ns),
        });
        Ok(changed)
    }

    /// Remove the lock held by `controller`.
    ///
    /// # Errors
    ///
    /// `EntityLocked` when another controller holds the lock.
    pub fn unlock(&mut self, controller: EntityId, now: u64) -> Result<bool, AemStatus> {
        match self.lock_at(now) {
            None => {
                self.locked = None;
                Ok(false)
            }
            Some(lock) if lock.owner == controller => {
                self.locked = None;
                Ok(true)
            }
            Some(_) => Err(AemStatus::EntityLocked),
        }
    }

    /// Whether `controller` may run a state-changing command.
    ///
    /// # Errors
    ///
    /// `EntityAcquired` or `EntityLocked` naming the conflicting holder.
    pub fn check_mutable(&self, controller: EntityId, now: u64) -> Result<(), AemStatus> {
        if self.acquired_by_other(controller).is_some() {
            return Err(AemStatus::EntityAcquired);
        }
        if self.locked_by_other(controller, now).is_some() {
            return Err(AemStatus::EntityLocked);
        }
        Ok(())
    }

    /// Drop a lapsed lock. Returns whether one was removed.
    pub fn expire(&mut self, now: u64) -> bool {
        match self.locked {
            Some(lock) if now >= lock.expires_at => {
                tracing::debug!(owner = %lock.owner, "Entity lock expired");
                self.locked = None;
                true
            }
            _ => false,
        }
    }

    /// Forget what `controller` held, keeping a persistent acquisition.
    ///
    /// Returns whether anything changed.
    pub fn controller_departed(&mut self, controller: EntityId) -> bool {
        let mut changed = false;
        if self
            .acquired
            .is_some_and(|a| a.owner == controller && !a.persistent)
        {
            self.acquired = None;
            changed = true;
        }
        if self.locked.is_some_and(|lock| lock.owner == controller) {
            self.locked = None;
            changed = true;
        }
        changed
    }

    /// Forget everything `controller` held, persistent acquisition included.
    ///
    /// Returns whether anything changed.
    pub fn controller_reset(&mut self, controller: EntityId) -> bool {
        let mut changed = false;
        if self.acquired.is_some_and(|a| a.owner == controller) {
            self.acquired = None;
            changed = true;
        }
        if self.locked.is_some_and(|lock| lock.owner == controller) {
            self.locked = None;
            changed = true;
        }
        changed
    }

    /// Clear both tables.
    pub fn clear(&mut self) {
        self.acquired = None;
        self.locked = None;
    }
}
