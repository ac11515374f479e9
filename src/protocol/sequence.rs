//! Request/response correlation shared by the ACMP and AECP command paths.
//!
//! A `SequenceTracker` allocates 16-bit sequence ids from one wrapping
//! counter and keeps every outstanding command keyed by
//! `(target entity, sequence id)` until it is completed, times out after its
//! last retransmission, or is removed by a departure cascade.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::SequenceError;
use crate::types::EntityId;

/// One outstanding command.
#[derive(Debug)]
pub struct PendingRequest<C> {
    /// Entity the command was sent to.
    pub target: EntityId,
    /// Sequence id carried by the command.
    pub sequence_id: u16,
    /// Clock reading when first sent, in nanoseconds.
    pub issued_at: u64,
    /// Clock reading at which the current attempt times out.
    pub deadline: u64,
    /// Retransmissions so far.
    pub retry_count: u8,
    /// Retransmissions allowed.
    pub max_retries: u8,
    /// Per-attempt timeout in nanoseconds.
    pub timeout_ns: u64,
    /// Encoded command, resent verbatim on retry.
    pub pdu: Bytes,
    /// Caller context (completion channel and bookkeeping).
    pub context: C,
}

/// Result of a timeout sweep.
#[derive(Debug)]
pub struct Sweep<C> {
    /// Commands to resend, same bytes and sequence id as before.
    pub retransmit: Vec<Bytes>,
    /// Commands that exhausted their retransmissions.
    pub expired: Vec<PendingRequest<C>>,
}

impl<C> Default for Sweep<C> {
    fn default() -> Self {
        Self {
            retransmit: Vec::new(),
            expired: Vec::new(),
        }
    }
}

/// Timeout and retransmission budget of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt timeout in nanoseconds.
    pub timeout_ns: u64,
    /// Retransmissions before giving up.
    pub max_retries: u8,
}

/// Correlation table for outbound commands.
#[derive(Debug)]
pub struct SequenceTracker<C> {
    next_id: u16,
    pending: HashMap<(EntityId, u16), PendingRequest<C>>,
    timeout_ns: u64,
    max_retries: u8,
    capacity: usize,
}

impl<C> SequenceTracker<C> {
    /// Create a tracker with a per-attempt timeout, retry budget and in-flight capacity.
    ///
    /// `capacity` is clamped to 65535 so an id can always be found for any target.
    #[must_use]
    pub fn new(timeout_ns: u64, max_retries: u8, capacity: usize) -> Self {
        Self {
            next_id: 0,
            pending: HashMap::new(),
            timeout_ns,
            max_retries,
            capacity: capacity.clamp(1, usize::from(u16::MAX)),
        }
    }

    /// Allocate a sequence id, build the PDU with it, and start tracking.
    ///
    /// Ids still pending for `target` are skipped after wraparound.
    ///
    /// # Errors
    ///
    /// Returns `SequenceError::Exhausted` (converted into `E`) when the
    /// in-flight window is full, or whatever `encode` fails with.
    pub fn issue<E, F>(
        &mut self,
        target: EntityId,
        now: u64,
        context: C,
        encode: F,
    ) -> Result<(u16, Bytes), E>
    where
        E: From<SequenceError>,
        F: FnOnce(u16) -> Result<Bytes, E>,
    {
        let policy = RetryPolicy {
            timeout_ns: self.timeout_ns,
            max_retries: self.max_retries,
        };
        self.issue_with(target, now, policy, context, encode)
    }

    /// Like [`issue`](Self::issue) with an explicit timeout and retry budget.
    ///
    /// # Errors
    ///
    /// Same as [`issue`](Self::issue).
    pub fn issue_with<E, F>(
        &mut self,
        target: EntityId,
        now: u64,
        policy: RetryPolicy,
        context: C,
        encode: F,
    ) -> Result<(u16, Bytes), E>
    where
        E: From<SequenceError>,
        F: FnOnce(u16) -> Result<Bytes, E>,
    {
        if self.pending.len() >= self.capacity {
            return Err(SequenceError::Exhausted {
                in_flight: self.pending.len(),
            }
            .into());
        }
        let mut candidate = self.next_id;
        while self.pending.contains_key(&(target, candidate)) {
            candidate = candidate.wrapping_add(1);
            if candidate == self.next_id {
                return Err(SequenceError::Exhausted {
                    in_flight: self.pending.len(),
                }
                .into());
            }
        }
        let pdu = encode(candidate)?;
        self.next_id = candidate.wrapping_add(1);
        self.pending.insert(
            (target, candidate),
            PendingRequest {
                target,
                sequence_id: candidate,
                issued_at: now,
                deadline: now.saturating_add(policy.timeout_ns),
                retry_count: 0,
                max_retries: policy.max_retries,
                timeout_ns: policy.timeout_ns,
                pdu: pdu.clone(),
                context,
            },
        );
        Ok((candidate, pdu))
    }

    /// Look at a pending request without removing it.
    #[must_use]
    pub fn peek(&self, target: EntityId, sequence_id: u16) -> Option<&PendingRequest<C>> {
        self.pending.get(&(target, sequence_id))
    }

    /// Remove and return the request a response answers.
    ///
    /// `None` means no such request was pending, which is normal for late
    /// responses.
    pub fn complete(&mut self, target: EntityId, sequence_id: u16) -> Option<PendingRequest<C>> {
        self.pending.remove(&(target, sequence_id))
    }

    /// Retransmit or expire requests whose deadline has passed.
    pub fn sweep(&mut self, now: u64) -> Sweep<C> {
        let mut sweep = Sweep::default();
        let due: Vec<(EntityId, u16)> = self
            .pending
            .iter()
            .filter(|(_, req)| now >= req.deadline)
            .map(|(key, _)| *key)
            .collect();
        for key in due {
            let Some(req) = self.pending.get_mut(&key) else {
                continue;
            };
            if req.retry_count < req.max_retries {
                req.retry_count += 1;
                // Attempts stay on the issue-time grid even when the sweep runs late.
                req.deadline = req.deadline.saturating_add(req.timeout_ns).max(now);
                tracing::debug!(
                    target_id = %req.target,
                    sequence_id = req.sequence_id,
                    attempt = req.retry_count + 1,
                    "Retransmitting command"
                );
                sweep.retransmit.push(req.pdu.clone());
            } else if let Some(req) = self.pending.remove(&key) {
                sweep.expired.push(req);
            }
        }
        sweep
    }

    /// Remove every request matching `pred`.
    pub fn remove_where<P>(&mut self, mut pred: P) -> Vec<PendingRequest<C>>
    where
        P: FnMut(&PendingRequest<C>) -> bool,
    {
        let keys: Vec<(EntityId, u16)> = self
            .pending
            .iter()
            .filter(|(_, req)| pred(req))
            .map(|(key, _)| *key)
            .collect();
        keys.into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .collect()
    }

    /// Remove every request addressed to `target`.
    pub fn remove_target(&mut self, target: EntityId) -> Vec<PendingRequest<C>> {
        self.remove_where(|req| req.target == target)
    }

    /// Remove everything.
    pub fn drain(&mut self) -> Vec<PendingRequest<C>> {
        self.pending.drain().map(|(_, req)| req).collect()
    }

    /// Requests in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
