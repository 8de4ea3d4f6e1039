//! Fixed-size slot pool owned by the arbiter actor.
//!
//! Free slots form a LIFO stack: the most recently returned slot is the next
//! one handed out. At construction slot `1` sits on top. Reclaimed slots are
//! pushed in ascending id order, so the lowest reclaimed id ends up deepest.
//!
//! Every lease carries a sequence number. A release must present the lease it
//! was granted, so a holder whose slot was reclaimed by a sweep (and possibly
//! re-leased) cannot free somebody else's lease.

use std::{collections::BTreeMap, time::Duration};
use tokio::time::Instant;

pub type SlotId = usize;

/// Proof of holding `slot`. Only the current lease of a slot can release it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Lease {
    pub slot: SlotId,
    seq: u64,
}

#[derive(Clone, Copy, Debug)]
struct Stamp {
    started: Instant,
    seq: u64,
}

#[derive(Debug)]
pub struct SlotPool {
    size: usize,
    free: Vec<SlotId>,
    leased: BTreeMap<SlotId, Stamp>,
    next_seq: u64,
}

impl SlotPool {
    /// Build a pool holding slots `1..=size`, all free.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            free: (1..=size).rev().collect(),
            leased: BTreeMap::new(),
            next_seq: 0,
        }
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn leased_count(&self) -> usize {
        self.leased.len()
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn lease_start(&self, slot: SlotId) -> Option<Instant> {
        self.leased.get(&slot).map(|stamp| stamp.started)
    }

    /// Take the top free slot and stamp its lease start, or `None` when exhausted.
    pub fn lease(&mut self, now: Instant) -> Option<Lease> {
        let slot = self.free.pop()?;
        self.next_seq += 1;
        let seq = self.next_seq;
        self.leased.insert(slot, Stamp { started: now, seq });
        Some(Lease { slot, seq })
    }

    /// Return a leased slot to the free stack.
    ///
    /// A lease that is no longer current (already released, or reclaimed by
    /// a sweep) is a no-op and returns `false`, so a late or double release
    /// never frees a slot twice or cuts short another holder.
    pub fn release(&mut self, lease: Lease) -> bool {
        let current = self
            .leased
            .get(&lease.slot)
            .is_some_and(|stamp| stamp.seq == lease.seq);
        if current {
            self.leased.remove(&lease.slot);
            self.free.push(lease.slot);
        }
        current
    }

    /// Force back every lease strictly older than `budget`.
    pub fn reclaim_expired(&mut self, now: Instant, budget: Duration) -> Vec<SlotId> {
        let expired: Vec<SlotId> = self
            .leased
            .iter()
            .filter(|(_, stamp)| now.saturating_duration_since(stamp.started) > budget)
            .map(|(slot, _)| *slot)
            .collect();

        for slot in &expired {
            self.leased.remove(slot);
            self.free.push(*slot);
        }

        expired
    }
}
