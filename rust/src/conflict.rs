//! Double-booking detection across scheduler partitions.
//!
//! A proposed placement is checked against ledger capacity and the foreign
//! lock registry; colliding bunks are classified as editable (caller's own
//! partition, auto-resolvable) or non-editable (foreign, requires an
//! explicit decision). The decision itself is a value passed into the
//! solver, never a UI side effect.

use chrono::NaiveDateTime;
use rustc_hash::FxHashMap;

use crate::ledger::ResourceLedger;
use crate::partition::Partition;

/// Shared foreign-lock registry view, keyed by (resource, slot).
///
/// The core reads it to treat foreign-locked resources as unavailable, and
/// writes it to register the triggering placement during reassignment.
#[derive(Clone, Debug, Default)]
pub struct LockTable {
    locks: FxHashMap<(String, usize), String>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&mut self, resource: &str, slot: usize, owner: &str) {
        self.locks
            .insert((resource.to_lowercase(), slot), owner.to_string());
    }

    pub fn is_locked(&self, resource: &str, slot: usize) -> bool {
        self.locks.contains_key(&(resource.to_lowercase(), slot))
    }

    pub fn owner_of(&self, resource: &str, slot: usize) -> Option<&str> {
        self.locks
            .get(&(resource.to_lowercase(), slot))
            .map(|s| s.as_str())
    }

    /// True when any slot in the range is locked for the resource.
    pub fn locked_in_range(&self, resource: &str, slots: &[usize]) -> bool {
        slots.iter().any(|&slot| self.is_locked(resource, slot))
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// How the caller chose to resolve a conflict touching foreign bunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionDecision {
    /// Proceed; the double-booking persists and the other owner is informed.
    Notify,
    /// Treat foreign bunks as editable for this one resolution. An explicit,
    /// logged choice, never a default.
    Bypass,
}

/// Record of a deliberate double-booking left for another scheduler.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub resource: String,
    pub slots: Vec<usize>,
    /// Bunk whose placement caused the double-booking.
    pub placed_bunk: String,
    /// Foreign bunks that remain double-booked on the resource.
    pub foreign_bunks: Vec<String>,
    pub timestamp: NaiveDateTime,
}

/// Result of checking a proposed placement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConflictReport {
    pub resource: String,
    pub slots: Vec<usize>,
    /// Colliding bunks inside the caller's partition (auto-resolvable).
    pub editable: Vec<String>,
    /// Colliding bunks outside the caller's partition.
    pub non_editable: Vec<String>,
    /// True when every slot still has spare capacity for the caller, so the
    /// placement can share instead of colliding.
    pub shareable: bool,
    pub capacity: u32,
    /// Highest usage count across the requested slots.
    pub peak_usage: u32,
}

impl ConflictReport {
    /// No collision at all: the placement can proceed directly.
    pub fn is_clear(&self) -> bool {
        self.editable.is_empty() && self.non_editable.is_empty()
    }

    /// A foreign bunk is involved; the caller must choose notify or bypass.
    pub fn requires_decision(&self) -> bool {
        !self.non_editable.is_empty()
    }
}

/// Check a proposed (resource, slot-range) placement for collisions.
///
/// `exclude_bunk` is the bunk being placed; its own existing bookings never
/// count against it.
pub fn check_placement(
    ledger: &ResourceLedger,
    locks: &LockTable,
    partition: &Partition,
    resource: &str,
    slots: &[usize],
    exclude_bunk: &str,
) -> ConflictReport {
    let mut colliding: Vec<String> = Vec::new();
    let mut peak_usage = 0;
    let mut shareable = true;

    for &slot in slots {
        let remaining = ledger.remaining_capacity(slot, resource);
        let locked = locks.is_locked(resource, slot);
        if remaining == 0 {
            shareable = false;
        }
        if let Some(record) = ledger.usage(slot, resource) {
            peak_usage = peak_usage.max(record.usage_count);
        }
        if remaining == 0 || locked {
            for bunk in ledger.booked_by(slot, resource) {
                if bunk != exclude_bunk && !colliding.contains(bunk) {
                    colliding.push(bunk.clone());
                }
            }
            if locked {
                if let Some(owner) = locks.owner_of(resource, slot) {
                    if owner != exclude_bunk && !colliding.iter().any(|b| b == owner) {
                        colliding.push(owner.to_string());
                    }
                }
                shareable = false;
            }
        }
    }

    let (editable, non_editable): (Vec<String>, Vec<String>) = colliding
        .into_iter()
        .partition(|bunk| partition.owns_bunk(bunk));

    ConflictReport {
        resource: resource.to_string(),
        slots: slots.to_vec(),
        editable,
        non_editable,
        shareable,
        capacity: ledger.capacity_of(resource),
        peak_usage,
    }
}
