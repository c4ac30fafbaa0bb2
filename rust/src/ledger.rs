//! Per-slot, per-resource usage accounting against capacity ceilings.
//!
//! The ledger is the single source of truth for "is this resource free at
//! this slot". `try_reserve` is the only mutating entry point; every
//! higher-level algorithm routes through it rather than keeping parallel
//! counts. Records are ephemeral: rebuilt fresh at the start of every
//! generation run, never persisted.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::models::{DayMap, ResourceCatalog};

/// Usage state for one (slot, resource) cell.
///
/// Invariant: `usage_count <= max_capacity` at all times. Writes that would
/// violate it are rejected before any state changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsageRecord {
    pub usage_count: u32,
    pub max_capacity: u32,
    /// Owners in reservation order.
    pub booked_by: Vec<String>,
}

/// Per-slot, per-resource usage counter with a capacity ceiling.
///
/// Keys are lowercased resource names so lookups are case-insensitive.
#[derive(Clone, Debug, Default)]
pub struct ResourceLedger {
    records: FxHashMap<(usize, String), UsageRecord>,
    capacities: FxHashMap<String, u32>,
}

impl ResourceLedger {
    /// Build an empty ledger carrying the catalog's capacity ceilings.
    pub fn new(catalog: &ResourceCatalog) -> Self {
        let capacities = catalog
            .names_sorted()
            .into_iter()
            .map(|name| (name.to_lowercase(), catalog.capacity_of(name)))
            .collect();
        Self {
            records: FxHashMap::default(),
            capacities,
        }
    }

    /// Capacity ceiling for a resource; unknown resources default to 1
    /// (exclusive use).
    pub fn capacity_of(&self, resource: &str) -> u32 {
        self.capacities
            .get(&resource.to_lowercase())
            .copied()
            .unwrap_or(1)
    }

    /// Check-then-commit reservation. Returns false (state unchanged) when
    /// the slot is already at capacity.
    pub fn try_reserve(&mut self, slot: usize, resource: &str, owner: &str) -> bool {
        let key = (slot, resource.to_lowercase());
        let capacity = self.capacity_of(resource);
        let record = self.records.entry(key).or_insert_with(|| UsageRecord {
            usage_count: 0,
            max_capacity: capacity,
            booked_by: Vec::new(),
        });
        if record.usage_count >= record.max_capacity {
            return false;
        }
        record.usage_count += 1;
        record.booked_by.push(owner.to_string());
        true
    }

    pub fn is_available(&self, slot: usize, resource: &str) -> bool {
        self.remaining_capacity(slot, resource) > 0
    }

    pub fn remaining_capacity(&self, slot: usize, resource: &str) -> u32 {
        let key = (slot, resource.to_lowercase());
        match self.records.get(&key) {
            Some(record) => record.max_capacity.saturating_sub(record.usage_count),
            None => self.capacity_of(resource),
        }
    }

    pub fn usage(&self, slot: usize, resource: &str) -> Option<&UsageRecord> {
        self.records.get(&(slot, resource.to_lowercase()))
    }

    /// Owners currently booked at a slot, in reservation order.
    pub fn booked_by(&self, slot: usize, resource: &str) -> &[String] {
        self.usage(slot, resource)
            .map(|r| r.booked_by.as_slice())
            .unwrap_or(&[])
    }

    /// Clear all records. Called once per generation run before seeding.
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Seed the ledger from every bunk not in the excluded set.
    ///
    /// Generation excludes the caller's own partition, so foreign work
    /// implicitly blocks the caller without the caller reading foreign
    /// contents for write purposes; the reassignment solver excludes the
    /// bunks about to be moved. Walks each bunk's head entries and reserves
    /// every slot the run covers. Reservations that find a cell already at
    /// capacity (a pre-existing deliberate double-booking) are skipped.
    /// Returns the number of slots reserved.
    pub fn seed_excluding(&mut self, day: &DayMap, excluded: &FxHashSet<String>) -> u32 {
        let mut reserved = 0;
        let mut seeding: Vec<&String> = day.keys().filter(|b| !excluded.contains(*b)).collect();
        seeding.sort_unstable();
        for bunk in seeding {
            let entries = &day[bunk];
            let mut i = 0;
            while i < entries.len() {
                match &entries[i] {
                    Some(head) if head.head => {
                        let mut end = i + 1;
                        while end < entries.len() {
                            match &entries[end] {
                                Some(cont) if !cont.head && cont.resource == head.resource => {
                                    end += 1;
                                }
                                _ => break,
                            }
                        }
                        for slot in i..end {
                            if self.try_reserve(slot, &head.resource, bunk) {
                                reserved += 1;
                            }
                        }
                        i = end;
                    }
                    _ => i += 1,
                }
            }
        }
        reserved
    }
}
