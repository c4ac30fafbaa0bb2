//! Core data types for the day-generation system.

use chrono::NaiveDateTime;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// One fixed-width cell of the day's time grid.
///
/// Slots are generated once per day and immutable afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub index: usize,
    pub start_minute: u32,
    pub end_minute: u32,
}

/// A variable-length, externally-defined segment of a division's day.
///
/// Produced by the day-structure planner; read-only input to the core.
/// May span one or more time slots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleBlock {
    pub division: String,
    pub event_label: String,
    pub start_minute: u32,
    pub end_minute: u32,
}

/// Edit state of an assignment entry.
///
/// The states are mutually exclusive and every consumer matches exhaustively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentFlag {
    /// Normal generated entry, free to be regenerated or reassigned.
    Open,
    /// Manually fixed by a scheduler; generation never overwrites it.
    Fixed,
    /// Pinned in place; like Fixed but set by the generator itself.
    Pinned,
    /// Owned by a foreign partition; the caller may not edit it.
    Locked,
    /// Moved by the reassignment solver while resolving a conflict.
    AutoReassigned,
}

/// One (bunk, slot) cell of the day's assignment map.
///
/// A multi-slot placement stores one head entry (`head = true`) followed by
/// continuation entries referencing the same placement. Continuation entries
/// are never independently edited.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub resource: String,
    pub activity: String,
    pub sport_tag: Option<String>,
    pub head: bool,
    pub flag: AssignmentFlag,
    pub timestamp: NaiveDateTime,
}

impl Assignment {
    pub fn new(
        resource: impl Into<String>,
        activity: impl Into<String>,
        head: bool,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            resource: resource.into(),
            activity: activity.into(),
            sport_tag: None,
            head,
            flag: AssignmentFlag::Open,
            timestamp,
        }
    }

    pub fn with_flag(mut self, flag: AssignmentFlag) -> Self {
        self.flag = flag;
        self
    }
}

/// A bunk's full day: one entry per slot index, `None` = free/unassigned.
pub type BunkDay = Vec<Option<Assignment>>;

/// The persisted full-day state: bunk identifier -> per-slot entries.
pub type DayMap = FxHashMap<String, BunkDay>;

/// A named collection of bunks; the unit of partition ownership.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Division {
    pub name: String,
    pub bunks: Vec<String>,
    pub color: Option<String>,
}

impl Division {
    pub fn new(name: impl Into<String>, bunks: Vec<String>) -> Self {
        Self {
            name: name.into(),
            bunks,
            color: None,
        }
    }
}

/// Per (bunk, activity) rotation-fairness record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RotationEntry {
    /// Days since the bunk last did this activity; `None` = never done.
    pub days_since_last: Option<u32>,
    /// Total number of times the bunk has ever done this activity.
    pub lifetime_count: u32,
}

/// Append-only rotation history, consulted (never mutated) by the core.
///
/// Updating the history after a day is finalized is an external
/// collaborator's responsibility.
#[derive(Clone, Debug, Default)]
pub struct RotationHistory {
    entries: FxHashMap<(String, String), RotationEntry>,
}

impl RotationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        bunk: impl Into<String>,
        activity: impl Into<String>,
        entry: RotationEntry,
    ) {
        self.entries.insert((bunk.into(), activity.into()), entry);
    }

    pub fn lookup(&self, bunk: &str, activity: &str) -> RotationEntry {
        self.entries
            .get(&(bunk.to_string(), activity.to_string()))
            .copied()
            .unwrap_or_default()
    }
}

/// External activity/location configuration for one resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceProperties {
    pub name: String,
    /// Activity the resource hosts; defaults to the resource name itself.
    pub activity: Option<String>,
    /// Per-slot usage capacity. 1 = exclusive use.
    pub capacity: u32,
    /// Preferred divisions, best first.
    pub preference: Vec<String>,
    /// If true, only divisions on the preference list may use the resource.
    pub preference_exclusive: bool,
    /// Lifetime usage cap per bunk, if any.
    pub max_uses_per_bunk: Option<u32>,
}

impl ResourceProperties {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            activity: None,
            capacity: 1,
            preference: Vec::new(),
            preference_exclusive: false,
            max_uses_per_bunk: None,
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn activity_name(&self) -> &str {
        self.activity.as_deref().unwrap_or(&self.name)
    }
}

/// The full activity/location configuration, keyed case-insensitively.
///
/// The core never mutates this; it is built once from external config.
#[derive(Clone, Debug, Default)]
pub struct ResourceCatalog {
    resources: FxHashMap<String, ResourceProperties>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, props: ResourceProperties) {
        self.resources.insert(props.name.to_lowercase(), props);
    }

    pub fn get(&self, name: &str) -> Option<&ResourceProperties> {
        self.resources.get(&name.to_lowercase())
    }

    /// Per-slot capacity for a resource; unknown resources default to 1
    /// (exclusive use).
    pub fn capacity_of(&self, name: &str) -> u32 {
        self.get(name).map(|p| p.capacity).unwrap_or(1)
    }

    /// Resource names in deterministic (sorted) order.
    pub fn names_sorted(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.resources.values().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Extract the ordinal embedded in a bunk name ("B7" -> 7, "Bunk 12" -> 12).
///
/// Returns `None` when the name carries no digits.
pub fn bunk_ordinal(name: &str) -> Option<u32> {
    let digits: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Sort key for deterministic bunk processing: ascending embedded ordinal,
/// falling back to lexical order for names without one.
pub fn bunk_sort_key(name: &str) -> (u32, String) {
    (bunk_ordinal(name).unwrap_or(u32::MAX), name.to_string())
}
