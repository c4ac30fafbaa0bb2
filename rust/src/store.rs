//! Versioned persistence boundary for day maps.
//!
//! The store is deliberately a trait: the scheduling core never talks to a
//! concrete backend, it only requires optimistic-version semantics. A
//! persist with a stale version must fail with `VersionConflict` rather
//! than overwrite.

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::DayMap;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// A day map together with the version it was read at.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VersionedDay {
    pub version: u64,
    pub day: DayMap,
}

pub trait DayStore {
    /// Fetch the current day map and its version. A date never persisted
    /// before yields an empty map at version 0.
    fn fetch(&self, date: NaiveDate) -> Result<VersionedDay, StoreError>;

    /// Persist `day` if and only if the stored version still equals
    /// `expected_version`. Returns the new version on success.
    fn persist(
        &mut self,
        date: NaiveDate,
        expected_version: u64,
        day: &DayMap,
    ) -> Result<u64, StoreError>;
}

/// In-memory store with full optimistic-version semantics.
#[derive(Debug, Default)]
pub struct InMemoryDayStore {
    days: rustc_hash::FxHashMap<NaiveDate, VersionedDay>,
}

impl InMemoryDayStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DayStore for InMemoryDayStore {
    fn fetch(&self, date: NaiveDate) -> Result<VersionedDay, StoreError> {
        Ok(self.days.get(&date).cloned().unwrap_or_default())
    }

    fn persist(
        &mut self,
        date: NaiveDate,
        expected_version: u64,
        day: &DayMap,
    ) -> Result<u64, StoreError> {
        let entry = self.days.entry(date).or_default();
        if entry.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: entry.version,
            });
        }
        entry.version += 1;
        entry.day = day.clone();
        Ok(entry.version)
    }
}
