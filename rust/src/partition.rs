//! Resolving which divisions and bunks a caller may generate or edit.
//!
//! Partitions are disjoint by role assignment, not enforced by the data
//! model: enforcement is the caller-side checks here plus the explicit
//! bypass escape hatch in conflict resolution.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::models::Division;

/// Caller role as supplied by the external identity collaborator.
///
/// The core treats this as trusted input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Full access to every division.
    Owner,
    /// Full access to every division.
    Admin,
    /// Access only to explicitly granted divisions.
    Scheduler,
}

/// Errors raised while resolving a caller's partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// The caller has no granted divisions; generation aborts before
    /// touching any state.
    NoPartitionAssigned,
}

impl std::fmt::Display for PartitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionError::NoPartitionAssigned => {
                write!(f, "caller has no divisions assigned")
            }
        }
    }
}

impl std::error::Error for PartitionError {}

/// The set of divisions (and derived bunks) one caller may generate or edit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Partition {
    pub divisions: Vec<String>,
    pub bunks: FxHashSet<String>,
}

impl Partition {
    pub fn owns_bunk(&self, bunk: &str) -> bool {
        self.bunks.contains(bunk)
    }

    pub fn owns_division(&self, division: &str) -> bool {
        self.divisions.iter().any(|d| d == division)
    }
}

/// Resolve the caller's partition from role and explicit division grants.
///
/// Owner and admin roles get every division; a scheduler gets exactly the
/// granted divisions and errors when none are granted.
pub fn resolve_partition(
    role: Role,
    granted_divisions: &[String],
    all_divisions: &[Division],
) -> Result<Partition, PartitionError> {
    let divisions: Vec<String> = match role {
        Role::Owner | Role::Admin => all_divisions.iter().map(|d| d.name.clone()).collect(),
        Role::Scheduler => all_divisions
            .iter()
            .filter(|d| granted_divisions.iter().any(|g| g == &d.name))
            .map(|d| d.name.clone())
            .collect(),
    };

    if divisions.is_empty() {
        return Err(PartitionError::NoPartitionAssigned);
    }

    let bunks = bunks_for_divisions(&divisions, all_divisions);
    Ok(Partition { divisions, bunks })
}

/// Flatten division names to the set of bunk identifiers they contain.
pub fn bunks_for_divisions(
    division_names: &[String],
    all_divisions: &[Division],
) -> FxHashSet<String> {
    all_divisions
        .iter()
        .filter(|d| division_names.iter().any(|n| n == &d.name))
        .flat_map(|d| d.bunks.iter().cloned())
        .collect()
}
