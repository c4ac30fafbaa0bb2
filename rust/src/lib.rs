//! Resource-constrained scheduling core for partitioned day plans.
//!
//! Discretizes a day onto a fixed time grid, tracks per-slot resource usage
//! against capacity, detects double-bookings across scheduler partitions,
//! and repairs conflicts with a deterministic cost-based local search.
//! Multiple schedulers edit disjoint partitions of the same persisted day;
//! the merge and optimistic-version retry here keep that safe without any
//! shared in-process state.

pub mod config;
pub mod conflict;
pub mod generation;
pub mod grid;
pub mod ledger;
pub mod logging;
pub mod merge;
pub mod models;
pub mod partition;
pub mod scoring;
pub mod solver;
pub mod store;

pub use config::{GenerationConfig, ScoringConfig};
pub use conflict::{
    check_placement, ConflictReport, LockTable, Notification, ResolutionDecision,
};
pub use generation::{
    EditRequest, GenerationContext, GenerationError, GenerationOrchestrator, GenerationReport,
    Placement,
};
pub use grid::{
    format_meridiem_time, is_split_block, parse_meridiem_time, split_at_midpoint, TimeGrid,
};
pub use ledger::{ResourceLedger, UsageRecord};
pub use merge::{merge, MergeResult};
pub use models::{
    Assignment, AssignmentFlag, BunkDay, DayMap, Division, ResourceCatalog, ResourceProperties,
    RotationEntry, RotationHistory, ScheduleBlock, TimeSlot,
};
pub use partition::{bunks_for_divisions, resolve_partition, Partition, PartitionError, Role};
pub use scoring::{Candidate, CandidateScorer};
pub use solver::{
    FailedBunk, ReassignedBunk, ReassignmentOutcome, ReassignmentSolver, TriggerPlacement,
};
pub use store::{DayStore, InMemoryDayStore, StoreError, VersionedDay};
