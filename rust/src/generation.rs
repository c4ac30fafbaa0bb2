//! Run sequencing for generation and manual edits.
//!
//! One run: resolve the caller's partition, fetch the persisted day, seed
//! the ledger from work the caller does not own, generate or edit the
//! caller's own partition, merge non-destructively, persist with a bounded
//! optimistic-version retry loop. All state is carried in an explicit
//! per-call `GenerationContext`; nothing here is ambient or shared.

use chrono::{NaiveDate, NaiveDateTime};
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::config::{GenerationConfig, ScoringConfig};
use crate::conflict::{check_placement, LockTable, Notification, ResolutionDecision};
use crate::grid::TimeGrid;
use crate::ledger::ResourceLedger;
use crate::merge::merge;
use crate::models::{
    bunk_sort_key, Assignment, AssignmentFlag, BunkDay, DayMap, Division, ResourceCatalog,
    RotationHistory, ScheduleBlock,
};
use crate::partition::{resolve_partition, Partition, PartitionError, Role};
use crate::scoring::CandidateScorer;
use crate::solver::{FailedBunk, ReassignedBunk, ReassignmentSolver, TriggerPlacement};
use crate::store::{DayStore, StoreError, VersionedDay};
use crate::{log_changes, log_checks, log_debug};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error("bunk {bunk} is outside the caller's partition")]
    PermissionDenied { bunk: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("persist failed after {attempts} attempts; reload and retry manually")]
    RetriesExhausted { attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-call state threaded through one generation/edit attempt.
///
/// Rebuilt fresh on every retry; never persisted, never shared.
pub struct GenerationContext {
    pub grid: TimeGrid,
    pub partition: Partition,
    pub ledger: ResourceLedger,
    pub existing: VersionedDay,
}

/// One placement the run made.
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    pub bunk: String,
    pub resource: String,
    pub activity: String,
    pub slots: Vec<usize>,
}

/// Full account of a completed run: everything a human needs to finish the
/// day by hand, bunk by bunk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationReport {
    pub placements: Vec<Placement>,
    pub reassignments: Vec<ReassignedBunk>,
    pub failures: Vec<FailedBunk>,
    pub notifications: Vec<Notification>,
    pub foreign_bunks: Vec<String>,
    pub version: u64,
}

impl GenerationReport {
    /// True when every bunk the run touched ended up placed.
    pub fn complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A manual single-point edit request.
#[derive(Clone, Debug, PartialEq)]
pub struct EditRequest {
    pub bunk: String,
    pub resource: String,
    /// Point in time the edit targets; resolved to the nearest slot.
    pub at_minute: u32,
    pub duration_minutes: u32,
    pub decision: ResolutionDecision,
    pub timestamp: NaiveDateTime,
}

/// Output of one pass, before merge and persist.
#[derive(Default)]
struct PassOutput {
    day: DayMap,
    placements: Vec<Placement>,
    reassignments: Vec<ReassignedBunk>,
    failures: Vec<FailedBunk>,
    notifications: Vec<Notification>,
    /// Foreign bunks a bypass resolution rewrote; merged as if owned.
    extra_bunks: FxHashSet<String>,
}

pub struct GenerationOrchestrator<'a> {
    config: &'a GenerationConfig,
    scoring: &'a ScoringConfig,
    catalog: &'a ResourceCatalog,
    history: &'a RotationHistory,
    divisions: &'a [Division],
}

impl<'a> GenerationOrchestrator<'a> {
    pub fn new(
        config: &'a GenerationConfig,
        scoring: &'a ScoringConfig,
        catalog: &'a ResourceCatalog,
        history: &'a RotationHistory,
        divisions: &'a [Division],
    ) -> Result<Self, GenerationError> {
        config.validate().map_err(GenerationError::InvalidConfig)?;
        scoring.validate().map_err(GenerationError::InvalidConfig)?;
        Ok(Self {
            config,
            scoring,
            catalog,
            history,
            divisions,
        })
    }

    /// Generate assignments for every block owned by the caller's partition.
    ///
    /// Per-bunk failures are collected into the report, never raised; partial
    /// success is the normal outcome.
    pub fn generate(
        &self,
        store: &mut dyn DayStore,
        locks: &mut LockTable,
        date: NaiveDate,
        role: Role,
        granted_divisions: &[String],
        blocks: &[ScheduleBlock],
        timestamp: NaiveDateTime,
    ) -> Result<GenerationReport, GenerationError> {
        let partition = resolve_partition(role, granted_divisions, self.divisions)?;
        self.run_with_retries(store, date, &partition, |ctx| {
            Ok(self.generate_pass(ctx, locks, blocks, timestamp))
        })
    }

    /// Apply a manual placement at a point in time.
    ///
    /// An edit targeting a bunk outside the caller's partition is rejected
    /// before any state is touched, unless the caller chose bypass.
    pub fn apply_edit(
        &self,
        store: &mut dyn DayStore,
        locks: &mut LockTable,
        date: NaiveDate,
        role: Role,
        granted_divisions: &[String],
        edit: &EditRequest,
    ) -> Result<GenerationReport, GenerationError> {
        let partition = resolve_partition(role, granted_divisions, self.divisions)?;
        if !partition.owns_bunk(&edit.bunk) && edit.decision != ResolutionDecision::Bypass {
            return Err(GenerationError::PermissionDenied {
                bunk: edit.bunk.clone(),
            });
        }
        self.run_with_retries(store, date, &partition, |ctx| {
            self.edit_pass(ctx, locks, edit)
        })
    }

    /// Fetch, run one pass, merge, persist; retry the whole sequence on a
    /// stale optimistic version, up to the configured budget.
    fn run_with_retries<F>(
        &self,
        store: &mut dyn DayStore,
        date: NaiveDate,
        partition: &Partition,
        mut pass: F,
    ) -> Result<GenerationReport, GenerationError>
    where
        F: FnMut(&mut GenerationContext) -> Result<PassOutput, GenerationError>,
    {
        let attempts = self.config.max_persist_retries + 1;
        for attempt in 0..attempts {
            let existing = store.fetch(date)?;
            let expected = existing.version;
            let mut ctx = GenerationContext {
                grid: TimeGrid::generate(self.config),
                partition: partition.clone(),
                ledger: ResourceLedger::new(self.catalog),
                existing,
            };

            let output = pass(&mut ctx)?;

            let mut my_bunks = partition.bunks.clone();
            my_bunks.extend(output.extra_bunks.iter().cloned());
            let merged = merge(&ctx.existing.day, &output.day, &my_bunks);

            match store.persist(date, expected, &merged.map) {
                Ok(version) => {
                    log_checks!(
                        self.config.verbosity,
                        "Persisted version {} on attempt {}",
                        version,
                        attempt + 1
                    );
                    return Ok(GenerationReport {
                        placements: output.placements,
                        reassignments: output.reassignments,
                        failures: output.failures,
                        notifications: output.notifications,
                        foreign_bunks: merged.foreign_bunks,
                        version,
                    });
                }
                Err(StoreError::VersionConflict { actual, .. }) => {
                    log_changes!(
                        self.config.verbosity,
                        "Stale version on attempt {} (stored {}), refetching",
                        attempt + 1,
                        actual
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(GenerationError::RetriesExhausted { attempts })
    }

    fn generate_pass(
        &self,
        ctx: &mut GenerationContext,
        locks: &mut LockTable,
        blocks: &[ScheduleBlock],
        timestamp: NaiveDateTime,
    ) -> PassOutput {
        let slot_count = ctx.grid.len();
        let mut out = PassOutput::default();
        let mut day = working_day(&ctx.existing.day, slot_count);

        // Own bunks are rebuilt from scratch: only fixed and pinned entries
        // survive a regeneration. Anything else left in place would carry
        // usage the ledger never learns about.
        for (bunk, entries) in day.iter_mut() {
            if !ctx.partition.owns_bunk(bunk) {
                continue;
            }
            for entry in entries.iter_mut() {
                if !is_protected(entry) {
                    *entry = None;
                }
            }
        }

        // Foreign work blocks the caller implicitly: every bunk outside the
        // partition is reserved into the ledger before anything else runs.
        ctx.ledger
            .seed_excluding(&ctx.existing.day, &ctx.partition.bunks);
        self.seed_protected_runs(ctx, &day);

        let scorer = CandidateScorer::new(self.catalog, self.history, self.scoring);
        let no_exclusions = FxHashSet::default();

        for block in blocks {
            if !ctx.partition.owns_division(&block.division) {
                continue;
            }
            let slots = ctx.grid.slots_for_block(block);
            if slots.is_empty() {
                log_debug!(
                    self.config.verbosity,
                    "Block {} for {} spans no slots, skipping",
                    block.event_label,
                    block.division
                );
                continue;
            }

            let mut bunks = self.division_bunks(&block.division);
            bunks.sort_by_key(|b| bunk_sort_key(b));

            for bunk in bunks {
                let entries = day
                    .entry(bunk.clone())
                    .or_insert_with(|| vec![None; slot_count]);
                if slots.iter().any(|&slot| is_protected(&entries[slot])) {
                    log_debug!(
                        self.config.verbosity,
                        "{} holds a fixed/pinned entry in block {}, keeping it",
                        bunk,
                        block.event_label
                    );
                    continue;
                }

                let best = scorer.best_candidate(
                    &bunk,
                    &block.division,
                    &slots,
                    &no_exclusions,
                    entries,
                    &ctx.ledger,
                    locks,
                );
                match best {
                    Some((candidate, cost)) => {
                        for &slot in &slots {
                            ctx.ledger.try_reserve(slot, &candidate.resource, &bunk);
                        }
                        write_run(
                            entries,
                            &slots,
                            &candidate.resource,
                            &candidate.activity,
                            AssignmentFlag::Open,
                            timestamp,
                        );
                        log_checks!(
                            self.config.verbosity,
                            "Placed {} on {} (cost {:.1}) at slots {:?}",
                            bunk,
                            candidate.resource,
                            cost,
                            slots
                        );
                        out.placements.push(Placement {
                            bunk,
                            resource: candidate.resource,
                            activity: candidate.activity,
                            slots: slots.clone(),
                        });
                    }
                    None => {
                        for &slot in &slots {
                            entries[slot] = None;
                        }
                        log_changes!(
                            self.config.verbosity,
                            "No feasible candidate for {} in block {}; left free",
                            bunk,
                            block.event_label
                        );
                        out.failures.push(FailedBunk {
                            bunk,
                            slots: slots.clone(),
                            reason: "no feasible candidate".to_string(),
                        });
                    }
                }
            }
        }

        out.day = day;
        out
    }

    fn edit_pass(
        &self,
        ctx: &mut GenerationContext,
        locks: &mut LockTable,
        edit: &EditRequest,
    ) -> Result<PassOutput, GenerationError> {
        let slot_count = ctx.grid.len();
        let first = ctx
            .grid
            .first_slot_at_or_near(edit.at_minute)
            .ok_or_else(|| GenerationError::InvalidConfig("time grid is empty".to_string()))?;
        let width = ctx.grid.slot_width().max(1);
        let count = (edit.duration_minutes.div_ceil(width)).max(1) as usize;
        let slots: Vec<usize> = (first..slot_count.min(first + count)).collect();

        // For an edit, everything except the edited bunk is settled state.
        let mut excluded = FxHashSet::default();
        excluded.insert(edit.bunk.clone());
        ctx.ledger.seed_excluding(&ctx.existing.day, &excluded);

        let mut out = PassOutput::default();
        let mut day = working_day(&ctx.existing.day, slot_count);
        self.place_with_decision(ctx, locks, &mut day, edit, &slots, &mut out);
        out.day = day;
        Ok(out)
    }

    /// Write one requested placement, resolving collisions per the caller's
    /// decision: own-partition collisions are always repaired via the
    /// solver; foreign collisions either persist as a notified
    /// double-booking or, under bypass, are repaired as if owned.
    fn place_with_decision(
        &self,
        ctx: &mut GenerationContext,
        locks: &mut LockTable,
        day: &mut DayMap,
        edit: &EditRequest,
        slots: &[usize],
        out: &mut PassOutput,
    ) {
        let resource = edit.resource.as_str();
        let activity = self
            .catalog
            .get(resource)
            .map(|p| p.activity_name().to_string())
            .unwrap_or_else(|| resource.to_string());

        // A bypass edit may target a bunk the caller does not own; its new
        // entries must survive the merge like any other rewritten foreign
        // bunk.
        if !ctx.partition.owns_bunk(&edit.bunk) {
            out.extra_bunks.insert(edit.bunk.clone());
        }

        let report = check_placement(&ctx.ledger, locks, &ctx.partition, resource, slots, &edit.bunk);

        if !report.is_clear() {
            let mut to_move: Vec<(String, Vec<usize>)> = report
                .editable
                .iter()
                .map(|b| (b.clone(), conflict_slots(&ctx.ledger, day, resource, slots, b)))
                .collect();

            if report.requires_decision() {
                match edit.decision {
                    ResolutionDecision::Notify => {
                        log_changes!(
                            self.config.verbosity,
                            "Double-booking {} over {:?}; owners will be notified",
                            resource,
                            report.non_editable
                        );
                        out.notifications.push(Notification {
                            resource: resource.to_string(),
                            slots: slots.to_vec(),
                            placed_bunk: edit.bunk.clone(),
                            foreign_bunks: report.non_editable.clone(),
                            timestamp: edit.timestamp,
                        });
                    }
                    ResolutionDecision::Bypass => {
                        log_changes!(
                            self.config.verbosity,
                            "Bypass: resolving over foreign bunks {:?} on {}",
                            report.non_editable,
                            resource
                        );
                        for bunk in &report.non_editable {
                            to_move.push((
                                bunk.clone(),
                                conflict_slots(&ctx.ledger, day, resource, slots, bunk),
                            ));
                            out.extra_bunks.insert(bunk.clone());
                        }
                    }
                }
            }

            if !to_move.is_empty() {
                let solver = ReassignmentSolver::new(
                    self.catalog,
                    self.history,
                    self.scoring,
                    self.divisions,
                    self.config.verbosity,
                );
                let trigger = TriggerPlacement {
                    bunk: edit.bunk.clone(),
                    resource: resource.to_string(),
                    slots: slots.to_vec(),
                };
                let outcome =
                    solver.resolve(&trigger, &to_move, day, locks, ctx.grid.len(), edit.timestamp);
                out.reassignments.extend(outcome.reassigned);
                out.failures.extend(outcome.failed);
            }
        }

        // Under notify the reservation can be refused; the double-booking
        // then lives in the day map only, the ledger stays within capacity.
        for &slot in slots {
            ctx.ledger.try_reserve(slot, resource, &edit.bunk);
        }
        let entries = day
            .entry(edit.bunk.clone())
            .or_insert_with(|| vec![None; ctx.grid.len()]);
        write_run(
            entries,
            slots,
            resource,
            &activity,
            AssignmentFlag::Fixed,
            edit.timestamp,
        );
        out.placements.push(Placement {
            bunk: edit.bunk.clone(),
            resource: resource.to_string(),
            activity,
            slots: slots.to_vec(),
        });
    }

    /// Reserve the usage of own-partition fixed and pinned runs so candidate
    /// search never books over them.
    fn seed_protected_runs(&self, ctx: &mut GenerationContext, day: &DayMap) {
        let mut bunks: Vec<&String> = day
            .keys()
            .filter(|b| ctx.partition.owns_bunk(b))
            .collect();
        bunks.sort_unstable();

        for bunk in bunks {
            let entries = &day[bunk];
            let mut slot = 0;
            while slot < entries.len() {
                let Some(entry) = &entries[slot] else {
                    slot += 1;
                    continue;
                };
                if !entry.head
                    || !matches!(entry.flag, AssignmentFlag::Fixed | AssignmentFlag::Pinned)
                {
                    slot += 1;
                    continue;
                }
                let mut end = slot + 1;
                while end < entries.len() {
                    match &entries[end] {
                        Some(next) if !next.head && next.resource == entry.resource => end += 1,
                        _ => break,
                    }
                }
                for s in slot..end {
                    ctx.ledger.try_reserve(s, &entry.resource, bunk);
                }
                slot = end;
            }
        }
    }

    fn division_bunks(&self, name: &str) -> Vec<String> {
        self.divisions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.bunks.clone())
            .unwrap_or_default()
    }
}

/// Working copy of the persisted day, every bunk padded to the grid length.
fn working_day(existing: &DayMap, slot_count: usize) -> DayMap {
    let mut day = existing.clone();
    for entries in day.values_mut() {
        if entries.len() < slot_count {
            entries.resize(slot_count, None);
        }
    }
    day
}

fn is_protected(entry: &Option<Assignment>) -> bool {
    entry
        .as_ref()
        .is_some_and(|a| matches!(a.flag, AssignmentFlag::Fixed | AssignmentFlag::Pinned))
}

fn write_run(
    entries: &mut BunkDay,
    slots: &[usize],
    resource: &str,
    activity: &str,
    flag: AssignmentFlag,
    timestamp: NaiveDateTime,
) {
    for (i, &slot) in slots.iter().enumerate() {
        entries[slot] =
            Some(Assignment::new(resource, activity, i == 0, timestamp).with_flag(flag));
    }
}

/// Slots where `bunk` currently books the resource, expanded to the full
/// head/continuation run each colliding slot belongs to.
///
/// Reassigning only the overlapping slots would strand the rest of the run
/// as headless continuation entries that ledger seeding can never see.
fn conflict_slots(
    ledger: &ResourceLedger,
    day: &DayMap,
    resource: &str,
    slots: &[usize],
    bunk: &str,
) -> Vec<usize> {
    let entries = day.get(bunk);
    let mut expanded: Vec<usize> = Vec::new();
    for &slot in slots {
        if !ledger.booked_by(slot, resource).iter().any(|b| b == bunk) {
            continue;
        }
        let run = match entries {
            Some(entries) => run_slots(entries, slot),
            None => vec![slot],
        };
        for s in run {
            if !expanded.contains(&s) {
                expanded.push(s);
            }
        }
    }
    expanded.sort_unstable();
    expanded
}

/// All slots of the head/continuation run containing `slot`.
fn run_slots(entries: &BunkDay, slot: usize) -> Vec<usize> {
    let Some(anchor) = entries.get(slot).and_then(|e| e.as_ref()) else {
        return vec![slot];
    };
    let mut start = slot;
    while !entries[start].as_ref().is_some_and(|a| a.head) {
        let Some(prev) = start.checked_sub(1) else {
            break;
        };
        let continues = entries[prev]
            .as_ref()
            .is_some_and(|a| a.resource == anchor.resource);
        if !continues {
            break;
        }
        start = prev;
    }
    let mut end = slot + 1;
    while end < entries.len() {
        match entries[end].as_ref() {
            Some(next) if !next.head && next.resource == anchor.resource => end += 1,
            _ => break,
        }
    }
    (start..end).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceProperties;
    use crate::store::InMemoryDayStore;
    use chrono::NaiveDate;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
    }

    fn stamp() -> NaiveDateTime {
        date().and_hms_opt(9, 0, 0).unwrap()
    }

    // Grid 9:00-17:00, 30-minute slots: 16 slots, slot 0 starts at 540.
    fn config() -> GenerationConfig {
        GenerationConfig {
            slot_width_minutes: 30,
            day_start_minute: 540,
            day_end_minute: 1020,
            max_persist_retries: 3,
            verbosity: 0,
        }
    }

    fn resource(name: &str, activity: &str, capacity: u32) -> ResourceProperties {
        let mut props = ResourceProperties::new(name).with_capacity(capacity);
        props.activity = Some(activity.to_string());
        props
    }

    fn two_resource_catalog() -> ResourceCatalog {
        let mut catalog = ResourceCatalog::new();
        catalog.insert(resource("Field", "Soccer", 1));
        catalog.insert(resource("Range", "Archery", 1));
        catalog
    }

    fn block(division: &str, label: &str, start: u32, end: u32) -> ScheduleBlock {
        ScheduleBlock {
            division: division.to_string(),
            event_label: label.to_string(),
            start_minute: start,
            end_minute: end,
        }
    }

    fn entry_run(resource: &str, activity: &str, slots: &[usize], flag: AssignmentFlag) -> BunkDay {
        let mut entries: BunkDay = vec![None; 16];
        for (i, &slot) in slots.iter().enumerate() {
            entries[slot] =
                Some(Assignment::new(resource, activity, i == 0, stamp()).with_flag(flag));
        }
        entries
    }

    #[test]
    fn test_generate_places_every_bunk() {
        let config = config();
        let scoring = ScoringConfig::default();
        let catalog = two_resource_catalog();
        let history = RotationHistory::new();
        let divisions = vec![Division::new(
            "Juniors",
            vec!["B1".to_string(), "B2".to_string()],
        )];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut locks = LockTable::new();
        let blocks = vec![block("Juniors", "Activity 1", 540, 600)];

        let report = orch
            .generate(&mut store, &mut locks, date(), Role::Owner, &[], &blocks, stamp())
            .unwrap();

        assert!(report.complete());
        assert_eq!(report.placements.len(), 2);
        assert_eq!(report.version, 1);

        let day = store.fetch(date()).unwrap().day;
        // Exclusive resources: the two bunks hold different ones.
        let r1 = &day["B1"][0].as_ref().unwrap().resource;
        let r2 = &day["B2"][0].as_ref().unwrap().resource;
        assert_ne!(r1, r2);
        // Two-slot block: head then continuation.
        assert!(day["B1"][0].as_ref().unwrap().head);
        assert!(!day["B1"][1].as_ref().unwrap().head);
    }

    #[test]
    fn test_generate_never_repeats_activity_same_day() {
        let config = config();
        let scoring = ScoringConfig::default();
        let catalog = two_resource_catalog();
        let history = RotationHistory::new();
        let divisions = vec![Division::new("Juniors", vec!["B1".to_string()])];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut locks = LockTable::new();
        let blocks = vec![
            block("Juniors", "Period 1", 540, 570),
            block("Juniors", "Period 2", 570, 600),
        ];

        let report = orch
            .generate(&mut store, &mut locks, date(), Role::Owner, &[], &blocks, stamp())
            .unwrap();

        assert!(report.complete());
        let day = store.fetch(date()).unwrap().day;
        let a1 = &day["B1"][0].as_ref().unwrap().activity;
        let a2 = &day["B1"][1].as_ref().unwrap().activity;
        assert_ne!(a1, a2);
    }

    #[test]
    fn test_capacity_two_overflows_to_next_best() {
        // Alpha holds two bunks; the third lands on its next-best candidate.
        let config = config();
        let scoring = ScoringConfig::default();
        let mut catalog = ResourceCatalog::new();
        catalog.insert(resource("Alpha", "Swim", 2));
        catalog.insert(resource("Beta", "Hike", 1));
        let history = RotationHistory::new();
        let divisions = vec![Division::new(
            "Juniors",
            vec!["B1".to_string(), "B2".to_string(), "B3".to_string()],
        )];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut locks = LockTable::new();
        let blocks = vec![block("Juniors", "Swim Period", 540, 570)];

        let report = orch
            .generate(&mut store, &mut locks, date(), Role::Owner, &[], &blocks, stamp())
            .unwrap();

        assert!(report.complete());
        let by_bunk: Vec<(&str, &str)> = report
            .placements
            .iter()
            .map(|p| (p.bunk.as_str(), p.resource.as_str()))
            .collect();
        assert_eq!(
            by_bunk,
            vec![("B1", "Alpha"), ("B2", "Alpha"), ("B3", "Beta")]
        );
    }

    #[test]
    fn test_foreign_usage_blocks_generation() {
        let config = config();
        let scoring = ScoringConfig::default();
        let catalog = two_resource_catalog();
        let history = RotationHistory::new();
        let divisions = vec![
            Division::new("Juniors", vec!["B1".to_string()]),
            Division::new("Seniors", vec!["F1".to_string()]),
        ];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut existing = DayMap::default();
        existing.insert(
            "F1".to_string(),
            entry_run("Field", "Soccer", &[0], AssignmentFlag::Open),
        );
        store.persist(date(), 0, &existing).unwrap();

        let mut locks = LockTable::new();
        let blocks = vec![block("Juniors", "Period 1", 540, 570)];
        let grants = vec!["Juniors".to_string()];

        let report = orch
            .generate(
                &mut store,
                &mut locks,
                date(),
                Role::Scheduler,
                &grants,
                &blocks,
                stamp(),
            )
            .unwrap();

        // Field is taken by the foreign bunk; B1 gets Range.
        assert_eq!(report.placements[0].resource, "Range");
        assert_eq!(report.foreign_bunks, vec!["F1".to_string()]);

        let day = store.fetch(date()).unwrap().day;
        assert_eq!(day["F1"], existing["F1"]);
    }

    #[test]
    fn test_fixed_entries_survive_generation() {
        let config = config();
        let scoring = ScoringConfig::default();
        let catalog = two_resource_catalog();
        let history = RotationHistory::new();
        let divisions = vec![Division::new(
            "Juniors",
            vec!["B1".to_string(), "B2".to_string()],
        )];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut existing = DayMap::default();
        existing.insert(
            "B1".to_string(),
            entry_run("Range", "Archery", &[0], AssignmentFlag::Fixed),
        );
        store.persist(date(), 0, &existing).unwrap();

        let mut locks = LockTable::new();
        let blocks = vec![block("Juniors", "Period 1", 540, 570)];

        let report = orch
            .generate(&mut store, &mut locks, date(), Role::Owner, &[], &blocks, stamp())
            .unwrap();

        // Only B2 got a fresh placement, and the fixed Range usage was
        // seeded so B2 could not take it.
        assert_eq!(report.placements.len(), 1);
        assert_eq!(report.placements[0].bunk, "B2");
        assert_eq!(report.placements[0].resource, "Field");

        let day = store.fetch(date()).unwrap().day;
        let kept = day["B1"][0].as_ref().unwrap();
        assert_eq!(kept.resource, "Range");
        assert_eq!(kept.flag, AssignmentFlag::Fixed);
    }

    #[test]
    fn test_edit_outside_partition_denied() {
        let config = config();
        let scoring = ScoringConfig::default();
        let catalog = two_resource_catalog();
        let history = RotationHistory::new();
        let divisions = vec![
            Division::new("Juniors", vec!["B1".to_string()]),
            Division::new("Seniors", vec!["F1".to_string()]),
        ];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut locks = LockTable::new();
        let grants = vec!["Juniors".to_string()];
        let edit = EditRequest {
            bunk: "F1".to_string(),
            resource: "Range".to_string(),
            at_minute: 540,
            duration_minutes: 30,
            decision: ResolutionDecision::Notify,
            timestamp: stamp(),
        };

        let err = orch
            .apply_edit(&mut store, &mut locks, date(), Role::Scheduler, &grants, &edit)
            .unwrap_err();
        assert!(matches!(err, GenerationError::PermissionDenied { bunk } if bunk == "F1"));
        // Rejected before any state was touched.
        assert_eq!(store.fetch(date()).unwrap().version, 0);
    }

    #[test]
    fn test_edit_resolves_nearest_slot() {
        let config = config();
        let scoring = ScoringConfig::default();
        let catalog = two_resource_catalog();
        let history = RotationHistory::new();
        let divisions = vec![Division::new("Juniors", vec!["B1".to_string()])];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut locks = LockTable::new();
        let edit = EditRequest {
            bunk: "B1".to_string(),
            resource: "Range".to_string(),
            // 10:05 AM: nearest slot starts at 10:00 (slot 2).
            at_minute: 605,
            duration_minutes: 30,
            decision: ResolutionDecision::Notify,
            timestamp: stamp(),
        };

        let report = orch
            .apply_edit(&mut store, &mut locks, date(), Role::Owner, &[], &edit)
            .unwrap();
        assert_eq!(report.placements[0].slots, vec![2]);

        let day = store.fetch(date()).unwrap().day;
        let placed = day["B1"][2].as_ref().unwrap();
        assert_eq!(placed.resource, "Range");
        assert_eq!(placed.flag, AssignmentFlag::Fixed);
    }

    #[test]
    fn test_edit_auto_resolves_own_partition_conflict() {
        let config = config();
        let scoring = ScoringConfig::default();
        let mut catalog = two_resource_catalog();
        catalog.insert(resource("Court", "Hoops", 1));
        let history = RotationHistory::new();
        let divisions = vec![Division::new(
            "Juniors",
            vec!["B1".to_string(), "B2".to_string()],
        )];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut existing = DayMap::default();
        existing.insert(
            "B2".to_string(),
            entry_run("Range", "Archery", &[3], AssignmentFlag::Open),
        );
        store.persist(date(), 0, &existing).unwrap();

        let mut locks = LockTable::new();
        let edit = EditRequest {
            bunk: "B1".to_string(),
            resource: "Range".to_string(),
            at_minute: 630,
            duration_minutes: 30,
            decision: ResolutionDecision::Notify,
            timestamp: stamp(),
        };

        let report = orch
            .apply_edit(&mut store, &mut locks, date(), Role::Owner, &[], &edit)
            .unwrap();

        assert_eq!(report.reassignments.len(), 1);
        assert_eq!(report.reassignments[0].bunk, "B2");
        assert!(report.notifications.is_empty());

        let day = store.fetch(date()).unwrap().day;
        assert_eq!(day["B1"][3].as_ref().unwrap().resource, "Range");
        let moved = day["B2"][3].as_ref().unwrap();
        assert_ne!(moved.resource, "Range");
        assert_eq!(moved.flag, AssignmentFlag::AutoReassigned);
    }

    #[test]
    fn test_foreign_conflict_notify_keeps_double_booking() {
        let config = config();
        let scoring = ScoringConfig::default();
        let mut catalog = two_resource_catalog();
        catalog.insert(resource("Court", "Hoops", 1));
        let history = RotationHistory::new();
        let divisions = vec![
            Division::new("Juniors", vec!["B1".to_string()]),
            Division::new("Seniors", vec!["F1".to_string()]),
        ];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut existing = DayMap::default();
        existing.insert(
            "F1".to_string(),
            entry_run("Range", "Archery", &[3], AssignmentFlag::Open),
        );
        store.persist(date(), 0, &existing).unwrap();

        let mut locks = LockTable::new();
        let grants = vec!["Juniors".to_string()];
        let edit = EditRequest {
            bunk: "B1".to_string(),
            resource: "Range".to_string(),
            at_minute: 630,
            duration_minutes: 30,
            decision: ResolutionDecision::Notify,
            timestamp: stamp(),
        };

        let report = orch
            .apply_edit(&mut store, &mut locks, date(), Role::Scheduler, &grants, &edit)
            .unwrap();

        assert_eq!(report.notifications.len(), 1);
        let note = &report.notifications[0];
        assert_eq!(note.resource, "Range");
        assert_eq!(note.placed_bunk, "B1");
        assert_eq!(note.foreign_bunks, vec!["F1".to_string()]);

        // The double-booking persists: both bunks hold Range at slot 3.
        let day = store.fetch(date()).unwrap().day;
        assert_eq!(day["F1"][3].as_ref().unwrap().resource, "Range");
        assert_eq!(day["B1"][3].as_ref().unwrap().resource, "Range");
    }

    #[test]
    fn test_bypass_edit_on_foreign_bunk_persists() {
        let config = config();
        let scoring = ScoringConfig::default();
        let catalog = two_resource_catalog();
        let history = RotationHistory::new();
        let divisions = vec![
            Division::new("Juniors", vec!["B1".to_string()]),
            Division::new("Seniors", vec!["F1".to_string()]),
        ];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut locks = LockTable::new();
        let grants = vec!["Juniors".to_string()];
        let edit = EditRequest {
            bunk: "F1".to_string(),
            resource: "Range".to_string(),
            at_minute: 630,
            duration_minutes: 30,
            decision: ResolutionDecision::Bypass,
            timestamp: stamp(),
        };

        let report = orch
            .apply_edit(&mut store, &mut locks, date(), Role::Scheduler, &grants, &edit)
            .unwrap();
        assert_eq!(report.placements[0].bunk, "F1");

        // The write the report claims must actually be in the stored day.
        let day = store.fetch(date()).unwrap().day;
        let placed = day["F1"][3].as_ref().unwrap();
        assert_eq!(placed.resource, "Range");
        assert_eq!(placed.flag, AssignmentFlag::Fixed);
    }

    #[test]
    fn test_edit_over_partial_run_moves_whole_run() {
        let config = config();
        let scoring = ScoringConfig::default();
        let mut catalog = two_resource_catalog();
        catalog.insert(resource("Court", "Hoops", 1));
        let history = RotationHistory::new();
        let divisions = vec![Division::new(
            "Juniors",
            vec!["B1".to_string(), "B2".to_string()],
        )];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut existing = DayMap::default();
        existing.insert(
            "B2".to_string(),
            entry_run("Range", "Archery", &[3, 4], AssignmentFlag::Open),
        );
        store.persist(date(), 0, &existing).unwrap();

        let mut locks = LockTable::new();
        // The edit contests only slot 3 of B2's two-slot run.
        let edit = EditRequest {
            bunk: "B1".to_string(),
            resource: "Range".to_string(),
            at_minute: 630,
            duration_minutes: 30,
            decision: ResolutionDecision::Notify,
            timestamp: stamp(),
        };

        let report = orch
            .apply_edit(&mut store, &mut locks, date(), Role::Owner, &[], &edit)
            .unwrap();

        // The whole run moves, not just the contested slot.
        assert_eq!(report.reassignments.len(), 1);
        assert_eq!(report.reassignments[0].slots, vec![3, 4]);

        let day = store.fetch(date()).unwrap().day;
        assert_eq!(day["B1"][3].as_ref().unwrap().resource, "Range");
        let head = day["B2"][3].as_ref().unwrap();
        let cont = day["B2"][4].as_ref().unwrap();
        assert_ne!(head.resource, "Range");
        assert_eq!(head.resource, cont.resource);
        assert!(head.head);
        assert!(!cont.head);
    }

    #[test]
    fn test_generation_clears_stale_open_entries() {
        let config = config();
        let scoring = ScoringConfig::default();
        let catalog = two_resource_catalog();
        let history = RotationHistory::new();
        let divisions = vec![Division::new(
            "Juniors",
            vec!["B1".to_string(), "B2".to_string()],
        )];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        // A leftover open entry at a slot no block covers.
        let mut existing = DayMap::default();
        existing.insert(
            "B1".to_string(),
            entry_run("Range", "Archery", &[5], AssignmentFlag::Open),
        );
        store.persist(date(), 0, &existing).unwrap();

        let mut locks = LockTable::new();
        let blocks = vec![block("Juniors", "Period 1", 540, 570)];

        let report = orch
            .generate(&mut store, &mut locks, date(), Role::Owner, &[], &blocks, stamp())
            .unwrap();
        assert_eq!(report.placements.len(), 2);

        // Regeneration rebuilds the partition: the stale entry is gone, so
        // its usage can never hide from a later run's ledger seeding.
        let day = store.fetch(date()).unwrap().day;
        assert!(day["B1"][5].is_none());
        assert!(day["B1"][0].is_some());
    }

    #[test]
    fn test_foreign_conflict_bypass_reassigns_foreign_bunk() {
        let config = config();
        let scoring = ScoringConfig::default();
        let mut catalog = two_resource_catalog();
        catalog.insert(resource("Court", "Hoops", 1));
        let history = RotationHistory::new();
        let divisions = vec![
            Division::new("Juniors", vec!["B1".to_string()]),
            Division::new("Seniors", vec!["F1".to_string()]),
        ];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut existing = DayMap::default();
        existing.insert(
            "F1".to_string(),
            entry_run("Range", "Archery", &[3], AssignmentFlag::Open),
        );
        store.persist(date(), 0, &existing).unwrap();

        let mut locks = LockTable::new();
        let grants = vec!["Juniors".to_string()];
        let edit = EditRequest {
            bunk: "B1".to_string(),
            resource: "Range".to_string(),
            at_minute: 630,
            duration_minutes: 30,
            decision: ResolutionDecision::Bypass,
            timestamp: stamp(),
        };

        let report = orch
            .apply_edit(&mut store, &mut locks, date(), Role::Scheduler, &grants, &edit)
            .unwrap();

        assert_eq!(report.reassignments.len(), 1);
        assert_eq!(report.reassignments[0].bunk, "F1");
        assert!(report.notifications.is_empty());

        // The lock table reflects the editing bunk on the contested resource.
        assert!(locks.is_locked("Range", 3));
        assert_eq!(locks.owner_of("Range", 3), Some("B1"));

        let day = store.fetch(date()).unwrap().day;
        assert_eq!(day["B1"][3].as_ref().unwrap().resource, "Range");
        let moved = day["F1"][3].as_ref().unwrap();
        assert_ne!(moved.resource, "Range");
        assert_eq!(moved.flag, AssignmentFlag::AutoReassigned);
    }

    /// Store double where another scheduler slips a write between the
    /// caller's fetch and persist, a configured number of times.
    struct ContentiousStore {
        inner: InMemoryDayStore,
        conflicts_remaining: u32,
    }

    impl DayStore for ContentiousStore {
        fn fetch(&self, date: NaiveDate) -> Result<VersionedDay, StoreError> {
            self.inner.fetch(date)
        }

        fn persist(
            &mut self,
            date: NaiveDate,
            expected_version: u64,
            day: &DayMap,
        ) -> Result<u64, StoreError> {
            if self.conflicts_remaining > 0 {
                self.conflicts_remaining -= 1;
                let current = self.inner.fetch(date)?;
                self.inner.persist(date, current.version, &current.day)?;
            }
            self.inner.persist(date, expected_version, day)
        }
    }

    #[test]
    fn test_version_conflict_retries_and_succeeds() {
        let config = config();
        let scoring = ScoringConfig::default();
        let catalog = two_resource_catalog();
        let history = RotationHistory::new();
        let divisions = vec![Division::new("Juniors", vec!["B1".to_string()])];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = ContentiousStore {
            inner: InMemoryDayStore::new(),
            conflicts_remaining: 2,
        };
        let mut locks = LockTable::new();
        let blocks = vec![block("Juniors", "Period 1", 540, 570)];

        let report = orch
            .generate(&mut store, &mut locks, date(), Role::Owner, &[], &blocks, stamp())
            .unwrap();

        // Two contended attempts bumped the version twice before ours landed.
        assert_eq!(report.version, 3);
        assert!(report.complete());
    }

    #[test]
    fn test_version_conflict_exhausts_retry_budget() {
        let config = config();
        let scoring = ScoringConfig::default();
        let catalog = two_resource_catalog();
        let history = RotationHistory::new();
        let divisions = vec![Division::new("Juniors", vec!["B1".to_string()])];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = ContentiousStore {
            inner: InMemoryDayStore::new(),
            conflicts_remaining: 99,
        };
        let mut locks = LockTable::new();
        let blocks = vec![block("Juniors", "Period 1", 540, 570)];

        let err = orch
            .generate(&mut store, &mut locks, date(), Role::Owner, &[], &blocks, stamp())
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::RetriesExhausted { attempts: 4 }
        ));
    }

    #[test]
    fn test_scheduler_without_grants_aborts() {
        let config = config();
        let scoring = ScoringConfig::default();
        let catalog = two_resource_catalog();
        let history = RotationHistory::new();
        let divisions = vec![Division::new("Juniors", vec!["B1".to_string()])];
        let orch =
            GenerationOrchestrator::new(&config, &scoring, &catalog, &history, &divisions).unwrap();

        let mut store = InMemoryDayStore::new();
        let mut locks = LockTable::new();
        let blocks = vec![block("Juniors", "Period 1", 540, 570)];

        let err = orch
            .generate(
                &mut store,
                &mut locks,
                date(),
                Role::Scheduler,
                &[],
                &blocks,
                stamp(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Partition(PartitionError::NoPartitionAssigned)
        ));
        assert_eq!(store.fetch(date()).unwrap().version, 0);
    }
}
