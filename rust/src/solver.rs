//! Cost-based local search that moves conflicting bunks off a contested
//! placement.
//!
//! Invoked when a placement conflicts. The triggering placement is locked so
//! cascading reassignment can never move the thing that caused the conflict;
//! every affected bunk is then repaired greedily, in a deterministic order
//! the sharing bonus depends on.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use rustc_hash::FxHashSet;

use crate::config::ScoringConfig;
use crate::conflict::LockTable;
use crate::ledger::ResourceLedger;
use crate::log_changes;
use crate::models::{
    bunk_sort_key, Assignment, AssignmentFlag, DayMap, Division, ResourceCatalog, RotationHistory,
};
use crate::scoring::{Candidate, CandidateScorer};

/// The placement whose conflict triggered the reassignment.
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerPlacement {
    pub bunk: String,
    pub resource: String,
    pub slots: Vec<usize>,
}

/// One bunk successfully moved to an alternative.
#[derive(Clone, Debug, PartialEq)]
pub struct ReassignedBunk {
    pub bunk: String,
    pub slots: Vec<usize>,
    pub candidate: Candidate,
}

/// One bunk for which no alternative existed; its slots were marked free.
#[derive(Clone, Debug, PartialEq)]
pub struct FailedBunk {
    pub bunk: String,
    pub slots: Vec<usize>,
    pub reason: String,
}

/// Summary of one conflict-resolution invocation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReassignmentOutcome {
    pub reassigned: Vec<ReassignedBunk>,
    pub failed: Vec<FailedBunk>,
}

impl ReassignmentOutcome {
    /// Overall success: false if any bunk could not be placed.
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Greedy per-bunk repair of a conflict set.
pub struct ReassignmentSolver<'a> {
    catalog: &'a ResourceCatalog,
    history: &'a RotationHistory,
    scoring: &'a ScoringConfig,
    divisions: &'a [Division],
    verbosity: u8,
}

impl<'a> ReassignmentSolver<'a> {
    pub fn new(
        catalog: &'a ResourceCatalog,
        history: &'a RotationHistory,
        scoring: &'a ScoringConfig,
        divisions: &'a [Division],
        verbosity: u8,
    ) -> Self {
        Self {
            catalog,
            history,
            scoring,
            divisions,
            verbosity,
        }
    }

    /// Resolve a conflict by moving every bunk in `conflicting` to its best
    /// alternative, excluding the triggering resource.
    ///
    /// Each `conflicting` element is a (bunk, conflicting slots) pair. The
    /// day map is updated in place: moved bunks get fresh entries flagged
    /// `AutoReassigned`; bunks with no alternative get their slots cleared.
    pub fn resolve(
        &self,
        trigger: &TriggerPlacement,
        conflicting: &[(String, Vec<usize>)],
        day: &mut DayMap,
        locks: &mut LockTable,
        slot_count: usize,
        timestamp: NaiveDateTime,
    ) -> ReassignmentOutcome {
        // 1. Lock the triggering placement against further reassignment.
        for &slot in &trigger.slots {
            locks.lock(&trigger.resource, slot, &trigger.bunk);
        }

        // 2. Group conflicting bunks by the slot set they conflict on.
        // BTreeMap keeps group iteration deterministic.
        let mut groups: BTreeMap<Vec<usize>, Vec<String>> = BTreeMap::new();
        for (bunk, slots) in conflicting {
            let mut key = slots.clone();
            key.sort_unstable();
            groups.entry(key).or_default().push(bunk.clone());
        }

        // 3. Seed a ledger snapshot excluding the bunks about to move, then
        // add the triggering placement's own usage.
        let moving: FxHashSet<String> =
            conflicting.iter().map(|(bunk, _)| bunk.clone()).collect();
        let mut excluded = moving.clone();
        excluded.insert(trigger.bunk.clone());
        let mut ledger = ResourceLedger::new(self.catalog);
        ledger.seed_excluding(day, &excluded);
        for &slot in &trigger.slots {
            ledger.try_reserve(slot, &trigger.resource, &trigger.bunk);
        }

        let scorer = CandidateScorer::new(self.catalog, self.history, self.scoring);
        let exclude: FxHashSet<String> = [trigger.resource.clone()].into_iter().collect();

        let mut outcome = ReassignmentOutcome::default();

        for (slots, mut bunks) in groups {
            // 4. Deterministic processing order: ascending embedded ordinal,
            // lexical fallback. The sharing bonus depends on this.
            bunks.sort_by_key(|b| bunk_sort_key(b));

            for bunk in bunks {
                let entries = day
                    .entry(bunk.clone())
                    .or_insert_with(|| vec![None; slot_count]);
                if entries.len() < slot_count {
                    entries.resize(slot_count, None);
                }
                let division = self.division_of(&bunk).unwrap_or_default();

                // 5. Best alternative excluding the triggering resource;
                // register its usage so later bunks in this pass see it.
                let best = scorer.best_candidate(
                    &bunk,
                    &division,
                    &slots,
                    &exclude,
                    entries,
                    &ledger,
                    locks,
                );

                match best {
                    Some((candidate, cost)) => {
                        for (i, &slot) in slots.iter().enumerate() {
                            ledger.try_reserve(slot, &candidate.resource, &bunk);
                            entries[slot] = Some(
                                Assignment::new(
                                    candidate.resource.clone(),
                                    candidate.activity.clone(),
                                    i == 0,
                                    timestamp,
                                )
                                .with_flag(AssignmentFlag::AutoReassigned),
                            );
                        }
                        log_changes!(
                            self.verbosity,
                            "Reassigned {} to {} (cost {:.1}) at slots {:?}",
                            bunk,
                            candidate.resource,
                            cost,
                            slots
                        );
                        outcome.reassigned.push(ReassignedBunk {
                            bunk,
                            slots: slots.clone(),
                            candidate,
                        });
                    }
                    None => {
                        for &slot in &slots {
                            entries[slot] = None;
                        }
                        log_changes!(
                            self.verbosity,
                            "No alternative for {}; marked free at slots {:?}",
                            bunk,
                            slots
                        );
                        outcome.failed.push(FailedBunk {
                            bunk,
                            slots: slots.clone(),
                            reason: "no feasible alternative resource".to_string(),
                        });
                    }
                }
            }
        }

        outcome
    }

    fn division_of(&self, bunk: &str) -> Option<String> {
        self.divisions
            .iter()
            .find(|d| d.bunks.iter().any(|b| b == bunk))
            .map(|d| d.name.clone())
    }
}
