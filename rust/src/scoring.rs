//! Candidate enumeration and cost scoring for bunk placements.
//!
//! Candidates are (resource, activity) pairs from the external catalog.
//! `cost` sums rotation recency, frequency, division preference, sharing,
//! and usage-cap terms; hard rules short-circuit to `f64::INFINITY`.
//! Lower cost wins.

use rustc_hash::FxHashSet;

use crate::config::ScoringConfig;
use crate::conflict::LockTable;
use crate::ledger::ResourceLedger;
use crate::models::{bunk_ordinal, BunkDay, ResourceCatalog, RotationHistory};

/// A feasible (resource, activity) placement option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub resource: String,
    pub activity: String,
}

/// Scores candidates for one bunk at one slot range.
///
/// Holds only borrowed, read-only inputs; all capacity accounting stays in
/// the ledger passed to each call.
pub struct CandidateScorer<'a> {
    catalog: &'a ResourceCatalog,
    history: &'a RotationHistory,
    config: &'a ScoringConfig,
}

impl<'a> CandidateScorer<'a> {
    pub fn new(
        catalog: &'a ResourceCatalog,
        history: &'a RotationHistory,
        config: &'a ScoringConfig,
    ) -> Self {
        Self {
            catalog,
            history,
            config,
        }
    }

    /// All catalog candidates for a slot range, in deterministic (sorted)
    /// order, excluding disabled resources and resources foreign-locked for
    /// any slot in range. Disabled names match case-insensitively, like
    /// every other name-keyed lookup.
    pub fn enumerate_candidates(
        &self,
        slots: &[usize],
        disabled_resources: &FxHashSet<String>,
        locks: &LockTable,
    ) -> Vec<Candidate> {
        let disabled: FxHashSet<String> = disabled_resources
            .iter()
            .map(|name| name.to_lowercase())
            .collect();
        self.catalog
            .names_sorted()
            .into_iter()
            .filter(|name| !disabled.contains(&name.to_lowercase()))
            .filter(|name| !locks.locked_in_range(name, slots))
            .map(|name| Candidate {
                resource: name.to_string(),
                activity: self
                    .catalog
                    .get(name)
                    .map(|p| p.activity_name().to_string())
                    .unwrap_or_else(|| name.to_string()),
            })
            .collect()
    }

    /// Cost of placing `candidate` for `bunk` over `slots`.
    ///
    /// `day` is the bunk's current per-slot entries (for the same-day rule);
    /// the target slots themselves are ignored since they are being
    /// replaced.
    pub fn cost(
        &self,
        bunk: &str,
        division: &str,
        slots: &[usize],
        candidate: &Candidate,
        day: &BunkDay,
        ledger: &ResourceLedger,
    ) -> f64 {
        // Hard rule: an activity already performed by this bunk earlier the
        // same day is absolutely excluded.
        let repeats_today = day.iter().enumerate().any(|(i, entry)| {
            !slots.contains(&i)
                && entry
                    .as_ref()
                    .is_some_and(|a| a.activity == candidate.activity)
        });
        if repeats_today {
            return f64::INFINITY;
        }

        let record = self.history.lookup(bunk, &candidate.activity);
        let props = self.catalog.get(&candidate.resource);

        // Usage-cap term.
        if let Some(cap) = props.and_then(|p| p.max_uses_per_bunk) {
            if record.lifetime_count >= cap {
                return f64::INFINITY;
            }
        }

        // Preference term: exclusive lists hard-exclude outsiders.
        if let Some(props) = props {
            if props.preference_exclusive
                && !props.preference.is_empty()
                && !props.preference.iter().any(|d| d == division)
            {
                return f64::INFINITY;
            }
        }

        let mut cost = 0.0;

        // Recency term.
        cost += match record.days_since_last {
            None => self.config.never_done_bonus,
            Some(days) => self.config.recency_penalties[recency_rank(days)],
        };

        // Frequency term.
        if record.lifetime_count > self.config.frequency_threshold {
            cost += self.config.over_use_penalty;
        } else if record.lifetime_count < self.config.underused_cutoff {
            cost += self.config.under_use_bonus;
        }

        // Preference term (non-exclusive part).
        if let Some(props) = props {
            if !props.preference.is_empty() {
                match props.preference.iter().position(|d| d == division) {
                    Some(idx) => {
                        let len = props.preference.len() as f64;
                        cost += self.config.preference_bonus * (len - idx as f64) / len;
                    }
                    None => cost += self.config.off_list_penalty,
                }
            }
            if let Some(cap) = props.max_uses_per_bunk {
                if record.lifetime_count + 1 == cap {
                    cost += self.config.cap_edge_penalty;
                }
            }
        }

        // Sharing term: a numerically-adjacent bunk already on the resource
        // at the same slot makes sharing attractive.
        if let Some(distance) = self.nearest_sharer_distance(bunk, slots, &candidate.resource, ledger)
        {
            if distance == 1 {
                cost += self.config.adjacent_share_bonus;
            } else if distance <= self.config.near_share_distance {
                cost += self.config.near_share_bonus;
            }
        }

        cost
    }

    /// Lowest-cost feasible candidate, or none when every candidate is
    /// excluded or out of capacity. Ties break by resource name.
    pub fn best_candidate(
        &self,
        bunk: &str,
        division: &str,
        slots: &[usize],
        exclude_resources: &FxHashSet<String>,
        day: &BunkDay,
        ledger: &ResourceLedger,
        locks: &LockTable,
    ) -> Option<(Candidate, f64)> {
        let mut scored: Vec<(Candidate, f64)> = self
            .enumerate_candidates(slots, exclude_resources, locks)
            .into_iter()
            .filter(|c| {
                slots
                    .iter()
                    .all(|&slot| ledger.remaining_capacity(slot, &c.resource) > 0)
            })
            .map(|c| {
                let cost = self.cost(bunk, division, slots, &c, day, ledger);
                (c, cost)
            })
            .filter(|(_, cost)| cost.is_finite())
            .collect();

        scored.sort_by(|(ca, a), (cb, b)| {
            a.partial_cmp(b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ca.resource.cmp(&cb.resource))
        });
        scored.into_iter().next()
    }

    fn nearest_sharer_distance(
        &self,
        bunk: &str,
        slots: &[usize],
        resource: &str,
        ledger: &ResourceLedger,
    ) -> Option<u32> {
        let ordinal = bunk_ordinal(bunk)?;
        let mut nearest: Option<u32> = None;
        for &slot in slots {
            for other in ledger.booked_by(slot, resource) {
                if other == bunk {
                    continue;
                }
                if let Some(other_ordinal) = bunk_ordinal(other) {
                    let distance = ordinal.abs_diff(other_ordinal);
                    nearest = Some(nearest.map_or(distance, |n| n.min(distance)));
                }
            }
        }
        nearest
    }
}

/// Map days-ago onto the fixed recency rank order: 1 / 2 / 3 / 4-7 / >7.
fn recency_rank(days: u32) -> usize {
    match days {
        0 | 1 => 0,
        2 => 1,
        3 => 2,
        4..=7 => 3,
        _ => 4,
    }
}
