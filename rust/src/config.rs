//! Configuration types for the generation core.

/// Grid, retry, and logging knobs for a generation/edit run.
#[derive(Clone, Debug)]
pub struct GenerationConfig {
    /// Width of one time slot in minutes.
    pub slot_width_minutes: u32,
    /// First minute of the day covered by the grid.
    pub day_start_minute: u32,
    /// One past the last minute of the day covered by the grid.
    pub day_end_minute: u32,
    /// Bounded retry budget for optimistic-version persist conflicts.
    pub max_persist_retries: u32,
    /// Logging verbosity (0=silent, 1=changes, 2=checks, 3=debug).
    pub verbosity: u8,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            slot_width_minutes: 30,
            day_start_minute: 0,
            day_end_minute: 24 * 60,
            max_persist_retries: 3,
            verbosity: 0,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.slot_width_minutes == 0 {
            return Err("slot_width_minutes must be positive".to_string());
        }
        if self.day_end_minute <= self.day_start_minute {
            return Err("day_end_minute must be after day_start_minute".to_string());
        }
        if self.day_end_minute > 24 * 60 {
            return Err("day_end_minute must be within one calendar day".to_string());
        }
        Ok(())
    }
}

/// Weights for the candidate cost model.
///
/// Costs are summed; lower total wins. Bonuses are negative, penalties
/// positive, and hard exclusions short-circuit to `f64::INFINITY` before any
/// of these weights apply.
#[derive(Clone, Debug)]
pub struct ScoringConfig {
    /// Bonus for an activity the bunk has never done.
    pub never_done_bonus: f64,
    /// Penalties by recency rank: done 1 / 2 / 3 / 4-7 / >7 days ago.
    /// Most recent is most penalized; must be strictly decreasing.
    pub recency_penalties: [f64; 5],
    /// Lifetime count above which an activity is considered over-used.
    pub frequency_threshold: u32,
    /// Penalty added when the bunk is over the frequency threshold.
    pub over_use_penalty: f64,
    /// Lifetime count below which an activity is considered under-used.
    pub underused_cutoff: u32,
    /// Bonus for an under-used activity.
    pub under_use_bonus: f64,
    /// Best-position bonus for being on a resource's preference list;
    /// scales down linearly with list position.
    pub preference_bonus: f64,
    /// Penalty for being off a non-exclusive preference list.
    pub off_list_penalty: f64,
    /// Bonus when a bunk at ordinal distance 1 already shares the resource.
    pub adjacent_share_bonus: f64,
    /// Bonus when a bunk within `near_share_distance` shares the resource.
    pub near_share_bonus: f64,
    /// Maximum ordinal distance that still earns the near-share bonus.
    pub near_share_distance: u32,
    /// Penalty when the bunk is exactly one use below a lifetime cap.
    pub cap_edge_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            never_done_bonus: -50.0,
            recency_penalties: [30.0, 20.0, 12.0, 6.0, 2.0],
            frequency_threshold: 3,
            over_use_penalty: 8.0,
            underused_cutoff: 1,
            under_use_bonus: -6.0,
            preference_bonus: -10.0,
            off_list_penalty: 12.0,
            adjacent_share_bonus: -15.0,
            near_share_bonus: -6.0,
            near_share_distance: 3,
            cap_edge_penalty: 10.0,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.never_done_bonus > 0.0 {
            return Err("never_done_bonus must not be positive".to_string());
        }
        for window in self.recency_penalties.windows(2) {
            if window[0] <= window[1] {
                return Err(
                    "recency_penalties must strictly decrease with age".to_string()
                );
            }
        }
        if self.recency_penalties.iter().any(|p| *p < 0.0) {
            return Err("recency_penalties must be non-negative".to_string());
        }
        if self.adjacent_share_bonus > 0.0
            || self.near_share_bonus > 0.0
            || self.under_use_bonus > 0.0
            || self.preference_bonus > 0.0
        {
            return Err("share/use/preference bonuses must not be positive".to_string());
        }
        if self.over_use_penalty < 0.0
            || self.off_list_penalty < 0.0
            || self.cap_edge_penalty < 0.0
        {
            return Err("penalties must be non-negative".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        GenerationConfig::default().validate().unwrap();
        ScoringConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_slot_width_rejected() {
        let config = GenerationConfig {
            slot_width_minutes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recency_rank_order_enforced() {
        let config = ScoringConfig {
            recency_penalties: [30.0, 20.0, 25.0, 6.0, 2.0],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_positive_bonus_rejected() {
        let config = ScoringConfig {
            adjacent_share_bonus: 5.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
