//! Time grid: fixed-width slots covering one day, and interval-to-slot mapping.

use chrono::NaiveTime;

use crate::config::GenerationConfig;
use crate::models::{BunkDay, ScheduleBlock, TimeSlot};

/// The day's ordered slot sequence.
///
/// Generated once per day from the grid configuration; immutable afterwards.
#[derive(Clone, Debug)]
pub struct TimeGrid {
    slots: Vec<TimeSlot>,
    slot_width: u32,
}

impl TimeGrid {
    /// Generate the day's slots from [day_start, day_end) at fixed width.
    ///
    /// A trailing remainder narrower than one slot is not emitted.
    pub fn generate(config: &GenerationConfig) -> Self {
        let width = config.slot_width_minutes;
        let mut slots = Vec::new();
        let mut start = config.day_start_minute;
        while start + width <= config.day_end_minute {
            slots.push(TimeSlot {
                index: slots.len(),
                start_minute: start,
                end_minute: start + width,
            });
            start += width;
        }
        Self {
            slots,
            slot_width: width,
        }
    }

    pub fn slots(&self) -> &[TimeSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&TimeSlot> {
        self.slots.get(index)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_width(&self) -> u32 {
        self.slot_width
    }

    /// Every slot whose start minute falls in [start_minute, end_minute).
    ///
    /// A block narrower than one slot (or zero-width) yields an empty list;
    /// a block aligned exactly to slot boundaries yields exactly
    /// `duration / slot_width` indices.
    pub fn slots_covered_by(&self, start_minute: u32, end_minute: u32) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|slot| slot.start_minute >= start_minute && slot.start_minute < end_minute)
            .map(|slot| slot.index)
            .collect()
    }

    /// Slot indices covered by an externally-produced schedule block.
    pub fn slots_for_block(&self, block: &ScheduleBlock) -> Vec<usize> {
        self.slots_covered_by(block.start_minute, block.end_minute)
    }

    /// Resolve a single point in time to a slot index.
    ///
    /// Exact start-minute match wins; otherwise the closest slot by absolute
    /// minute distance, resolving ties toward the earlier slot.
    pub fn first_slot_at_or_near(&self, target_minute: u32) -> Option<usize> {
        if let Some(slot) = self
            .slots
            .iter()
            .find(|slot| slot.start_minute == target_minute)
        {
            return Some(slot.index);
        }
        self.slots
            .iter()
            .min_by_key(|slot| {
                let distance = slot.start_minute.abs_diff(target_minute);
                (distance, slot.index)
            })
            .map(|slot| slot.index)
    }
}

/// Parse a day-structure time of the form "9:30 AM" into minutes since
/// midnight.
pub fn parse_meridiem_time(text: &str) -> Option<u32> {
    let normalized = text.trim().to_uppercase();
    let time = NaiveTime::parse_from_str(&normalized, "%I:%M %p").ok()?;
    use chrono::Timelike;
    Some(time.hour() * 60 + time.minute())
}

/// Format minutes since midnight as "H:MM AM/PM" for report and log text.
pub fn format_meridiem_time(minute: u32) -> String {
    let hour24 = (minute / 60) % 24;
    let min = minute % 60;
    let meridiem = if hour24 < 12 { "AM" } else { "PM" };
    let hour12 = match hour24 % 12 {
        0 => 12,
        h => h,
    };
    format!("{}:{:02} {}", hour12, min, meridiem)
}

/// Separator token that marks a two-activity half-period block label.
const SPLIT_SEPARATOR: char = '/';

/// Detect a block whose label indicates two half-period activities and whose
/// halves empirically hold different activities for a sample bunk.
///
/// Pure predicate: no state is touched. The sample is the bunk's current
/// per-slot entries for the day.
pub fn is_split_block(grid: &TimeGrid, block: &ScheduleBlock, sample: &BunkDay) -> bool {
    if !block.event_label.contains(SPLIT_SEPARATOR) {
        return false;
    }
    let covered = grid.slots_for_block(block);
    if covered.len() < 2 {
        return false;
    }
    let mid = covered.len() / 2;
    let first = first_activity(sample, &covered[..mid]);
    let second = first_activity(sample, &covered[mid..]);
    match (first, second) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    }
}

/// Split a block at its temporal midpoint into two independent half-blocks.
///
/// The label is split on the separator when it has exactly two parts;
/// otherwise both halves keep the original label.
pub fn split_at_midpoint(block: &ScheduleBlock) -> (ScheduleBlock, ScheduleBlock) {
    let mid = block.start_minute + (block.end_minute - block.start_minute) / 2;
    let parts: Vec<&str> = block.event_label.split(SPLIT_SEPARATOR).collect();
    let (first_label, second_label) = if parts.len() == 2 {
        (parts[0].trim().to_string(), parts[1].trim().to_string())
    } else {
        (block.event_label.clone(), block.event_label.clone())
    };
    (
        ScheduleBlock {
            division: block.division.clone(),
            event_label: first_label,
            start_minute: block.start_minute,
            end_minute: mid,
        },
        ScheduleBlock {
            division: block.division.clone(),
            event_label: second_label,
            start_minute: mid,
            end_minute: block.end_minute,
        },
    )
}

fn first_activity<'a>(sample: &'a BunkDay, indices: &[usize]) -> Option<&'a str> {
    indices
        .iter()
        .filter_map(|&i| sample.get(i).and_then(|e| e.as_ref()))
        .map(|a| a.activity.as_str())
        .next()
}
