//! Retry-slot eligibility: which of an entry's 8 numbers may be dialed.
//!
//! Slots are addressed 1..=8. A slot is eligible when it has a number and its
//! attempt count is strictly below the plan's limit for the same index.
//! The first eligible slot wins; this is not a least-tried policy.

use outdial_core::error::{OutdialError, Result};
use outdial_core::types::{DialListEntry, DialPlan, SLOT_COUNT};

/// Is slot `index` (1-based) dialable under `plan`?
pub fn slot_eligible(entry: &DialListEntry, plan: &DialPlan, index: usize) -> bool {
    if !(1..=SLOT_COUNT).contains(&index) {
        return false;
    }
    let slot = &entry.slots[index - 1];
    slot.number.is_some() && slot.attempts < plan.max_retry[index - 1]
}

/// Lowest-indexed eligible slot, or `None` when every slot is spent.
pub fn first_eligible_slot(entry: &DialListEntry, plan: &DialPlan) -> Option<usize> {
    (1..=SLOT_COUNT).find(|&i| slot_eligible(entry, plan, i))
}

pub fn has_eligible_slot(entry: &DialListEntry, plan: &DialPlan) -> bool {
    first_eligible_slot(entry, plan).is_some()
}

/// Attempt count recorded for slot `index` (1-based).
pub fn attempts_for(entry: &DialListEntry, index: usize) -> Result<u32> {
    if !(1..=SLOT_COUNT).contains(&index) {
        return Err(OutdialError::NotFound(format!(
            "slot {index} on entry {} (valid: 1..={SLOT_COUNT})",
            entry.id
        )));
    }
    Ok(entry.slots[index - 1].attempts)
}

/// Sum of attempts across all slots; selection prefers the smallest.
pub fn total_attempts(entry: &DialListEntry) -> u64 {
    entry.slots.iter().map(|s| s.attempts as u64).sum()
}
