//! Dial-list selection: which entry and which slot gets dialed next.
//!
//! Selection reads idle entries, keeps those with an eligible slot and picks
//! the least-tried one. Marking it `dialing` is a compare-and-set on the
//! store, so two schedulers racing for the same entry cannot both win.

use std::sync::Arc;

use serde_json::Value;

use outdial_core::error::{OutdialError, Result};
use outdial_core::record::{Filter, Record};
use outdial_core::traits::{CasOutcome, Clock, IdProvider, Store};
use outdial_core::types::{
    Campaign, DialListEntry, DialPlan, EntryStatus, HANGUP_NORMAL_CLEARING,
};

use crate::retry;

/// A reserved entry, ready to be dialed.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Entry as it was marked (status `dialing`, linkage set).
    pub entry: DialListEntry,
    /// Slot to dial (1-based).
    pub slot: usize,
    pub number: String,
    /// Attempts already made on `slot`.
    pub attempts: u32,
    /// Id written to `dialing_uuid`; the dialing session is keyed by it.
    pub dialing_id: String,
}

pub struct DialListSelector {
    store: Arc<dyn Store>,
    ids: Arc<dyn IdProvider>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl DialListSelector {
    pub fn new(
        store: Arc<dyn Store>,
        ids: Arc<dyn IdProvider>,
        clock: Arc<dyn Clock>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Least-tried idle entry with at least one eligible slot.
    pub fn pick_next(
        &self,
        campaign: &Campaign,
        plan: &DialPlan,
        dataset: &str,
    ) -> Result<Option<DialListEntry>> {
        let filter = Filter::all()
            .eq("status", EntryStatus::Idle.as_str())
            .ne("res_hangup", HANGUP_NORMAL_CLEARING);
        let picked = self
            .load_entries(dataset, &filter)?
            .into_iter()
            .filter(|e| retry::has_eligible_slot(e, plan))
            .min_by_key(retry::total_attempts);

        match &picked {
            Some(e) => tracing::debug!("Picked entry {} for campaign {}", e.id, campaign.id),
            None => tracing::debug!("No dialable entry in {dataset} for campaign {}", campaign.id),
        }
        Ok(picked)
    }

    /// Pick an entry and atomically flip it idle → dialing.
    ///
    /// Lost races are retried up to the configured bound; `Ok(None)` means
    /// nothing could be reserved.
    pub fn select_and_mark(
        &self,
        campaign: &Campaign,
        plan: &DialPlan,
        dataset: &str,
    ) -> Result<Option<Selection>> {
        for attempt in 1..=self.max_attempts {
            let Some(entry) = self.pick_next(campaign, plan, dataset)? else {
                return Ok(None);
            };
            match self.mark(campaign, plan, dataset, entry) {
                Ok(selection) => return Ok(Some(selection)),
                Err(e) if e.is_retryable() => {
                    tracing::debug!("Select-and-mark retry {attempt}/{}: {e}", self.max_attempts);
                }
                Err(e) => return Err(e),
            }
        }
        tracing::warn!(
            "⚠️ Gave up reserving an entry for campaign {} after {} conflicts",
            campaign.id,
            self.max_attempts
        );
        Ok(None)
    }

    /// Reserve `entry` if it is still idle and its chosen slot unchanged.
    fn mark(
        &self,
        campaign: &Campaign,
        plan: &DialPlan,
        dataset: &str,
        entry: DialListEntry,
    ) -> Result<Selection> {
        let slot = retry::first_eligible_slot(&entry, plan).ok_or_else(|| {
            OutdialError::ConcurrencyConflict(format!("entry {} has no eligible slot", entry.id))
        })?;
        let attempts = retry::attempts_for(&entry, slot)?;
        let number = entry.slots[slot - 1].number.clone().unwrap_or_default();
        let dialing_id = self.ids.new_id();

        let expected = Filter::all()
            .eq("status", EntryStatus::Idle.as_str())
            .eq(&format!("trycnt_{slot}"), attempts);
        let mut fields = Record::new();
        fields.insert("status".into(), Value::from(EntryStatus::Dialing.as_str()));
        fields.insert("dialing_uuid".into(), Value::from(dialing_id.as_str()));
        fields.insert("dialing_camp_uuid".into(), Value::from(campaign.id.as_str()));
        fields.insert("dialing_plan_uuid".into(), Value::from(plan.id.as_str()));

        match self.store.conditional_update(dataset, &entry.id, &expected, &fields)? {
            CasOutcome::Applied => {
                tracing::info!(
                    "🎯 Reserved entry {} slot {slot} ({number}) for campaign {}",
                    entry.id,
                    campaign.id
                );
                let mut entry = entry;
                entry.status = EntryStatus::Dialing;
                entry.dialing_uuid = Some(dialing_id.clone());
                entry.dialing_camp_uuid = Some(campaign.id.clone());
                entry.dialing_plan_uuid = Some(plan.id.clone());
                Ok(Selection {
                    entry,
                    slot,
                    number,
                    attempts,
                    dialing_id,
                })
            }
            CasOutcome::Conflict => Err(OutdialError::ConcurrencyConflict(format!(
                "entry {} changed before it could be reserved",
                entry.id
            ))),
        }
    }

    /// Anything left to dial at all, busy entries included.
    pub fn has_remaining_work(
        &self,
        campaign: &Campaign,
        plan: &DialPlan,
        dataset: &str,
    ) -> Result<bool> {
        let filter = Filter::all().ne("res_hangup", HANGUP_NORMAL_CLEARING);
        let remaining = self
            .load_entries(dataset, &filter)?
            .iter()
            .any(|e| retry::has_eligible_slot(e, plan));
        if !remaining {
            tracing::info!("🏁 Dial list {dataset} exhausted for campaign {}", campaign.id);
        }
        Ok(remaining)
    }

    /// Return an entry to idle and unlink it from its session.
    pub fn clear_dialing(&self, dataset: &str, entry_id: &str) -> Result<()> {
        if entry_id.is_empty() {
            return Err(OutdialError::Validation("clear_dialing without entry id".into()));
        }
        self.store.update(dataset, entry_id, &idle_fields())?;
        tracing::debug!("Cleared dialing on entry {entry_id}");
        Ok(())
    }

    /// Count one attempt on `slot`, store the hangup cause and clear dialing.
    pub fn record_result(
        &self,
        dataset: &str,
        entry_id: &str,
        slot: usize,
        hangup_cause: i64,
    ) -> Result<DialListEntry> {
        let mut entry = self.entry(dataset, entry_id)?;
        let attempts = retry::attempts_for(&entry, slot)? + 1;
        let now = self.clock.now_utc();

        let mut fields = idle_fields();
        fields.insert(format!("trycnt_{slot}"), Value::from(attempts));
        fields.insert("res_hangup".into(), Value::from(hangup_cause));
        fields.insert("tm_last_dial".into(), Value::String(now.to_rfc3339()));
        self.store.update(dataset, entry_id, &fields)?;

        entry.slots[slot - 1].attempts = attempts;
        entry.res_hangup = hangup_cause;
        entry.tm_last_dial = Some(now);
        entry.status = EntryStatus::Idle;
        entry.dialing_uuid = None;
        entry.dialing_camp_uuid = None;
        entry.dialing_plan_uuid = None;
        tracing::info!("📝 Entry {entry_id} slot {slot}: attempt {attempts}, cause {hangup_cause}");
        Ok(entry)
    }

    pub fn entry(&self, dataset: &str, entry_id: &str) -> Result<DialListEntry> {
        let rows = self.store.query(dataset, &Filter::all().eq("uuid", entry_id).limit(1))?;
        match rows.first() {
            Some(row) => DialListEntry::from_record(row),
            None => Err(OutdialError::NotFound(format!("dial list entry {dataset}/{entry_id}"))),
        }
    }

    /// Typed rows; malformed rows are skipped so one bad record cannot stall a campaign.
    fn load_entries(&self, dataset: &str, filter: &Filter) -> Result<Vec<DialListEntry>> {
        let rows = self.store.query(dataset, filter)?;
        Ok(rows
            .iter()
            .filter_map(|row| match DialListEntry::from_record(row) {
                Ok(e) => Some(e),
                Err(e) => {
                    tracing::warn!("⚠️ Skipping malformed entry in {dataset}: {e}");
                    None
                }
            })
            .collect())
    }
}

fn idle_fields() -> Record {
    let mut fields = Record::new();
    fields.insert("status".into(), Value::from(EntryStatus::Idle.as_str()));
    fields.insert("dialing_uuid".into(), Value::Null);
    fields.insert("dialing_camp_uuid".into(), Value::Null);
    fields.insert("dialing_plan_uuid".into(), Value::Null);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{DATASET, FixedClock, SeqIds, campaign, plan, seeded_store};
    use outdial_core::types::{HANGUP_NO_ANSWER, SLOT_COUNT};
    use std::thread;

    fn selector(store: Arc<dyn Store>) -> DialListSelector {
        DialListSelector::new(store, Arc::new(SeqIds::default()), Arc::new(FixedClock::default()), 3)
    }

    #[test]
    fn test_pick_prefers_fewest_attempts() {
        let entries = [
            DialListEntry::new("e1").with_slot(1, "+1001", 2),
            DialListEntry::new("e2").with_slot(1, "+1002", 0).with_slot(2, "+1003", 1),
            DialListEntry::new("e3").with_slot(1, "+1004", 0),
        ];
        let store = seeded_store([3; SLOT_COUNT], &[], &entries);
        let sel = selector(store);

        let picked = sel.pick_next(&campaign("c1"), &plan([3; SLOT_COUNT]), DATASET).unwrap().unwrap();
        assert_eq!(picked.id, "e3");
    }

    #[test]
    fn test_pick_skips_exhausted_and_cleared_entries() {
        let mut cleared = DialListEntry::new("e2").with_slot(1, "+1002", 0);
        cleared.res_hangup = HANGUP_NORMAL_CLEARING;
        let entries = [
            DialListEntry::new("e1").with_slot(1, "+1001", 3),
            cleared,
            DialListEntry::new("e3").with_slot(2, "+1003", 2),
        ];
        let store = seeded_store([3; SLOT_COUNT], &[], &entries);
        let sel = selector(store);
        let p = plan([3; SLOT_COUNT]);

        let picked = sel.pick_next(&campaign("c1"), &p, DATASET).unwrap().unwrap();
        assert_eq!(picked.id, "e3");
        assert_eq!(retry::first_eligible_slot(&picked, &p), Some(2));
    }

    #[test]
    fn test_pick_on_empty_or_unknown_dataset() {
        let store = seeded_store([3; SLOT_COUNT], &[], &[]);
        let sel = selector(store);
        assert!(sel.pick_next(&campaign("c1"), &plan([3; SLOT_COUNT]), DATASET).unwrap().is_none());
        assert!(sel.pick_next(&campaign("c1"), &plan([3; SLOT_COUNT]), "dl_none").unwrap().is_none());
    }

    #[test]
    fn test_select_and_mark_reserves_entry() {
        let store = seeded_store([3; SLOT_COUNT], &[], &[DialListEntry::new("e1").with_slot(1, "+1001", 1)]);
        let sel = selector(store.clone());
        let c1 = campaign("c1");
        let p = plan([3; SLOT_COUNT]);

        let s = sel.select_and_mark(&c1, &p, DATASET).unwrap().unwrap();
        assert_eq!((s.slot, s.number.as_str(), s.attempts), (1, "+1001", 1));
        assert_eq!(s.dialing_id, "id-1");

        let stored = sel.entry(DATASET, "e1").unwrap();
        assert_eq!(stored.status, EntryStatus::Dialing);
        assert_eq!(stored.dialing_uuid.as_deref(), Some("id-1"));
        assert_eq!(stored.dialing_camp_uuid.as_deref(), Some("c1"));
        assert_eq!(stored.dialing_plan_uuid.as_deref(), Some("plan-1"));

        // Dialing entries are not picked again.
        assert!(sel.select_and_mark(&c1, &p, DATASET).unwrap().is_none());

        sel.clear_dialing(DATASET, "e1").unwrap();
        let again = sel.select_and_mark(&c1, &p, DATASET).unwrap().unwrap();
        assert_eq!(again.entry.id, "e1");
        assert_eq!(again.dialing_id, "id-2");
    }

    #[test]
    fn test_concurrent_select_marks_once() {
        let store = seeded_store([3; SLOT_COUNT], &[], &[DialListEntry::new("e1").with_slot(1, "+1001", 0)]);
        let sel = Arc::new(selector(store));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sel = sel.clone();
                thread::spawn(move || {
                    sel.select_and_mark(&campaign("c1"), &plan([3; SLOT_COUNT]), DATASET).unwrap()
                })
            })
            .collect();
        let won = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(won, 1);
    }

    #[test]
    fn test_concurrent_select_on_sqlite() {
        let db = Arc::new(crate::store::SqliteStore::open_in_memory().unwrap());
        db.create_dial_list_table(DATASET).unwrap();
        for i in 1..=3 {
            let entry = DialListEntry::new(&format!("e{i}")).with_slot(1, &format!("+100{i}"), 0);
            db.insert(DATASET, &entry.to_record()).unwrap();
        }
        let sel = Arc::new(selector(db));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let sel = sel.clone();
                thread::spawn(move || {
                    sel.select_and_mark(&campaign("c1"), &plan([3; SLOT_COUNT]), DATASET).unwrap()
                })
            })
            .collect();
        let mut won: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .map(|s| s.entry.id)
            .collect();
        let reserved = won.len();
        won.sort();
        won.dedup();
        // Each entry is reserved at most once; lost races may give up early.
        assert_eq!(won.len(), reserved);
        assert!(!won.is_empty());
        for id in &won {
            assert_eq!(sel.entry(DATASET, id).unwrap().status, EntryStatus::Dialing);
        }
    }

    #[test]
    fn test_clear_dialing_requires_id() {
        let store = seeded_store([3; SLOT_COUNT], &[], &[]);
        let err = selector(store).clear_dialing(DATASET, "").unwrap_err();
        assert_eq!(err.as_label(), "validation");
    }

    #[test]
    fn test_record_result_counts_attempt() {
        let store = seeded_store([3; SLOT_COUNT], &[], &[DialListEntry::new("e1").with_slot(2, "+1002", 1)]);
        let sel = selector(store);
        let c1 = campaign("c1");
        let p = plan([3; SLOT_COUNT]);

        let s = sel.select_and_mark(&c1, &p, DATASET).unwrap().unwrap();
        assert_eq!(s.slot, 2);
        let done = sel.record_result(DATASET, "e1", s.slot, HANGUP_NO_ANSWER).unwrap();
        assert_eq!(done.slots[1].attempts, 2);
        assert_eq!(done.status, EntryStatus::Idle);

        let stored = sel.entry(DATASET, "e1").unwrap();
        assert_eq!(stored.slots[1].attempts, 2);
        assert_eq!(stored.res_hangup, HANGUP_NO_ANSWER);
        assert!(stored.dialing_uuid.is_none());
        assert_eq!(stored.tm_last_dial, Some(FixedClock::default().0));
    }

    #[test]
    fn test_normal_clearing_retires_entry() {
        let store = seeded_store([3; SLOT_COUNT], &[], &[DialListEntry::new("e1").with_slot(1, "+1001", 0)]);
        let sel = selector(store);
        let c1 = campaign("c1");
        let p = plan([3; SLOT_COUNT]);

        sel.record_result(DATASET, "e1", 1, HANGUP_NORMAL_CLEARING).unwrap();
        assert!(sel.pick_next(&c1, &p, DATASET).unwrap().is_none());
        assert!(!sel.has_remaining_work(&c1, &p, DATASET).unwrap());
    }

    #[test]
    fn test_remaining_work_counts_dialing_entries() {
        let store = seeded_store([1; SLOT_COUNT], &[], &[DialListEntry::new("e1").with_slot(1, "+1001", 0)]);
        let sel = selector(store);
        let c1 = campaign("c1");
        let p = plan([1; SLOT_COUNT]);

        sel.select_and_mark(&c1, &p, DATASET).unwrap().unwrap();
        assert!(sel.pick_next(&c1, &p, DATASET).unwrap().is_none());
        assert!(sel.has_remaining_work(&c1, &p, DATASET).unwrap());

        sel.record_result(DATASET, "e1", 1, HANGUP_NO_ANSWER).unwrap();
        assert!(!sel.has_remaining_work(&c1, &p, DATASET).unwrap());
    }
}
