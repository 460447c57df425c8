//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

use outdial_core::error::{OutdialError, Result};
use outdial_core::record::{Filter, Record};
use outdial_core::traits::{CasOutcome, Clock, IdProvider, Store};
use outdial_core::types::{
    Campaign, CampaignStatus, DialListEntry, DialListMaster, DialPlan, SLOT_COUNT, TABLE_CAMPAIGN,
    TABLE_DLMA, TABLE_PLAN,
};

use crate::session::{DialSnapshot, DialingSession};
use crate::store::MemoryStore;

pub const DATASET: &str = "dl_test";

/// `id-1`, `id-2`, ...
#[derive(Default)]
pub struct SeqIds(AtomicU64);

impl IdProvider for SeqIds {
    fn new_id(&self) -> String {
        format!("id-{}", self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Hands out the same id every time.
pub struct FixedIds(pub &'static str);

impl IdProvider for FixedIds {
    fn new_id(&self) -> String {
        self.0.to_string()
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Default for FixedClock {
    fn default() -> Self {
        Self(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap())
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn campaign(id: &str) -> Campaign {
    Campaign {
        id: id.to_string(),
        name: format!("camp-{id}"),
        detail: None,
        status: CampaignStatus::Running,
        plan: "plan-1".into(),
        dlma: "dlma-1".into(),
        queue: Some("sales".into()),
        in_use: true,
        tm_create: None,
        tm_update: None,
        tm_delete: None,
    }
}

pub fn plan(limits: [u32; SLOT_COUNT]) -> DialPlan {
    DialPlan::new("plan-1", limits)
}

pub fn dlma() -> DialListMaster {
    DialListMaster {
        id: "dlma-1".into(),
        name: "list".into(),
        detail: None,
        dl_table: DATASET.into(),
        in_use: true,
        tm_create: None,
        tm_update: None,
        tm_delete: None,
    }
}

pub fn session(id: &str, campaign_id: &str, entry_id: &str) -> DialingSession {
    let snapshot = DialSnapshot {
        campaign: campaign(campaign_id),
        plan: plan([3; SLOT_COUNT]),
        dlma: dlma(),
        entry: DialListEntry::new(entry_id).with_slot(1, "+15550001", 0),
        slot: 1,
        number: "+15550001".into(),
        attempts: 0,
    };
    DialingSession::new(id, snapshot, Utc::now()).unwrap()
}

/// Write plan-1, dlma-1 and the given campaigns and entries into `store`.
pub fn seed(store: &dyn Store, limits: [u32; SLOT_COUNT], campaigns: &[Campaign], entries: &[DialListEntry]) {
    store.insert(TABLE_PLAN, &plan(limits).to_record()).unwrap();
    store.insert(TABLE_DLMA, &dlma().to_record()).unwrap();
    for c in campaigns {
        store.insert(TABLE_CAMPAIGN, &c.to_record()).unwrap();
    }
    for e in entries {
        store.insert(DATASET, &e.to_record()).unwrap();
    }
}

/// Memory store holding plan-1, dlma-1 and the given campaigns and entries.
pub fn seeded_store(
    limits: [u32; SLOT_COUNT],
    campaigns: &[Campaign],
    entries: &[DialListEntry],
) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), limits, campaigns, entries);
    store
}

/// Memory store whose writes can be switched to fail with a persistence error.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_updates: AtomicBool,
    fail_cas: AtomicBool,
}

impl FlakyStore {
    pub fn seeded(limits: [u32; SLOT_COUNT], campaigns: &[Campaign], entries: &[DialListEntry]) -> Arc<Self> {
        let store = Arc::new(Self::default());
        seed(store.as_ref(), limits, campaigns, entries);
        store
    }

    pub fn fail_updates(&self, on: bool) {
        self.fail_updates.store(on, Ordering::SeqCst);
    }

    pub fn fail_cas(&self, on: bool) {
        self.fail_cas.store(on, Ordering::SeqCst);
    }
}

fn down() -> OutdialError {
    OutdialError::Persistence("db down".into())
}

impl Store for FlakyStore {
    fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>> {
        self.inner.query(table, filter)
    }

    fn update(&self, table: &str, id: &str, fields: &Record) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(down());
        }
        self.inner.update(table, id, fields)
    }

    fn conditional_update(&self, table: &str, id: &str, expected: &Filter, fields: &Record) -> Result<CasOutcome> {
        if self.fail_cas.load(Ordering::SeqCst) {
            return Err(down());
        }
        self.inner.conditional_update(table, id, expected, fields)
    }

    fn insert(&self, table: &str, record: &Record) -> Result<()> {
        self.inner.insert(table, record)
    }
}
