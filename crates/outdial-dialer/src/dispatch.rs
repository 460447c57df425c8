//! Dispatcher: one scheduling step at a time, plus the loop that drives it.
//!
//! A step settles pending campaign transitions, picks a running campaign,
//! reserves one entry for it and registers the resulting dialing session.
//! Originating the call is left to the caller of [`spawn_dispatcher`].

use std::sync::Arc;

use outdial_core::config::OutdialConfig;
use outdial_core::error::{OutdialError, Result};
use outdial_core::traits::{Clock, EventSink, IdProvider, Store, SystemClock, UuidProvider};
use outdial_core::types::{Campaign, CampaignStatus, DialListEntry};

use crate::lifecycle::CampaignStateMachine;
use crate::manager::{CampaignManager, DialListManager};
use crate::notify::{EventHistory, MultiSink, TracingSink};
use crate::registry::DialingRegistry;
use crate::scheduler::CampaignScheduler;
use crate::selector::DialListSelector;
use crate::session::{DialSnapshot, DialingSession};
use crate::store::SqliteStore;

pub struct Dispatcher {
    store: Arc<dyn Store>,
    campaigns: CampaignManager,
    lists: DialListManager,
    scheduler: CampaignScheduler,
    selector: DialListSelector,
    registry: Arc<DialingRegistry>,
    events: Arc<EventHistory>,
    clock: Arc<dyn Clock>,
    max_concurrent: usize,
    interval_ms: u64,
}

impl Dispatcher {
    /// Events go to `sink` and to a history of the last
    /// `config.event_history` notifications.
    pub fn new(
        config: &OutdialConfig,
        store: Arc<dyn Store>,
        ids: Arc<dyn IdProvider>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let registry = Arc::new(DialingRegistry::new());
        let events = Arc::new(EventHistory::new(config.event_history));
        let sinks: Vec<Arc<dyn EventSink>> = vec![sink, events.clone()];
        let sink: Arc<dyn EventSink> = Arc::new(MultiSink::new(sinks));
        Self {
            campaigns: CampaignManager::new(
                store.clone(),
                registry.clone(),
                ids.clone(),
                clock.clone(),
                sink.clone(),
            ),
            lists: DialListManager::new(store.clone(), ids.clone(), clock.clone(), sink),
            scheduler: CampaignScheduler::new(store.clone()),
            selector: DialListSelector::new(store.clone(), ids, clock.clone(), config.select_retries),
            store,
            registry,
            events,
            clock,
            max_concurrent: config.max_concurrent_per_campaign,
            interval_ms: config.dispatch_interval_ms,
        }
    }

    /// Production wiring: SQLite at `config.database_path`, v4 uuids, the
    /// system clock and events logged through tracing.
    pub fn from_config(config: &OutdialConfig) -> Result<Self> {
        let store = SqliteStore::from_config(config)?;
        tracing::info!("📋 Dialer store at {}", config.database_path);
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(UuidProvider),
            Arc::new(SystemClock),
            Arc::new(TracingSink),
        ))
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn campaigns(&self) -> &CampaignManager {
        &self.campaigns
    }

    pub fn lists(&self) -> &DialListManager {
        &self.lists
    }

    pub fn registry(&self) -> &Arc<DialingRegistry> {
        &self.registry
    }

    /// Most recent events, oldest first.
    pub fn events(&self) -> &Arc<EventHistory> {
        &self.events
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// One scheduling step. Returns the session registered, if any.
    pub fn dispatch_once(&self) -> Result<Option<Arc<DialingSession>>> {
        self.settle_pending()?;

        let Some(campaign) = self.scheduler.pick_campaign_for_dialing()? else {
            return Ok(None);
        };
        let plan = self.campaigns.plan(&campaign.plan)?;
        let dlma = self.lists.get(&campaign.dlma)?;

        if !self.selector.has_remaining_work(&campaign, &plan, &dlma.dl_table)? {
            if !self.registry.references_campaign(&campaign.id) {
                tracing::info!("🏁 Campaign {} has nothing left to dial; stopping", campaign.id);
                self.campaigns.update_status(&campaign.id, CampaignStatus::Stopped)?;
            }
            return Ok(None);
        }

        let dialing = self.scheduler.current_dialing_count(&campaign.id, &dlma.dl_table)?;
        if dialing >= self.max_concurrent {
            tracing::debug!(
                "Campaign {} at capacity ({dialing}/{})",
                campaign.id,
                self.max_concurrent
            );
            return Ok(None);
        }

        let Some(selection) = self.selector.select_and_mark(&campaign, &plan, &dlma.dl_table)? else {
            return Ok(None);
        };
        let dataset = dlma.dl_table.clone();
        let entry_id = selection.entry.id.clone();
        let snapshot = DialSnapshot {
            campaign,
            plan,
            dlma,
            entry: selection.entry,
            slot: selection.slot,
            number: selection.number,
            attempts: selection.attempts,
        };

        let registered = DialingSession::new(&selection.dialing_id, snapshot, self.clock.now_utc())
            .and_then(|session| self.registry.insert(session));
        if let Err(e) = registered {
            tracing::error!("❌ Could not register dialing for entry {entry_id}: {e}");
            self.selector.clear_dialing(&dataset, &entry_id)?;
            return Err(e);
        }
        Ok(self.registry.find_by_id(&selection.dialing_id))
    }

    /// Call finished: stamp the hangup, count the attempt and drop the session.
    ///
    /// The session stays registered until the entry is back to idle, so a
    /// failed store write can be retried with the same session id.
    pub fn complete(&self, session_id: &str, hangup_cause: i64) -> Result<DialListEntry> {
        let now = self.clock.now_utc();
        self.registry.update_live(session_id, |live| {
            live.hangup_cause = Some(hangup_cause);
            live.tm_hangup = Some(now);
        })?;
        let session = self.session(session_id)?;
        let snap = session.snapshot();
        tracing::info!(
            "📴 Call {session_id} to {} ended (cause {hangup_cause})",
            snap.number
        );
        let entry = self
            .selector
            .record_result(session.dataset(), session.entry_id(), snap.slot, hangup_cause)?;
        self.registry.remove(session_id)?;
        Ok(entry)
    }

    /// Call never went out: release the entry without counting an attempt.
    pub fn abandon(&self, session_id: &str) -> Result<()> {
        let session = self.session(session_id)?;
        tracing::warn!("⚠️ Abandoned dialing {session_id} for entry {}", session.entry_id());
        self.selector.clear_dialing(session.dataset(), session.entry_id())?;
        self.registry.remove(session_id)?;
        Ok(())
    }

    /// Release every in-flight entry. Used on shutdown.
    ///
    /// Sessions whose entry could not be cleared stay registered; the first
    /// such error is returned once every session has been tried.
    pub fn shutdown(&self) -> Result<usize> {
        let mut released = 0;
        let mut first_err = None;
        for session in self.registry.snapshot() {
            match self.selector.clear_dialing(session.dataset(), session.entry_id()) {
                Ok(()) => {
                    self.registry.remove(session.id())?;
                    released += 1;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Could not release entry {}: {e}", session.entry_id());
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        if released > 0 {
            tracing::info!("🧹 Released {released} dialing sessions");
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(released),
        }
    }

    fn session(&self, session_id: &str) -> Result<Arc<DialingSession>> {
        self.registry
            .find_by_id(session_id)
            .ok_or_else(|| OutdialError::NotFound(format!("dialing session {session_id}")))
    }

    /// Finish starting / stopping / pausing campaigns whose guard now allows it.
    fn settle_pending(&self) -> Result<()> {
        let machine = CampaignStateMachine::new(&self.registry);
        for status in [
            CampaignStatus::Starting,
            CampaignStatus::Stopping,
            CampaignStatus::Pausing,
        ] {
            for campaign in self.scheduler.campaigns_by_status(status)? {
                self.settle(&machine, &campaign)?;
            }
        }
        Ok(())
    }

    fn settle(&self, machine: &CampaignStateMachine<'_>, campaign: &Campaign) -> Result<()> {
        let next = machine.settle(campaign);
        if next != campaign.status {
            self.campaigns.update_status(&campaign.id, next)?;
        }
        Ok(())
    }
}

/// Drive [`Dispatcher::dispatch_once`] every `dispatch_interval_ms`.
///
/// Each new session is handed to `originate`; when that fails the entry is
/// released again. Runs until the task is dropped.
pub async fn spawn_dispatcher<F, Fut>(dispatcher: Arc<Dispatcher>, originate: F)
where
    F: Fn(Arc<DialingSession>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = std::result::Result<(), String>> + Send,
{
    let interval_ms = dispatcher.interval_ms();
    tracing::info!("☎️ Dispatcher started (every {interval_ms}ms)");

    let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1)));

    loop {
        interval.tick().await;

        let session = match dispatcher.dispatch_once() {
            Ok(Some(session)) => session,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!("❌ Dispatch failed [{}]: {e}", e.as_label());
                continue;
            }
        };

        tracing::info!(
            "📞 Originating {} → {} (campaign {})",
            session.id(),
            session.snapshot().number,
            session.campaign_id()
        );
        if let Err(e) = originate(session.clone()).await {
            tracing::warn!("⚠️ Originate failed for {}: {e}", session.id());
            if let Err(e) = dispatcher.abandon(session.id()) {
                tracing::error!("❌ Could not release {}: {e}", session.id());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::CampaignRequest;
    use crate::testkit::{DATASET, FixedClock, FixedIds, FlakyStore, SeqIds, campaign, seeded_store};
    use outdial_core::types::{
        DialPlan, EntryStatus, HANGUP_NORMAL_CLEARING, HANGUP_USER_BUSY, NewCampaign, NewDialListMaster,
        SLOT_COUNT, TABLE_PLAN,
    };
    use std::time::Duration;

    fn config(max_concurrent: usize) -> OutdialConfig {
        OutdialConfig {
            max_concurrent_per_campaign: max_concurrent,
            dispatch_interval_ms: 5,
            event_history: 10,
            ..OutdialConfig::default()
        }
    }

    fn dispatcher_with_ids(store: Arc<dyn Store>, max_concurrent: usize, ids: Arc<dyn IdProvider>) -> Dispatcher {
        Dispatcher::new(
            &config(max_concurrent),
            store,
            ids,
            Arc::new(FixedClock::default()),
            Arc::new(TracingSink),
        )
    }

    fn dispatcher(store: Arc<dyn Store>, max_concurrent: usize) -> Dispatcher {
        dispatcher_with_ids(store, max_concurrent, Arc::new(SeqIds::default()))
    }

    fn entries(n: usize) -> Vec<DialListEntry> {
        (1..=n)
            .map(|i| DialListEntry::new(&format!("e{i}")).with_slot(1, &format!("+100{i}"), 0))
            .collect()
    }

    #[test]
    fn test_dispatch_registers_session() {
        let store = seeded_store([2; SLOT_COUNT], &[campaign("c1")], &entries(1));
        let d = dispatcher(store, 5);

        let session = d.dispatch_once().unwrap().unwrap();
        assert_eq!(session.id(), "id-1");
        assert_eq!(session.entry_id(), "e1");
        assert_eq!(session.snapshot().number, "+1001");
        assert_eq!(d.registry().find_by_entry_id("e1").unwrap().id(), "id-1");

        let entry = d.lists().entry(DATASET, "e1").unwrap();
        assert_eq!(entry.status, EntryStatus::Dialing);
        assert_eq!(entry.dialing_uuid.as_deref(), Some("id-1"));
    }

    #[test]
    fn test_dispatch_respects_capacity() {
        let store = seeded_store([2; SLOT_COUNT], &[campaign("c1")], &entries(3));
        let d = dispatcher(store, 2);

        assert!(d.dispatch_once().unwrap().is_some());
        assert!(d.dispatch_once().unwrap().is_some());
        assert!(d.dispatch_once().unwrap().is_none());
        assert_eq!(d.registry().len(), 2);
    }

    #[test]
    fn test_complete_counts_attempt_and_frees_entry() {
        let store = seeded_store([2; SLOT_COUNT], &[campaign("c1")], &entries(1));
        let d = dispatcher(store, 5);

        let session = d.dispatch_once().unwrap().unwrap();
        let entry = d.complete(session.id(), HANGUP_USER_BUSY).unwrap();
        assert_eq!(entry.slots[0].attempts, 1);
        assert_eq!(entry.status, EntryStatus::Idle);
        assert!(d.registry().is_empty());
        assert_eq!(d.complete(session.id(), HANGUP_USER_BUSY).unwrap_err().as_label(), "not_found");

        // Second and last try on the same slot.
        let again = d.dispatch_once().unwrap().unwrap();
        assert_eq!(again.snapshot().attempts, 1);
    }

    #[test]
    fn test_exhausted_campaign_stops_after_last_call() {
        let store = seeded_store([1; SLOT_COUNT], &[campaign("c1")], &entries(1));
        let d = dispatcher(store, 5);

        let session = d.dispatch_once().unwrap().unwrap();
        assert!(d.dispatch_once().unwrap().is_none());
        assert_eq!(d.campaigns().get("c1").unwrap().status, CampaignStatus::Running);

        d.complete(session.id(), HANGUP_NORMAL_CLEARING).unwrap();
        assert!(d.dispatch_once().unwrap().is_none());
        assert_eq!(d.campaigns().get("c1").unwrap().status, CampaignStatus::Stopped);
    }

    #[test]
    fn test_pending_stop_settles_once_calls_end() {
        let store = seeded_store([3; SLOT_COUNT], &[campaign("c1")], &entries(2));
        let d = dispatcher(store, 5);

        let session = d.dispatch_once().unwrap().unwrap();
        let stopping = d
            .campaigns()
            .request("c1", crate::lifecycle::CampaignRequest::Stop)
            .unwrap();
        assert_eq!(stopping.status, CampaignStatus::Stopping);

        // Stopping campaigns get no new calls.
        assert!(d.dispatch_once().unwrap().is_none());
        d.complete(session.id(), HANGUP_USER_BUSY).unwrap();
        assert!(d.dispatch_once().unwrap().is_none());
        assert_eq!(d.campaigns().get("c1").unwrap().status, CampaignStatus::Stopped);
    }

    #[test]
    fn test_abandon_and_shutdown_release_entries() {
        let store = seeded_store([3; SLOT_COUNT], &[campaign("c1")], &entries(2));
        let d = dispatcher(store, 5);

        let first = d.dispatch_once().unwrap().unwrap();
        d.abandon(first.id()).unwrap();
        let entry = d.lists().entry(DATASET, first.entry_id()).unwrap();
        assert_eq!(entry.status, EntryStatus::Idle);
        assert_eq!(entry.slots[0].attempts, 0);

        d.dispatch_once().unwrap().unwrap();
        d.dispatch_once().unwrap().unwrap();
        assert_eq!(d.shutdown().unwrap(), 2);
        assert!(d.registry().is_empty());
        assert_eq!(d.lists().entry(DATASET, "e1").unwrap().status, EntryStatus::Idle);
        assert_eq!(d.lists().entry(DATASET, "e2").unwrap().status, EntryStatus::Idle);
    }

    #[test]
    fn test_failed_result_write_keeps_session() {
        let store = FlakyStore::seeded([2; SLOT_COUNT], &[campaign("c1")], &entries(1));
        let d = dispatcher(store.clone(), 5);
        let session = d.dispatch_once().unwrap().unwrap();

        store.fail_updates(true);
        let err = d.complete(session.id(), HANGUP_USER_BUSY).unwrap_err();
        assert_eq!(err.as_label(), "persistence");
        assert!(d.registry().find_by_id(session.id()).is_some());
        let entry = d.lists().entry(DATASET, "e1").unwrap();
        assert_eq!(entry.status, EntryStatus::Dialing);
        assert_eq!(entry.slots[0].attempts, 0);

        // Campaign cannot be stopped behind the stranded call's back.
        assert_eq!(
            d.campaigns().request("c1", CampaignRequest::Stop).unwrap().status,
            CampaignStatus::Stopping
        );

        store.fail_updates(false);
        let entry = d.complete(session.id(), HANGUP_USER_BUSY).unwrap();
        assert_eq!(entry.status, EntryStatus::Idle);
        assert_eq!(entry.slots[0].attempts, 1);
        assert!(d.registry().is_empty());
    }

    #[test]
    fn test_failed_release_keeps_sessions() {
        let store = FlakyStore::seeded([3; SLOT_COUNT], &[campaign("c1")], &entries(2));
        let d = dispatcher(store.clone(), 5);
        let first = d.dispatch_once().unwrap().unwrap();
        d.dispatch_once().unwrap().unwrap();

        store.fail_updates(true);
        assert_eq!(d.abandon(first.id()).unwrap_err().as_label(), "persistence");
        assert_eq!(d.shutdown().unwrap_err().as_label(), "persistence");
        assert_eq!(d.registry().len(), 2);
        for id in ["e1", "e2"] {
            assert_eq!(d.lists().entry(DATASET, id).unwrap().status, EntryStatus::Dialing);
        }

        store.fail_updates(false);
        d.abandon(first.id()).unwrap();
        assert_eq!(d.shutdown().unwrap(), 1);
        assert!(d.registry().is_empty());
        for id in ["e1", "e2"] {
            assert_eq!(d.lists().entry(DATASET, id).unwrap().status, EntryStatus::Idle);
        }
    }

    #[test]
    fn test_duplicate_dialing_id_releases_entry() {
        let store = seeded_store([3; SLOT_COUNT], &[campaign("c1")], &entries(2));
        let d = dispatcher_with_ids(store, 5, Arc::new(FixedIds("dup")));

        let first = d.dispatch_once().unwrap().unwrap();
        assert_eq!(first.id(), "dup");

        let err = d.dispatch_once().unwrap_err();
        assert_eq!(err.as_label(), "duplicate");
        assert_eq!(d.registry().len(), 1);
        let other = if first.entry_id() == "e1" { "e2" } else { "e1" };
        let entry = d.lists().entry(DATASET, other).unwrap();
        assert_eq!(entry.status, EntryStatus::Idle);
        assert!(entry.dialing_uuid.is_none());
        assert!(entry.dialing_camp_uuid.is_none());
    }

    #[test]
    fn test_store_failure_during_step_is_reported() {
        let store = FlakyStore::seeded([3; SLOT_COUNT], &[campaign("c1")], &entries(1));
        let d = dispatcher(store.clone(), 5);

        store.fail_cas(true);
        assert_eq!(d.dispatch_once().unwrap_err().as_label(), "persistence");
        assert!(d.registry().is_empty());
        assert_eq!(d.lists().entry(DATASET, "e1").unwrap().status, EntryStatus::Idle);

        store.fail_cas(false);
        assert!(d.dispatch_once().unwrap().is_some());
    }

    #[test]
    fn test_events_are_kept_in_history() {
        let store = seeded_store([3; SLOT_COUNT], &[campaign("c1")], &entries(1));
        let d = dispatcher(store, 5);
        d.campaigns().request("c1", CampaignRequest::Pause).unwrap();
        assert_eq!(d.events().len(), 1);
        assert_eq!(d.interval_ms(), 5);
    }

    #[test]
    fn test_from_config_dispatches_from_sqlite() {
        let dir = std::env::temp_dir().join("outdial-dispatch-config-test");
        let _ = std::fs::remove_dir_all(&dir);
        let config = OutdialConfig {
            database_path: dir.join("dialer.db").to_string_lossy().into_owned(),
            event_history: 2,
            ..OutdialConfig::default()
        };
        let d = Dispatcher::from_config(&config).unwrap();
        assert_eq!(d.interval_ms(), config.dispatch_interval_ms);

        d.store()
            .insert(TABLE_PLAN, &DialPlan::new("plan-1", [2; SLOT_COUNT]).to_record())
            .unwrap();
        let dlma = d
            .lists()
            .create(NewDialListMaster {
                name: "leads".into(),
                detail: None,
                dl_table: "dl_leads".into(),
            })
            .unwrap();
        let added = d
            .lists()
            .add_entry(&dlma.dl_table, DialListEntry::new("e1").with_slot(1, "+1001", 0))
            .unwrap();
        let c = d
            .campaigns()
            .create(NewCampaign {
                name: "spring".into(),
                detail: None,
                plan: "plan-1".into(),
                dlma: dlma.id.clone(),
                queue: Some("sales".into()),
            })
            .unwrap();
        d.campaigns().request(&c.id, CampaignRequest::Start).unwrap();

        let session = d.dispatch_once().unwrap().unwrap();
        assert_eq!(session.entry_id(), added.id);
        assert_eq!(session.snapshot().campaign.queue.as_deref(), Some("sales"));
        assert_eq!(d.events().len(), 2);
        assert_eq!(d.shutdown().unwrap(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_spawn_dispatcher_originates() {
        let store = seeded_store([3; SLOT_COUNT], &[campaign("c1")], &entries(2));
        let d = Arc::new(dispatcher(store, 5));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = tokio::spawn(spawn_dispatcher(d.clone(), move |session| {
            let tx = tx.clone();
            async move {
                tx.send(session.entry_id().to_string()).map_err(|e| e.to_string())
            }
        }));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let id = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(id);
        }
        handle.abort();
        seen.sort();
        assert_eq!(seen, ["e1", "e2"]);
        assert_eq!(d.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_originate_releases_entry() {
        let store = seeded_store([3; SLOT_COUNT], &[campaign("c1")], &entries(1));
        let d = Arc::new(dispatcher(store, 5));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = tokio::spawn(spawn_dispatcher(d.clone(), move |session| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(session.id().to_string());
                Err("trunk down".to_string())
            }
        }));

        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        // The next tick only starts after the failed originate was released.
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        handle.abort();
        assert_eq!(d.lists().entry(DATASET, "e1").unwrap().slots[0].attempts, 0);
    }
}
