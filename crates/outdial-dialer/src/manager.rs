//! Campaign and dial-list bookkeeping over a [`Store`].
//!
//! Deletes are soft: rows keep their data with `in_use = 0` and vanish from
//! every read. Events are published only after the store write succeeded.

use std::sync::Arc;

use serde_json::Value;

use outdial_core::error::{OutdialError, Result};
use outdial_core::record::{Filter, Record, opt_value, time_value};
use outdial_core::traits::{CasOutcome, Clock, EventKind, EventSink, IdProvider, Store, notify_logged};
use outdial_core::types::{
    Campaign, CampaignStatus, DialListEntry, DialListMaster, DialPlan, EntryStatus, NewCampaign,
    NewDialListMaster, TABLE_CAMPAIGN, TABLE_DLMA, TABLE_PLAN,
};

use crate::lifecycle::{CampaignRequest, CampaignStateMachine};
use crate::registry::DialingRegistry;

fn in_use(id: &str) -> Filter {
    Filter::all().eq("uuid", id).eq("in_use", 1)
}

fn first_row(store: &dyn Store, table: &str, id: &str) -> Result<Record> {
    store
        .query(table, &in_use(id).limit(1))?
        .into_iter()
        .next()
        .ok_or_else(|| OutdialError::NotFound(format!("{table}/{id}")))
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(OutdialError::Validation(format!("{what} is required")));
    }
    Ok(())
}

// ─── Campaigns ────────────────────────────────────────────

pub struct CampaignManager {
    store: Arc<dyn Store>,
    registry: Arc<DialingRegistry>,
    ids: Arc<dyn IdProvider>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

impl CampaignManager {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<DialingRegistry>,
        ids: Arc<dyn IdProvider>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            registry,
            ids,
            clock,
            sink,
        }
    }

    /// Create a stopped campaign.
    pub fn create(&self, new: NewCampaign) -> Result<Campaign> {
        require(&new.name, "campaign name")?;
        require(&new.plan, "campaign plan")?;
        require(&new.dlma, "campaign dial list")?;

        let campaign = Campaign {
            id: self.ids.new_id(),
            name: new.name,
            detail: new.detail,
            status: CampaignStatus::Stopped,
            plan: new.plan,
            dlma: new.dlma,
            queue: new.queue,
            in_use: true,
            tm_create: Some(self.clock.now_utc()),
            tm_update: None,
            tm_delete: None,
        };
        self.store.insert(TABLE_CAMPAIGN, &campaign.to_record())?;
        let created = self.get(&campaign.id)?;
        tracing::info!("📋 Campaign created: {} ({})", created.name, created.id);
        notify_logged(self.sink.as_ref(), EventKind::CampaignCreate, &created.to_record());
        Ok(created)
    }

    pub fn get(&self, id: &str) -> Result<Campaign> {
        Campaign::from_record(&first_row(self.store.as_ref(), TABLE_CAMPAIGN, id)?)
    }

    pub fn list(&self) -> Result<Vec<Campaign>> {
        self.store
            .query(TABLE_CAMPAIGN, &Filter::all().eq("in_use", 1))?
            .iter()
            .map(Campaign::from_record)
            .collect()
    }

    /// Overwrite the editable fields of an in-use campaign.
    ///
    /// `status` is not editable here; status changes go through [`Self::request`].
    pub fn update(&self, campaign: &Campaign) -> Result<Campaign> {
        require(&campaign.id, "campaign id")?;
        require(&campaign.plan, "campaign plan")?;
        require(&campaign.dlma, "campaign dial list")?;
        let mut fields = Record::new();
        fields.insert("name".into(), Value::String(campaign.name.clone()));
        fields.insert("detail".into(), opt_value(&campaign.detail));
        fields.insert("plan".into(), Value::String(campaign.plan.clone()));
        fields.insert("dlma".into(), Value::String(campaign.dlma.clone()));
        fields.insert("queue".into(), opt_value(&campaign.queue));
        let updated = self.write(&campaign.id, None, fields)?;
        notify_logged(self.sink.as_ref(), EventKind::CampaignUpdate, &updated.to_record());
        Ok(updated)
    }

    /// Persist a status chosen by the state machine or the dispatcher.
    ///
    /// Stopped and paused are refused while the registry still holds a call
    /// for the campaign. The write only lands if the status is still the one
    /// that was read.
    pub(crate) fn update_status(&self, id: &str, status: CampaignStatus) -> Result<Campaign> {
        let campaign = self.get(id)?;
        if campaign.status == status {
            return Ok(campaign);
        }
        if matches!(status, CampaignStatus::Stopped | CampaignStatus::Paused)
            && self.registry.references_campaign(id)
        {
            return Err(OutdialError::Validation(format!(
                "campaign {id} has active calls; cannot move to {status}"
            )));
        }
        let mut fields = Record::new();
        fields.insert("status".into(), Value::String(status.as_str().into()));
        let updated = self.write(id, Some(campaign.status), fields)?;
        tracing::info!("🔄 Campaign {id}: {} → {status}", campaign.status);
        notify_logged(self.sink.as_ref(), EventKind::CampaignUpdate, &updated.to_record());
        Ok(updated)
    }

    /// Run `request` through the state machine and persist the outcome.
    pub fn request(&self, id: &str, request: CampaignRequest) -> Result<Campaign> {
        let campaign = self.get(id)?;
        let next = CampaignStateMachine::new(&self.registry).request(&campaign, request)?;
        self.update_status(id, next)
    }

    /// Soft delete. Refused while the campaign still has live calls.
    pub fn delete(&self, id: &str) -> Result<Campaign> {
        let campaign = self.get(id)?;
        if self.registry.references_campaign(id) {
            return Err(OutdialError::Validation(format!(
                "campaign {id} has active calls; stop it first"
            )));
        }
        let now = self.clock.now_utc();
        let mut fields = Record::new();
        fields.insert("status".into(), Value::String(CampaignStatus::Stopped.as_str().into()));
        fields.insert("in_use".into(), Value::from(0));
        fields.insert("tm_delete".into(), time_value(Some(now)));
        self.conditional(id, None, fields)?;

        let deleted = Campaign {
            status: CampaignStatus::Stopped,
            in_use: false,
            tm_delete: Some(now),
            ..campaign
        };
        tracing::info!("🗑️ Campaign deleted: {id}");
        notify_logged(self.sink.as_ref(), EventKind::CampaignDelete, &deleted.to_record());
        Ok(deleted)
    }

    /// In-use dial plan.
    pub fn plan(&self, id: &str) -> Result<DialPlan> {
        DialPlan::from_record(&first_row(self.store.as_ref(), TABLE_PLAN, id)?)
    }

    fn write(&self, id: &str, expected: Option<CampaignStatus>, mut fields: Record) -> Result<Campaign> {
        fields.insert("tm_update".into(), time_value(Some(self.clock.now_utc())));
        self.conditional(id, expected, fields)?;
        self.get(id)
    }

    fn conditional(&self, id: &str, expected: Option<CampaignStatus>, fields: Record) -> Result<()> {
        let mut filter = Filter::all().eq("in_use", 1);
        if let Some(status) = expected {
            filter = filter.eq("status", status.as_str());
        }
        match self.store.conditional_update(TABLE_CAMPAIGN, id, &filter, &fields)? {
            CasOutcome::Applied => Ok(()),
            CasOutcome::Conflict if expected.is_some() => Err(OutdialError::ConcurrencyConflict(
                format!("campaign {id} changed status concurrently"),
            )),
            CasOutcome::Conflict => Err(OutdialError::NotFound(format!("{TABLE_CAMPAIGN}/{id}"))),
        }
    }
}

// ─── Dial lists ───────────────────────────────────────────

pub struct DialListManager {
    store: Arc<dyn Store>,
    ids: Arc<dyn IdProvider>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

impl DialListManager {
    pub fn new(
        store: Arc<dyn Store>,
        ids: Arc<dyn IdProvider>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            sink,
        }
    }

    /// Register a dial-list master and prepare its `dl_table` dataset.
    pub fn create(&self, new: NewDialListMaster) -> Result<DialListMaster> {
        require(&new.name, "dial list name")?;
        require(&new.dl_table, "dial list table")?;
        self.store.ensure_dataset(&new.dl_table)?;
        let dlma = DialListMaster {
            id: self.ids.new_id(),
            name: new.name,
            detail: new.detail,
            dl_table: new.dl_table,
            in_use: true,
            tm_create: Some(self.clock.now_utc()),
            tm_update: None,
            tm_delete: None,
        };
        self.store.insert(TABLE_DLMA, &dlma.to_record())?;
        let created = self.get(&dlma.id)?;
        tracing::info!("📋 Dial list created: {} → {}", created.name, created.dl_table);
        notify_logged(self.sink.as_ref(), EventKind::DlmaCreate, &created.to_record());
        Ok(created)
    }

    pub fn get(&self, id: &str) -> Result<DialListMaster> {
        DialListMaster::from_record(&first_row(self.store.as_ref(), TABLE_DLMA, id)?)
    }

    pub fn list(&self) -> Result<Vec<DialListMaster>> {
        self.store
            .query(TABLE_DLMA, &Filter::all().eq("in_use", 1))?
            .iter()
            .map(DialListMaster::from_record)
            .collect()
    }

    pub fn update(&self, dlma: &DialListMaster) -> Result<DialListMaster> {
        require(&dlma.id, "dial list id")?;
        require(&dlma.dl_table, "dial list table")?;
        let mut fields = Record::new();
        fields.insert("name".into(), Value::String(dlma.name.clone()));
        fields.insert("detail".into(), opt_value(&dlma.detail));
        fields.insert("dl_table".into(), Value::String(dlma.dl_table.clone()));
        fields.insert("tm_update".into(), time_value(Some(self.clock.now_utc())));
        self.conditional(&dlma.id, fields)?;

        let updated = self.get(&dlma.id)?;
        notify_logged(self.sink.as_ref(), EventKind::DlmaUpdate, &updated.to_record());
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> Result<DialListMaster> {
        let dlma = self.get(id)?;
        let now = self.clock.now_utc();
        let mut fields = Record::new();
        fields.insert("in_use".into(), Value::from(0));
        fields.insert("tm_delete".into(), time_value(Some(now)));
        self.conditional(id, fields)?;

        let deleted = DialListMaster {
            in_use: false,
            tm_delete: Some(now),
            ..dlma
        };
        tracing::info!("🗑️ Dial list deleted: {id}");
        notify_logged(self.sink.as_ref(), EventKind::DlmaDelete, &deleted.to_record());
        Ok(deleted)
    }

    /// Up to `limit` entries of a dataset, in store order.
    pub fn entries(&self, dlma: &DialListMaster, limit: usize) -> Result<Vec<DialListEntry>> {
        self.store
            .query(&dlma.dl_table, &Filter::all().limit(limit))?
            .iter()
            .map(DialListEntry::from_record)
            .collect()
    }

    pub fn entry(&self, dataset: &str, id: &str) -> Result<DialListEntry> {
        let rows = self.store.query(dataset, &Filter::all().eq("uuid", id).limit(1))?;
        match rows.first() {
            Some(row) => DialListEntry::from_record(row),
            None => Err(OutdialError::NotFound(format!("dial list entry {dataset}/{id}"))),
        }
    }

    /// Insert `entry` as a fresh idle row with a new id.
    pub fn add_entry(&self, dataset: &str, entry: DialListEntry) -> Result<DialListEntry> {
        if entry.slots.iter().all(|s| s.number.is_none()) {
            return Err(OutdialError::Validation("dial list entry without numbers".into()));
        }
        let entry = DialListEntry {
            id: self.ids.new_id(),
            status: EntryStatus::Idle,
            dialing_uuid: None,
            dialing_camp_uuid: None,
            dialing_plan_uuid: None,
            ..entry
        };
        self.store.insert(dataset, &entry.to_record())?;
        tracing::debug!("Added entry {} to {dataset}", entry.id);
        Ok(entry)
    }

    fn conditional(&self, id: &str, fields: Record) -> Result<()> {
        match self.store.conditional_update(TABLE_DLMA, id, &Filter::all().eq("in_use", 1), &fields)? {
            CasOutcome::Applied => Ok(()),
            CasOutcome::Conflict => Err(OutdialError::NotFound(format!("{TABLE_DLMA}/{id}"))),
        }
    }
}
