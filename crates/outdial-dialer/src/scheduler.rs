//! Campaign scheduler: which running campaign gets the next dial slot.

use std::sync::Arc;

use rand::seq::SliceRandom;

use outdial_core::error::Result;
use outdial_core::record::Filter;
use outdial_core::traits::Store;
use outdial_core::types::{Campaign, CampaignStatus, EntryStatus, TABLE_CAMPAIGN};

pub struct CampaignScheduler {
    store: Arc<dyn Store>,
}

impl CampaignScheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// In-use campaigns currently in `status`.
    pub fn campaigns_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        let filter = Filter::all().eq("status", status.as_str()).eq("in_use", 1);
        let rows = self.store.query(TABLE_CAMPAIGN, &filter)?;
        let mut campaigns = Vec::with_capacity(rows.len());
        for row in &rows {
            match Campaign::from_record(row) {
                Ok(c) => campaigns.push(c),
                Err(e) => tracing::warn!("⚠️ Skipping malformed campaign row: {e}"),
            }
        }
        Ok(campaigns)
    }

    /// A running campaign chosen uniformly at random, or `None`.
    pub fn pick_campaign_for_dialing(&self) -> Result<Option<Campaign>> {
        let running = self.campaigns_by_status(CampaignStatus::Running)?;
        let picked = running.choose(&mut rand::thread_rng()).cloned();
        if let Some(c) = &picked {
            tracing::debug!("Scheduling campaign {} ({} running)", c.id, running.len());
        }
        Ok(picked)
    }

    /// Entries in `dataset` being dialed for `campaign_id` right now.
    pub fn current_dialing_count(&self, campaign_id: &str, dataset: &str) -> Result<usize> {
        let filter = Filter::all()
            .eq("dialing_camp_uuid", campaign_id)
            .eq("status", EntryStatus::Dialing.as_str());
        Ok(self.store.query(dataset, &filter)?.len())
    }
}
