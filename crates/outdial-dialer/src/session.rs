//! Dialing session: the in-memory record of one in-flight call attempt.

use chrono::{DateTime, Utc};
use serde::Serialize;

use outdial_core::error::{OutdialError, Result};
use outdial_core::types::{Campaign, DialListEntry, DialListMaster, DialPlan};

/// What was dispatched: frozen at creation, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct DialSnapshot {
    pub campaign: Campaign,
    pub plan: DialPlan,
    pub dlma: DialListMaster,
    pub entry: DialListEntry,
    /// Slot being dialed (1-based).
    pub slot: usize,
    pub number: String,
    /// Attempts on `slot` before this call.
    pub attempts: u32,
}

/// Call-progress state, updated from channel events.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LiveCallState {
    pub channel: Option<String>,
    pub channel_state: Option<String>,
    pub queue: Option<String>,
    pub member_name: Option<String>,
    pub hangup_cause: Option<i64>,
    pub tm_hangup: Option<DateTime<Utc>>,
}

/// One active dial attempt, keyed by its channel id.
#[derive(Debug, Clone, Serialize)]
pub struct DialingSession {
    id: String,
    snapshot: DialSnapshot,
    live: LiveCallState,
    created_at: DateTime<Utc>,
}

impl DialingSession {
    pub fn new(id: &str, snapshot: DialSnapshot, created_at: DateTime<Utc>) -> Result<Self> {
        if id.trim().is_empty() {
            return Err(OutdialError::Validation("dialing session without channel id".into()));
        }
        Ok(Self {
            id: id.to_string(),
            snapshot,
            live: LiveCallState::default(),
            created_at,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> &DialSnapshot {
        &self.snapshot
    }

    pub fn campaign_id(&self) -> &str {
        &self.snapshot.campaign.id
    }

    pub fn entry_id(&self) -> &str {
        &self.snapshot.entry.id
    }

    pub fn dataset(&self) -> &str {
        &self.snapshot.dlma.dl_table
    }

    pub fn live(&self) -> &LiveCallState {
        &self.live
    }

    /// Only the registry hands out mutable access.
    pub(crate) fn live_mut(&mut self) -> &mut LiveCallState {
        &mut self.live
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            uuid: self.id.clone(),
            campaign: self.snapshot.campaign.id.clone(),
            number: self.snapshot.number.clone(),
            channel_state: self.live.channel_state.clone().unwrap_or_default(),
            channel: self.live.channel.clone().unwrap_or_default(),
            queue: self.live.queue.clone().unwrap_or_default(),
            member_name: self.live.member_name.clone().unwrap_or_default(),
            tm_hangup: self.live.tm_hangup.map(|t| t.to_rfc3339()).unwrap_or_default(),
        }
    }
}

/// Flat per-session row for reporting.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSummary {
    pub uuid: String,
    pub campaign: String,
    pub number: String,
    pub channel_state: String,
    pub channel: String,
    pub queue: String,
    pub member_name: String,
    pub tm_hangup: String,
}
