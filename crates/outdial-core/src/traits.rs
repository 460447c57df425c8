//! Collaborator seams: storage, event notification, ids and time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::{Filter, Record};

/// Outcome of a compare-and-set update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The row matched the expectation and was updated.
    Applied,
    /// The row exists but no longer matches the expectation.
    Conflict,
}

/// Generic record store. All dial-list and campaign data round-trips through here.
///
/// Implementations must apply `conditional_update` as one indivisible step:
/// two callers racing on the same row may not both observe `Applied`.
pub trait Store: Send + Sync {
    /// Rows of `table` matching `filter`, in store order.
    fn query(&self, table: &str, filter: &Filter) -> Result<Vec<Record>>;

    /// Overwrite `fields` on row `id`. Fails with `NotFound` when the row is absent.
    fn update(&self, table: &str, id: &str, fields: &Record) -> Result<()>;

    /// Overwrite `fields` on row `id` only if it still satisfies `expected`.
    fn conditional_update(
        &self,
        table: &str,
        id: &str,
        expected: &Filter,
        fields: &Record,
    ) -> Result<CasOutcome>;

    /// Add a new row. Fails with `Duplicate` when the id is taken.
    fn insert(&self, table: &str, record: &Record) -> Result<()>;

    /// Make `dataset` ready to hold dial-list entries. Schemaless stores need nothing.
    fn ensure_dataset(&self, _dataset: &str) -> Result<()> {
        Ok(())
    }
}

/// Notification kinds published after successful store writes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    CampaignCreate,
    CampaignUpdate,
    CampaignDelete,
    DlmaCreate,
    DlmaUpdate,
    DlmaDelete,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::CampaignCreate => "OutCampaignCreate",
            EventKind::CampaignUpdate => "OutCampaignUpdate",
            EventKind::CampaignDelete => "OutCampaignDelete",
            EventKind::DlmaCreate => "OutDlmaCreate",
            EventKind::DlmaUpdate => "OutDlmaUpdate",
            EventKind::DlmaDelete => "OutDlmaDelete",
        };
        f.write_str(name)
    }
}

/// Outbound event publisher.
pub trait EventSink: Send + Sync {
    fn notify(&self, kind: EventKind, record: &Record) -> Result<()>;
}

pub trait IdProvider: Send + Sync {
    fn new_id(&self) -> String;
}

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn new_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Publish and log the failure instead of propagating it.
pub fn notify_logged(sink: &dyn EventSink, kind: EventKind, record: &Record) {
    if let Err(e) = sink.notify(kind, record) {
        tracing::warn!("⚠️ Failed to publish {kind}: {e}");
    }
}
