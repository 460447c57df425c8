//! Typed records for campaigns, dial plans and dial lists.
//!
//! Field names are the store contract: every table is keyed by `uuid`, dial
//! list slots are `number_1..8` / `trycnt_1..8`, plan limits are
//! `max_retry_cnt_1..8`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OutdialError, Result};
use crate::record::{
    Record, flag, int_or, opt_value, optional_str, optional_time, required_str, time_value,
};

/// Retry slots per dial-list entry.
pub const SLOT_COUNT: usize = 8;

pub const TABLE_CAMPAIGN: &str = "campaign";
pub const TABLE_PLAN: &str = "plan";
pub const TABLE_DLMA: &str = "dl_list_ma";

/// Q.850 cause 16. An entry that ended this way is never redialed.
pub const HANGUP_NORMAL_CLEARING: i64 = 16;
pub const HANGUP_USER_BUSY: i64 = 17;
pub const HANGUP_NO_ANSWER: i64 = 19;

// ─── Campaign ─────────────────────────────────────────────

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Pausing,
    Paused,
}

impl CampaignStatus {
    pub const ALL: [CampaignStatus; 6] = [
        CampaignStatus::Stopped,
        CampaignStatus::Starting,
        CampaignStatus::Running,
        CampaignStatus::Stopping,
        CampaignStatus::Pausing,
        CampaignStatus::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Stopped => "stopped",
            CampaignStatus::Starting => "starting",
            CampaignStatus::Running => "running",
            CampaignStatus::Stopping => "stopping",
            CampaignStatus::Pausing => "pausing",
            CampaignStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| OutdialError::Validation(format!("unknown campaign status '{s}'")))
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound dialing campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub detail: Option<String>,
    pub status: CampaignStatus,
    /// Dial plan id.
    pub plan: String,
    /// Dial-list-master id.
    pub dlma: String,
    /// Queue answered calls are handed to.
    pub queue: Option<String>,
    pub in_use: bool,
    pub tm_create: Option<DateTime<Utc>>,
    pub tm_update: Option<DateTime<Utc>>,
    pub tm_delete: Option<DateTime<Utc>>,
}

/// Fields supplied when creating a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub detail: Option<String>,
    pub plan: String,
    pub dlma: String,
    pub queue: Option<String>,
}

impl Campaign {
    pub fn from_record(record: &Record) -> Result<Self> {
        let status = match optional_str(record, "status") {
            Some(s) => CampaignStatus::parse(&s)?,
            None => CampaignStatus::Stopped,
        };
        Ok(Self {
            id: required_str(record, "uuid")?,
            name: optional_str(record, "name").unwrap_or_default(),
            detail: optional_str(record, "detail"),
            status,
            plan: required_str(record, "plan")?,
            dlma: required_str(record, "dlma")?,
            queue: optional_str(record, "queue"),
            in_use: flag(record, "in_use", true)?,
            tm_create: optional_time(record, "tm_create")?,
            tm_update: optional_time(record, "tm_update")?,
            tm_delete: optional_time(record, "tm_delete")?,
        })
    }

    pub fn to_record(&self) -> Record {
        let mut r = Record::new();
        r.insert("uuid".into(), Value::String(self.id.clone()));
        r.insert("name".into(), Value::String(self.name.clone()));
        r.insert("detail".into(), opt_value(&self.detail));
        r.insert("status".into(), Value::String(self.status.as_str().into()));
        r.insert("plan".into(), Value::String(self.plan.clone()));
        r.insert("dlma".into(), Value::String(self.dlma.clone()));
        r.insert("queue".into(), opt_value(&self.queue));
        r.insert("in_use".into(), Value::from(self.in_use as i64));
        r.insert("tm_create".into(), time_value(self.tm_create));
        r.insert("tm_update".into(), time_value(self.tm_update));
        r.insert("tm_delete".into(), time_value(self.tm_delete));
        r
    }
}

// ─── Dial plan ────────────────────────────────────────────

/// Per-slot retry limits shared by campaigns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DialPlan {
    pub id: String,
    pub name: String,
    /// `max_retry[i]` is the attempt limit for slot `i + 1`.
    pub max_retry: [u32; SLOT_COUNT],
    pub in_use: bool,
}

impl DialPlan {
    pub fn new(id: &str, max_retry: [u32; SLOT_COUNT]) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            max_retry,
            in_use: true,
        }
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        let mut max_retry = [0u32; SLOT_COUNT];
        for (i, limit) in max_retry.iter_mut().enumerate() {
            *limit = non_negative(record, &format!("max_retry_cnt_{}", i + 1))?;
        }
        Ok(Self {
            id: required_str(record, "uuid")?,
            name: optional_str(record, "name").unwrap_or_default(),
            max_retry,
            in_use: flag(record, "in_use", true)?,
        })
    }

    pub fn to_record(&self) -> Record {
        let mut r = Record::new();
        r.insert("uuid".into(), Value::String(self.id.clone()));
        r.insert("name".into(), Value::String(self.name.clone()));
        for (i, limit) in self.max_retry.iter().enumerate() {
            r.insert(format!("max_retry_cnt_{}", i + 1), Value::from(*limit));
        }
        r.insert("in_use".into(), Value::from(self.in_use as i64));
        r
    }
}

// ─── Dial list master ─────────────────────────────────────

/// Logical grouping that names the concrete dial-list dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DialListMaster {
    pub id: String,
    pub name: String,
    pub detail: Option<String>,
    /// Dataset (table) holding the entries.
    pub dl_table: String,
    pub in_use: bool,
    pub tm_create: Option<DateTime<Utc>>,
    pub tm_update: Option<DateTime<Utc>>,
    pub tm_delete: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDialListMaster {
    pub name: String,
    pub detail: Option<String>,
    pub dl_table: String,
}

impl DialListMaster {
    pub fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: required_str(record, "uuid")?,
            name: optional_str(record, "name").unwrap_or_default(),
            detail: optional_str(record, "detail"),
            dl_table: required_str(record, "dl_table")?,
            in_use: flag(record, "in_use", true)?,
            tm_create: optional_time(record, "tm_create")?,
            tm_update: optional_time(record, "tm_update")?,
            tm_delete: optional_time(record, "tm_delete")?,
        })
    }

    pub fn to_record(&self) -> Record {
        let mut r = Record::new();
        r.insert("uuid".into(), Value::String(self.id.clone()));
        r.insert("name".into(), Value::String(self.name.clone()));
        r.insert("detail".into(), opt_value(&self.detail));
        r.insert("dl_table".into(), Value::String(self.dl_table.clone()));
        r.insert("in_use".into(), Value::from(self.in_use as i64));
        r.insert("tm_create".into(), time_value(self.tm_create));
        r.insert("tm_update".into(), time_value(self.tm_update));
        r.insert("tm_delete".into(), time_value(self.tm_delete));
        r
    }
}

// ─── Dial list entry ──────────────────────────────────────

/// One numbered contact slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DialSlot {
    pub number: Option<String>,
    pub attempts: u32,
}

impl DialSlot {
    pub fn new(number: &str, attempts: u32) -> Self {
        Self {
            number: Some(number.to_string()),
            attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Idle,
    Dialing,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Idle => "idle",
            EntryStatus::Dialing => "dialing",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(EntryStatus::Idle),
            "dialing" => Ok(EntryStatus::Dialing),
            other => Err(OutdialError::Validation(format!("unknown entry status '{other}'"))),
        }
    }
}

/// One contact record in a dial-list dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DialListEntry {
    pub id: String,
    pub name: Option<String>,
    pub slots: [DialSlot; SLOT_COUNT],
    pub status: EntryStatus,
    pub dialing_uuid: Option<String>,
    pub dialing_camp_uuid: Option<String>,
    pub dialing_plan_uuid: Option<String>,
    /// Last hangup cause (Q.850), 0 when never dialed.
    pub res_hangup: i64,
    pub tm_last_dial: Option<DateTime<Utc>>,
}

impl DialListEntry {
    /// Idle entry with no numbers.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            slots: Default::default(),
            status: EntryStatus::Idle,
            dialing_uuid: None,
            dialing_camp_uuid: None,
            dialing_plan_uuid: None,
            res_hangup: 0,
            tm_last_dial: None,
        }
    }

    /// Set slot `index` (1-based).
    pub fn with_slot(mut self, index: usize, number: &str, attempts: u32) -> Self {
        if (1..=SLOT_COUNT).contains(&index) {
            self.slots[index - 1] = DialSlot::new(number, attempts);
        }
        self
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        let mut slots: [DialSlot; SLOT_COUNT] = Default::default();
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.number = optional_str(record, &format!("number_{}", i + 1));
            slot.attempts = non_negative(record, &format!("trycnt_{}", i + 1))?;
        }
        let status = match optional_str(record, "status") {
            Some(s) => EntryStatus::parse(&s)?,
            None => EntryStatus::Idle,
        };
        Ok(Self {
            id: required_str(record, "uuid")?,
            name: optional_str(record, "name"),
            slots,
            status,
            dialing_uuid: optional_str(record, "dialing_uuid"),
            dialing_camp_uuid: optional_str(record, "dialing_camp_uuid"),
            dialing_plan_uuid: optional_str(record, "dialing_plan_uuid"),
            res_hangup: int_or(record, "res_hangup", 0)?,
            tm_last_dial: optional_time(record, "tm_last_dial")?,
        })
    }

    pub fn to_record(&self) -> Record {
        let mut r = Record::new();
        r.insert("uuid".into(), Value::String(self.id.clone()));
        r.insert("name".into(), opt_value(&self.name));
        for (i, slot) in self.slots.iter().enumerate() {
            r.insert(format!("number_{}", i + 1), opt_value(&slot.number));
            r.insert(format!("trycnt_{}", i + 1), Value::from(slot.attempts));
        }
        r.insert("status".into(), Value::String(self.status.as_str().into()));
        r.insert("dialing_uuid".into(), opt_value(&self.dialing_uuid));
        r.insert("dialing_camp_uuid".into(), opt_value(&self.dialing_camp_uuid));
        r.insert("dialing_plan_uuid".into(), opt_value(&self.dialing_plan_uuid));
        r.insert("res_hangup".into(), Value::from(self.res_hangup));
        r.insert("tm_last_dial".into(), time_value(self.tm_last_dial));
        r
    }
}

fn non_negative(record: &Record, field: &str) -> Result<u32> {
    let v = int_or(record, field, 0)?;
    u32::try_from(v)
        .map_err(|_| OutdialError::Validation(format!("field '{field}' out of range: {v}")))
}
