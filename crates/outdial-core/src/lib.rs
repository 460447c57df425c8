//! # Outdial Core
//!
//! Shared building blocks for the Outdial predictive-dialing core:
//! typed campaign / dial-plan / dial-list records, the store and event-sink
//! seams the scheduler talks to, error types and configuration.

pub mod config;
pub mod error;
pub mod record;
pub mod traits;
pub mod types;

pub use config::OutdialConfig;
pub use error::{OutdialError, Result};
pub use record::{Condition, Filter, Record};
pub use traits::{CasOutcome, Clock, EventKind, EventSink, IdProvider, Store, SystemClock, UuidProvider};
pub use types::{
    Campaign, CampaignStatus, DialListEntry, DialListMaster, DialPlan, DialSlot, EntryStatus,
    NewCampaign, NewDialListMaster, SLOT_COUNT,
};
