//! # Outdial Dialer
//!
//! Scheduling core of an outbound predictive dialer: which campaign to
//! service, which dial-list entry and number to call, and which calls are in
//! flight right now.
//!
//! ## Design Principles
//! - One store seam: SQLite in production, in-memory for tests
//! - Entry reservation is a compare-and-set, never a read-then-write
//! - Live calls are tracked in memory only; the store holds the linkage
//! - Tokio interval loop drives the dispatcher; originating calls is the caller's job
//!
//! ## Architecture
//! ```text
//! Dispatcher (tokio interval)
//!   ├── settle starting / stopping / pausing campaigns
//!   ├── CampaignScheduler → random running campaign
//!   ├── DialListSelector  → least-tried entry, first eligible slot
//!   │     └── select-and-mark (idle → dialing, CAS on the store)
//!   └── DialingRegistry   → session per reserved entry
//!         └── on hangup → record result → entry back to idle
//!
//! CampaignStateMachine
//!   └── stop / pause allowed only when the registry has no call for the campaign
//! ```

pub mod dispatch;
pub mod lifecycle;
pub mod manager;
pub mod notify;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testkit;

pub use dispatch::{Dispatcher, spawn_dispatcher};
pub use lifecycle::{CampaignRequest, CampaignStateMachine};
pub use manager::{CampaignManager, DialListManager};
pub use notify::{EventHistory, MultiSink, TracingSink};
pub use registry::DialingRegistry;
pub use scheduler::CampaignScheduler;
pub use selector::{DialListSelector, Selection};
pub use session::{DialSnapshot, DialingSession, LiveCallState, SessionSummary};
pub use store::{MemoryStore, SqliteStore};
