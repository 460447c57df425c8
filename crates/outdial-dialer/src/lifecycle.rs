//! Campaign state machine: guard status transitions against live calls.
//!
//! ```text
//!  stopped ──start──► starting ──settle──► running
//!     ▲                                     │  │
//!     │ settle (no live calls)        stop  │  │ pause
//!  stopping ◄───────────────────────────────┘  ▼
//!                        paused ◄──settle── pausing
//! ```
//!
//! A stop or pause with live calls parks the campaign in `stopping` /
//! `pausing`; `settle` finishes the move once the registry no longer holds a
//! session for it.

use outdial_core::error::{OutdialError, Result};
use outdial_core::types::{Campaign, CampaignStatus};

use crate::registry::DialingRegistry;

/// Externally requested transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignRequest {
    Start,
    Stop,
    Pause,
}

impl std::fmt::Display for CampaignRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignRequest::Start => write!(f, "start"),
            CampaignRequest::Stop => write!(f, "stop"),
            CampaignRequest::Pause => write!(f, "pause"),
        }
    }
}

pub struct CampaignStateMachine<'a> {
    registry: &'a DialingRegistry,
}

impl<'a> CampaignStateMachine<'a> {
    pub fn new(registry: &'a DialingRegistry) -> Self {
        Self { registry }
    }

    /// No preconditions yet; any campaign may be started.
    pub fn is_startable(&self, _campaign: &Campaign) -> bool {
        true
    }

    pub fn is_stoppable(&self, campaign: &Campaign) -> bool {
        !self.has_live_calls(campaign)
    }

    pub fn is_pausable(&self, campaign: &Campaign) -> bool {
        !self.has_live_calls(campaign)
    }

    fn has_live_calls(&self, campaign: &Campaign) -> bool {
        match self.registry.snapshot().find(|s| s.campaign_id() == campaign.id) {
            Some(session) => {
                tracing::info!(
                    "📞 Campaign {} has an active call: {} ({})",
                    campaign.id,
                    session.id(),
                    session.snapshot().number
                );
                true
            }
            None => false,
        }
    }

    /// Status the campaign should move to for `request`.
    pub fn request(&self, campaign: &Campaign, request: CampaignRequest) -> Result<CampaignStatus> {
        use CampaignStatus::*;
        let next = match request {
            CampaignRequest::Start => match campaign.status {
                Starting | Running => campaign.status,
                _ if self.is_startable(campaign) => Starting,
                _ => {
                    return Err(OutdialError::Validation(format!(
                        "campaign {} cannot be started",
                        campaign.id
                    )));
                }
            },
            CampaignRequest::Stop => match campaign.status {
                Stopped => Stopped,
                _ if self.is_stoppable(campaign) => Stopped,
                _ => Stopping,
            },
            CampaignRequest::Pause => match campaign.status {
                Stopped | Stopping => {
                    return Err(OutdialError::Validation(format!(
                        "campaign {} is {}; cannot pause",
                        campaign.id, campaign.status
                    )));
                }
                Paused => Paused,
                _ if self.is_pausable(campaign) => Paused,
                _ => Pausing,
            },
        };
        tracing::debug!("Campaign {} {request}: {} → {next}", campaign.id, campaign.status);
        Ok(next)
    }

    /// Finish a pending transition if the guard now allows it.
    pub fn settle(&self, campaign: &Campaign) -> CampaignStatus {
        match campaign.status {
            CampaignStatus::Starting => CampaignStatus::Running,
            CampaignStatus::Stopping if self.is_stoppable(campaign) => CampaignStatus::Stopped,
            CampaignStatus::Pausing if self.is_pausable(campaign) => CampaignStatus::Paused,
            other => other,
        }
    }
}
