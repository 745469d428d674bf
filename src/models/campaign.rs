use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ContactStatus;

/// A bulk email campaign. Owns its lifecycle: all status transitions go
/// through the methods below, which enforce the state machine
/// draft -> scheduled -> sending -> {sent | failed}.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub site_id: Uuid,
    pub name: String,
    pub subject: String,
    pub from_name: String,
    pub from_email: String,
    pub body: String,
    pub filter: AudienceFilter,
    pub status: CampaignStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub recipient_count: i64,
    pub sent_count: i64,
    pub delivered_count: i64,
    pub opened_count: i64,
    pub clicked_count: i64,
    pub bounced_count: i64,
    pub complained_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Audience definition for a campaign.
///
/// Inclusion is OR over `included_tags` (empty = no positive restriction).
/// Exclusion always wins: a contact carrying any excluded tag is out even
/// if it also carries an included one. An empty `statuses` set selects
/// nobody: an explicit "nothing selected", not "everything".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AudienceFilter {
    pub included_tags: HashSet<Uuid>,
    pub excluded_tags: HashSet<Uuid>,
    pub statuses: HashSet<ContactStatus>,
}

impl Campaign {
    pub fn new(site_id: Uuid, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            site_id,
            name,
            subject: String::new(),
            from_name: String::new(),
            from_email: String::new(),
            body: String::new(),
            filter: AudienceFilter::default(),
            status: CampaignStatus::Draft,
            scheduled_for: None,
            failure_reason: None,
            recipient_count: 0,
            sent_count: 0,
            delivered_count: 0,
            opened_count: 0,
            clicked_count: 0,
            bounced_count: 0,
            complained_count: 0,
            created_at: now,
            updated_at: now,
            sent_at: None,
        }
    }

    /// Replace subject and body. Permitted only while draft.
    pub fn set_content(&mut self, subject: String, body: String) -> Result<(), CampaignError> {
        self.require_draft()?;
        self.subject = subject;
        self.body = body;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Replace the sender identity. Permitted only while draft.
    pub fn set_sender(&mut self, from_name: String, from_email: String) -> Result<(), CampaignError> {
        self.require_draft()?;
        self.from_name = from_name;
        self.from_email = from_email;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Replace the audience filter. Permitted only while draft.
    pub fn set_filter(&mut self, filter: AudienceFilter) -> Result<(), CampaignError> {
        self.require_draft()?;
        self.filter = filter;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// draft -> scheduled. Requires content, a sender identity, and a
    /// future timestamp; a past timestamp is a configuration error (use
    /// `begin_sending` for immediate dispatch instead).
    pub fn schedule(&mut self, at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), CampaignError> {
        if self.status != CampaignStatus::Draft {
            return Err(CampaignError::InvalidTransition {
                from: self.status,
                to: CampaignStatus::Scheduled,
            });
        }
        self.require_sendable()?;
        if at <= now {
            return Err(CampaignError::ScheduleNotFuture { at });
        }
        self.status = CampaignStatus::Scheduled;
        self.scheduled_for = Some(at);
        self.updated_at = now;
        Ok(())
    }

    /// scheduled -> draft, so the campaign can be edited or cancelled.
    pub fn unschedule(&mut self) -> Result<(), CampaignError> {
        if self.status != CampaignStatus::Scheduled {
            return Err(CampaignError::InvalidTransition {
                from: self.status,
                to: CampaignStatus::Draft,
            });
        }
        self.status = CampaignStatus::Draft;
        self.scheduled_for = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// draft/scheduled -> sending. A scheduled campaign must be due unless
    /// `force` (the operator's "send now" override) is set. Clears
    /// `scheduled_for`: the timestamp is only set while scheduled.
    pub fn begin_sending(&mut self, now: DateTime<Utc>, force: bool) -> Result<(), CampaignError> {
        match self.status {
            CampaignStatus::Draft => {}
            CampaignStatus::Scheduled => {
                if let Some(at) = self.scheduled_for {
                    if now < at && !force {
                        return Err(CampaignError::NotDue { at });
                    }
                }
            }
            from => {
                return Err(CampaignError::InvalidTransition {
                    from,
                    to: CampaignStatus::Sending,
                });
            }
        }
        self.require_sendable()?;
        self.status = CampaignStatus::Sending;
        self.scheduled_for = None;
        self.updated_at = now;
        Ok(())
    }

    /// sending -> sent. Every resolved recipient has a terminal outcome.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> Result<(), CampaignError> {
        if self.status != CampaignStatus::Sending {
            return Err(CampaignError::InvalidTransition {
                from: self.status,
                to: CampaignStatus::Sent,
            });
        }
        self.status = CampaignStatus::Sent;
        self.sent_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// sending -> failed. Partial sends are retained as valid history.
    pub fn mark_failed(&mut self, reason: &str) -> Result<(), CampaignError> {
        if self.status != CampaignStatus::Sending {
            return Err(CampaignError::InvalidTransition {
                from: self.status,
                to: CampaignStatus::Failed,
            });
        }
        self.status = CampaignStatus::Failed;
        self.failure_reason = Some(reason.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Cancellation is only possible before dispatch begins.
    pub fn can_cancel(&self) -> bool {
        matches!(
            self.status,
            CampaignStatus::Draft | CampaignStatus::Scheduled
        )
    }

    fn require_draft(&self) -> Result<(), CampaignError> {
        if self.status == CampaignStatus::Draft {
            Ok(())
        } else {
            Err(CampaignError::NotEditable {
                status: self.status,
            })
        }
    }

    fn require_sendable(&self) -> Result<(), CampaignError> {
        if self.subject.trim().is_empty() || self.body.trim().is_empty() {
            return Err(CampaignError::MissingContent);
        }
        if self.from_email.trim().is_empty() {
            return Err(CampaignError::MissingSender);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Scheduled,
    Sending,
    Sent,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Lenient parse for values read back from storage.
    pub fn parse(s: &str) -> Self {
        match s {
            "scheduled" => Self::Scheduled,
            "sending" => Self::Sending,
            "sent" => Self::Sent,
            "failed" => Self::Failed,
            _ => Self::Draft,
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CampaignError {
    #[error("campaign is {status}; content can only change while draft")]
    NotEditable { status: CampaignStatus },

    #[error("campaign has no subject or body")]
    MissingContent,

    #[error("campaign has no sender address")]
    MissingSender,

    #[error("scheduled time {at} is not in the future")]
    ScheduleNotFuture { at: DateTime<Utc> },

    #[error("campaign is not due until {at}")]
    NotDue { at: DateTime<Utc> },

    #[error("cannot move a {from} campaign to {to}")]
    InvalidTransition {
        from: CampaignStatus,
        to: CampaignStatus,
    },
}
