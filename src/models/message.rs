use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One provider-accepted send: at most one row per (campaign, recipient
/// email). The recipient is referenced by email rather than foreign key so
/// the send history survives contact deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignMessage {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact_email: String,
    /// Provider-assigned message identifier. Globally unique; delivery
    /// events are keyed by it.
    pub provider_message_id: String,
    pub sent_at: DateTime<Utc>,
    /// Set when a hard bounce or complaint came back for this message.
    /// The send itself stays valid; this only flags the address for the
    /// suppression decision made upstream.
    pub suppressed_reason: Option<SuppressedReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuppressedReason {
    Bounce,
    Complaint,
}

impl SuppressedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bounce => "bounce",
            Self::Complaint => "complaint",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bounce" => Some(Self::Bounce),
            "complaint" => Some(Self::Complaint),
            _ => None,
        }
    }
}

/// An asynchronous delivery-status event reported by the mail provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub message_id: String,
    #[serde(rename = "event")]
    pub kind: DeliveryEventKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryEventKind {
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
}

impl DeliveryEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Bounced => "bounced",
            Self::Complained => "complained",
        }
    }
}

impl std::str::FromStr for DeliveryEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delivered" => Ok(Self::Delivered),
            "opened" | "open" => Ok(Self::Opened),
            "clicked" | "click" => Ok(Self::Clicked),
            "bounced" | "bounce" => Ok(Self::Bounced),
            "complained" | "complaint" => Ok(Self::Complained),
            _ => Err(format!("unknown delivery event: {}", s)),
        }
    }
}

impl std::fmt::Display for DeliveryEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
