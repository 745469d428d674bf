use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PlanTier;

/// A stackable quota booster with its own lifecycle, independent of the
/// base plan. A cancelled add-on keeps contributing until the end of its
/// paid access window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonSubscription {
    pub id: Uuid,
    pub site_id: Uuid,
    /// Billing product identifier, e.g. "newsletter-boost-15k".
    pub product: String,
    pub monthly_cap: i64,
    pub status: AddonStatus,
    /// End of the paid access window, set when the add-on is cancelled.
    pub access_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AddonSubscription {
    pub fn new(site_id: Uuid, product: String, monthly_cap: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            site_id,
            product,
            monthly_cap,
            status: AddonStatus::Active,
            access_until: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonStatus {
    Active,
    Cancelled,
}

impl AddonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cancelled" => Self::Cancelled,
            _ => Self::Active,
        }
    }
}

/// Admin-issued, time-limited additive quota increase. One per site; a new
/// grant replaces the old one. Expired grants stay on record (contributing
/// nothing) so the admin UI can show them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusGrant {
    pub site_id: Uuid,
    pub amount: i64,
    pub expires_at: DateTime<Utc>,
    pub granted_at: DateTime<Utc>,
}

impl BonusGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Point-in-time view of everything that feeds the quota calculation for
/// one site. Read fresh from storage at every dispatch decision; admin
/// actions can change any of it between scheduling and send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingSnapshot {
    pub tier: PlanTier,
    pub addons: Vec<AddonSubscription>,
    pub bonus: Option<BonusGrant>,
}
