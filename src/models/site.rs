use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tenant account. Every contact, tag, campaign, and quota source
/// belongs to exactly one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    pub plan_tier: PlanTier,
    pub created_at: DateTime<Utc>,
}

impl Site {
    pub fn new(name: String, plan_tier: PlanTier) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            plan_tier,
            created_at: Utc::now(),
        }
    }
}

/// Subscription plan tier. The monthly email base allowance is fixed per
/// tier; `Enterprise` is the documented unbounded tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Starter,
    Growth,
    Scale,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Growth => "growth",
            Self::Scale => "scale",
            Self::Enterprise => "enterprise",
        }
    }

    /// Lenient parse for values read back from storage. Unknown tiers map
    /// to `Starter`, which carries a zero base allowance.
    pub fn parse(s: &str) -> Self {
        match s {
            "growth" => Self::Growth,
            "scale" => Self::Scale,
            "enterprise" => Self::Enterprise,
            _ => Self::Starter,
        }
    }
}

impl std::str::FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "starter" => Ok(Self::Starter),
            "growth" => Ok(Self::Growth),
            "scale" => Ok(Self::Scale),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(format!("unknown plan tier: {}", s)),
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
