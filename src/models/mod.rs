mod billing;
mod campaign;
mod contact;
mod message;
mod site;
mod tag;

pub use billing::{AddonStatus, AddonSubscription, BillingSnapshot, BonusGrant};
pub use campaign::{AudienceFilter, Campaign, CampaignError, CampaignStatus};
pub use contact::{Contact, ContactStatus};
pub use message::{CampaignMessage, DeliveryEvent, DeliveryEventKind, SuppressedReason};
pub use site::{PlanTier, Site};
pub use tag::{ContactTag, Tag};
