use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

pub mod billing;
pub mod campaign;
pub mod config;
pub mod contact;
pub mod events;
pub mod import;
pub mod site;
pub mod tag;
pub mod tick;

pub use billing::run_billing;
pub use campaign::run_campaign;
pub use config::run_config;
pub use contact::run_contact;
pub use events::run_events;
pub use site::run_site;
pub use tag::run_tag;
pub use tick::run_tick;

use crate::db::Database;
use crate::models::Site;

#[derive(Parser)]
#[command(name = "campaigncmd")]
#[command(about = "Newsletter campaign engine with quota-gated dispatch")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage sites (tenant accounts)
    Site(site::SiteArgs),
    /// Manage a site's contact list
    Contact(contact::ContactArgs),
    /// Manage a site's tags
    Tag(tag::TagArgs),
    /// Create, target, schedule, and send campaigns
    Campaign(campaign::CampaignArgs),
    /// Quota sources: add-ons, bonus grants, usage
    Billing(billing::BillingArgs),
    /// Dispatch every scheduled campaign whose send time has arrived
    Tick,
    /// Delivery event ingestion (webhook listener and offline files)
    Events(events::EventsArgs),
    /// Application settings (SMTP relay)
    Config(config::ConfigArgs),
}

/// Look up a site by name, with a readable error for typos.
pub(crate) fn resolve_site(db: &Database, name: &str) -> Result<Site> {
    db.get_site_by_name(name)?
        .ok_or_else(|| anyhow!("no site named '{}'; see: campaigncmd site list", name))
}
