use anyhow::Result;
use clap::{Args, Subcommand};

use crate::db::Database;
use crate::models::{PlanTier, Site};

#[derive(Args)]
pub struct SiteArgs {
    #[command(subcommand)]
    pub command: SiteCommands,
}

#[derive(Subcommand)]
pub enum SiteCommands {
    /// Register a new site
    Add {
        /// Site name (unique)
        name: String,
        /// Plan tier: starter, growth, scale, enterprise
        #[arg(short, long, default_value = "starter")]
        tier: String,
    },
    /// List all sites
    List,
    /// Change a site's plan tier
    SetTier {
        name: String,
        /// Plan tier: starter, growth, scale, enterprise
        tier: String,
    },
}

pub fn run_site(db: &Database, args: SiteArgs) -> Result<()> {
    match args.command {
        SiteCommands::Add { name, tier } => {
            let tier: PlanTier = tier.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let site = Site::new(name, tier);
            db.insert_site(&site)?;
            println!("Added site '{}' ({}) on {} tier", site.name, site.id, site.plan_tier);
        }
        SiteCommands::List => {
            let sites = db.list_sites()?;
            if sites.is_empty() {
                println!("No sites yet. Add one with: campaigncmd site add <name>");
                return Ok(());
            }
            println!("{:<20}  {:<10}  {:<8}  {}", "NAME", "TIER", "CONTACTS", "ID");
            for site in sites {
                let contacts = db.count_contacts(site.id)?;
                println!(
                    "{:<20}  {:<10}  {:<8}  {}",
                    site.name,
                    site.plan_tier.as_str(),
                    contacts,
                    site.id
                );
            }
        }
        SiteCommands::SetTier { name, tier } => {
            let tier: PlanTier = tier.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let site = super::resolve_site(db, &name)?;
            db.set_site_tier(site.id, tier)?;
            println!("Site '{}' is now on the {} tier", site.name, tier);
        }
    }
    Ok(())
}
