use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::db::{cycle_key, Database};
use crate::models::{AddonStatus, AddonSubscription, BonusGrant};
use crate::quota::compute_allowance;

#[derive(Args)]
pub struct BillingArgs {
    #[command(subcommand)]
    pub command: BillingCommands,
}

#[derive(Subcommand)]
pub enum BillingCommands {
    /// Manage quota add-on subscriptions
    Addon {
        #[command(subcommand)]
        command: AddonCommands,
    },
    /// Grant a time-limited bonus (replaces any existing grant)
    Bonus {
        #[arg(short, long)]
        site: String,
        /// Additional emails per month while the grant is live
        amount: i64,
        /// Expiry (RFC 3339)
        #[arg(long)]
        expires: String,
    },
    /// Show the computed allowance and cycle usage
    Quota {
        #[arg(short, long)]
        site: String,
    },
}

#[derive(Subcommand)]
pub enum AddonCommands {
    /// Subscribe the site to an add-on
    Add {
        #[arg(short, long)]
        site: String,
        /// Billing product identifier, e.g. newsletter-boost-15k
        product: String,
        /// Monthly cap the add-on contributes
        #[arg(long)]
        cap: i64,
    },
    /// Cancel an add-on. It keeps contributing until its access window
    /// ends (default: end of the current month).
    Cancel {
        #[arg(short, long)]
        site: String,
        /// Add-on id (see: billing addon list)
        id: String,
        /// End of paid access (RFC 3339)
        #[arg(long)]
        access_until: Option<String>,
    },
    /// List a site's add-ons
    List {
        #[arg(short, long)]
        site: String,
    },
}

pub fn run_billing(db: &Database, args: BillingArgs) -> Result<()> {
    match args.command {
        BillingCommands::Addon { command } => run_addon(db, command),
        BillingCommands::Bonus {
            site,
            amount,
            expires,
        } => {
            let site = super::resolve_site(db, &site)?;
            let expires_at = parse_rfc3339(&expires)?;
            let now = Utc::now();
            db.grant_bonus(&BonusGrant {
                site_id: site.id,
                amount,
                expires_at,
                granted_at: now,
            })?;
            println!(
                "Granted {} bonus emails to {} until {}",
                amount, site.name, expires_at
            );
            Ok(())
        }
        BillingCommands::Quota { site } => {
            let site = super::resolve_site(db, &site)?;
            let now = Utc::now();
            let snapshot = db.billing_snapshot(site.id)?;
            let allowance = compute_allowance(&snapshot, now);
            let cycle = cycle_key(now);
            let used = db.usage_for_cycle(site.id, &cycle)?;

            println!("Quota for {} ({} tier)", site.name, snapshot.tier);
            println!("  Allowance:  {}", allowance);
            println!("  Used:       {} (cycle {})", used, cycle);
            match allowance.remaining(used) {
                crate::quota::Remaining::Unlimited => println!("  Remaining:  unlimited"),
                crate::quota::Remaining::Limited(n) => println!("  Remaining:  {}", n),
            }
            if let Some(bonus) = &snapshot.bonus {
                let state = if bonus.is_expired(now) { "expired" } else { "live" };
                println!(
                    "  Bonus:      {} until {} ({})",
                    bonus.amount, bonus.expires_at, state
                );
            }
            Ok(())
        }
    }
}

fn run_addon(db: &Database, command: AddonCommands) -> Result<()> {
    match command {
        AddonCommands::Add { site, product, cap } => {
            let site = super::resolve_site(db, &site)?;
            let addon = AddonSubscription::new(site.id, product, cap);
            db.insert_addon(&addon)?;
            println!(
                "Added '{}' (cap {}) to {} with id {}",
                addon.product, addon.monthly_cap, site.name, addon.id
            );
        }
        AddonCommands::Cancel {
            site,
            id,
            access_until,
        } => {
            let site = super::resolve_site(db, &site)?;
            let id = Uuid::parse_str(&id).context("add-on id must be a UUID")?;
            let until = match access_until {
                Some(at) => parse_rfc3339(&at)?,
                None => end_of_current_month(Utc::now()),
            };
            if db.cancel_addon(id, until)? {
                println!("Cancelled add-on {}; access runs until {}", id, until);
            } else {
                println!("No active add-on {} on {}", id, site.name);
            }
        }
        AddonCommands::List { site } => {
            let site = super::resolve_site(db, &site)?;
            let addons = db.list_addons(site.id)?;
            if addons.is_empty() {
                println!("No add-ons on {}", site.name);
                return Ok(());
            }
            for addon in addons {
                let window = match (addon.status, addon.access_until) {
                    (AddonStatus::Cancelled, Some(until)) => {
                        format!("access until {}", until.format("%Y-%m-%d"))
                    }
                    _ => String::new(),
                };
                println!(
                    "{}  {:<24}  cap {:<8}  {:<10}  {}",
                    addon.id,
                    addon.product,
                    addon.monthly_cap,
                    addon.status.as_str(),
                    window
                );
            }
        }
    }
    Ok(())
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("'{}' is not an RFC 3339 timestamp", s))?
        .with_timezone(&Utc))
}

/// Midnight UTC on the first day of the next month: the default paid
/// access window end for a cancelled add-on.
fn end_of_current_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let first_of_month = now
        .date_naive()
        .with_day(1)
        .expect("day 1 exists in every month");
    let mut next = first_of_month + Duration::days(32);
    next = next.with_day(1).expect("day 1 exists in every month");
    next.and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_current_month() {
        let t = DateTime::parse_from_rfc3339("2026-08-04T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(end_of_current_month(t).to_rfc3339(), "2026-09-01T00:00:00+00:00");

        // Year rollover
        let t = DateTime::parse_from_rfc3339("2026-12-31T23:59:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(end_of_current_month(t).to_rfc3339(), "2027-01-01T00:00:00+00:00");
    }
}
