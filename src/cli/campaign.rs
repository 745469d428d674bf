use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::audience;
use crate::db::{cycle_key, Database};
use crate::dispatch::{self, SmtpMailer};
use crate::models::{AudienceFilter, Campaign, ContactStatus};
use crate::quota::compute_allowance;

#[derive(Args)]
pub struct CampaignArgs {
    #[command(subcommand)]
    pub command: CampaignCommands,
}

#[derive(Subcommand)]
pub enum CampaignCommands {
    /// Create a draft campaign
    Create {
        #[arg(short, long)]
        site: String,
        /// Campaign name
        name: String,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        from_name: Option<String>,
        #[arg(long)]
        from_email: Option<String>,
    },
    /// Set subject and body (draft only)
    Content {
        #[arg(short, long)]
        site: String,
        name: String,
        #[arg(long)]
        subject: String,
        /// Body text; use --body-file for longer content
        #[arg(long, conflicts_with = "body_file")]
        body: Option<String>,
        #[arg(long)]
        body_file: Option<String>,
    },
    /// Set the sender identity (draft only)
    Sender {
        #[arg(short, long)]
        site: String,
        name: String,
        #[arg(long)]
        from_name: String,
        #[arg(long)]
        from_email: String,
    },
    /// Set the audience filter (draft only)
    Filter {
        #[arg(short, long)]
        site: String,
        name: String,
        /// Tag the contact must carry (repeatable; OR semantics)
        #[arg(long = "include-tag")]
        include_tags: Vec<String>,
        /// Tag that removes the contact even when included (repeatable)
        #[arg(long = "exclude-tag")]
        exclude_tags: Vec<String>,
        /// Contact status to target (repeatable); none selected sends to nobody
        #[arg(long = "status")]
        statuses: Vec<String>,
    },
    /// Schedule for a future time (RFC 3339, e.g. 2026-09-01T09:00:00Z)
    Schedule {
        #[arg(short, long)]
        site: String,
        name: String,
        at: String,
    },
    /// Demote a scheduled campaign back to draft
    Unschedule {
        #[arg(short, long)]
        site: String,
        name: String,
    },
    /// Send now. --force overrides a scheduled time that has not arrived.
    Send {
        #[arg(short, long)]
        site: String,
        name: String,
        #[arg(long)]
        force: bool,
    },
    /// Cancel (delete) a draft or scheduled campaign
    Cancel {
        #[arg(short, long)]
        site: String,
        name: String,
    },
    /// Show status, audience, and delivery counters
    Show {
        #[arg(short, long)]
        site: String,
        name: String,
    },
    /// List a site's campaigns
    List {
        #[arg(short, long)]
        site: String,
    },
    /// Resolve the audience without sending; shows exclusions separately
    Preview {
        #[arg(short, long)]
        site: String,
        name: String,
    },
    /// List per-recipient send failures
    Failures {
        #[arg(short, long)]
        site: String,
        name: String,
    },
}

pub fn run_campaign(db: &Database, args: CampaignArgs) -> Result<()> {
    match args.command {
        CampaignCommands::Create {
            site,
            name,
            subject,
            from_name,
            from_email,
        } => {
            let site = super::resolve_site(db, &site)?;
            let mut campaign = Campaign::new(site.id, name);
            if let Some(subject) = subject {
                campaign.set_content(subject, campaign.body.clone())?;
            }
            if from_name.is_some() || from_email.is_some() {
                campaign.set_sender(
                    from_name.unwrap_or_default(),
                    from_email.unwrap_or_default(),
                )?;
            }
            db.insert_campaign(&campaign)?;
            println!("Created draft '{}' ({})", campaign.name, campaign.id);
        }
        CampaignCommands::Content {
            site,
            name,
            subject,
            body,
            body_file,
        } => {
            let site = super::resolve_site(db, &site)?;
            let mut campaign = resolve_campaign(db, site.id, &name)?;
            let body = match (body, body_file) {
                (Some(body), _) => body,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read {}", path))?,
                (None, None) => return Err(anyhow!("provide --body or --body-file")),
            };
            campaign.set_content(subject, body)?;
            db.update_campaign(&campaign)?;
            println!("Updated content of '{}'", campaign.name);
        }
        CampaignCommands::Sender {
            site,
            name,
            from_name,
            from_email,
        } => {
            let site = super::resolve_site(db, &site)?;
            let mut campaign = resolve_campaign(db, site.id, &name)?;
            campaign.set_sender(from_name, from_email)?;
            db.update_campaign(&campaign)?;
            println!("Updated sender of '{}'", campaign.name);
        }
        CampaignCommands::Filter {
            site,
            name,
            include_tags,
            exclude_tags,
            statuses,
        } => {
            let site = super::resolve_site(db, &site)?;
            let mut campaign = resolve_campaign(db, site.id, &name)?;

            let mut filter = AudienceFilter::default();
            for tag_name in &include_tags {
                filter.included_tags.insert(resolve_tag(db, site.id, tag_name)?);
            }
            for tag_name in &exclude_tags {
                filter.excluded_tags.insert(resolve_tag(db, site.id, tag_name)?);
            }
            for status in &statuses {
                let status: ContactStatus =
                    status.parse().map_err(|e: String| anyhow!(e))?;
                filter.statuses.insert(status);
            }

            campaign.set_filter(filter)?;
            db.update_campaign(&campaign)?;
            println!("Updated audience filter of '{}'", campaign.name);
        }
        CampaignCommands::Schedule { site, name, at } => {
            let site = super::resolve_site(db, &site)?;
            let mut campaign = resolve_campaign(db, site.id, &name)?;
            let at: DateTime<Utc> = DateTime::parse_from_rfc3339(&at)
                .with_context(|| format!("'{}' is not an RFC 3339 timestamp", at))?
                .with_timezone(&Utc);
            campaign.schedule(at, Utc::now())?;
            db.update_campaign(&campaign)?;
            println!("Scheduled '{}' for {}", campaign.name, at);
        }
        CampaignCommands::Unschedule { site, name } => {
            let site = super::resolve_site(db, &site)?;
            let mut campaign = resolve_campaign(db, site.id, &name)?;
            campaign.unschedule()?;
            db.update_campaign(&campaign)?;
            println!("'{}' is a draft again", campaign.name);
        }
        CampaignCommands::Send { site, name, force } => {
            let site = super::resolve_site(db, &site)?;
            let campaign = resolve_campaign(db, site.id, &name)?;
            let mailer = SmtpMailer::from_settings(db)?;
            let outcome =
                dispatch::send_campaign(db, &mailer, campaign.id, force, Utc::now())?;
            super::tick::print_outcome(&outcome);
        }
        CampaignCommands::Cancel { site, name } => {
            let site = super::resolve_site(db, &site)?;
            let campaign = resolve_campaign(db, site.id, &name)?;
            if db.delete_campaign_if_cancellable(campaign.id)? {
                println!("Cancelled '{}'", campaign.name);
            } else {
                println!(
                    "'{}' is {} and can no longer be cancelled",
                    campaign.name, campaign.status
                );
            }
        }
        CampaignCommands::Show { site, name } => {
            let site = super::resolve_site(db, &site)?;
            let campaign = resolve_campaign(db, site.id, &name)?;
            print_campaign(db, &campaign)?;
        }
        CampaignCommands::List { site } => {
            let site = super::resolve_site(db, &site)?;
            let campaigns = db.list_campaigns(site.id)?;
            if campaigns.is_empty() {
                println!("No campaigns on {}", site.name);
                return Ok(());
            }
            println!("{:<24}  {:<10}  {:<8}  {}", "NAME", "STATUS", "SENT", "SCHEDULED FOR");
            for campaign in campaigns {
                let scheduled = campaign
                    .scheduled_for
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<24}  {:<10}  {:<8}  {}",
                    campaign.name,
                    campaign.status.as_str(),
                    campaign.sent_count,
                    scheduled
                );
            }
        }
        CampaignCommands::Preview { site, name } => {
            let site = super::resolve_site(db, &site)?;
            let campaign = resolve_campaign(db, site.id, &name)?;
            let preview = audience::preview(db, site.id, &campaign.filter)?;

            let now = Utc::now();
            let snapshot = db.billing_snapshot(site.id)?;
            let allowance = compute_allowance(&snapshot, now);
            let used = db.usage_for_cycle(site.id, &cycle_key(now))?;

            println!("Audience for '{}'", campaign.name);
            println!("  Recipients:   {}", preview.matched.len());
            println!("  Excluded:     {}", preview.excluded.len());
            println!("  Allowance:    {} ({} used this cycle)", allowance, used);

            if !preview.excluded.is_empty() {
                println!("\nRemoved by exclusion tags:");
                for contact in &preview.excluded {
                    println!("  {}", contact.email);
                }
            }
        }
        CampaignCommands::Failures { site, name } => {
            let site = super::resolve_site(db, &site)?;
            let campaign = resolve_campaign(db, site.id, &name)?;
            let failures = db.list_send_failures(campaign.id)?;
            if failures.is_empty() {
                println!("No send failures for '{}'", campaign.name);
                return Ok(());
            }
            for (email, error, at) in failures {
                println!("{}  {:<32}  {}", at.format("%Y-%m-%d %H:%M:%S"), email, error);
            }
        }
    }
    Ok(())
}

fn resolve_campaign(db: &Database, site_id: Uuid, ident: &str) -> Result<Campaign> {
    if let Ok(id) = Uuid::parse_str(ident) {
        if let Some(campaign) = db.get_campaign(id)? {
            return Ok(campaign);
        }
    }
    db.get_campaign_by_name(site_id, ident)?
        .ok_or_else(|| anyhow!("no campaign named '{}'", ident))
}

fn resolve_tag(db: &Database, site_id: Uuid, name: &str) -> Result<Uuid> {
    Ok(db
        .get_tag_by_name(site_id, name)?
        .ok_or_else(|| anyhow!("no tag '{}'; create it with: campaigncmd tag add", name))?
        .id)
}

fn print_campaign(db: &Database, campaign: &Campaign) -> Result<()> {
    println!("{} ({})", campaign.name, campaign.id);
    println!("  Status:      {}", campaign.status);
    if let Some(at) = campaign.scheduled_for {
        println!("  Scheduled:   {}", at);
    }
    if let Some(reason) = &campaign.failure_reason {
        println!("  Failure:     {}", reason);
    }
    println!("  Subject:     {}", campaign.subject);
    println!("  From:        {} <{}>", campaign.from_name, campaign.from_email);
    println!("  Recipients:  {}", campaign.recipient_count);
    println!("  Sent:        {}", campaign.sent_count);
    println!("  Delivered:   {}", campaign.delivered_count);
    println!("  Opened:      {}", campaign.opened_count);
    println!("  Clicked:     {}", campaign.clicked_count);
    println!("  Bounced:     {}", campaign.bounced_count);
    println!("  Complained:  {}", campaign.complained_count);
    println!("  Messages:    {}", db.count_messages(campaign.id)?);
    Ok(())
}
