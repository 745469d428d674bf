use anyhow::Result;
use chrono::Utc;

use crate::db::Database;
use crate::dispatch::{self, SmtpMailer};
use crate::models::CampaignStatus;

/// One scheduler tick: find every scheduled campaign whose send time has
/// arrived and dispatch it. Meant to be run from cron or a systemd timer.
pub fn run_tick(db: &Database) -> Result<()> {
    let mailer = SmtpMailer::from_settings(db)?;
    let outcomes = dispatch::run_due_campaigns(db, &mailer, Utc::now())?;

    if outcomes.is_empty() {
        println!("Nothing due");
        return Ok(());
    }

    for outcome in outcomes {
        match outcome.status {
            CampaignStatus::Sent => println!(
                "{}: sent {} (skipped {}, failed recipients {})",
                outcome.campaign_id, outcome.sent, outcome.skipped, outcome.failed_recipients
            ),
            _ => println!(
                "{}: {}: {} (sent {} before stopping)",
                outcome.campaign_id,
                outcome.status,
                outcome.failure_reason.as_deref().unwrap_or("unknown"),
                outcome.sent
            ),
        }
    }

    Ok(())
}

/// Shared display for a single campaign dispatch, used by `campaign send`.
pub(crate) fn print_outcome(outcome: &dispatch::DispatchOutcome) {
    match outcome.status {
        CampaignStatus::Sent => {
            println!(
                "Sent to {} recipient(s) ({} skipped as already sent, {} failed)",
                outcome.sent, outcome.skipped, outcome.failed_recipients
            );
        }
        _ => {
            println!(
                "Campaign {}: {}",
                outcome.status,
                outcome.failure_reason.as_deref().unwrap_or("unknown")
            );
            println!(
                "Sent {} of {} resolved recipient(s) before stopping",
                outcome.sent, outcome.resolved
            );
        }
    }
}
