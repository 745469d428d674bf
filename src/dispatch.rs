//! Campaign dispatch: walks a resolved recipient list, enforces the
//! monthly quota and per-recipient idempotency, and drives sends through
//! the mail transport.
//!
//! Crash recovery falls out of the persistence model: every accepted send
//! is a campaign_messages row written atomically with the usage counter,
//! so re-running dispatch for a `sending` campaign skips recipients that
//! already have a row and resumes quota accounting from the persisted
//! counters.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audience;
use crate::db::{cycle_key, Database};
use crate::models::{Campaign, CampaignMessage, CampaignStatus};
use crate::quota::compute_allowance;

/// One outbound email handed to the transport.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub from_name: String,
    pub from_email: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
}

/// The provider's acknowledgement of an accepted send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
}

/// Transport failures come in two shapes with very different blast radii.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// This recipient was rejected; the batch continues.
    #[error("recipient rejected: {0}")]
    Recipient(String),

    /// The transport cannot make forward progress at all (connection,
    /// authentication). The batch stops and the campaign fails.
    #[error("transport failure: {0}")]
    Fatal(String),
}

/// The external mail-sending collaborator. The engine only decides what
/// to send and to whom; everything on the wire lives behind this trait.
pub trait MailTransport {
    fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, TransportError>;
}

/// Result of one dispatch run over a campaign's batch.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub campaign_id: Uuid,
    /// Size of the resolved audience.
    pub resolved: usize,
    /// Sends accepted by the transport during this run.
    pub sent: usize,
    /// Recipients skipped because a previous run already sent to them.
    pub skipped: usize,
    /// Recipients the transport rejected individually.
    pub failed_recipients: usize,
    pub status: CampaignStatus,
    pub failure_reason: Option<String>,
}

/// Move a draft or scheduled campaign into `sending` and run its batch.
/// `force` is the operator's "send now" override for a scheduled campaign
/// whose time has not arrived.
pub fn send_campaign(
    db: &Database,
    transport: &dyn MailTransport,
    campaign_id: Uuid,
    force: bool,
    now: DateTime<Utc>,
) -> Result<DispatchOutcome> {
    let mut campaign = db
        .get_campaign(campaign_id)?
        .ok_or_else(|| anyhow!("unknown campaign: {}", campaign_id))?;

    campaign.begin_sending(now, force)?;
    db.update_campaign(&campaign)?;

    run_dispatch(db, transport, campaign_id, now)
}

/// Scheduler tick: dispatch every scheduled campaign whose time has come.
pub fn run_due_campaigns(
    db: &Database,
    transport: &dyn MailTransport,
    now: DateTime<Utc>,
) -> Result<Vec<DispatchOutcome>> {
    let due = db.due_campaigns(now)?;
    let mut outcomes = Vec::with_capacity(due.len());

    for mut campaign in due {
        info!(campaign = %campaign.id, name = %campaign.name, "scheduled campaign due");
        campaign.begin_sending(now, false)?;
        db.update_campaign(&campaign)?;
        outcomes.push(run_dispatch(db, transport, campaign.id, now)?);
    }

    Ok(outcomes)
}

/// Run the batch for a campaign already in `sending`. Safe to re-run
/// after a crash: already-sent recipients are skipped.
pub fn run_dispatch(
    db: &Database,
    transport: &dyn MailTransport,
    campaign_id: Uuid,
    now: DateTime<Utc>,
) -> Result<DispatchOutcome> {
    let mut campaign = db
        .get_campaign(campaign_id)?
        .ok_or_else(|| anyhow!("unknown campaign: {}", campaign_id))?;

    if campaign.status != CampaignStatus::Sending {
        return Err(anyhow!(
            "campaign {} is {}, expected sending",
            campaign.id,
            campaign.status
        ));
    }

    // Resolver errors abort here, before any send: fail closed with no
    // quota consumed.
    let recipients = audience::resolve(db, campaign.site_id, &campaign.filter)?;

    if recipients.is_empty() {
        return fail_campaign(db, &mut campaign, "empty audience", 0, 0, 0);
    }

    campaign.recipient_count = recipients.len() as i64;
    db.update_campaign(&campaign)?;

    let mut sent = 0usize;
    let mut skipped = 0usize;
    let mut failed_recipients = 0usize;

    for contact in &recipients {
        // Idempotency first: a recipient from an earlier run consumes no
        // quota and is never sent twice.
        if db.message_exists(campaign.id, &contact.email)? {
            skipped += 1;
            continue;
        }

        // The allowance is recomputed from a fresh snapshot at every
        // decision point: admin actions can change it mid-batch.
        let snapshot = db.billing_snapshot(campaign.site_id)?;
        let allowance = compute_allowance(&snapshot, now);
        let cycle = cycle_key(now);
        let used = db.usage_for_cycle(campaign.site_id, &cycle)?;

        if allowance.remaining(used).is_exhausted() {
            warn!(
                campaign = %campaign.id,
                sent,
                skipped,
                remaining_audience = recipients.len() - sent - skipped - failed_recipients,
                "quota exhausted mid-batch"
            );
            return fail_campaign(
                db,
                &mut campaign,
                "quota exhausted",
                sent,
                skipped,
                failed_recipients,
            );
        }

        let email = OutgoingEmail {
            from_name: campaign.from_name.clone(),
            from_email: campaign.from_email.clone(),
            to_email: contact.email.clone(),
            subject: campaign.subject.clone(),
            body: campaign.body.clone(),
        };

        match transport.send(&email) {
            Ok(receipt) => {
                let message = CampaignMessage {
                    id: Uuid::new_v4(),
                    campaign_id: campaign.id,
                    contact_email: contact.email.clone(),
                    provider_message_id: receipt.message_id,
                    sent_at: now,
                    suppressed_reason: None,
                };
                db.record_send(&message, campaign.site_id, &cycle)?;
                sent += 1;
                debug!(campaign = %campaign.id, to = %contact.email, "send accepted");
            }
            Err(TransportError::Recipient(reason)) => {
                // Isolated: recorded against this recipient only.
                db.insert_send_failure(campaign.id, &contact.email, &reason)?;
                failed_recipients += 1;
                warn!(campaign = %campaign.id, to = %contact.email, %reason, "recipient send failed");
            }
            Err(TransportError::Fatal(reason)) => {
                warn!(campaign = %campaign.id, %reason, "transport failure, aborting batch");
                return fail_campaign(
                    db,
                    &mut campaign,
                    &format!("transport failure: {}", reason),
                    sent,
                    skipped,
                    failed_recipients,
                );
            }
        }
    }

    campaign.mark_sent(now)?;
    db.update_campaign(&campaign)?;
    info!(
        campaign = %campaign.id,
        resolved = recipients.len(),
        sent,
        skipped,
        failed_recipients,
        "campaign dispatched"
    );

    Ok(DispatchOutcome {
        campaign_id: campaign.id,
        resolved: recipients.len(),
        sent,
        skipped,
        failed_recipients,
        status: CampaignStatus::Sent,
        failure_reason: None,
    })
}

/// Terminal failure: partial sends stay on record, nothing is rolled
/// back.
fn fail_campaign(
    db: &Database,
    campaign: &mut Campaign,
    reason: &str,
    sent: usize,
    skipped: usize,
    failed_recipients: usize,
) -> Result<DispatchOutcome> {
    campaign.mark_failed(reason)?;
    db.update_campaign(campaign)?;

    Ok(DispatchOutcome {
        campaign_id: campaign.id,
        resolved: campaign.recipient_count as usize,
        sent,
        skipped,
        failed_recipients,
        status: CampaignStatus::Failed,
        failure_reason: Some(reason.to_string()),
    })
}

// ==================== SMTP transport ====================

/// Production transport: hands messages to an SMTP relay via lettre.
/// Relay host and port come from app_settings; the generated Message-ID
/// doubles as the provider message identifier delivery events key on.
pub struct SmtpMailer {
    transport: lettre::SmtpTransport,
    message_id_domain: String,
}

impl SmtpMailer {
    pub fn from_settings(db: &Database) -> Result<Self> {
        let host = db
            .setting_get("smtp_host")?
            .unwrap_or_else(|| "localhost".to_string());
        let port: u16 = db
            .setting_get("smtp_port")?
            .and_then(|p| p.parse().ok())
            .unwrap_or(25);

        let transport = lettre::SmtpTransport::builder_dangerous(&host)
            .port(port)
            .build();

        Ok(Self {
            transport,
            message_id_domain: host,
        })
    }
}

impl MailTransport for SmtpMailer {
    fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, TransportError> {
        use lettre::message::Mailbox;
        use lettre::Transport;

        // A bad sender address is a configuration problem: no recipient
        // in this batch can succeed.
        let from: Mailbox = format!("{} <{}>", email.from_name, email.from_email)
            .parse()
            .map_err(|e| TransportError::Fatal(format!("invalid sender address: {}", e)))?;

        let to: Mailbox = email
            .to_email
            .parse()
            .map_err(|e| TransportError::Recipient(format!("invalid address: {}", e)))?;

        let message_id = format!("{}@{}", Uuid::new_v4(), self.message_id_domain);

        let message = lettre::Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .message_id(Some(format!("<{}>", message_id)))
            .body(email.body.clone())
            .map_err(|e| TransportError::Recipient(e.to_string()))?;

        self.transport.send(&message).map_err(|e| {
            if e.is_permanent() {
                TransportError::Recipient(e.to_string())
            } else {
                TransportError::Fatal(e.to_string())
            }
        })?;

        Ok(SendReceipt { message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AddonSubscription, AudienceFilter, Contact, ContactStatus, PlanTier, Site,
    };
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;

    /// Records accepted sends; can reject single addresses or go fatal
    /// after a set number of accepted sends.
    #[derive(Default)]
    struct MockTransport {
        accepted: RefCell<Vec<String>>,
        reject: HashSet<String>,
        fatal_after: Option<usize>,
        counter: Cell<usize>,
    }

    impl MailTransport for MockTransport {
        fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, TransportError> {
            if let Some(limit) = self.fatal_after {
                if self.counter.get() >= limit {
                    return Err(TransportError::Fatal("connection reset".to_string()));
                }
            }
            if self.reject.contains(&email.to_email) {
                return Err(TransportError::Recipient("550 mailbox unavailable".to_string()));
            }
            self.counter.set(self.counter.get() + 1);
            self.accepted.borrow_mut().push(email.to_email.clone());
            Ok(SendReceipt {
                message_id: format!("mock-{}-{}", email.to_email, self.counter.get()),
            })
        }
    }

    struct Fixture {
        db: Database,
        site_id: Uuid,
    }

    fn fixture(tier: PlanTier) -> Fixture {
        let db = Database::open_memory().unwrap();
        let site = Site::new("acme".to_string(), tier);
        db.insert_site(&site).unwrap();
        Fixture {
            site_id: site.id,
            db,
        }
    }

    fn add_active_contacts(f: &Fixture, count: usize) {
        let tx = f.db.conn().unchecked_transaction().unwrap();
        for i in 0..count {
            let mut contact = Contact::new(f.site_id, format!("c{:05}@x.com", i));
            contact.status = ContactStatus::Active;
            f.db.insert_contact(&contact).unwrap();
        }
        tx.commit().unwrap();
    }

    fn active_filter() -> AudienceFilter {
        AudienceFilter {
            statuses: [ContactStatus::Active].into_iter().collect(),
            ..Default::default()
        }
    }

    fn sendable_campaign(f: &Fixture) -> Campaign {
        let mut campaign = Campaign::new(f.site_id, "blast".to_string());
        campaign
            .set_content("Subject".to_string(), "Body".to_string())
            .unwrap();
        campaign
            .set_sender("Acme".to_string(), "news@acme.test".to_string())
            .unwrap();
        campaign.set_filter(active_filter()).unwrap();
        f.db.insert_campaign(&campaign).unwrap();
        campaign
    }

    #[test]
    fn test_quota_exhaustion_stops_batch_and_fails_campaign() {
        // Tier base 0, one add-on cap 15,000, 16,000 matching contacts:
        // exactly 15,000 sends in resolver order, then a terminal failure.
        let f = fixture(PlanTier::Starter);
        f.db.insert_addon(&AddonSubscription::new(
            f.site_id,
            "boost-15k".to_string(),
            15_000,
        ))
        .unwrap();
        add_active_contacts(&f, 16_000);

        let campaign = sendable_campaign(&f);
        let transport = MockTransport::default();
        let outcome =
            send_campaign(&f.db, &transport, campaign.id, false, Utc::now()).unwrap();

        assert_eq!(outcome.sent, 15_000);
        assert_eq!(outcome.status, CampaignStatus::Failed);
        assert_eq!(outcome.failure_reason.as_deref(), Some("quota exhausted"));
        assert_eq!(f.db.count_messages(campaign.id).unwrap(), 15_000);

        let found = f.db.get_campaign(campaign.id).unwrap().unwrap();
        assert_eq!(found.status, CampaignStatus::Failed);
        assert_eq!(found.sent_count, 15_000);
        assert_eq!(found.recipient_count, 16_000);

        // Partial sends are history, not rolled back.
        let cycle = cycle_key(Utc::now());
        assert_eq!(f.db.usage_for_cycle(f.site_id, &cycle).unwrap(), 15_000);

        // Sends happened in resolver order: the first 15,000 emails.
        let accepted = transport.accepted.borrow();
        assert_eq!(accepted[0], "c00000@x.com");
        assert_eq!(accepted[14_999], "c14999@x.com");
    }

    #[test]
    fn test_rerun_skips_already_sent_recipients() {
        let f = fixture(PlanTier::Scale);
        add_active_contacts(&f, 10);

        let mut campaign = sendable_campaign(&f);
        campaign.begin_sending(Utc::now(), false).unwrap();
        f.db.update_campaign(&campaign).unwrap();

        // A previous run got through 3 recipients before crashing.
        let cycle = cycle_key(Utc::now());
        for i in 0..3 {
            let message = CampaignMessage {
                id: Uuid::new_v4(),
                campaign_id: campaign.id,
                contact_email: format!("c{:05}@x.com", i),
                provider_message_id: format!("prior-{}", i),
                sent_at: Utc::now(),
                suppressed_reason: None,
            };
            f.db.record_send(&message, f.site_id, &cycle).unwrap();
        }

        let transport = MockTransport::default();
        let outcome = run_dispatch(&f.db, &transport, campaign.id, Utc::now()).unwrap();

        assert_eq!(outcome.skipped, 3);
        assert_eq!(outcome.sent, 7);
        assert_eq!(outcome.status, CampaignStatus::Sent);
        assert_eq!(f.db.count_messages(campaign.id).unwrap(), 10);
        assert_eq!(transport.accepted.borrow().len(), 7);
    }

    #[test]
    fn test_recipient_failure_is_isolated() {
        let f = fixture(PlanTier::Scale);
        add_active_contacts(&f, 3);

        let campaign = sendable_campaign(&f);
        let transport = MockTransport {
            reject: ["c00001@x.com".to_string()].into_iter().collect(),
            ..Default::default()
        };

        let outcome =
            send_campaign(&f.db, &transport, campaign.id, false, Utc::now()).unwrap();

        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.failed_recipients, 1);
        assert_eq!(outcome.status, CampaignStatus::Sent);

        let failures = f.db.list_send_failures(campaign.id).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "c00001@x.com");

        // Failed recipients never get a message row.
        assert_eq!(f.db.count_messages(campaign.id).unwrap(), 2);
        let found = f.db.get_campaign(campaign.id).unwrap().unwrap();
        assert_eq!(found.sent_count, 2);
    }

    #[test]
    fn test_fatal_transport_error_fails_campaign_keeping_partial_send() {
        let f = fixture(PlanTier::Scale);
        add_active_contacts(&f, 5);

        let campaign = sendable_campaign(&f);
        let transport = MockTransport {
            fatal_after: Some(2),
            ..Default::default()
        };

        let outcome =
            send_campaign(&f.db, &transport, campaign.id, false, Utc::now()).unwrap();

        assert_eq!(outcome.sent, 2);
        assert_eq!(outcome.status, CampaignStatus::Failed);
        assert!(outcome
            .failure_reason
            .as_deref()
            .unwrap()
            .starts_with("transport failure"));
        assert_eq!(f.db.count_messages(campaign.id).unwrap(), 2);
    }

    #[test]
    fn test_empty_audience_fails_without_sending() {
        let f = fixture(PlanTier::Scale);

        let campaign = sendable_campaign(&f);
        let transport = MockTransport::default();
        let outcome =
            send_campaign(&f.db, &transport, campaign.id, false, Utc::now()).unwrap();

        assert_eq!(outcome.status, CampaignStatus::Failed);
        assert_eq!(outcome.failure_reason.as_deref(), Some("empty audience"));
        assert!(transport.accepted.borrow().is_empty());
    }

    #[test]
    fn test_zero_allowance_sends_nothing() {
        // Starter base is 0 and there are no add-ons: quota of zero means
        // zero emails regardless of audience size.
        let f = fixture(PlanTier::Starter);
        add_active_contacts(&f, 3);

        let campaign = sendable_campaign(&f);
        let transport = MockTransport::default();
        let outcome =
            send_campaign(&f.db, &transport, campaign.id, false, Utc::now()).unwrap();

        assert_eq!(outcome.sent, 0);
        assert_eq!(outcome.status, CampaignStatus::Failed);
        assert_eq!(outcome.failure_reason.as_deref(), Some("quota exhausted"));
        assert!(transport.accepted.borrow().is_empty());
    }

    #[test]
    fn test_unlimited_tier_has_no_ceiling() {
        let f = fixture(PlanTier::Enterprise);
        add_active_contacts(&f, 25);

        let campaign = sendable_campaign(&f);
        let transport = MockTransport::default();
        let outcome =
            send_campaign(&f.db, &transport, campaign.id, false, Utc::now()).unwrap();

        assert_eq!(outcome.sent, 25);
        assert_eq!(outcome.status, CampaignStatus::Sent);
    }

    #[test]
    fn test_tick_dispatches_due_campaigns_only() {
        let f = fixture(PlanTier::Scale);
        add_active_contacts(&f, 2);
        let now = Utc::now();

        let mut due = sendable_campaign(&f);
        due.schedule(now + chrono::Duration::minutes(1), now).unwrap();
        f.db.update_campaign(&due).unwrap();

        let mut later = Campaign::new(f.site_id, "later".to_string());
        later.set_content("S".to_string(), "B".to_string()).unwrap();
        later
            .set_sender("A".to_string(), "a@acme.test".to_string())
            .unwrap();
        later.set_filter(active_filter()).unwrap();
        later.schedule(now + chrono::Duration::hours(3), now).unwrap();
        f.db.insert_campaign(&later).unwrap();

        let transport = MockTransport::default();
        let outcomes =
            run_due_campaigns(&f.db, &transport, now + chrono::Duration::minutes(5)).unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].campaign_id, due.id);
        assert_eq!(outcomes[0].status, CampaignStatus::Sent);
        assert_eq!(
            f.db.get_campaign(later.id).unwrap().unwrap().status,
            CampaignStatus::Scheduled
        );
    }

    #[test]
    fn test_resume_from_disk_after_crash() {
        // A restart must pick up from the persisted message rows, not any
        // in-memory progress.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campaigns.db");

        let (site_id, campaign_id) = {
            let db = Database::open_at(path.clone()).unwrap();
            let site = Site::new("acme".to_string(), PlanTier::Scale);
            db.insert_site(&site).unwrap();
            for i in 0..4 {
                let mut contact = Contact::new(site.id, format!("c{:05}@x.com", i));
                contact.status = ContactStatus::Active;
                db.insert_contact(&contact).unwrap();
            }

            let mut campaign = Campaign::new(site.id, "blast".to_string());
            campaign
                .set_content("Subject".to_string(), "Body".to_string())
                .unwrap();
            campaign
                .set_sender("Acme".to_string(), "news@acme.test".to_string())
                .unwrap();
            campaign.set_filter(active_filter()).unwrap();
            campaign.begin_sending(Utc::now(), false).unwrap();
            db.insert_campaign(&campaign).unwrap();

            // One send landed before the crash.
            let message = CampaignMessage {
                id: Uuid::new_v4(),
                campaign_id: campaign.id,
                contact_email: "c00000@x.com".to_string(),
                provider_message_id: "prior-0".to_string(),
                sent_at: Utc::now(),
                suppressed_reason: None,
            };
            db.record_send(&message, site.id, &cycle_key(Utc::now()))
                .unwrap();

            (site.id, campaign.id)
        };

        let db = Database::open_at(path).unwrap();
        let transport = MockTransport::default();
        let outcome = run_dispatch(&db, &transport, campaign_id, Utc::now()).unwrap();

        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.sent, 3);
        assert_eq!(outcome.status, CampaignStatus::Sent);
        assert_eq!(db.count_messages(campaign_id).unwrap(), 4);
        assert_eq!(
            db.usage_for_cycle(site_id, &cycle_key(Utc::now())).unwrap(),
            4
        );
    }
}
