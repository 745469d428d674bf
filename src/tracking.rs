//! Delivery tracking: reconciles asynchronous provider events against
//! dispatched messages.
//!
//! Events arrive keyed by provider message id, possibly duplicated and
//! possibly for messages this system never sent. Unknown ids are logged
//! and dropped; a synthetic message row is never created. Each campaign
//! counter moves exactly once per distinct (message, event type).

use std::io::BufRead;

use anyhow::Result;
use tracing::{debug, warn};

use crate::db::Database;
use crate::models::{DeliveryEvent, DeliveryEventKind, SuppressedReason};

/// What happened to one ingested event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingOutcome {
    /// Counted against the owning campaign.
    Recorded,
    /// Already seen for this message and event type; ignored.
    Duplicate,
    /// No message with this provider id; discarded.
    UnknownMessage,
}

/// Apply one provider event.
pub fn apply_event(db: &Database, event: &DeliveryEvent) -> Result<TrackingOutcome> {
    let Some(message) = db.get_message_by_provider_id(&event.message_id)? else {
        warn!(
            message_id = %event.message_id,
            event = %event.kind,
            "delivery event for unknown message, discarding"
        );
        return Ok(TrackingOutcome::UnknownMessage);
    };

    let recorded = db.record_delivery_event(
        message.campaign_id,
        &event.message_id,
        event.kind,
        event.occurred_at,
    )?;

    if !recorded {
        debug!(
            message_id = %event.message_id,
            event = %event.kind,
            "duplicate delivery event ignored"
        );
        return Ok(TrackingOutcome::Duplicate);
    }

    // A bounce or complaint does not unsend anything: the transport
    // accepted the message. It only flags the address so future sends can
    // be suppressed upstream.
    match event.kind {
        DeliveryEventKind::Bounced => {
            db.set_message_suppressed(&event.message_id, SuppressedReason::Bounce)?;
        }
        DeliveryEventKind::Complained => {
            db.set_message_suppressed(&event.message_id, SuppressedReason::Complaint)?;
        }
        _ => {}
    }

    debug!(
        message_id = %event.message_id,
        campaign = %message.campaign_id,
        event = %event.kind,
        "delivery event recorded"
    );
    Ok(TrackingOutcome::Recorded)
}

/// Totals for a batch of ingested events.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub recorded: usize,
    pub duplicates: usize,
    pub unknown: usize,
    pub malformed: usize,
}

/// Ingest newline-delimited JSON events, one object per line:
/// `{"message_id": "...", "event": "delivered", "occurred_at": "..."}`.
/// Malformed lines are counted and skipped; they never abort the batch.
pub fn ingest_ndjson<R: BufRead>(db: &Database, reader: R) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: DeliveryEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "malformed delivery event line, skipping");
                summary.malformed += 1;
                continue;
            }
        };

        match apply_event(db, &event)? {
            TrackingOutcome::Recorded => summary.recorded += 1,
            TrackingOutcome::Duplicate => summary.duplicates += 1,
            TrackingOutcome::UnknownMessage => summary.unknown += 1,
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::cycle_key;
    use crate::models::{Campaign, CampaignMessage, PlanTier, Site};
    use chrono::Utc;
    use uuid::Uuid;

    struct Fixture {
        db: Database,
        campaign_id: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Database::open_memory().unwrap();
        let site = Site::new("acme".to_string(), PlanTier::Growth);
        db.insert_site(&site).unwrap();

        let campaign = Campaign::new(site.id, "blast".to_string());
        db.insert_campaign(&campaign).unwrap();

        let message = CampaignMessage {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            contact_email: "jo@x.com".to_string(),
            provider_message_id: "prov-1".to_string(),
            sent_at: Utc::now(),
            suppressed_reason: None,
        };
        db.record_send(&message, site.id, &cycle_key(Utc::now()))
            .unwrap();

        Fixture {
            campaign_id: campaign.id,
            db,
        }
    }

    fn event(message_id: &str, kind: DeliveryEventKind) -> DeliveryEvent {
        DeliveryEvent {
            message_id: message_id.to_string(),
            kind,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_increments_counter_once() {
        let f = fixture();

        assert_eq!(
            apply_event(&f.db, &event("prov-1", DeliveryEventKind::Delivered)).unwrap(),
            TrackingOutcome::Recorded
        );
        assert_eq!(
            apply_event(&f.db, &event("prov-1", DeliveryEventKind::Delivered)).unwrap(),
            TrackingOutcome::Duplicate
        );
        assert_eq!(
            apply_event(&f.db, &event("prov-1", DeliveryEventKind::Opened)).unwrap(),
            TrackingOutcome::Recorded
        );

        let campaign = f.db.get_campaign(f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.delivered_count, 1);
        assert_eq!(campaign.opened_count, 1);
        assert_eq!(campaign.clicked_count, 0);
    }

    #[test]
    fn test_unknown_message_discarded() {
        let f = fixture();

        assert_eq!(
            apply_event(&f.db, &event("never-sent", DeliveryEventKind::Delivered)).unwrap(),
            TrackingOutcome::UnknownMessage
        );

        // No synthetic message row, no counter movement.
        assert!(f.db.get_message_by_provider_id("never-sent").unwrap().is_none());
        let campaign = f.db.get_campaign(f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.delivered_count, 0);
    }

    #[test]
    fn test_bounce_annotates_without_failing_send() {
        let f = fixture();

        apply_event(&f.db, &event("prov-1", DeliveryEventKind::Bounced)).unwrap();

        let message = f.db.get_message_by_provider_id("prov-1").unwrap().unwrap();
        assert_eq!(message.suppressed_reason, Some(SuppressedReason::Bounce));

        // The send stays on record and sent_count is untouched.
        let campaign = f.db.get_campaign(f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.sent_count, 1);
        assert_eq!(campaign.bounced_count, 1);
    }

    #[test]
    fn test_complaint_annotates() {
        let f = fixture();

        apply_event(&f.db, &event("prov-1", DeliveryEventKind::Complained)).unwrap();

        let message = f.db.get_message_by_provider_id("prov-1").unwrap().unwrap();
        assert_eq!(message.suppressed_reason, Some(SuppressedReason::Complaint));
        let campaign = f.db.get_campaign(f.campaign_id).unwrap().unwrap();
        assert_eq!(campaign.complained_count, 1);
    }

    #[test]
    fn test_ndjson_ingest() {
        let f = fixture();

        let input = concat!(
            r#"{"message_id": "prov-1", "event": "delivered", "occurred_at": "2026-08-04T10:00:00Z"}"#,
            "\n",
            r#"{"message_id": "prov-1", "event": "delivered", "occurred_at": "2026-08-04T10:01:00Z"}"#,
            "\n",
            r#"{"message_id": "ghost", "event": "opened", "occurred_at": "2026-08-04T10:02:00Z"}"#,
            "\n",
            "not json\n",
            "\n",
        );

        let summary = ingest_ndjson(&f.db, input.as_bytes()).unwrap();
        assert_eq!(
            summary,
            IngestSummary {
                recorded: 1,
                duplicates: 1,
                unknown: 1,
                malformed: 1,
            }
        );
    }
}
