//! Database operations for campaigns, their messages, and delivery events.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use std::collections::HashSet;
use uuid::Uuid;

use super::{parse_datetime, parse_uuid, Database};
use crate::models::{
    AudienceFilter, Campaign, CampaignMessage, CampaignStatus, ContactStatus, DeliveryEventKind,
    SuppressedReason,
};

impl Database {
    // ==================== CAMPAIGN CRUD ====================

    pub fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        self.conn().execute(
            r#"INSERT INTO campaigns (
                id, site_id, name, subject, from_name, from_email, body,
                included_tag_ids, excluded_tag_ids, status_filters,
                status, scheduled_for, failure_reason,
                recipient_count, sent_count, delivered_count, opened_count,
                clicked_count, bounced_count, complained_count,
                created_at, updated_at, sent_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                campaign.id.to_string(),
                campaign.site_id.to_string(),
                campaign.name,
                campaign.subject,
                campaign.from_name,
                campaign.from_email,
                campaign.body,
                tag_set_to_json(&campaign.filter.included_tags),
                tag_set_to_json(&campaign.filter.excluded_tags),
                status_set_to_json(&campaign.filter.statuses),
                campaign.status.as_str(),
                campaign.scheduled_for.map(|t| t.to_rfc3339()),
                campaign.failure_reason,
                campaign.recipient_count,
                campaign.sent_count,
                campaign.delivered_count,
                campaign.opened_count,
                campaign.clicked_count,
                campaign.bounced_count,
                campaign.complained_count,
                campaign.created_at.to_rfc3339(),
                campaign.updated_at.to_rfc3339(),
                campaign.sent_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Persist the mutable portion of a campaign: content, filter, status,
    /// and counters. Immutability after `sent` is enforced by the model's
    /// transition methods, not here.
    pub fn update_campaign(&self, campaign: &Campaign) -> Result<bool> {
        let rows = self.conn().execute(
            r#"UPDATE campaigns SET
                name = ?, subject = ?, from_name = ?, from_email = ?, body = ?,
                included_tag_ids = ?, excluded_tag_ids = ?, status_filters = ?,
                status = ?, scheduled_for = ?, failure_reason = ?,
                recipient_count = ?, updated_at = ?, sent_at = ?
             WHERE id = ?"#,
            params![
                campaign.name,
                campaign.subject,
                campaign.from_name,
                campaign.from_email,
                campaign.body,
                tag_set_to_json(&campaign.filter.included_tags),
                tag_set_to_json(&campaign.filter.excluded_tags),
                status_set_to_json(&campaign.filter.statuses),
                campaign.status.as_str(),
                campaign.scheduled_for.map(|t| t.to_rfc3339()),
                campaign.failure_reason,
                campaign.recipient_count,
                campaign.updated_at.to_rfc3339(),
                campaign.sent_at.map(|t| t.to_rfc3339()),
                campaign.id.to_string(),
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        let result = self.conn().query_row(
            &format!("SELECT {} FROM campaigns WHERE id = ?", CAMPAIGN_COLUMNS),
            [id.to_string()],
            row_to_campaign,
        );

        match result {
            Ok(campaign) => Ok(Some(campaign)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_campaign_by_name(&self, site_id: Uuid, name: &str) -> Result<Option<Campaign>> {
        let result = self.conn().query_row(
            &format!(
                "SELECT {} FROM campaigns WHERE site_id = ? AND name = ? ORDER BY created_at DESC LIMIT 1",
                CAMPAIGN_COLUMNS
            ),
            params![site_id.to_string(), name],
            row_to_campaign,
        );

        match result {
            Ok(campaign) => Ok(Some(campaign)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_campaigns(&self, site_id: Uuid) -> Result<Vec<Campaign>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM campaigns WHERE site_id = ? ORDER BY created_at DESC",
            CAMPAIGN_COLUMNS
        ))?;

        let campaigns = stmt
            .query_map([site_id.to_string()], row_to_campaign)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(campaigns)
    }

    /// Scheduled campaigns whose send time has arrived. Feeds the
    /// scheduler tick.
    pub fn due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM campaigns
             WHERE status = 'scheduled' AND scheduled_for <= ?
             ORDER BY scheduled_for ASC",
            CAMPAIGN_COLUMNS
        ))?;

        let campaigns = stmt
            .query_map([now.to_rfc3339()], row_to_campaign)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(campaigns)
    }

    /// Delete a campaign that has not begun dispatch. The status guard is
    /// in the WHERE clause so a concurrent transition cannot race it.
    pub fn delete_campaign_if_cancellable(&self, id: Uuid) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM campaigns WHERE id = ? AND status IN ('draft', 'scheduled')",
            [id.to_string()],
        )?;
        Ok(rows > 0)
    }

    // ==================== MESSAGES ====================

    /// Whether a dispatch attempt already produced a message for this
    /// recipient (the per-recipient idempotency check).
    pub fn message_exists(&self, campaign_id: Uuid, contact_email: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM campaign_messages WHERE campaign_id = ? AND contact_email = ?",
            params![campaign_id.to_string(), contact_email],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record a provider-accepted send: insert the message row, bump the
    /// campaign's sent counter, and consume one unit of the site's cycle
    /// quota, all in a single transaction, so two dispatchers for the
    /// same site cannot jointly overshoot the allowance.
    pub fn record_send(
        &self,
        message: &CampaignMessage,
        site_id: Uuid,
        cycle: &str,
    ) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            r#"INSERT INTO campaign_messages
               (id, campaign_id, contact_email, provider_message_id, sent_at, suppressed_reason)
               VALUES (?, ?, ?, ?, ?, NULL)"#,
            params![
                message.id.to_string(),
                message.campaign_id.to_string(),
                message.contact_email,
                message.provider_message_id,
                message.sent_at.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "UPDATE campaigns SET sent_count = sent_count + 1 WHERE id = ?",
            [message.campaign_id.to_string()],
        )?;

        tx.execute(
            "INSERT INTO send_usage (site_id, cycle, sent_count) VALUES (?, ?, 1)
             ON CONFLICT(site_id, cycle) DO UPDATE SET sent_count = sent_count + 1",
            params![site_id.to_string(), cycle],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn count_messages(&self, campaign_id: Uuid) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM campaign_messages WHERE campaign_id = ?",
            [campaign_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn list_messages(&self, campaign_id: Uuid) -> Result<Vec<CampaignMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, campaign_id, contact_email, provider_message_id, sent_at, suppressed_reason
             FROM campaign_messages WHERE campaign_id = ? ORDER BY sent_at ASC, contact_email ASC",
        )?;

        let messages = stmt
            .query_map([campaign_id.to_string()], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(messages)
    }

    pub fn get_message_by_provider_id(&self, provider_message_id: &str) -> Result<Option<CampaignMessage>> {
        let result = self.conn().query_row(
            "SELECT id, campaign_id, contact_email, provider_message_id, sent_at, suppressed_reason
             FROM campaign_messages WHERE provider_message_id = ?",
            [provider_message_id],
            row_to_message,
        );

        match result {
            Ok(message) => Ok(Some(message)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ==================== SEND FAILURES ====================

    /// Record a per-recipient transport failure. Audit only: it never
    /// blocks the rest of the batch.
    pub fn insert_send_failure(
        &self,
        campaign_id: Uuid,
        contact_email: &str,
        error: &str,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO send_failures (id, campaign_id, contact_email, error, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                campaign_id.to_string(),
                contact_email,
                error,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_send_failures(&self, campaign_id: Uuid) -> Result<Vec<(String, String, DateTime<Utc>)>> {
        let mut stmt = self.conn().prepare(
            "SELECT contact_email, error, created_at FROM send_failures
             WHERE campaign_id = ? ORDER BY created_at ASC",
        )?;

        let failures = stmt
            .query_map([campaign_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    parse_datetime(row.get::<_, String>(2)?),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(failures)
    }

    // ==================== DELIVERY EVENTS ====================

    /// Apply one provider delivery event: insert into the per-(message,
    /// event type) ledger and bump the matching campaign counter, in one
    /// transaction. Returns false when the ledger already held the event
    /// (duplicate notification); the counter is untouched then.
    pub fn record_delivery_event(
        &self,
        campaign_id: Uuid,
        provider_message_id: &str,
        kind: DeliveryEventKind,
        occurred_at: DateTime<Utc>,
    ) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO delivery_events (id, message_id, event_type, occurred_at)
             VALUES (?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                provider_message_id,
                kind.as_str(),
                occurred_at.to_rfc3339(),
            ],
        )?;

        if inserted > 0 {
            let column = counter_column(kind);
            tx.execute(
                &format!("UPDATE campaigns SET {} = {} + 1 WHERE id = ?", column, column),
                [campaign_id.to_string()],
            )?;
        }

        tx.commit()?;
        Ok(inserted > 0)
    }

    pub fn count_delivery_events(&self) -> Result<i64> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM delivery_events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Flag a message for future suppression after a hard bounce or
    /// complaint. The send status of the row is untouched.
    pub fn set_message_suppressed(
        &self,
        provider_message_id: &str,
        reason: SuppressedReason,
    ) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE campaign_messages SET suppressed_reason = ?
             WHERE provider_message_id = ? AND suppressed_reason IS NULL",
            params![reason.as_str(), provider_message_id],
        )?;
        Ok(rows > 0)
    }
}

/// Campaign counter column for a delivery event kind. Static names only;
/// never interpolates external input.
fn counter_column(kind: DeliveryEventKind) -> &'static str {
    match kind {
        DeliveryEventKind::Delivered => "delivered_count",
        DeliveryEventKind::Opened => "opened_count",
        DeliveryEventKind::Clicked => "clicked_count",
        DeliveryEventKind::Bounced => "bounced_count",
        DeliveryEventKind::Complained => "complained_count",
    }
}

const CAMPAIGN_COLUMNS: &str = "id, site_id, name, subject, from_name, from_email, body, \
     included_tag_ids, excluded_tag_ids, status_filters, status, scheduled_for, failure_reason, \
     recipient_count, sent_count, delivered_count, opened_count, clicked_count, bounced_count, \
     complained_count, created_at, updated_at, sent_at";

fn tag_set_to_json(tags: &HashSet<Uuid>) -> String {
    let mut ids: Vec<String> = tags.iter().map(|id| id.to_string()).collect();
    ids.sort_unstable();
    serde_json::to_string(&ids).unwrap_or_else(|_| "[]".to_string())
}

fn tag_set_from_json(json: &str) -> HashSet<Uuid> {
    serde_json::from_str::<Vec<String>>(json)
        .unwrap_or_default()
        .iter()
        .filter_map(|s| Uuid::parse_str(s).ok())
        .collect()
}

fn status_set_to_json(statuses: &HashSet<ContactStatus>) -> String {
    let mut names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    names.sort_unstable();
    serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
}

fn status_set_from_json(json: &str) -> HashSet<ContactStatus> {
    serde_json::from_str::<Vec<String>>(json)
        .unwrap_or_default()
        .iter()
        .map(|s| ContactStatus::parse(s))
        .collect()
}

fn row_to_campaign(row: &Row) -> rusqlite::Result<Campaign> {
    Ok(Campaign {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        site_id: parse_uuid(&row.get::<_, String>(1)?)?,
        name: row.get(2)?,
        subject: row.get(3)?,
        from_name: row.get(4)?,
        from_email: row.get(5)?,
        body: row.get(6)?,
        filter: AudienceFilter {
            included_tags: tag_set_from_json(&row.get::<_, String>(7)?),
            excluded_tags: tag_set_from_json(&row.get::<_, String>(8)?),
            statuses: status_set_from_json(&row.get::<_, String>(9)?),
        },
        status: CampaignStatus::parse(&row.get::<_, String>(10)?),
        scheduled_for: row.get::<_, Option<String>>(11)?.map(parse_datetime),
        failure_reason: row.get(12)?,
        recipient_count: row.get(13)?,
        sent_count: row.get(14)?,
        delivered_count: row.get(15)?,
        opened_count: row.get(16)?,
        clicked_count: row.get(17)?,
        bounced_count: row.get(18)?,
        complained_count: row.get(19)?,
        created_at: parse_datetime(row.get::<_, String>(20)?),
        updated_at: parse_datetime(row.get::<_, String>(21)?),
        sent_at: row.get::<_, Option<String>>(22)?.map(parse_datetime),
    })
}

fn row_to_message(row: &Row) -> rusqlite::Result<CampaignMessage> {
    Ok(CampaignMessage {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        campaign_id: parse_uuid(&row.get::<_, String>(1)?)?,
        contact_email: row.get(2)?,
        provider_message_id: row.get(3)?,
        sent_at: parse_datetime(row.get::<_, String>(4)?),
        suppressed_reason: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| SuppressedReason::parse(&s)),
    })
}
