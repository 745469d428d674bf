pub const SCHEMA_VERSION: i32 = 3;

pub const SCHEMA_V1: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY,
    version INTEGER NOT NULL
);

-- Tenant accounts
CREATE TABLE IF NOT EXISTS sites (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    plan_tier TEXT NOT NULL DEFAULT 'starter',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS contacts (
    id TEXT PRIMARY KEY,
    site_id TEXT NOT NULL,
    email TEXT NOT NULL,
    first_name TEXT,
    last_name TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    subscribed_at TEXT NOT NULL,
    confirmed_at TEXT,
    unsubscribed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (site_id) REFERENCES sites(id) ON DELETE CASCADE,
    UNIQUE(site_id, email)
);

CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    site_id TEXT NOT NULL,
    name TEXT NOT NULL,
    color TEXT,
    is_system INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (site_id) REFERENCES sites(id) ON DELETE CASCADE,
    UNIQUE(site_id, name)
);

CREATE TABLE IF NOT EXISTS contact_tags (
    id TEXT PRIMARY KEY,
    contact_id TEXT NOT NULL,
    tag_id TEXT NOT NULL,
    added_at TEXT NOT NULL,
    FOREIGN KEY (contact_id) REFERENCES contacts(id) ON DELETE CASCADE,
    FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE,
    UNIQUE(contact_id, tag_id)
);

-- Audience filter sets are stored as JSON arrays; in memory they are
-- proper sets (models::AudienceFilter).
CREATE TABLE IF NOT EXISTS campaigns (
    id TEXT PRIMARY KEY,
    site_id TEXT NOT NULL,
    name TEXT NOT NULL,
    subject TEXT NOT NULL DEFAULT '',
    from_name TEXT NOT NULL DEFAULT '',
    from_email TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL DEFAULT '',
    included_tag_ids TEXT NOT NULL DEFAULT '[]',
    excluded_tag_ids TEXT NOT NULL DEFAULT '[]',
    status_filters TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'draft',
    scheduled_for TEXT,
    failure_reason TEXT,
    recipient_count INTEGER NOT NULL DEFAULT 0,
    sent_count INTEGER NOT NULL DEFAULT 0,
    delivered_count INTEGER NOT NULL DEFAULT 0,
    opened_count INTEGER NOT NULL DEFAULT 0,
    clicked_count INTEGER NOT NULL DEFAULT 0,
    bounced_count INTEGER NOT NULL DEFAULT 0,
    complained_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    sent_at TEXT,
    FOREIGN KEY (site_id) REFERENCES sites(id) ON DELETE CASCADE
);

-- One row per provider-accepted send. contact_email is not a foreign
-- key: history must survive contact deletion.
CREATE TABLE IF NOT EXISTS campaign_messages (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL,
    contact_email TEXT NOT NULL,
    provider_message_id TEXT NOT NULL UNIQUE,
    sent_at TEXT NOT NULL,
    FOREIGN KEY (campaign_id) REFERENCES campaigns(id) ON DELETE CASCADE,
    UNIQUE(campaign_id, contact_email)
);

CREATE TABLE IF NOT EXISTS addon_subscriptions (
    id TEXT PRIMARY KEY,
    site_id TEXT NOT NULL,
    product TEXT NOT NULL,
    monthly_cap INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    access_until TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (site_id) REFERENCES sites(id) ON DELETE CASCADE
);

-- At most one grant per site; a new grant replaces the old one. Expired
-- grants are kept for audit.
CREATE TABLE IF NOT EXISTS bonus_grants (
    site_id TEXT PRIMARY KEY,
    amount INTEGER NOT NULL,
    expires_at TEXT NOT NULL,
    granted_at TEXT NOT NULL,
    FOREIGN KEY (site_id) REFERENCES sites(id) ON DELETE CASCADE
);

-- Emails sent per site per billing cycle ("YYYY-MM"). Updated in the same
-- transaction as each campaign_messages insert.
CREATE TABLE IF NOT EXISTS send_usage (
    site_id TEXT NOT NULL,
    cycle TEXT NOT NULL,
    sent_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (site_id, cycle),
    FOREIGN KEY (site_id) REFERENCES sites(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS app_settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_contact_site ON contacts(site_id);
CREATE INDEX IF NOT EXISTS idx_contact_site_status ON contacts(site_id, status);
CREATE INDEX IF NOT EXISTS idx_contact_email ON contacts(email);
CREATE INDEX IF NOT EXISTS idx_tag_site ON tags(site_id);
CREATE INDEX IF NOT EXISTS idx_contact_tag_contact ON contact_tags(contact_id);
CREATE INDEX IF NOT EXISTS idx_contact_tag_tag ON contact_tags(tag_id);
CREATE INDEX IF NOT EXISTS idx_campaign_site ON campaigns(site_id);
CREATE INDEX IF NOT EXISTS idx_campaign_due ON campaigns(status, scheduled_for);
CREATE INDEX IF NOT EXISTS idx_message_campaign ON campaign_messages(campaign_id);
CREATE INDEX IF NOT EXISTS idx_addon_site ON addon_subscriptions(site_id);
"#;

/// V2 migration: per-recipient transport failures, recorded for audit
/// without blocking the batch.
pub const MIGRATION_V2: &str = r#"
CREATE TABLE IF NOT EXISTS send_failures (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL,
    contact_email TEXT NOT NULL,
    error TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (campaign_id) REFERENCES campaigns(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_send_failure_campaign ON send_failures(campaign_id);
"#;

/// V3 migration: delivery-event ledger (one row per message + event type,
/// the tracker's idempotency key) and bounce/complaint annotation on
/// messages.
pub const MIGRATION_V3: &str = r#"
CREATE TABLE IF NOT EXISTS delivery_events (
    id TEXT PRIMARY KEY,
    message_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    UNIQUE(message_id, event_type)
);

CREATE INDEX IF NOT EXISTS idx_delivery_event_message ON delivery_events(message_id);

ALTER TABLE campaign_messages ADD COLUMN suppressed_reason TEXT;
"#;
