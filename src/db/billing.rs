//! Database operations for sites, subscriptions, and quota sources.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{parse_datetime, parse_uuid, Database};
use crate::models::{
    AddonStatus, AddonSubscription, BillingSnapshot, BonusGrant, PlanTier, Site,
};

/// Billing cycle key for a point in time: the UTC calendar month.
pub fn cycle_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

impl Database {
    // ==================== SITES ====================

    pub fn insert_site(&self, site: &Site) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sites (id, name, plan_tier, created_at) VALUES (?, ?, ?, ?)",
            params![
                site.id.to_string(),
                site.name,
                site.plan_tier.as_str(),
                site.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_site(&self, id: Uuid) -> Result<Option<Site>> {
        let result = self.conn().query_row(
            "SELECT id, name, plan_tier, created_at FROM sites WHERE id = ?",
            [id.to_string()],
            row_to_site,
        );

        match result {
            Ok(site) => Ok(Some(site)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_site_by_name(&self, name: &str) -> Result<Option<Site>> {
        let result = self.conn().query_row(
            "SELECT id, name, plan_tier, created_at FROM sites WHERE name = ?",
            [name],
            row_to_site,
        );

        match result {
            Ok(site) => Ok(Some(site)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_sites(&self) -> Result<Vec<Site>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, name, plan_tier, created_at FROM sites ORDER BY name ASC")?;

        let sites = stmt
            .query_map([], row_to_site)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(sites)
    }

    pub fn set_site_tier(&self, site_id: Uuid, tier: PlanTier) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE sites SET plan_tier = ? WHERE id = ?",
            params![tier.as_str(), site_id.to_string()],
        )?;
        Ok(rows > 0)
    }

    // ==================== ADD-ONS ====================

    pub fn insert_addon(&self, addon: &AddonSubscription) -> Result<()> {
        self.conn().execute(
            r#"INSERT INTO addon_subscriptions
               (id, site_id, product, monthly_cap, status, access_until, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            params![
                addon.id.to_string(),
                addon.site_id.to_string(),
                addon.product,
                addon.monthly_cap,
                addon.status.as_str(),
                addon.access_until.map(|t| t.to_rfc3339()),
                addon.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Cancel an add-on, recording the end of its paid access window. The
    /// row is kept: it still contributes to quota until the window ends.
    pub fn cancel_addon(&self, addon_id: Uuid, access_until: DateTime<Utc>) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE addon_subscriptions SET status = 'cancelled', access_until = ?
             WHERE id = ? AND status = 'active'",
            params![access_until.to_rfc3339(), addon_id.to_string()],
        )?;
        Ok(rows > 0)
    }

    pub fn list_addons(&self, site_id: Uuid) -> Result<Vec<AddonSubscription>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, site_id, product, monthly_cap, status, access_until, created_at
             FROM addon_subscriptions WHERE site_id = ? ORDER BY created_at ASC",
        )?;

        let addons = stmt
            .query_map([site_id.to_string()], row_to_addon)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(addons)
    }

    // ==================== BONUS GRANTS ====================

    /// Record an admin bonus grant. A site has at most one; granting again
    /// replaces the previous record.
    pub fn grant_bonus(&self, bonus: &BonusGrant) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO bonus_grants (site_id, amount, expires_at, granted_at)
             VALUES (?, ?, ?, ?)",
            params![
                bonus.site_id.to_string(),
                bonus.amount,
                bonus.expires_at.to_rfc3339(),
                bonus.granted_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_bonus(&self, site_id: Uuid) -> Result<Option<BonusGrant>> {
        let result = self.conn().query_row(
            "SELECT site_id, amount, expires_at, granted_at FROM bonus_grants WHERE site_id = ?",
            [site_id.to_string()],
            |row| {
                Ok(BonusGrant {
                    site_id: parse_uuid(&row.get::<_, String>(0)?)?,
                    amount: row.get(1)?,
                    expires_at: parse_datetime(row.get::<_, String>(2)?),
                    granted_at: parse_datetime(row.get::<_, String>(3)?),
                })
            },
        );

        match result {
            Ok(bonus) => Ok(Some(bonus)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ==================== SNAPSHOT & USAGE ====================

    /// Everything feeding the quota calculation, read fresh. Called at
    /// every dispatch decision point; never cache the result.
    pub fn billing_snapshot(&self, site_id: Uuid) -> Result<BillingSnapshot> {
        let site = self
            .get_site(site_id)?
            .ok_or_else(|| anyhow!("unknown site: {}", site_id))?;

        Ok(BillingSnapshot {
            tier: site.plan_tier,
            addons: self.list_addons(site_id)?,
            bonus: self.get_bonus(site_id)?,
        })
    }

    /// Emails sent by the site in the given billing cycle.
    pub fn usage_for_cycle(&self, site_id: Uuid, cycle: &str) -> Result<i64> {
        let result = self.conn().query_row(
            "SELECT sent_count FROM send_usage WHERE site_id = ? AND cycle = ?",
            params![site_id.to_string(), cycle],
            |row| row.get(0),
        );

        match result {
            Ok(count) => Ok(count),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

fn row_to_site(row: &Row) -> rusqlite::Result<Site> {
    Ok(Site {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        name: row.get(1)?,
        plan_tier: PlanTier::parse(&row.get::<_, String>(2)?),
        created_at: parse_datetime(row.get::<_, String>(3)?),
    })
}

fn row_to_addon(row: &Row) -> rusqlite::Result<AddonSubscription> {
    Ok(AddonSubscription {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        site_id: parse_uuid(&row.get::<_, String>(1)?)?,
        product: row.get(2)?,
        monthly_cap: row.get(3)?,
        status: AddonStatus::parse(&row.get::<_, String>(4)?),
        access_until: row.get::<_, Option<String>>(5)?.map(parse_datetime),
        created_at: parse_datetime(row.get::<_, String>(6)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_crud() {
        let db = Database::open_memory().unwrap();

        let site = Site::new("acme".to_string(), PlanTier::Growth);
        db.insert_site(&site).unwrap();

        let found = db.get_site_by_name("acme").unwrap().unwrap();
        assert_eq!(found.id, site.id);
        assert_eq!(found.plan_tier, PlanTier::Growth);

        assert!(db.set_site_tier(site.id, PlanTier::Scale).unwrap());
        let found = db.get_site(site.id).unwrap().unwrap();
        assert_eq!(found.plan_tier, PlanTier::Scale);

        assert_eq!(db.list_sites().unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_reflects_admin_actions() {
        let db = Database::open_memory().unwrap();
        let site = Site::new("acme".to_string(), PlanTier::Growth);
        db.insert_site(&site).unwrap();

        let snapshot = db.billing_snapshot(site.id).unwrap();
        assert!(snapshot.addons.is_empty());
        assert!(snapshot.bonus.is_none());

        let addon = AddonSubscription::new(site.id, "boost-15k".to_string(), 15_000);
        db.insert_addon(&addon).unwrap();

        let now = Utc::now();
        db.grant_bonus(&BonusGrant {
            site_id: site.id,
            amount: 5_000,
            expires_at: now + chrono::Duration::days(7),
            granted_at: now,
        })
        .unwrap();

        let snapshot = db.billing_snapshot(site.id).unwrap();
        assert_eq!(snapshot.addons.len(), 1);
        assert_eq!(snapshot.bonus.as_ref().unwrap().amount, 5_000);

        // Cancelling keeps the row with its access window
        assert!(db
            .cancel_addon(addon.id, now + chrono::Duration::days(10))
            .unwrap());
        let snapshot = db.billing_snapshot(site.id).unwrap();
        assert_eq!(snapshot.addons[0].status, AddonStatus::Cancelled);
        assert!(snapshot.addons[0].access_until.is_some());

        // Cancelling twice is a no-op
        assert!(!db.cancel_addon(addon.id, now).unwrap());
    }

    #[test]
    fn test_regrant_replaces_bonus() {
        let db = Database::open_memory().unwrap();
        let site = Site::new("acme".to_string(), PlanTier::Starter);
        db.insert_site(&site).unwrap();

        let now = Utc::now();
        for amount in [1_000, 2_500] {
            db.grant_bonus(&BonusGrant {
                site_id: site.id,
                amount,
                expires_at: now + chrono::Duration::days(7),
                granted_at: now,
            })
            .unwrap();
        }

        assert_eq!(db.get_bonus(site.id).unwrap().unwrap().amount, 2_500);
    }

    #[test]
    fn test_usage_defaults_to_zero() {
        let db = Database::open_memory().unwrap();
        let site = Site::new("acme".to_string(), PlanTier::Starter);
        db.insert_site(&site).unwrap();

        let cycle = cycle_key(Utc::now());
        assert_eq!(db.usage_for_cycle(site.id, &cycle).unwrap(), 0);
    }

    #[test]
    fn test_cycle_key_format() {
        let t = DateTime::parse_from_rfc3339("2026-08-04T12:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(cycle_key(t), "2026-08");
    }
}
