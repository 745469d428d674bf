//! Database operations for contacts and tags.

use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, Row};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{parse_datetime, parse_uuid, Database};
use crate::models::{Contact, ContactStatus, ContactTag, Tag};

impl Database {
    // ==================== CONTACTS ====================

    pub fn insert_contact(&self, contact: &Contact) -> Result<()> {
        self.conn().execute(
            r#"INSERT INTO contacts (
                id, site_id, email, first_name, last_name, status,
                subscribed_at, confirmed_at, unsubscribed_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                contact.id.to_string(),
                contact.site_id.to_string(),
                contact.email,
                contact.first_name,
                contact.last_name,
                contact.status.as_str(),
                contact.subscribed_at.to_rfc3339(),
                contact.confirmed_at.map(|t| t.to_rfc3339()),
                contact.unsubscribed_at.map(|t| t.to_rfc3339()),
                contact.created_at.to_rfc3339(),
                contact.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_contact_by_id(&self, id: Uuid) -> Result<Option<Contact>> {
        let result = self.conn().query_row(
            &format!("SELECT {} FROM contacts WHERE id = ?", CONTACT_COLUMNS),
            [id.to_string()],
            row_to_contact,
        );

        match result {
            Ok(contact) => Ok(Some(contact)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_contact_by_email(&self, site_id: Uuid, email: &str) -> Result<Option<Contact>> {
        let result = self.conn().query_row(
            &format!(
                "SELECT {} FROM contacts WHERE site_id = ? AND email = ?",
                CONTACT_COLUMNS
            ),
            params![site_id.to_string(), email],
            row_to_contact,
        );

        match result {
            Ok(contact) => Ok(Some(contact)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_contacts(&self, site_id: Uuid) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM contacts WHERE site_id = ? ORDER BY email ASC, id ASC",
            CONTACT_COLUMNS
        ))?;

        let contacts = stmt
            .query_map([site_id.to_string()], row_to_contact)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(contacts)
    }

    /// Contacts whose status is in `statuses`, in the resolver's stable
    /// order: email ascending, id as tiebreaker. An empty status set
    /// selects nobody.
    pub fn list_contacts_by_status(
        &self,
        site_id: Uuid,
        statuses: &HashSet<ContactStatus>,
    ) -> Result<Vec<Contact>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        names.sort_unstable();

        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM contacts WHERE site_id = ? AND status IN ({}) ORDER BY email ASC, id ASC",
            CONTACT_COLUMNS, placeholders
        );

        let mut stmt = self.conn().prepare(&sql)?;

        let mut query_params: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(site_id.to_string())];
        for name in names {
            query_params.push(Box::new(name.to_string()));
        }
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            query_params.iter().map(|p| p.as_ref()).collect();

        let contacts = stmt
            .query_map(param_refs.as_slice(), row_to_contact)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(contacts)
    }

    pub fn count_contacts(&self, site_id: Uuid) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM contacts WHERE site_id = ?",
            [site_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// pending -> active. Forward-only: active and unsubscribed contacts
    /// are left alone.
    pub fn activate_contact(&self, site_id: Uuid, email: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let rows = self.conn().execute(
            "UPDATE contacts SET status = 'active', confirmed_at = ?, updated_at = ?
             WHERE site_id = ? AND email = ? AND status = 'pending'",
            params![now, now, site_id.to_string(), email],
        )?;
        Ok(rows > 0)
    }

    /// Terminal opt-out. Applies from any non-unsubscribed status.
    pub fn unsubscribe_contact(&self, site_id: Uuid, email: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let rows = self.conn().execute(
            "UPDATE contacts SET status = 'unsubscribed', unsubscribed_at = ?, updated_at = ?
             WHERE site_id = ? AND email = ? AND status != 'unsubscribed'",
            params![now, now, site_id.to_string(), email],
        )?;
        Ok(rows > 0)
    }

    /// Re-subscription reactivates an unsubscribed record back to pending
    /// with a fresh subscription timestamp.
    pub fn reactivate_contact(&self, site_id: Uuid, email: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let rows = self.conn().execute(
            "UPDATE contacts SET status = 'pending', subscribed_at = ?, confirmed_at = NULL,
                    unsubscribed_at = NULL, updated_at = ?
             WHERE site_id = ? AND email = ? AND status = 'unsubscribed'",
            params![now, now, site_id.to_string(), email],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_contact(&self, id: Uuid) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM contacts WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    // ==================== TAGS ====================

    pub fn insert_tag(&self, tag: &Tag) -> Result<()> {
        self.conn().execute(
            "INSERT INTO tags (id, site_id, name, color, is_system) VALUES (?, ?, ?, ?, ?)",
            params![
                tag.id.to_string(),
                tag.site_id.to_string(),
                tag.name,
                tag.color,
                tag.is_system as i32,
            ],
        )?;
        Ok(())
    }

    pub fn get_tag_by_name(&self, site_id: Uuid, name: &str) -> Result<Option<Tag>> {
        let result = self.conn().query_row(
            "SELECT id, site_id, name, color, is_system FROM tags WHERE site_id = ? AND name = ?",
            params![site_id.to_string(), name],
            row_to_tag,
        );

        match result {
            Ok(tag) => Ok(Some(tag)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_tags(&self, site_id: Uuid) -> Result<Vec<Tag>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, site_id, name, color, is_system FROM tags WHERE site_id = ? ORDER BY name ASC",
        )?;

        let tags = stmt
            .query_map([site_id.to_string()], row_to_tag)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(tags)
    }

    /// Delete a user tag. System tags are not user-deletable.
    pub fn delete_tag(&self, site_id: Uuid, name: &str) -> Result<bool> {
        let Some(tag) = self.get_tag_by_name(site_id, name)? else {
            return Ok(false);
        };
        if tag.is_system {
            bail!("'{}' is a system tag and cannot be deleted", name);
        }

        let rows = self
            .conn()
            .execute("DELETE FROM tags WHERE id = ?", [tag.id.to_string()])?;
        Ok(rows > 0)
    }

    /// Assign a tag to a contact. Idempotent: returns false if the
    /// contact already carries the tag.
    pub fn assign_tag(&self, contact_id: Uuid, tag_id: Uuid) -> Result<bool> {
        let link = ContactTag::new(contact_id, tag_id);
        let rows = self.conn().execute(
            "INSERT OR IGNORE INTO contact_tags (id, contact_id, tag_id, added_at) VALUES (?, ?, ?, ?)",
            params![
                link.id.to_string(),
                link.contact_id.to_string(),
                link.tag_id.to_string(),
                link.added_at.to_rfc3339(),
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn remove_tag(&self, contact_id: Uuid, tag_id: Uuid) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM contact_tags WHERE contact_id = ? AND tag_id = ?",
            params![contact_id.to_string(), tag_id.to_string()],
        )?;
        Ok(rows > 0)
    }

    /// Tag ids carried by every contact of a site, keyed by contact id.
    /// One query for the whole site; the resolver joins in memory.
    pub fn tag_ids_by_contact(&self, site_id: Uuid) -> Result<HashMap<Uuid, HashSet<Uuid>>> {
        let mut stmt = self.conn().prepare(
            "SELECT ct.contact_id, ct.tag_id
             FROM contact_tags ct
             INNER JOIN contacts c ON c.id = ct.contact_id
             WHERE c.site_id = ?",
        )?;

        let rows = stmt.query_map([site_id.to_string()], |row| {
            let contact_id = parse_uuid(&row.get::<_, String>(0)?)?;
            let tag_id = parse_uuid(&row.get::<_, String>(1)?)?;
            Ok((contact_id, tag_id))
        })?;

        let mut map: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
        for row in rows {
            let (contact_id, tag_id) = row?;
            map.entry(contact_id).or_default().insert(tag_id);
        }

        Ok(map)
    }
}

const CONTACT_COLUMNS: &str = "id, site_id, email, first_name, last_name, status, \
     subscribed_at, confirmed_at, unsubscribed_at, created_at, updated_at";

fn row_to_contact(row: &Row) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        site_id: parse_uuid(&row.get::<_, String>(1)?)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        status: ContactStatus::parse(&row.get::<_, String>(5)?),
        subscribed_at: parse_datetime(row.get::<_, String>(6)?),
        confirmed_at: row.get::<_, Option<String>>(7)?.map(parse_datetime),
        unsubscribed_at: row.get::<_, Option<String>>(8)?.map(parse_datetime),
        created_at: parse_datetime(row.get::<_, String>(9)?),
        updated_at: parse_datetime(row.get::<_, String>(10)?),
    })
}

fn row_to_tag(row: &Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        site_id: parse_uuid(&row.get::<_, String>(1)?)?,
        name: row.get(2)?,
        color: row.get(3)?,
        is_system: row.get::<_, i32>(4)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlanTier, Site};

    fn test_site(db: &Database) -> Uuid {
        let site = Site::new("acme".to_string(), PlanTier::Growth);
        db.insert_site(&site).unwrap();
        site.id
    }

    #[test]
    fn test_contact_crud_and_lifecycle() {
        let db = Database::open_memory().unwrap();
        let site_id = test_site(&db);

        let mut contact = Contact::new(site_id, "jo@example.com".to_string());
        contact.first_name = Some("Jo".to_string());
        db.insert_contact(&contact).unwrap();

        let found = db
            .get_contact_by_email(site_id, "jo@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(found.status, ContactStatus::Pending);
        assert_eq!(found.display_name(), "Jo");

        // pending -> active sets confirmed_at
        assert!(db.activate_contact(site_id, "jo@example.com").unwrap());
        let found = db
            .get_contact_by_email(site_id, "jo@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(found.status, ContactStatus::Active);
        assert!(found.confirmed_at.is_some());

        // activating again is a no-op (forward-only)
        assert!(!db.activate_contact(site_id, "jo@example.com").unwrap());

        // unsubscribe is terminal
        assert!(db.unsubscribe_contact(site_id, "jo@example.com").unwrap());
        assert!(!db.activate_contact(site_id, "jo@example.com").unwrap());

        // re-subscription reactivates back to pending
        assert!(db.reactivate_contact(site_id, "jo@example.com").unwrap());
        let found = db
            .get_contact_by_email(site_id, "jo@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(found.status, ContactStatus::Pending);
        assert!(found.unsubscribed_at.is_none());
    }

    #[test]
    fn test_email_unique_per_site() {
        let db = Database::open_memory().unwrap();
        let site_a = test_site(&db);
        let site_b = {
            let site = Site::new("globex".to_string(), PlanTier::Starter);
            db.insert_site(&site).unwrap();
            site.id
        };

        db.insert_contact(&Contact::new(site_a, "dup@example.com".to_string()))
            .unwrap();
        // Same email on another site is fine
        db.insert_contact(&Contact::new(site_b, "dup@example.com".to_string()))
            .unwrap();
        // Same email on the same site is rejected
        assert!(db
            .insert_contact(&Contact::new(site_a, "dup@example.com".to_string()))
            .is_err());
    }

    #[test]
    fn test_tag_assignment_idempotent() {
        let db = Database::open_memory().unwrap();
        let site_id = test_site(&db);

        let contact = Contact::new(site_id, "jo@example.com".to_string());
        db.insert_contact(&contact).unwrap();

        let tag = Tag::new(site_id, "vip".to_string());
        db.insert_tag(&tag).unwrap();

        assert!(db.assign_tag(contact.id, tag.id).unwrap());
        assert!(!db.assign_tag(contact.id, tag.id).unwrap());

        let map = db.tag_ids_by_contact(site_id).unwrap();
        assert_eq!(map.get(&contact.id).unwrap().len(), 1);

        assert!(db.remove_tag(contact.id, tag.id).unwrap());
        assert!(!db.remove_tag(contact.id, tag.id).unwrap());
    }

    #[test]
    fn test_system_tag_not_deletable() {
        let db = Database::open_memory().unwrap();
        let site_id = test_site(&db);

        let mut tag = Tag::new(site_id, "imported".to_string());
        tag.is_system = true;
        db.insert_tag(&tag).unwrap();

        assert!(db.delete_tag(site_id, "imported").is_err());
        assert!(db.get_tag_by_name(site_id, "imported").unwrap().is_some());

        let user_tag = Tag::new(site_id, "vip".to_string());
        db.insert_tag(&user_tag).unwrap();
        assert!(db.delete_tag(site_id, "vip").unwrap());
        assert!(db.get_tag_by_name(site_id, "vip").unwrap().is_none());
    }

    #[test]
    fn test_status_listing_order_and_empty_set() {
        let db = Database::open_memory().unwrap();
        let site_id = test_site(&db);

        for email in ["c@x.com", "a@x.com", "b@x.com"] {
            let mut contact = Contact::new(site_id, email.to_string());
            contact.status = ContactStatus::Active;
            db.insert_contact(&contact).unwrap();
        }

        let statuses: HashSet<ContactStatus> = [ContactStatus::Active].into_iter().collect();
        let contacts = db.list_contacts_by_status(site_id, &statuses).unwrap();
        let emails: Vec<&str> = contacts.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, vec!["a@x.com", "b@x.com", "c@x.com"]);

        // Empty set selects nobody, not everybody
        let none = db
            .list_contacts_by_status(site_id, &HashSet::new())
            .unwrap();
        assert!(none.is_empty());
    }
}
