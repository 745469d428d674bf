//! CSV contact import.
//!
//! Headers must match field names exactly (`email`, `first_name`,
//! `last_name`). Empty strings are treated as missing for optional
//! fields. Rows for addresses already on the list are skipped, not
//! updated.

use std::fs::File;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{Contact, Tag};

#[derive(Debug, Clone, Deserialize)]
pub struct ImportRow {
    /// Email address (required)
    pub email: String,

    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub first_name: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub last_name: Option<String>,
}

impl ImportRow {
    pub fn validate(&self) -> Result<()> {
        let email = self.email.trim();
        if email.is_empty() {
            bail!("email is required and cannot be empty");
        }
        if !email.contains('@') {
            bail!("'{}' is not an email address", email);
        }
        Ok(())
    }
}

/// Deserialize empty strings as None.
fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(s.filter(|s| !s.trim().is_empty()))
}

/// Import results summary.
#[derive(Debug, Default)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub invalid: usize,
}

/// Import contacts from a CSV file. With `tag_name` set, every imported
/// contact gets that tag (created on first use).
pub fn import_csv(
    db: &Database,
    site_id: Uuid,
    path: &str,
    tag_name: Option<&str>,
) -> Result<ImportSummary> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path))?;
    let mut reader = csv::Reader::from_reader(file);

    let tag = match tag_name {
        Some(name) => Some(match db.get_tag_by_name(site_id, name)? {
            Some(tag) => tag,
            None => {
                let tag = Tag::new(site_id, name.to_string());
                db.insert_tag(&tag)?;
                tag
            }
        }),
        None => None,
    };

    let mut summary = ImportSummary::default();

    for row in reader.deserialize::<ImportRow>() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                eprintln!("Skipping malformed row: {}", e);
                summary.invalid += 1;
                continue;
            }
        };

        if let Err(e) = row.validate() {
            eprintln!("Skipping row: {}", e);
            summary.invalid += 1;
            continue;
        }

        let email = row.email.trim().to_lowercase();
        if db.get_contact_by_email(site_id, &email)?.is_some() {
            summary.skipped += 1;
            continue;
        }

        let mut contact = Contact::new(site_id, email);
        contact.first_name = row.first_name;
        contact.last_name = row.last_name;
        db.insert_contact(&contact)?;

        if let Some(ref tag) = tag {
            db.assign_tag(contact.id, tag.id)?;
        }

        summary.imported += 1;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlanTier, Site};
    use std::io::Write;

    fn test_site(db: &Database) -> Uuid {
        let site = Site::new("acme".to_string(), PlanTier::Growth);
        db.insert_site(&site).unwrap();
        site.id
    }

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_import_with_tag() {
        let db = Database::open_memory().unwrap();
        let site_id = test_site(&db);

        let csv = write_csv(
            "email,first_name,last_name\n\
             jo@x.com,Jo,Smith\n\
             amy@x.com,,\n\
             not-an-email,Bad,Row\n",
        );

        let summary =
            import_csv(&db, site_id, csv.path().to_str().unwrap(), Some("imported")).unwrap();
        assert_eq!(summary.imported, 2);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.skipped, 0);

        let contact = db.get_contact_by_email(site_id, "jo@x.com").unwrap().unwrap();
        assert_eq!(contact.first_name.as_deref(), Some("Jo"));

        let tag = db.get_tag_by_name(site_id, "imported").unwrap().unwrap();
        let tagged = db.tag_ids_by_contact(site_id).unwrap();
        assert!(tagged.get(&contact.id).unwrap().contains(&tag.id));
    }

    #[test]
    fn test_reimport_skips_existing() {
        let db = Database::open_memory().unwrap();
        let site_id = test_site(&db);

        let csv = write_csv("email,first_name,last_name\njo@x.com,Jo,\n");
        let first = import_csv(&db, site_id, csv.path().to_str().unwrap(), None).unwrap();
        assert_eq!(first.imported, 1);

        let second = import_csv(&db, site_id, csv.path().to_str().unwrap(), None).unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, 1);
    }
}
