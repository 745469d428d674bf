//! Recipient resolution: from a campaign's abstract tag/status filter to
//! the concrete, ordered contact list at a point in time.
//!
//! Resolution is a pure read. The same filter over unchanged data yields
//! the same contacts in the same order (email ascending, contact id as
//! tiebreaker), so a re-run after a crash walks recipients identically.

use std::collections::HashSet;

use anyhow::Result;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{AudienceFilter, Contact};

/// Resolve the recipients a campaign would send to right now.
///
/// Rules, in order:
/// 1. status must be in the filter's status set; an empty set selects
///    nobody (an explicit "nothing selected", never "everything");
/// 2. with a non-empty inclusion set, the contact must carry at least one
///    included tag (OR semantics); an empty set imposes no restriction;
/// 3. a contact carrying any excluded tag is dropped; exclusion is
///    checked after inclusion and always wins.
pub fn resolve(db: &Database, site_id: Uuid, filter: &AudienceFilter) -> Result<Vec<Contact>> {
    Ok(partition(db, site_id, filter)?.matched)
}

/// Resolution plus the contacts the exclusion rule removed: everyone who
/// passed the status and inclusion checks but carried an excluded tag.
/// For operator review only; dispatch always uses [`resolve`].
pub fn preview(db: &Database, site_id: Uuid, filter: &AudienceFilter) -> Result<AudiencePreview> {
    partition(db, site_id, filter)
}

#[derive(Debug, Clone)]
pub struct AudiencePreview {
    /// The recipients dispatch would send to.
    pub matched: Vec<Contact>,
    /// Removed by the exclusion rule alone.
    pub excluded: Vec<Contact>,
}

impl AudiencePreview {
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }
}

fn partition(db: &Database, site_id: Uuid, filter: &AudienceFilter) -> Result<AudiencePreview> {
    // The status query returns contacts in the resolver's stable order and
    // handles the empty-set case.
    let candidates = db.list_contacts_by_status(site_id, &filter.statuses)?;
    let tags_by_contact = db.tag_ids_by_contact(site_id)?;

    let empty = HashSet::new();
    let mut matched = Vec::new();
    let mut excluded = Vec::new();

    for contact in candidates {
        let contact_tags = tags_by_contact.get(&contact.id).unwrap_or(&empty);

        let included = filter.included_tags.is_empty()
            || !contact_tags.is_disjoint(&filter.included_tags);
        if !included {
            continue;
        }

        if contact_tags.is_disjoint(&filter.excluded_tags) {
            matched.push(contact);
        } else {
            excluded.push(contact);
        }
    }

    Ok(AudiencePreview { matched, excluded })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContactStatus, PlanTier, Site, Tag};

    struct Fixture {
        db: Database,
        site_id: Uuid,
        vip: Uuid,
        churned: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Database::open_memory().unwrap();
        let site = Site::new("acme".to_string(), PlanTier::Growth);
        db.insert_site(&site).unwrap();

        let vip = Tag::new(site.id, "vip".to_string());
        let churned = Tag::new(site.id, "churned".to_string());
        db.insert_tag(&vip).unwrap();
        db.insert_tag(&churned).unwrap();

        Fixture {
            site_id: site.id,
            vip: vip.id,
            churned: churned.id,
            db,
        }
    }

    fn add_contact(f: &Fixture, email: &str, status: ContactStatus, tags: &[Uuid]) -> Contact {
        let mut contact = Contact::new(f.site_id, email.to_string());
        contact.status = status;
        f.db.insert_contact(&contact).unwrap();
        for tag_id in tags {
            f.db.assign_tag(contact.id, *tag_id).unwrap();
        }
        contact
    }

    fn active_only() -> HashSet<ContactStatus> {
        [ContactStatus::Active].into_iter().collect()
    }

    #[test]
    fn test_empty_status_filter_selects_nobody() {
        let f = fixture();
        add_contact(&f, "a@x.com", ContactStatus::Active, &[]);

        let filter = AudienceFilter::default();
        assert!(resolve(&f.db, f.site_id, &filter).unwrap().is_empty());
    }

    #[test]
    fn test_no_inclusion_filter_means_no_restriction() {
        let f = fixture();
        add_contact(&f, "a@x.com", ContactStatus::Active, &[]);
        add_contact(&f, "b@x.com", ContactStatus::Active, &[f.vip]);
        add_contact(&f, "c@x.com", ContactStatus::Pending, &[]);

        let filter = AudienceFilter {
            statuses: active_only(),
            ..Default::default()
        };
        let resolved = resolve(&f.db, f.site_id, &filter).unwrap();
        let emails: Vec<&str> = resolved.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_inclusion_is_or_over_tags() {
        let f = fixture();
        let other = Tag::new(f.site_id, "beta".to_string());
        f.db.insert_tag(&other).unwrap();

        add_contact(&f, "vip@x.com", ContactStatus::Active, &[f.vip]);
        add_contact(&f, "beta@x.com", ContactStatus::Active, &[other.id]);
        add_contact(&f, "both@x.com", ContactStatus::Active, &[f.vip, other.id]);
        add_contact(&f, "none@x.com", ContactStatus::Active, &[]);

        let filter = AudienceFilter {
            included_tags: [f.vip, other.id].into_iter().collect(),
            statuses: active_only(),
            ..Default::default()
        };
        let resolved = resolve(&f.db, f.site_id, &filter).unwrap();
        let emails: Vec<&str> = resolved.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, vec!["beta@x.com", "both@x.com", "vip@x.com"]);
    }

    #[test]
    fn test_exclusion_always_wins() {
        let f = fixture();
        add_contact(&f, "keep@x.com", ContactStatus::Active, &[f.vip]);
        // Carries both an included and an excluded tag: excluded.
        add_contact(&f, "drop@x.com", ContactStatus::Active, &[f.vip, f.churned]);

        let filter = AudienceFilter {
            included_tags: [f.vip].into_iter().collect(),
            excluded_tags: [f.churned].into_iter().collect(),
            statuses: active_only(),
        };
        let resolved = resolve(&f.db, f.site_id, &filter).unwrap();
        let emails: Vec<&str> = resolved.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, vec!["keep@x.com"]);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let f = fixture();
        for i in 0..20 {
            add_contact(
                &f,
                &format!("c{:02}@x.com", i),
                ContactStatus::Active,
                if i % 3 == 0 { &[] } else { std::slice::from_ref(&f.vip) },
            );
        }

        let filter = AudienceFilter {
            included_tags: [f.vip].into_iter().collect(),
            statuses: active_only(),
            ..Default::default()
        };

        let first = resolve(&f.db, f.site_id, &filter).unwrap();
        let second = resolve(&f.db, f.site_id, &filter).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_preview_separates_exclusions() {
        let f = fixture();
        add_contact(&f, "keep@x.com", ContactStatus::Active, &[f.vip]);
        add_contact(&f, "drop@x.com", ContactStatus::Active, &[f.vip, f.churned]);
        // Fails inclusion outright: in neither preview list.
        add_contact(&f, "miss@x.com", ContactStatus::Active, &[]);

        let filter = AudienceFilter {
            included_tags: [f.vip].into_iter().collect(),
            excluded_tags: [f.churned].into_iter().collect(),
            statuses: active_only(),
        };
        let preview = preview(&f.db, f.site_id, &filter).unwrap();

        assert_eq!(preview.matched.len(), 1);
        assert_eq!(preview.matched[0].email, "keep@x.com");
        assert_eq!(preview.excluded.len(), 1);
        assert_eq!(preview.excluded[0].email, "drop@x.com");
    }
}
