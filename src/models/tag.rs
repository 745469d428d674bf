use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A label contacts can carry. Name is unique per site. System tags are
/// created by the platform and cannot be deleted by operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub site_id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub is_system: bool,
}

impl Tag {
    pub fn new(site_id: Uuid, name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            site_id,
            name,
            color: None,
            is_system: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactTag {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub tag_id: Uuid,
    pub added_at: DateTime<Utc>,
}

impl ContactTag {
    pub fn new(contact_id: Uuid, tag_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            contact_id,
            tag_id,
            added_at: Utc::now(),
        }
    }
}
