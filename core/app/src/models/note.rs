use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wayfarer_common::{deserialize_id, EntityFamily};

use crate::entity::impl_entity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub trip_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "_synced", default)]
    pub synced: bool,
}

impl Note {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            trip_id: String::new(),
            title: None,
            content: content.into(),
            pinned: false,
            created_at: None,
            updated_at: None,
            synced: false,
        }
    }
}

impl_entity!(Note, EntityFamily::Note, trip_id);
