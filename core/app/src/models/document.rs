use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wayfarer_common::{deserialize_id, EntityFamily};

use super::default_category;
use crate::entity::impl_entity;

/// A travel document (ticket, booking, passport scan).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub trip_id: String,
    pub name: String,
    #[serde(default = "default_category")]
    pub doc_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "_synced", default)]
    pub synced: bool,
}

impl Document {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            trip_id: String::new(),
            name: name.into(),
            doc_type: default_category(),
            file_name: None,
            mime_type: None,
            size: None,
            notes: None,
            created_at: None,
            updated_at: None,
            synced: false,
        }
    }
}

impl_entity!(Document, EntityFamily::Document, trip_id);
