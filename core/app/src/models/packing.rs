use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wayfarer_common::{deserialize_id, EntityFamily};

use super::{default_category, default_quantity};
use crate::entity::impl_entity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackingItem {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub trip_id: String,
    pub name: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub packed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "_synced", default)]
    pub synced: bool,
}

impl PackingItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            trip_id: String::new(),
            name: name.into(),
            category: default_category(),
            quantity: default_quantity(),
            packed: false,
            created_at: None,
            updated_at: None,
            synced: false,
        }
    }
}

impl_entity!(PackingItem, EntityFamily::Packing, trip_id);
