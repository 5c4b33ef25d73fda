use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use wayfarer_common::{deserialize_id, EntityFamily};

use super::{default_category, default_currency};
use crate::entity::impl_entity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub trip_id: String,
    #[serde(default)]
    pub description: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "_synced", default)]
    pub synced: bool,
}

impl Expense {
    pub fn new(description: impl Into<String>, amount: f64) -> Self {
        Self {
            id: String::new(),
            trip_id: String::new(),
            description: description.into(),
            amount,
            currency: default_currency(),
            category: default_category(),
            date: None,
            paid_by: None,
            created_at: None,
            updated_at: None,
            synced: false,
        }
    }
}

impl_entity!(Expense, EntityFamily::Expense, trip_id);
