use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use wayfarer_common::{deserialize_id, EntityFamily};

use crate::entity::impl_entity;

/// A stop on the route of a trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub trip_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrival_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "_synced", default)]
    pub synced: bool,
}

impl City {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            trip_id: String::new(),
            name: name.into(),
            country: None,
            latitude: None,
            longitude: None,
            arrival_date: None,
            departure_date: None,
            created_at: None,
            updated_at: None,
            synced: false,
        }
    }
}

impl_entity!(City, EntityFamily::City, trip_id);
