use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use wayfarer_common::{deserialize_id, EntityFamily};

use super::default_category;
use crate::entity::impl_entity;

/// An itinerary event within a trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub trip_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "_synced", default)]
    pub synced: bool,
}

impl Event {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            trip_id: String::new(),
            title: title.into(),
            date: None,
            start_time: None,
            end_time: None,
            location: None,
            category: default_category(),
            notes: None,
            created_at: None,
            updated_at: None,
            synced: false,
        }
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

impl_entity!(Event, EntityFamily::Event, trip_id);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let event: Event = serde_json::from_value(json!({"id": 7, "tripId": 42, "title": "Ferry"})).unwrap();
        assert_eq!(event.category, "other");
        assert_eq!(event.parent_id(), Some("42"));
        assert!(!event.is_synced());
    }
}
