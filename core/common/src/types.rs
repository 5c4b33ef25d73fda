//! Common types used throughout Wayfarer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Prefix carried by every engine-assigned identifier.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Generate a fresh local identifier for an entity created offline.
pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, uuid::Uuid::new_v4().simple())
}

/// Check whether an identifier was assigned locally and still awaits a server id.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// An entity family: one table locally, one collection remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityFamily {
    Trip,
    Event,
    Packing,
    Document,
    Expense,
    Note,
    City,
    Place,
}

impl EntityFamily {
    /// Every family, parents first.
    pub const ALL: [EntityFamily; 8] = [
        Self::Trip,
        Self::Event,
        Self::Packing,
        Self::Document,
        Self::Expense,
        Self::Note,
        Self::City,
        Self::Place,
    ];

    /// Local table name.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Trip => "trips",
            Self::Event => "events",
            Self::Packing => "packing_items",
            Self::Document => "documents",
            Self::Expense => "expenses",
            Self::Note => "notes",
            Self::City => "cities",
            Self::Place => "places",
        }
    }

    /// Remote collection segment under `/api`.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Trip => "trips",
            Self::Event => "events",
            Self::Packing => "packing",
            Self::Document => "documents",
            Self::Expense => "expenses",
            Self::Note => "notes",
            Self::City => "cities",
            Self::Place => "places",
        }
    }

    /// Parent family, if this family is scoped under another.
    pub fn parent(&self) -> Option<EntityFamily> {
        match self {
            Self::Trip => None,
            _ => Some(Self::Trip),
        }
    }

    /// JSON field holding the parent identifier.
    pub fn parent_field(&self) -> Option<&'static str> {
        self.parent().map(|_| "tripId")
    }

    /// JSON field used as the secondary index key within a parent.
    pub fn sort_field(&self) -> Option<&'static str> {
        match self {
            Self::Trip => Some("startDate"),
            Self::Event => Some("date"),
            Self::Packing => Some("category"),
            Self::Document => Some("docType"),
            Self::Expense => Some("date"),
            Self::Note => Some("createdAt"),
            Self::City => Some("arrivalDate"),
            Self::Place => Some("category"),
        }
    }

    /// Families whose parent is this family.
    pub fn children(&self) -> impl Iterator<Item = EntityFamily> + '_ {
        Self::ALL
            .into_iter()
            .filter(move |family| family.parent() == Some(*self))
    }
}

impl fmt::Display for EntityFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table())
    }
}

impl FromStr for EntityFamily {
    type Err = Error;

    /// Accepts either the table name or the collection segment.
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|family| family.table() == s || family.collection() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown entity family: {}", s)))
    }
}

/// Read an identifier that the backend may send as a string or a number.
pub fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Serde helper: deserialize an identifier from a string or a number.
pub fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(String::new()),
        other => id_from_value(&other)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid identifier: {}", other))),
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse an RFC 3339 timestamp into epoch milliseconds.
pub fn parse_timestamp_millis(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}
