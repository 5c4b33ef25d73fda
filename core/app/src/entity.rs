//! The contract every entity family model fulfils.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use wayfarer_common::{EntityFamily, Error, Result};
use wayfarer_store::{StoredRecord, SYNCED_FIELD};

/// A typed entity stored locally and mirrored on the backend.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Family this model belongs to.
    const FAMILY: EntityFamily;

    fn id(&self) -> &str;

    /// Owning trip, for child families.
    fn parent_id(&self) -> Option<&str>;

    fn set_parent_id(&mut self, parent_id: &str);

    /// Whether the server has confirmed the latest local state.
    fn is_synced(&self) -> bool;

    /// Decode a stored row.
    fn from_record(record: StoredRecord) -> Result<Self> {
        Ok(serde_json::from_value(record.body)?)
    }

    /// JSON body for a request or a local row.
    ///
    /// The synced flag never leaves the device; empty identifiers are dropped
    /// so the server assigns one.
    fn to_body(&self) -> Result<Value> {
        let mut body = serde_json::to_value(self)?;
        let obj = body.as_object_mut().ok_or_else(|| {
            Error::Serialization(format!("{} did not serialize to an object", Self::FAMILY))
        })?;
        obj.remove(SYNCED_FIELD);
        if obj.get("id").and_then(Value::as_str) == Some("") {
            obj.remove("id");
        }
        Ok(body)
    }
}

/// Implement [`Entity`] for a model with `id`, `synced` and optionally `trip_id` fields.
macro_rules! impl_entity {
    ($model:ty, $family:expr) => {
        impl $crate::entity::Entity for $model {
            const FAMILY: wayfarer_common::EntityFamily = $family;

            fn id(&self) -> &str {
                &self.id
            }

            fn parent_id(&self) -> Option<&str> {
                None
            }

            fn set_parent_id(&mut self, _parent_id: &str) {}

            fn is_synced(&self) -> bool {
                self.synced
            }
        }
    };
    ($model:ty, $family:expr, $parent:ident) => {
        impl $crate::entity::Entity for $model {
            const FAMILY: wayfarer_common::EntityFamily = $family;

            fn id(&self) -> &str {
                &self.id
            }

            fn parent_id(&self) -> Option<&str> {
                if self.$parent.is_empty() {
                    None
                } else {
                    Some(&self.$parent)
                }
            }

            fn set_parent_id(&mut self, parent_id: &str) {
                self.$parent = parent_id.to_string();
            }

            fn is_synced(&self) -> bool {
                self.synced
            }
        }
    };
}

pub(crate) use impl_entity;
