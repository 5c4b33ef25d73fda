//! Common utilities and types shared across Wayfarer modules.
//!
//! This module provides the error taxonomy and the entity-family vocabulary
//! used by the local store, the remote gateway and the sync processor.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{
    deserialize_id, id_from_value, is_local_id, new_local_id, now_millis, parse_timestamp_millis,
    EntityFamily, LOCAL_ID_PREFIX,
};
