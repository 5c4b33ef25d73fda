//! Endpoint paths for every entity family.
//!
//! All path building lives here so the entity services and the sync
//! processor cannot drift apart.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use wayfarer_common::{EntityFamily, Error, Result};

use crate::gateway::Method;

/// Characters escaped inside a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// What a request does to a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    List,
    Read,
    Create,
    Update,
    Delete,
}

impl Route {
    pub fn method(&self) -> Method {
        match self {
            Self::List | Self::Read => Method::Get,
            Self::Create => Method::Post,
            Self::Update => Method::Put,
            Self::Delete => Method::Delete,
        }
    }

    fn targets_item(&self) -> bool {
        matches!(self, Self::Read | Self::Update | Self::Delete)
    }
}

fn segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

/// Collection path relative to `/api`, e.g. `trips/42/events`.
fn collection(family: EntityFamily, parent_id: Option<&str>) -> Result<String> {
    match (family.parent(), parent_id) {
        (None, _) => Ok(family.collection().to_string()),
        (Some(parent), Some(parent_id)) if !parent_id.is_empty() => Ok(format!(
            "{}/{}/{}",
            parent.collection(),
            segment(parent_id),
            family.collection()
        )),
        (Some(parent), _) => Err(Error::InvalidInput(format!(
            "{} requires a {} identifier",
            family, parent
        ))),
    }
}

/// Logical resource key for the freshness tracker.
///
/// The key is the request path without the `/api/` prefix.
pub fn resource_key(family: EntityFamily, parent_id: Option<&str>, id: Option<&str>) -> Result<String> {
    let base = collection(family, parent_id)?;
    Ok(match id {
        Some(id) => format!("{}/{}", base, segment(id)),
        None => base,
    })
}

/// Request path for a route.
///
/// # Errors
/// - A child family without a parent identifier
/// - An item route without an entity identifier
pub fn path_for(
    family: EntityFamily,
    parent_id: Option<&str>,
    id: Option<&str>,
    route: Route,
) -> Result<String> {
    let id = if route.targets_item() {
        match id {
            Some(id) if !id.is_empty() => Some(id),
            _ => {
                return Err(Error::InvalidInput(format!(
                    "{:?} on {} requires an entity identifier",
                    route, family
                )))
            }
        }
    } else {
        None
    };

    Ok(format!("/api/{}", resource_key(family, parent_id, id)?))
}

/// Multipart upload path for documents of a trip.
pub fn upload_path(trip_id: &str) -> Result<String> {
    Ok(format!(
        "/api/{}/upload",
        collection(EntityFamily::Document, Some(trip_id))?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trip_paths() {
        assert_eq!(path_for(EntityFamily::Trip, None, None, Route::List).unwrap(), "/api/trips");
        assert_eq!(
            path_for(EntityFamily::Trip, None, Some("42"), Route::Update).unwrap(),
            "/api/trips/42"
        );
        assert_eq!(
            path_for(EntityFamily::Trip, None, None, Route::Create).unwrap(),
            "/api/trips"
        );
    }

    #[test]
    fn test_child_paths() {
        assert_eq!(
            path_for(EntityFamily::Event, Some("42"), None, Route::Create).unwrap(),
            "/api/trips/42/events"
        );
        assert_eq!(
            path_for(EntityFamily::Packing, Some("42"), Some("7"), Route::Delete).unwrap(),
            "/api/trips/42/packing/7"
        );
        assert_eq!(upload_path("42").unwrap(), "/api/trips/42/documents/upload");
    }

    #[test]
    fn test_missing_identifiers() {
        assert!(path_for(EntityFamily::Expense, None, None, Route::List).is_err());
        assert!(path_for(EntityFamily::Trip, None, None, Route::Delete).is_err());
        assert!(path_for(EntityFamily::Note, Some("1"), Some(""), Route::Read).is_err());
    }

    #[test]
    fn test_list_ignores_id() {
        assert_eq!(
            path_for(EntityFamily::City, Some("1"), Some("9"), Route::List).unwrap(),
            "/api/trips/1/cities"
        );
    }

    #[test]
    fn test_segments_are_escaped() {
        assert_eq!(
            resource_key(EntityFamily::Note, Some("a/b"), Some("x y")).unwrap(),
            "trips/a%2Fb/notes/x%20y"
        );
    }

    #[test]
    fn test_route_methods() {
        assert_eq!(Route::List.method(), Method::Get);
        assert_eq!(Route::Create.method(), Method::Post);
        assert_eq!(Route::Update.method(), Method::Put);
        assert_eq!(Route::Delete.method(), Method::Delete);
    }
}
