//! In-memory backend for testing.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use wayfarer_common::{id_from_value, EntityFamily, Error, Result};

use crate::gateway::{Method, RemoteGateway, Reply, Upload};

/// A request seen by the memory backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Debug)]
struct Backend {
    online: bool,
    next_id: u64,
    collections: HashMap<EntityFamily, BTreeMap<String, Value>>,
    failures: HashMap<(Method, String), (u16, String)>,
    requests: Vec<RecordedRequest>,
}

/// In-memory backend speaking the same routes as the HTTP API.
///
/// Server identifiers are assigned sequentially and returned as JSON
/// numbers. The backend can be switched offline and primed with failures.
#[derive(Clone)]
pub struct MemoryGateway {
    backend: Arc<Mutex<Backend>>,
}

/// Parsed `/api/...` route.
struct Target {
    family: EntityFamily,
    trip_id: Option<String>,
    id: Option<String>,
    upload: bool,
}

fn parse_path(path: &str) -> Result<Target> {
    let rest = path
        .strip_prefix("/api/")
        .ok_or_else(|| Error::remote(404, format!("No route for {}", path)))?;
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    let not_found = || Error::remote(404, format!("No route for {}", path));
    match segments.as_slice() {
        ["trips"] => Ok(Target {
            family: EntityFamily::Trip,
            trip_id: None,
            id: None,
            upload: false,
        }),
        ["trips", id] => Ok(Target {
            family: EntityFamily::Trip,
            trip_id: None,
            id: Some(id.to_string()),
            upload: false,
        }),
        ["trips", trip, "documents", "upload"] => Ok(Target {
            family: EntityFamily::Document,
            trip_id: Some(trip.to_string()),
            id: None,
            upload: true,
        }),
        ["trips", trip, collection] | ["trips", trip, collection, _] => {
            let family: EntityFamily = collection.parse().map_err(|_| not_found())?;
            if family == EntityFamily::Trip || family.collection() != *collection {
                return Err(not_found());
            }
            Ok(Target {
                family,
                trip_id: Some(trip.to_string()),
                id: segments.get(3).map(|s| s.to_string()),
                upload: false,
            })
        }
        _ => Err(not_found()),
    }
}

/// Numeric-looking identifiers are stored as numbers, like a SQL backend would.
fn id_json(id: &str) -> Value {
    id.parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(id.to_string()))
}

impl Backend {
    fn collection(&mut self, family: EntityFamily) -> &mut BTreeMap<String, Value> {
        self.collections.entry(family).or_default()
    }

    fn trip_exists(&mut self, trip_id: &str) -> bool {
        self.collection(EntityFamily::Trip).contains_key(trip_id)
    }

    fn allocate_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    fn route(&mut self, method: Method, target: Target, body: Option<Value>) -> Result<Reply> {
        if let Some(trip_id) = target.trip_id.as_deref() {
            if !self.trip_exists(trip_id) {
                return Err(Error::remote(404, format!("Trip {} not found", trip_id)));
            }
        }

        let family = target.family;
        let belongs = |record: &Value, trip_id: &Option<String>| match trip_id {
            Some(trip_id) => {
                record.get("tripId").and_then(id_from_value).as_deref() == Some(trip_id.as_str())
            }
            None => true,
        };

        match (method, target.id) {
            (Method::Get, None) => {
                let trip_id = target.trip_id.clone();
                let items: Vec<Value> = self
                    .collection(family)
                    .values()
                    .filter(|record| belongs(*record, &trip_id))
                    .cloned()
                    .collect();
                Ok(Reply::Json(Value::Array(items)))
            }
            (Method::Get, Some(id)) => {
                let trip_id = target.trip_id.clone();
                self.collection(family)
                    .get(&id)
                    .filter(|record| belongs(*record, &trip_id))
                    .cloned()
                    .map(Reply::Json)
                    .ok_or_else(|| Error::remote(404, format!("{} {} not found", family, id)))
            }
            (Method::Post, None) => {
                let mut record = match body {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                let id = self.allocate_id();
                let now = Value::String(Utc::now().to_rfc3339());
                record.insert("id".into(), id_json(&id));
                if let Some(trip_id) = target.trip_id.as_deref() {
                    record.insert("tripId".into(), id_json(trip_id));
                }
                record.entry("createdAt").or_insert_with(|| now.clone());
                record.insert("updatedAt".into(), now);
                if target.upload {
                    record.entry("docType").or_insert_with(|| Value::String("other".into()));
                }

                let record = Value::Object(record);
                self.collection(family).insert(id, record.clone());
                Ok(Reply::Json(record))
            }
            (Method::Put, Some(id)) => {
                let existing = self
                    .collection(family)
                    .get_mut(&id)
                    .ok_or_else(|| Error::remote(404, format!("{} {} not found", family, id)))?;
                if let (Some(target), Some(Value::Object(patch))) = (existing.as_object_mut(), body) {
                    for (key, value) in patch {
                        if key != "id" {
                            target.insert(key, value);
                        }
                    }
                    target.insert("updatedAt".into(), Value::String(Utc::now().to_rfc3339()));
                }
                Ok(Reply::Json(existing.clone()))
            }
            (Method::Delete, Some(id)) => {
                if self.collection(family).remove(&id).is_none() {
                    return Err(Error::remote(404, format!("{} {} not found", family, id)));
                }
                if family == EntityFamily::Trip {
                    for child in EntityFamily::Trip.children() {
                        self.collection(child).retain(|_, record| {
                            record.get("tripId").and_then(id_from_value).as_deref() != Some(id.as_str())
                        });
                    }
                }
                Ok(Reply::NoContent)
            }
            (method, _) => Err(Error::remote(405, format!("{} not allowed", method))),
        }
    }
}

impl MemoryGateway {
    /// Create an online backend whose first assigned id is 1.
    pub fn new() -> Self {
        Self {
            backend: Arc::new(Mutex::new(Backend {
                online: true,
                next_id: 1,
                collections: HashMap::new(),
                failures: HashMap::new(),
                requests: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Backend> {
        // A panic while holding the lock only happens in a failing test.
        self.backend.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Simulate connectivity loss or recovery.
    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// Set the next server-assigned identifier.
    pub fn set_next_id(&self, next_id: u64) {
        self.lock().next_id = next_id;
    }

    /// Make the next request for `method path` fail with `status`.
    pub fn fail_next(&self, method: Method, path: impl Into<String>, status: u16, body: impl Into<String>) {
        self.lock()
            .failures
            .insert((method, path.into()), (status, body.into()));
    }

    /// Store a record directly, bypassing request handling. Returns its id.
    pub fn seed(&self, family: EntityFamily, record: Value) -> String {
        let mut backend = self.lock();
        let mut record = match record {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let id = match record.get("id").and_then(id_from_value) {
            Some(id) => id,
            None => backend.allocate_id(),
        };
        record.insert("id".into(), id_json(&id));
        backend.collection(family).insert(id.clone(), Value::Object(record));
        id
    }

    /// Remove a record server-side, as another device would.
    pub fn remove(&self, family: EntityFamily, id: &str) -> bool {
        self.lock().collection(family).remove(id).is_some()
    }

    /// Records currently held for a family.
    pub fn records(&self, family: EntityFamily) -> Vec<Value> {
        self.lock().collection(family).values().cloned().collect()
    }

    /// Record held for a family under `id`.
    pub fn record(&self, family: EntityFamily, id: &str) -> Option<Value> {
        self.lock().collection(family).get(id).cloned()
    }

    /// Every request attempted so far, online or not.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    fn name(&self) -> &str {
        "memory"
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Reply> {
        let mut backend = self.lock();
        backend.requests.push(RecordedRequest {
            method,
            path: path.to_string(),
            body: body.cloned(),
        });

        if !backend.online {
            return Err(Error::Offline(format!("{} {}: memory backend offline", method, path)));
        }

        if let Some((status, body)) = backend.failures.remove(&(method, path.to_string())) {
            return Err(Error::remote(status, body));
        }

        let target = parse_path(path)?;
        if target.upload {
            return Err(Error::remote(405, "Uploads must use multipart"));
        }
        backend.route(method, target, body.cloned())
    }

    async fn upload(&self, path: &str, upload: Upload) -> Result<Reply> {
        let mut backend = self.lock();
        backend.requests.push(RecordedRequest {
            method: Method::Post,
            path: path.to_string(),
            body: None,
        });

        if !backend.online {
            return Err(Error::Offline(format!("POST {}: memory backend offline", path)));
        }

        let target = parse_path(path)?;
        if !target.upload {
            return Err(Error::remote(415, "Multipart not accepted here"));
        }

        let mut record = Map::new();
        for (key, value) in upload.fields {
            record.insert(key, Value::String(value));
        }
        record
            .entry("name")
            .or_insert_with(|| Value::String(upload.file_name.clone()));
        record.insert("fileName".into(), Value::String(upload.file_name));
        record.insert("mimeType".into(), Value::String(upload.content_type));
        record.insert("size".into(), Value::from(upload.data.len() as u64));

        backend.route(Method::Post, target, Some(Value::Object(record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_crud_cycle() {
        let gateway = MemoryGateway::new();
        gateway.set_next_id(42);

        let trip = gateway
            .request(Method::Post, "/api/trips", Some(&json!({"name": "Athens 2025"})))
            .await
            .unwrap()
            .into_json()
            .unwrap();
        assert_eq!(trip["id"], json!(42));

        let event = gateway
            .request(
                Method::Post,
                "/api/trips/42/events",
                Some(&json!({"title": "Acropolis", "tripId": "local-x"})),
            )
            .await
            .unwrap()
            .into_json()
            .unwrap();
        assert_eq!(event["tripId"], json!(42));

        let updated = gateway
            .request(
                Method::Put,
                "/api/trips/42/events/43",
                Some(&json!({"title": "Acropolis at dawn"})),
            )
            .await
            .unwrap()
            .into_json()
            .unwrap();
        assert_eq!(updated["title"], json!("Acropolis at dawn"));
        assert_eq!(updated["id"], json!(43));

        let list = gateway
            .request(Method::Get, "/api/trips/42/events", None)
            .await
            .unwrap()
            .into_list();
        assert_eq!(list.len(), 1);

        let deleted = gateway.request(Method::Delete, "/api/trips/42", None).await.unwrap();
        assert_eq!(deleted, Reply::NoContent);
        assert!(gateway.records(EntityFamily::Event).is_empty());
    }

    #[tokio::test]
    async fn test_offline_and_failures() {
        let gateway = MemoryGateway::new();
        gateway.set_online(false);

        let err = gateway.request(Method::Get, "/api/trips", None).await.unwrap_err();
        assert!(err.is_offline());
        assert_eq!(gateway.request_count(), 1);

        gateway.set_online(true);
        gateway.fail_next(Method::Get, "/api/trips", 500, "boom");
        let err = gateway.request(Method::Get, "/api/trips", None).await.unwrap_err();
        assert!(matches!(err, Error::Remote { status: 500, .. }));

        // The failure is consumed.
        assert!(gateway.request(Method::Get, "/api/trips", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_parent_and_unknown_routes() {
        let gateway = MemoryGateway::new();

        let err = gateway
            .request(Method::Post, "/api/trips/9/notes", Some(&json!({})))
            .await
            .unwrap_err();
        assert!(err.is_remote_not_found());

        let err = gateway.request(Method::Get, "/api/suitcases", None).await.unwrap_err();
        assert!(err.is_remote_not_found());

        let err = gateway.request(Method::Put, "/api/trips/1", Some(&json!({}))).await.unwrap_err();
        assert!(err.is_remote_not_found());
    }

    #[tokio::test]
    async fn test_upload() {
        let gateway = MemoryGateway::new();
        let trip = gateway.seed(EntityFamily::Trip, json!({"name": "Lisbon"}));

        let doc = gateway
            .upload(
                &format!("/api/trips/{}/documents/upload", trip),
                Upload {
                    file_name: "ticket.pdf".into(),
                    content_type: "application/pdf".into(),
                    data: vec![0; 10],
                    fields: vec![],
                },
            )
            .await
            .unwrap()
            .into_json()
            .unwrap();

        assert_eq!(doc["name"], json!("ticket.pdf"));
        assert_eq!(doc["size"], json!(10));
        assert_eq!(gateway.records(EntityFamily::Document).len(), 1);
    }

    #[test]
    fn test_seed_keeps_given_id() {
        let gateway = MemoryGateway::new();
        assert_eq!(gateway.seed(EntityFamily::Trip, json!({"id": 7})), "7");
        assert_eq!(gateway.seed(EntityFamily::Trip, json!({})), "1");
        assert!(gateway.remove(EntityFamily::Trip, "7"));
        assert_eq!(gateway.records(EntityFamily::Trip).len(), 1);
    }
}
