//! Uniform offline-first CRUD over one entity family.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use wayfarer_common::{is_local_id, new_local_id, EntityFamily, Error, Result};
use wayfarer_remote::{path_for, resource_key, upload_path, RemoteGateway, Route, Upload};
use wayfarer_store::{
    FreshnessTracker, LocalStore, MutationQueue, NewMutation, Predicate, StoredRecord, DEFAULT_TTL,
};

use crate::entity::Entity;
use crate::models::{City, Document, Event, Expense, Note, PackingItem, Place, Trip};

pub type TripService = EntityService<Trip>;
pub type EventService = EntityService<Event>;
pub type PackingService = EntityService<PackingItem>;
pub type DocumentService = EntityService<Document>;
pub type ExpenseService = EntityService<Expense>;
pub type NoteService = EntityService<Note>;
pub type CityService = EntityService<City>;
pub type PlaceService = EntityService<Place>;

/// Offline-first service for one entity family.
///
/// Reads are served locally while fresh. Writes go to the backend first and
/// fall back to an unsynced local row plus a queued mutation when offline.
pub struct EntityService<E: Entity> {
    store: Arc<LocalStore>,
    queue: MutationQueue,
    freshness: FreshnessTracker,
    gateway: Arc<dyn RemoteGateway>,
    ttl: Duration,
    _entity: PhantomData<fn() -> E>,
}

fn timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn scope(parent_id: Option<&str>) -> Predicate {
    match parent_id {
        Some(parent) => Predicate::Parent(parent.to_string()),
        None => Predicate::All,
    }
}

impl<E: Entity> EntityService<E> {
    pub fn new(store: Arc<LocalStore>, gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            queue: MutationQueue::new(store.clone()),
            freshness: FreshnessTracker::new(store.clone()),
            store,
            gateway,
            ttl: DEFAULT_TTL,
            _entity: PhantomData,
        }
    }

    /// Override how long fetched data stays fresh.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn family(&self) -> EntityFamily {
        E::FAMILY
    }

    fn load_all(&self, parent_id: Option<&str>) -> Result<Vec<E>> {
        self.store
            .query(E::FAMILY, &scope(parent_id))?
            .into_iter()
            .map(E::from_record)
            .collect()
    }

    fn load_one(&self, id: &str) -> Result<Option<E>> {
        self.store.get(E::FAMILY, id)?.map(E::from_record).transpose()
    }

    /// Build a synced row from a server body, keeping the known parent.
    fn server_record(&self, body: Value, parent_id: Option<&str>) -> Result<StoredRecord> {
        let mut record = StoredRecord::from_json(E::FAMILY, body, true)?;
        if record.parent_id.is_none() {
            if let Some(parent) = parent_id {
                record.set_parent(parent);
            }
        }
        Ok(record)
    }

    fn mark_item_fresh(&self, parent_id: Option<&str>, id: &str) -> Result<()> {
        self.freshness
            .mark_fresh(&resource_key(E::FAMILY, parent_id, Some(id))?)
    }

    /// List every entity in a scope (all trips, or one trip's children).
    ///
    /// # Errors
    /// - Remote rejection other than the offline signal
    /// - Local store failure
    pub async fn get_all(&self, parent_id: Option<&str>) -> Result<Vec<E>> {
        let family = self.family();
        let key = resource_key(family, parent_id, None)?;

        if parent_id.is_some_and(is_local_id) {
            debug!(family = %family, "Parent not synced yet, serving local rows");
            return self.load_all(parent_id);
        }
        if !self.freshness.is_stale(&key, self.ttl)? {
            debug!(key = %key, "Fresh, serving local rows");
            return self.load_all(parent_id);
        }

        let path = path_for(family, parent_id, None, Route::List)?;
        match self.gateway.request(Route::List.method(), &path, None).await {
            Ok(reply) => {
                let records = reply
                    .into_list()
                    .into_iter()
                    .map(|body| self.server_record(body, parent_id))
                    .collect::<Result<Vec<_>>>()?;
                let outcome = self.store.reconcile(family, &scope(parent_id), &records)?;
                self.freshness.mark_fresh(&key)?;
                debug!(
                    key = %key,
                    written = outcome.written,
                    kept_local = outcome.kept_local,
                    pruned = outcome.pruned,
                    "Refreshed list"
                );
                self.load_all(parent_id)
            }
            Err(e) if e.is_offline() => {
                info!(key = %key, "Offline, serving cached rows");
                self.load_all(parent_id)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the freshness stamp of a scope and list it again.
    pub async fn refresh(&self, parent_id: Option<&str>) -> Result<Vec<E>> {
        self.freshness
            .invalidate(&resource_key(E::FAMILY, parent_id, None)?)?;
        self.get_all(parent_id).await
    }

    /// Fetch one entity.
    ///
    /// A 404 removes a synced local copy and yields `None`; an unsynced local
    /// copy is returned as is.
    pub async fn get_by_id(&self, parent_id: Option<&str>, id: &str) -> Result<Option<E>> {
        let family = self.family();
        if is_local_id(id) || parent_id.is_some_and(is_local_id) {
            return self.load_one(id);
        }

        let key = resource_key(family, parent_id, Some(id))?;
        if !self.freshness.is_stale(&key, self.ttl)? {
            if let Some(local) = self.load_one(id)? {
                return Ok(Some(local));
            }
        }

        let path = path_for(family, parent_id, Some(id), Route::Read)?;
        match self.gateway.request(Route::Read.method(), &path, None).await {
            Ok(reply) => {
                let Some(body) = reply.into_json() else {
                    return self.load_one(id);
                };
                let local = self.store.get(family, id)?;
                if local.as_ref().is_some_and(|row| !row.synced) {
                    debug!(family = %family, id = %id, "Keeping unsynced local copy");
                } else {
                    let record = self.server_record(body, parent_id)?;
                    self.store.put(&record)?;
                }
                self.freshness.mark_fresh(&key)?;
                self.load_one(id)
            }
            Err(e) if e.is_offline() => {
                info!(family = %family, id = %id, "Offline, serving cached row");
                self.load_one(id)
            }
            Err(e) if e.is_remote_not_found() => {
                match self.store.get(family, id)? {
                    Some(row) if !row.synced => E::from_record(row).map(Some),
                    Some(_) => {
                        info!(family = %family, id = %id, "Gone on the server, removing local copy");
                        self.store.delete(family, id)?;
                        self.freshness.invalidate(&key)?;
                        Ok(None)
                    }
                    None => Ok(None),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Create an entity.
    ///
    /// # Postconditions
    /// - Online: the server copy is stored with `_synced = true`
    /// - Offline: a row keyed by a fresh local identifier is stored unsynced
    ///   and a `create` is queued in the same transaction
    ///
    /// # Errors
    /// - Child entity without a trip
    /// - Remote rejection other than the offline signal
    /// - Local store failure
    pub async fn create(&self, entity: E) -> Result<E> {
        let family = self.family();
        let parent_id = entity.parent_id().map(str::to_string);
        if family.parent().is_some() && parent_id.is_none() {
            return Err(Error::InvalidInput(format!("{} requires a trip", family)));
        }
        let parent_id = parent_id.as_deref();

        let mut body = entity.to_body()?;
        if let Some(obj) = body.as_object_mut() {
            obj.remove("id");
            let now = timestamp();
            obj.insert("createdAt".to_string(), now.clone());
            obj.insert("updatedAt".to_string(), now);
        }

        if !parent_id.is_some_and(is_local_id) {
            let path = path_for(family, parent_id, None, Route::Create)?;
            match self.gateway.request(Route::Create.method(), &path, Some(&body)).await {
                Ok(reply) => {
                    let server = reply.into_json().ok_or_else(|| {
                        Error::Serialization(format!("Create {} returned no body", family))
                    })?;
                    let record = self.server_record(server, parent_id)?;
                    self.store.put(&record)?;
                    self.mark_item_fresh(parent_id, &record.id)?;
                    info!(family = %family, id = %record.id, "Created");
                    return E::from_record(record);
                }
                Err(e) if e.is_offline() => {
                    info!(family = %family, "Offline, queueing create");
                }
                Err(e) => return Err(e),
            }
        }

        let local_id = new_local_id();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("id".to_string(), Value::String(local_id.clone()));
        }
        let record = StoredRecord::from_json(family, body.clone(), false)?;
        let mutation = NewMutation::create(family, &local_id, parent_id.map(String::from), body);
        self.store.transaction(|tx| {
            tx.put(&record)?;
            tx.enqueue(&mutation)
        })?;

        debug!(family = %family, id = %local_id, "Stored unsynced create");
        E::from_record(record)
    }

    /// Update an entity.
    ///
    /// An entity with queued changes is updated through the queue, behind
    /// them, so replay cannot overwrite this write with an older one.
    ///
    /// A 404 from the server means the row is orphaned: it is kept locally
    /// unsynced, and if nothing is queued for it yet it is re-queued as a
    /// `create`. The caller sees no error in that case.
    pub async fn update(&self, entity: E) -> Result<E> {
        let family = self.family();
        let id = entity.id().to_string();
        if id.is_empty() {
            return Err(Error::InvalidInput(format!("{} update requires an id", family)));
        }
        let parent_id = entity.parent_id().map(str::to_string);
        let parent_id = parent_id.as_deref();

        let mut body = entity.to_body()?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("updatedAt".to_string(), timestamp());
            if let Some(existing) = self.store.get(family, &id)? {
                if let Some(created) = existing.body.get("createdAt") {
                    obj.insert("createdAt".to_string(), created.clone());
                }
            }
        }

        if self.is_remote_writable(parent_id, &id)? {
            let path = path_for(family, parent_id, Some(&id), Route::Update)?;
            match self.gateway.request(Route::Update.method(), &path, Some(&body)).await {
                Ok(reply) => {
                    let server = match reply.into_json() {
                        Some(server @ Value::Object(_)) => server,
                        _ => body,
                    };
                    let record = self.server_record(server, parent_id)?;
                    self.store.put(&record)?;
                    self.mark_item_fresh(parent_id, &id)?;
                    info!(family = %family, id = %id, "Updated");
                    return E::from_record(record);
                }
                Err(e) if e.is_offline() => {
                    info!(family = %family, id = %id, "Offline, queueing update");
                }
                Err(e) if e.is_remote_not_found() => {
                    return self.orphaned_update(&id, parent_id, body);
                }
                Err(e) => return Err(e),
            }
        }

        let record = StoredRecord::from_json(family, body.clone(), false)?;
        let mutation = NewMutation::update(family, &id, parent_id.map(String::from), body);
        self.store.transaction(|tx| {
            tx.put(&record)?;
            tx.enqueue(&mutation)
        })?;

        debug!(family = %family, id = %id, "Stored unsynced update");
        E::from_record(record)
    }

    fn orphaned_update(&self, id: &str, parent_id: Option<&str>, body: Value) -> Result<E> {
        let family = self.family();
        let record = StoredRecord::from_json(family, body.clone(), false)?;

        let requeued = self.store.transaction(|tx| {
            let has_history = tx.has_queue_history(family, id)?;
            tx.put(&record)?;
            if !has_history {
                tx.enqueue(&NewMutation::create(family, id, parent_id.map(String::from), body))?;
            }
            Ok(!has_history)
        })?;

        if requeued {
            warn!(family = %family, id = %id, "Not found on the server, re-queued as create");
        } else {
            warn!(family = %family, id = %id, "Not found on the server, left for manual resolution");
        }
        E::from_record(record)
    }

    /// Delete an entity.
    ///
    /// A 404 means it is already gone and is treated as success. An entity
    /// with queued changes is deleted through the queue so those changes
    /// replay first.
    pub async fn delete(&self, parent_id: Option<&str>, id: &str) -> Result<()> {
        let family = self.family();
        let key = resource_key(family, parent_id, Some(id))?;

        if self.is_remote_writable(parent_id, id)? {
            let path = path_for(family, parent_id, Some(id), Route::Delete)?;
            match self.gateway.request(Route::Delete.method(), &path, None).await {
                Ok(_) => {}
                Err(e) if e.is_offline() => {
                    info!(family = %family, id = %id, "Offline, queueing delete");
                    return self.queue_delete(parent_id, id);
                }
                Err(e) if e.is_remote_not_found() => {
                    debug!(family = %family, id = %id, "Already deleted on the server");
                }
                Err(e) => return Err(e),
            }

            self.store.transaction(|tx| {
                tx.delete(family, id)?;
                tx.prune_children(family, id)
            })?;
            self.freshness.invalidate(&key)?;
            info!(family = %family, id = %id, "Deleted");
            return Ok(());
        }

        self.queue_delete(parent_id, id)
    }

    fn queue_delete(&self, parent_id: Option<&str>, id: &str) -> Result<()> {
        let family = self.family();
        let mutation = NewMutation::delete(family, id, parent_id.map(String::from));
        self.store.transaction(|tx| {
            tx.delete(family, id)?;
            tx.enqueue(&mutation)
        })?;
        debug!(family = %family, id = %id, "Stored unsynced delete");
        Ok(())
    }

    /// Whether a write may go straight to the server.
    ///
    /// Not for ids the server has never seen, nor for entities with pending
    /// or failed queue entries, which must stay in order.
    fn is_remote_writable(&self, parent_id: Option<&str>, id: &str) -> Result<bool> {
        if is_local_id(id) || parent_id.is_some_and(is_local_id) {
            return Ok(false);
        }
        Ok(!self.has_pending_changes(id)?)
    }

    /// Whether the entity has pending or failed queue entries.
    pub fn has_pending_changes(&self, id: &str) -> Result<bool> {
        self.queue.has_history(E::FAMILY, id)
    }
}

impl EntityService<Document> {
    /// Upload a file as a new document of a trip.
    ///
    /// Uploads need connectivity: the offline signal is returned to the
    /// caller and nothing is queued.
    ///
    /// # Errors
    /// - Trip not yet synced
    /// - Offline or remote rejection
    pub async fn upload(&self, trip_id: &str, upload: Upload) -> Result<Document> {
        if is_local_id(trip_id) {
            return Err(Error::InvalidInput(format!(
                "Trip {} has not been synced yet",
                trip_id
            )));
        }

        let file_name = upload.file_name.clone();
        let reply = self.gateway.upload(&upload_path(trip_id)?, upload).await?;
        let server = reply.into_json().ok_or_else(|| {
            Error::Serialization(format!("Upload of {} returned no body", file_name))
        })?;

        let record = self.server_record(server, Some(trip_id))?;
        self.store.put(&record)?;
        self.mark_item_fresh(Some(trip_id), &record.id)?;
        info!(trip = %trip_id, file = %file_name, id = %record.id, "Uploaded document");
        Document::from_record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wayfarer_remote::{MemoryGateway, Method};
    use wayfarer_store::{MutationAction, QueueStatus};
    use wayfarer_sync::SyncProcessor;

    struct Fixture {
        store: Arc<LocalStore>,
        gateway: MemoryGateway,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(LocalStore::in_memory().unwrap()),
                gateway: MemoryGateway::new(),
            }
        }

        fn service<E: Entity>(&self) -> EntityService<E> {
            EntityService::new(self.store.clone(), Arc::new(self.gateway.clone()))
        }

        fn queue(&self) -> MutationQueue {
            MutationQueue::new(self.store.clone())
        }

        fn processor(&self) -> SyncProcessor {
            SyncProcessor::new(self.store.clone(), Arc::new(self.gateway.clone()))
        }

        /// Forget every freshness stamp.
        fn expire(&self) {
            FreshnessTracker::new(self.store.clone())
                .invalidate_prefix("")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_online_create_is_synced() {
        let fx = Fixture::new();
        let trips: TripService = fx.service();
        fx.gateway.set_next_id(42);

        let trip = trips.create(Trip::new("Athens 2025")).await.unwrap();
        assert_eq!(trip.id, "42");
        assert!(trip.synced);
        assert!(trip.created_at.is_some());
        assert!(fx.queue().list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_create_queues() {
        let fx = Fixture::new();
        let trips: TripService = fx.service();
        fx.gateway.set_online(false);

        let trip = trips.create(Trip::new("Athens 2025")).await.unwrap();
        assert!(is_local_id(&trip.id));
        assert!(!trip.synced);

        let pending = fx.queue().list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_id(), Some(trip.id.as_str()));
        assert_eq!(pending[0].payload["name"], json!("Athens 2025"));
    }

    #[tokio::test]
    async fn test_child_of_local_parent_skips_network() {
        let fx = Fixture::new();
        let trips: TripService = fx.service();
        let events: EventService = fx.service();
        fx.gateway.set_online(false);
        let trip = trips.create(Trip::new("Athens 2025")).await.unwrap();
        fx.gateway.set_online(true);
        let before = fx.gateway.request_count();

        let mut event = Event::new("Acropolis");
        event.trip_id = trip.id.clone();
        let event = events.create(event).await.unwrap();

        assert_eq!(fx.gateway.request_count(), before);
        assert!(is_local_id(&event.id));
        assert_eq!(event.trip_id, trip.id);

        let listed = events.get_all(Some(&trip.id)).await.unwrap();
        assert_eq!(listed, vec![event]);
        assert_eq!(fx.gateway.request_count(), before);
    }

    #[tokio::test]
    async fn test_child_requires_trip() {
        let fx = Fixture::new();
        let notes: NoteService = fx.service();
        let err = notes.create(Note::new("hello")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_fresh_list_makes_no_request() {
        let fx = Fixture::new();
        let trips: TripService = fx.service();
        fx.gateway.seed(EntityFamily::Trip, json!({"name": "Oslo"}));

        let first = trips.get_all(None).await.unwrap();
        assert_eq!(first.len(), 1);
        let count = fx.gateway.request_count();

        let second = trips.get_all(None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fx.gateway.request_count(), count);
    }

    #[tokio::test]
    async fn test_stale_list_reconciles() {
        let fx = Fixture::new();
        let trips: TripService = fx.service();
        let kept = fx.gateway.seed(EntityFamily::Trip, json!({"name": "Oslo"}));
        let gone = fx.gateway.seed(EntityFamily::Trip, json!({"name": "Bergen"}));
        assert_eq!(trips.get_all(None).await.unwrap().len(), 2);

        // An offline-created trip must survive the refresh.
        fx.gateway.set_online(false);
        let local = trips.create(Trip::new("Tromsø")).await.unwrap();
        fx.gateway.set_online(true);
        fx.gateway.remove(EntityFamily::Trip, &gone);

        let ids: Vec<String> = trips.refresh(None).await.unwrap().into_iter().map(|t| t.id).collect();
        assert!(ids.contains(&kept));
        assert!(ids.contains(&local.id));
        assert!(!ids.contains(&gone));
    }

    #[tokio::test]
    async fn test_offline_read_serves_cache() {
        let fx = Fixture::new();
        let trips: TripService = fx.service();
        fx.gateway.seed(EntityFamily::Trip, json!({"name": "Oslo"}));
        trips.get_all(None).await.unwrap();

        fx.gateway.set_online(false);
        let cached = trips.refresh(None).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].name, "Oslo");
    }

    #[tokio::test]
    async fn test_remote_errors_propagate() {
        let fx = Fixture::new();
        let trips: TripService = fx.service();
        fx.gateway.fail_next(Method::Get, "/api/trips", 500, "boom");

        let err = trips.get_all(None).await.unwrap_err();
        assert!(matches!(err, Error::Remote { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_update_not_found_requeues_as_create() {
        let fx = Fixture::new();
        let expenses: ExpenseService = fx.service();
        let trip = fx.gateway.seed(EntityFamily::Trip, json!({"name": "Oslo"}));
        let mut expense = Expense::new("Taxi", 30.0);
        expense.trip_id = trip.clone();
        let expense = expenses.create(expense).await.unwrap();
        assert!(expense.synced);

        fx.gateway.remove(EntityFamily::Expense, &expense.id);
        let mut edited = expense.clone();
        edited.amount = 35.0;
        let result = expenses.update(edited).await.unwrap();

        assert!(!result.synced);
        assert_eq!(result.amount, 35.0);
        let pending = fx.queue().list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_id(), Some(expense.id.as_str()));

        // Further edits queue behind the create without a request.
        let before = fx.gateway.request_count();
        let again = expenses.update(result).await.unwrap();
        assert!(!again.synced);
        assert_eq!(fx.gateway.request_count(), before);
        let pending = fx.queue().list_pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].action, MutationAction::Update);
    }

    #[tokio::test]
    async fn test_delete_not_found_is_success() {
        let fx = Fixture::new();
        let notes: NoteService = fx.service();
        let trip = fx.gateway.seed(EntityFamily::Trip, json!({"name": "Oslo"}));
        let mut note = Note::new("bring cash");
        note.trip_id = trip.clone();
        let note = notes.create(note).await.unwrap();

        fx.gateway.remove(EntityFamily::Note, &note.id);
        notes.delete(Some(&trip), &note.id).await.unwrap();
        assert!(fx.store.get(EntityFamily::Note, &note.id).unwrap().is_none());
        assert!(fx.queue().list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_delete_is_atomic_with_queue() {
        let fx = Fixture::new();
        let places: PlaceService = fx.service();
        let trip = fx.gateway.seed(EntityFamily::Trip, json!({"name": "Oslo"}));
        let mut place = Place::new("Vigeland Park");
        place.trip_id = trip.clone();
        let place = places.create(place).await.unwrap();

        fx.gateway.set_online(false);
        places.delete(Some(&trip), &place.id).await.unwrap();

        assert!(fx.store.get(EntityFamily::Place, &place.id).unwrap().is_none());
        let pending = fx.queue().list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, place.id);
        assert_eq!(pending[0].status, QueueStatus::Pending);
    }

    #[tokio::test]
    async fn test_online_update_queues_behind_offline_update() {
        let fx = Fixture::new();
        let expenses: ExpenseService = fx.service();
        let trip = fx.gateway.seed(EntityFamily::Trip, json!({"name": "Oslo"}));
        let mut expense = Expense::new("Ferry", 10.0);
        expense.set_parent_id(&trip);
        let mut expense = expenses.create(expense).await.unwrap();

        fx.gateway.set_online(false);
        expense.amount = 20.0;
        let mut expense = expenses.update(expense).await.unwrap();
        fx.gateway.set_online(true);

        let before = fx.gateway.request_count();
        expense.amount = 30.0;
        let latest = expenses.update(expense).await.unwrap();
        assert!(!latest.is_synced());
        assert_eq!(fx.gateway.request_count(), before);
        assert!(expenses.has_pending_changes(&latest.id).unwrap());

        let report = fx.processor().run().await.unwrap();
        assert_eq!(report.synced, 2);

        let server = fx.gateway.record(EntityFamily::Expense, &latest.id).unwrap();
        assert_eq!(server["amount"], json!(30.0));
        let row = fx.store.get(EntityFamily::Expense, &latest.id).unwrap().unwrap();
        assert_eq!(row.body["amount"], json!(30.0));
        assert!(row.synced);
        assert!(!expenses.has_pending_changes(&latest.id).unwrap());
    }

    #[tokio::test]
    async fn test_online_delete_queues_behind_offline_update() {
        let fx = Fixture::new();
        let notes: NoteService = fx.service();
        let trip = fx.gateway.seed(EntityFamily::Trip, json!({"name": "Oslo"}));
        let mut note = Note::new("Museum pass");
        note.set_parent_id(&trip);
        let mut note = notes.create(note).await.unwrap();

        fx.gateway.set_online(false);
        note.pinned = true;
        let note = notes.update(note).await.unwrap();
        fx.gateway.set_online(true);

        notes.delete(Some(&trip), &note.id).await.unwrap();
        assert!(fx.store.get(EntityFamily::Note, &note.id).unwrap().is_none());
        assert!(fx.gateway.record(EntityFamily::Note, &note.id).is_some());

        let report = fx.processor().run().await.unwrap();
        assert_eq!(report.synced, 2);
        assert_eq!(report.failed, 0);
        assert!(fx.gateway.record(EntityFamily::Note, &note.id).is_none());
        assert!(fx.queue().list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_does_not_resurrect_offline_delete() {
        let fx = Fixture::new();
        let notes: NoteService = fx.service();
        let trip = fx.gateway.seed(EntityFamily::Trip, json!({"name": "Oslo"}));
        let mut note = Note::new("Museum pass");
        note.set_parent_id(&trip);
        let note = notes.create(note).await.unwrap();

        fx.gateway.set_online(false);
        notes.delete(Some(&trip), &note.id).await.unwrap();
        fx.gateway.set_online(true);

        assert!(notes.refresh(Some(&trip)).await.unwrap().is_empty());
        assert_eq!(fx.queue().counts().unwrap().pending, 1);

        fx.processor().run().await.unwrap();
        assert!(notes.refresh(Some(&trip)).await.unwrap().is_empty());
        assert!(fx.queue().list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_online_trip_delete_prunes_children() {
        let fx = Fixture::new();
        let trips: TripService = fx.service();
        let packing: PackingService = fx.service();
        let trip = trips.create(Trip::new("Oslo")).await.unwrap();
        let mut item = PackingItem::new("Scarf");
        item.trip_id = trip.id.clone();
        let item = packing.create(item).await.unwrap();
        assert_eq!(item.quantity, 1);

        trips.delete(None, &trip.id).await.unwrap();
        assert!(fx.store.get(EntityFamily::Packing, &item.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_by_id_not_found_drops_synced_copy() {
        let fx = Fixture::new();
        let cities: CityService = fx.service::<City>().with_ttl(Duration::from_secs(3 * 86_400));
        let trip = fx.gateway.seed(EntityFamily::Trip, json!({"name": "Oslo"}));
        let mut city = City::new("Bergen");
        city.trip_id = trip.clone();
        let city = cities.create(city).await.unwrap();
        assert_eq!(cities.ttl(), Duration::from_secs(3 * 86_400));

        fx.expire();
        let fetched = cities.get_by_id(Some(&trip), &city.id).await.unwrap();
        assert_eq!(fetched.map(|c| c.name), Some("Bergen".to_string()));

        fx.gateway.remove(EntityFamily::City, &city.id);
        fx.expire();
        assert_eq!(cities.get_by_id(Some(&trip), &city.id).await.unwrap(), None);
        assert!(fx.store.get(EntityFamily::City, &city.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upload_requires_connectivity() {
        let fx = Fixture::new();
        let documents: DocumentService = fx.service();
        let trip = fx.gateway.seed(EntityFamily::Trip, json!({"name": "Oslo"}));
        let upload = Upload {
            file_name: "boarding-pass.pdf".into(),
            content_type: "application/pdf".into(),
            data: b"%PDF-1.4".to_vec(),
            fields: vec![("docType".into(), "ticket".into())],
        };

        let doc = documents.upload(&trip, upload.clone()).await.unwrap();
        assert_eq!(doc.doc_type, "ticket");
        assert_eq!(doc.trip_id, trip);
        assert!(doc.synced);

        fx.gateway.set_online(false);
        let err = documents.upload(&trip, upload).await.unwrap_err();
        assert!(err.is_offline());
        assert!(fx.queue().list_all().unwrap().is_empty());
    }
}
