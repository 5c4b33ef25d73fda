//! End-to-end offline write and replay scenarios against the memory backend.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use wayfarer_app::{Engine, EngineConfig, Event, Expense, Note, PackingItem, Trip};
use wayfarer_common::{is_local_id, EntityFamily};
use wayfarer_remote::{MemoryGateway, SessionNotifier};
use wayfarer_store::{LocalStore, NewMutation, Predicate, QueueStatus};

fn engine_with(store: Arc<LocalStore>, gateway: &MemoryGateway) -> Engine {
    Engine::new(
        store,
        Arc::new(gateway.clone()),
        SessionNotifier::new(),
        &EngineConfig::default(),
    )
}

fn engine(gateway: &MemoryGateway) -> Engine {
    engine_with(Arc::new(LocalStore::in_memory().unwrap()), gateway)
}

#[tokio::test]
async fn athens_event_follows_its_trip_to_the_server_id() {
    let gateway = MemoryGateway::new();
    let engine = engine(&gateway);
    gateway.set_online(false);

    let trip = engine.trips().create(Trip::new("Athens 2025")).await.unwrap();
    assert!(is_local_id(&trip.id));

    let mut event = Event::new("Acropolis at sunrise");
    event.trip_id = trip.id.clone();
    let event = engine.events().create(event).await.unwrap();
    assert_eq!(event.trip_id, trip.id);

    gateway.set_online(true);
    gateway.set_next_id(42);
    let report = engine.sync().await.unwrap();
    assert_eq!(report.synced, 2);
    assert_eq!(report.remapped[&trip.id], "42");

    let stored = engine
        .store()
        .query(EntityFamily::Event, &Predicate::Parent("42".into()))
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].body["tripId"], json!("42"));
    assert!(stored[0].synced);

    assert!(engine.store().get(EntityFamily::Trip, &trip.id).unwrap().is_none());
    let trips = engine.trips().get_all(None).await.unwrap();
    assert_eq!(trips.len(), 1);
    assert_eq!(trips[0].id, "42");
    assert!(trips[0].synced);

    assert_eq!(gateway.records(EntityFamily::Event)[0]["tripId"], json!(42));
}

#[tokio::test]
async fn expense_update_on_missing_record_stays_unsynced() {
    let gateway = MemoryGateway::new();
    let engine = engine(&gateway);
    let trip = engine.trips().create(Trip::new("Lisbon")).await.unwrap();

    let mut expense = Expense::new("Tram 28", 3.0);
    expense.trip_id = trip.id.clone();
    let expense = engine.expenses().create(expense).await.unwrap();
    assert!(expense.synced);
    assert_eq!(expense.currency, "EUR");

    gateway.remove(EntityFamily::Expense, &expense.id);

    let mut edited = expense.clone();
    edited.amount = 6.0;
    let result = engine.expenses().update(edited).await;

    let updated = result.unwrap();
    assert!(!updated.synced);
    let row = engine.store().get(EntityFamily::Expense, &expense.id).unwrap().unwrap();
    assert_eq!(row.body["_synced"], json!(false));
    assert_eq!(row.body["amount"], json!(6.0));
}

#[tokio::test]
async fn fresh_reads_make_no_network_call() {
    let gateway = MemoryGateway::new();
    let engine = engine(&gateway);
    let trip = gateway.seed(EntityFamily::Trip, json!({"name": "Kyoto"}));
    gateway.seed(EntityFamily::Note, json!({"tripId": trip.parse::<u64>().unwrap(), "content": "JR pass"}));

    let first = engine.notes().get_all(Some(&trip)).await.unwrap();
    let requests = gateway.request_count();

    for _ in 0..3 {
        let again = engine.notes().get_all(Some(&trip)).await.unwrap();
        assert_eq!(again, first);
    }
    assert_eq!(gateway.request_count(), requests);
    assert_eq!(first.len(), 1);
    assert!(!first[0].pinned);
}

#[tokio::test]
async fn offline_create_update_delete_leaves_no_trace() {
    let gateway = MemoryGateway::new();
    let engine = engine(&gateway);
    let trip = engine.trips().create(Trip::new("Reykjavik")).await.unwrap();
    gateway.set_online(false);

    let mut item = PackingItem::new("Crampons");
    item.trip_id = trip.id.clone();
    let mut item = engine.packing().create(item).await.unwrap();
    item.packed = true;
    let item = engine.packing().update(item).await.unwrap();
    engine.packing().delete(Some(&trip.id), &item.id).await.unwrap();

    assert_eq!(engine.queue().counts().unwrap().pending, 3);

    gateway.set_online(true);
    let report = engine.sync().await.unwrap();
    assert_eq!(report.synced, 3);
    assert_eq!(report.failed, 0);

    assert!(gateway.records(EntityFamily::Packing).is_empty());
    assert!(engine
        .store()
        .query(EntityFamily::Packing, &Predicate::All)
        .unwrap()
        .is_empty());
    assert!(engine.queue().list_all().unwrap().is_empty());
}

#[tokio::test]
async fn purge_synced_keeps_pending_and_failed() {
    let gateway = MemoryGateway::new();
    let engine = engine(&gateway);
    let queue = engine.queue();

    let synced = queue
        .enqueue(&NewMutation::delete(EntityFamily::Trip, "1", None))
        .unwrap();
    let pending = queue
        .enqueue(&NewMutation::delete(EntityFamily::Trip, "2", None))
        .unwrap();
    let failed = queue
        .enqueue(&NewMutation::delete(EntityFamily::Trip, "3", None))
        .unwrap();
    queue.mark_synced(synced).unwrap();
    queue.mark_failed(failed, "Remote error 422: locked").unwrap();

    assert_eq!(queue.purge_synced().unwrap(), 1);

    let left: Vec<_> = queue
        .list_all()
        .unwrap()
        .into_iter()
        .map(|e| (e.id, e.status))
        .collect();
    assert_eq!(
        left,
        vec![(pending, QueueStatus::Pending), (failed, QueueStatus::Failed)]
    );
}

#[tokio::test]
async fn queued_writes_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("wayfarer.db");
    let gateway = MemoryGateway::new();
    gateway.set_online(false);

    let local_id = {
        let engine = engine_with(Arc::new(LocalStore::open(&db).unwrap()), &gateway);
        let trip = engine.trips().create(Trip::new("Hanoi")).await.unwrap();
        let mut note = Note::new("Visa on arrival");
        note.trip_id = trip.id.clone();
        engine.notes().create(note).await.unwrap();
        trip.id
    };

    gateway.set_online(true);
    let engine = engine_with(Arc::new(LocalStore::open(&db).unwrap()), &gateway);
    assert_eq!(engine.queue().counts().unwrap().pending, 2);

    let report = engine.sync().await.unwrap();
    assert_eq!(report.synced, 2);
    let server_id = &report.remapped[&local_id];

    let notes = engine.notes().get_all(Some(server_id)).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(&notes[0].trip_id, server_id);
}

#[tokio::test]
async fn reconnect_replays_queue() {
    let gateway = MemoryGateway::new();
    let engine = engine(&gateway);
    engine.network().set_online(false);
    gateway.set_online(false);
    let handle = engine.spawn_reconnect();

    engine.trips().create(Trip::new("Tallinn")).await.unwrap();
    assert_eq!(engine.queue().counts().unwrap().pending, 1);

    gateway.set_online(true);
    engine.network().set_online(true);

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let counts = engine.queue().counts().unwrap();
            if counts.pending == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok());
    assert_eq!(gateway.records(EntityFamily::Trip).len(), 1);

    handle.abort();
}
