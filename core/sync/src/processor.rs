//! Replays the mutation queue against the remote gateway.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use wayfarer_common::{id_from_value, is_local_id, EntityFamily, Error, Result};
use wayfarer_remote::{path_for, resource_key, RemoteGateway, Reply, Route};
use wayfarer_store::{
    FreshnessTracker, LocalStore, MutationAction, MutationQueue, QueueEntry, StoreTx,
    StoredRecord, LOCAL_ID_FIELD, SYNCED_FIELD,
};

/// Why a run stopped before reaching the end of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    /// Connectivity dropped mid-run.
    Offline,
    /// Credentials were rejected; re-authentication is required.
    SessionExpired,
}

/// Outcome of one replay run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// Entries the server accepted.
    pub synced: usize,
    /// Entries marked failed during this run.
    pub failed: usize,
    /// Entries left pending because the run halted.
    pub remaining: usize,
    pub halted: Option<HaltReason>,
    /// Local identifiers replaced by server identifiers.
    pub remapped: BTreeMap<String, String>,
    /// Synced entries removed at the end of the run.
    pub purged: usize,
    #[serde(skip)]
    pub duration: Duration,
}

impl SyncReport {
    /// True when connectivity regressed mid-run.
    pub fn halted_offline(&self) -> bool {
        self.halted == Some(HaltReason::Offline)
    }

    /// True when the whole queue was processed.
    pub fn completed(&self) -> bool {
        self.halted.is_none()
    }
}

/// What happened to a single entry.
enum Outcome {
    Synced,
    Failed,
}

/// Local identifier to server identifier, scoped to one run.
type IdMap = HashMap<String, String>;

fn resolve(ids: &IdMap, id: &str) -> String {
    ids.get(id).cloned().unwrap_or_else(|| id.to_string())
}

/// Drains the mutation queue in enqueue order.
///
/// Only one run executes at a time; a second caller waits for the first to
/// finish, then replays whatever is still pending.
pub struct SyncProcessor {
    store: Arc<LocalStore>,
    queue: MutationQueue,
    freshness: FreshnessTracker,
    gateway: Arc<dyn RemoteGateway>,
    run_lock: Mutex<()>,
}

impl SyncProcessor {
    pub fn new(store: Arc<LocalStore>, gateway: Arc<dyn RemoteGateway>) -> Self {
        Self {
            queue: MutationQueue::new(store.clone()),
            freshness: FreshnessTracker::new(store.clone()),
            store,
            gateway,
            run_lock: Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// Replay every pending entry.
    ///
    /// Remote rejections are isolated to their entry. The run halts on the
    /// offline signal or an expired session, leaving the rest pending.
    ///
    /// # Errors
    /// - Local store failures, which abort the run
    pub async fn run(&self) -> Result<SyncReport> {
        let _guard = self.run_lock.lock().await;
        let started = Instant::now();
        let mut report = SyncReport::default();

        let pending = self.queue.list_pending()?;
        if pending.is_empty() {
            debug!("Mutation queue is empty, nothing to replay");
            return Ok(report);
        }

        info!(
            "Replaying {} queued mutations via {}",
            pending.len(),
            self.gateway.name()
        );

        let mut ids = IdMap::new();
        for (index, entry) in pending.iter().enumerate() {
            match self.replay(entry, &mut ids).await {
                Ok(Outcome::Synced) => report.synced += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Err(Error::Offline(reason)) => {
                    warn!("Offline during replay of #{}: {}", entry.id, reason);
                    report.halted = Some(HaltReason::Offline);
                    report.remaining = pending.len() - index;
                    break;
                }
                Err(Error::SessionExpired) => {
                    error!("Session expired during replay of #{}", entry.id);
                    report.halted = Some(HaltReason::SessionExpired);
                    report.remaining = pending.len() - index;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        report.remapped = ids.into_iter().collect();
        report.purged = self.queue.purge_synced()?;
        report.duration = started.elapsed();

        info!(
            "Replay finished: {} synced, {} failed, {} remaining in {:?}",
            report.synced, report.failed, report.remaining, report.duration
        );
        Ok(report)
    }

    async fn replay(&self, entry: &QueueEntry, ids: &mut IdMap) -> Result<Outcome> {
        let family = entry.family;
        let entity_id = resolve(ids, &entry.entity_id);
        let parent_id = entry.parent_id.as_deref().map(|p| resolve(ids, p));

        if let Some(parent) = parent_id.as_deref().filter(|p| is_local_id(p)) {
            return self.fail(entry, &format!("Parent {} has not been synced", parent));
        }
        if entry.action != MutationAction::Create && is_local_id(&entity_id) {
            return self.fail(entry, &format!("{} {} has not been created on the server", family, entity_id));
        }

        let route = match entry.action {
            MutationAction::Create => Route::Create,
            MutationAction::Update => Route::Update,
            MutationAction::Delete => Route::Delete,
        };
        let path = match path_for(family, parent_id.as_deref(), Some(&entity_id), route) {
            Ok(path) => path,
            Err(e) => return self.fail(entry, &e.to_string()),
        };
        let body = request_body(entry, &entity_id, parent_id.as_deref());

        debug!("Replaying #{} {} {}", entry.id, route.method(), path);
        let reply = match self.gateway.request(route.method(), &path, body.as_ref()).await {
            Ok(reply) => reply,
            Err(e) if entry.action == MutationAction::Delete && e.is_remote_not_found() => {
                debug!("{} {} already gone on the server", family, entity_id);
                Reply::NoContent
            }
            Err(e @ Error::Remote { .. }) => return self.fail(entry, &e.to_string()),
            Err(e) => return Err(e),
        };

        match entry.action {
            MutationAction::Create => self.apply_create(entry, parent_id.as_deref(), reply, ids),
            MutationAction::Update => {
                self.apply_update(entry, &entity_id, parent_id.as_deref(), reply)
            }
            MutationAction::Delete => self.apply_delete(entry, &entity_id, parent_id.as_deref()),
        }
    }

    fn fail(&self, entry: &QueueEntry, reason: &str) -> Result<Outcome> {
        self.queue.mark_failed(entry.id, reason)?;
        Ok(Outcome::Failed)
    }

    fn apply_create(
        &self,
        entry: &QueueEntry,
        parent_id: Option<&str>,
        reply: Reply,
        ids: &mut IdMap,
    ) -> Result<Outcome> {
        let family = entry.family;
        let local_id = entry.local_id().unwrap_or(&entry.entity_id).to_string();
        let server = reply.into_json();
        let Some(server_id) = server.as_ref().and_then(|v| v.get("id")).and_then(id_from_value)
        else {
            return self.fail(entry, "Server response carried no identifier");
        };

        self.store.transaction(|tx| {
            tx.mark_synced(entry.id)?;
            tx.remap_identifier(family, &local_id, &server_id)?;

            if tx.get(family, &server_id)?.is_some()
                && !tx.has_pending_after(family, &server_id, entry.id)?
            {
                if let Some(server) = server {
                    put_server_state(tx, family, server, parent_id)?;
                }
            }
            Ok(())
        })?;

        info!("{} {} is now {}", family, local_id, server_id);
        self.mark_item_fresh(family, parent_id, &server_id);
        ids.insert(local_id, server_id);
        Ok(Outcome::Synced)
    }

    fn apply_update(
        &self,
        entry: &QueueEntry,
        entity_id: &str,
        parent_id: Option<&str>,
        reply: Reply,
    ) -> Result<Outcome> {
        let family = entry.family;
        self.store.transaction(|tx| {
            tx.mark_synced(entry.id)?;
            if tx.has_pending_after(family, entity_id, entry.id)? {
                return Ok(());
            }
            let Some(mut row) = tx.get(family, entity_id)? else {
                return Ok(());
            };
            match reply {
                Reply::Json(server @ Value::Object(_)) => {
                    put_server_state(tx, family, server, parent_id)?;
                }
                _ => {
                    row.set_synced(true);
                    tx.put(&row)?;
                }
            }
            Ok(())
        })?;

        self.mark_item_fresh(family, parent_id, entity_id);
        Ok(Outcome::Synced)
    }

    fn apply_delete(
        &self,
        entry: &QueueEntry,
        entity_id: &str,
        parent_id: Option<&str>,
    ) -> Result<Outcome> {
        let family = entry.family;
        self.store.transaction(|tx| {
            tx.mark_synced(entry.id)?;
            tx.delete(family, entity_id)?;
            tx.prune_children(family, entity_id)?;
            tx.discard_failed(family, entity_id)?;
            Ok(())
        })?;

        if let Ok(key) = resource_key(family, parent_id, Some(entity_id)) {
            self.freshness.invalidate(&key)?;
        }
        Ok(Outcome::Synced)
    }

    fn mark_item_fresh(&self, family: EntityFamily, parent_id: Option<&str>, id: &str) {
        let marked = resource_key(family, parent_id, Some(id))
            .and_then(|key| self.freshness.mark_fresh(&key));
        if let Err(e) = marked {
            warn!("Could not stamp freshness for {} {}: {}", family, id, e);
        }
    }
}

/// Request body for a queue entry, with identifiers resolved.
fn request_body(entry: &QueueEntry, entity_id: &str, parent_id: Option<&str>) -> Option<Value> {
    if entry.action == MutationAction::Delete {
        return None;
    }

    let mut body = entry.payload.clone();
    if let Some(obj) = body.as_object_mut() {
        obj.remove(LOCAL_ID_FIELD);
        obj.remove(SYNCED_FIELD);
        if entry.action == MutationAction::Create {
            obj.remove("id");
        } else {
            obj.insert("id".to_string(), Value::String(entity_id.to_string()));
        }
        if let (Some(field), Some(parent)) = (entry.family.parent_field(), parent_id) {
            obj.insert(field.to_string(), Value::String(parent.to_string()));
        }
    }
    Some(body)
}

/// Replace the local row with the server's copy, marked synced.
fn put_server_state(
    tx: &StoreTx<'_>,
    family: EntityFamily,
    server: Value,
    parent_id: Option<&str>,
) -> Result<()> {
    let mut record = StoredRecord::from_json(family, server, true)?;
    if record.parent_id.is_none() {
        if let Some(parent) = parent_id {
            record.set_parent(parent);
        }
    }
    tx.put(&record)
}
