//! Wires the store, gateway, services and sync processor together.

use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use wayfarer_common::Result;
use wayfarer_remote::{
    CredentialProvider, HttpGateway, NetworkMonitor, RemoteGateway, SessionNotifier,
};
use wayfarer_store::{FreshnessTracker, LocalStore, MutationQueue, QueueCounts};
use wayfarer_sync::{ReconnectTrigger, SyncProcessor, SyncReport};

use crate::config::EngineConfig;
use crate::service::{
    CityService, DocumentService, EntityService, EventService, ExpenseService, NoteService,
    PackingService, PlaceService, TripService,
};

/// Snapshot of engine state for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub gateway: String,
    pub online: bool,
    pub schema_version: u32,
    pub queue: QueueCounts,
    pub fresh_resources: usize,
}

/// The offline-first engine.
///
/// One instance owns one local store; every service and the sync processor
/// share it.
pub struct Engine {
    store: Arc<LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    processor: Arc<SyncProcessor>,
    queue: MutationQueue,
    freshness: FreshnessTracker,
    network: NetworkMonitor,
    session: SessionNotifier,
    trips: TripService,
    events: EventService,
    packing: PackingService,
    documents: DocumentService,
    expenses: ExpenseService,
    notes: NoteService,
    cities: CityService,
    places: PlaceService,
}

impl Engine {
    /// Build an engine over an existing store and gateway.
    pub fn new(
        store: Arc<LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        session: SessionNotifier,
        config: &EngineConfig,
    ) -> Self {
        let ttl = config.default_ttl();
        let lookup_ttl = config.lookup_ttl();

        Self {
            processor: Arc::new(SyncProcessor::new(store.clone(), gateway.clone())),
            queue: MutationQueue::new(store.clone()),
            freshness: FreshnessTracker::new(store.clone()),
            network: NetworkMonitor::default(),
            session,
            trips: EntityService::new(store.clone(), gateway.clone()).with_ttl(ttl),
            events: EntityService::new(store.clone(), gateway.clone()).with_ttl(ttl),
            packing: EntityService::new(store.clone(), gateway.clone()).with_ttl(ttl),
            documents: EntityService::new(store.clone(), gateway.clone()).with_ttl(ttl),
            expenses: EntityService::new(store.clone(), gateway.clone()).with_ttl(ttl),
            notes: EntityService::new(store.clone(), gateway.clone()).with_ttl(ttl),
            cities: EntityService::new(store.clone(), gateway.clone()).with_ttl(lookup_ttl),
            places: EntityService::new(store.clone(), gateway.clone()).with_ttl(lookup_ttl),
            store,
            gateway,
        }
    }

    /// Open the configured database and talk to the configured backend.
    ///
    /// # Errors
    /// - Database directory cannot be created
    /// - Database open or migration failure
    /// - Invalid base URL
    pub fn open(config: &EngineConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        if let Some(dir) = config.database_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let store = Arc::new(LocalStore::open(&config.database_path)?);
        let session = SessionNotifier::new();
        let gateway = HttpGateway::new(
            &config.base_url,
            credentials,
            session.clone(),
            config.request_timeout(),
            &config.user_agent,
        )?;

        info!("Engine ready against {}", config.base_url);
        Ok(Self::new(store, Arc::new(gateway), session, config))
    }

    pub fn trips(&self) -> &TripService {
        &self.trips
    }

    pub fn events(&self) -> &EventService {
        &self.events
    }

    pub fn packing(&self) -> &PackingService {
        &self.packing
    }

    pub fn documents(&self) -> &DocumentService {
        &self.documents
    }

    pub fn expenses(&self) -> &ExpenseService {
        &self.expenses
    }

    pub fn notes(&self) -> &NoteService {
        &self.notes
    }

    pub fn cities(&self) -> &CityService {
        &self.cities
    }

    pub fn places(&self) -> &PlaceService {
        &self.places
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn freshness(&self) -> &FreshnessTracker {
        &self.freshness
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Reachability signal the platform layer feeds.
    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn session(&self) -> &SessionNotifier {
        &self.session
    }

    /// Replay the mutation queue now.
    pub async fn sync(&self) -> Result<SyncReport> {
        self.processor.run().await
    }

    /// Replay the queue whenever the network comes back.
    pub fn spawn_reconnect(&self) -> JoinHandle<()> {
        ReconnectTrigger::new(self.processor.clone(), &self.network).spawn()
    }

    pub fn status(&self) -> Result<EngineStatus> {
        Ok(EngineStatus {
            gateway: self.gateway.name().to_string(),
            online: self.network.is_online(),
            schema_version: self.store.schema_version()?,
            queue: self.queue.counts()?,
            fresh_resources: self.freshness.entries()?.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_remote::{MemoryGateway, StaticCredentials};
    use wayfarer_store::SCHEMA_VERSION;

    use crate::models::Trip;

    fn engine(gateway: &MemoryGateway) -> Engine {
        Engine::new(
            Arc::new(LocalStore::in_memory().unwrap()),
            Arc::new(gateway.clone()),
            SessionNotifier::new(),
            &EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_status() {
        let gateway = MemoryGateway::new();
        let engine = engine(&gateway);
        gateway.set_online(false);
        engine.trips().create(Trip::new("Oslo")).await.unwrap();

        let status = engine.status().unwrap();
        assert_eq!(status.gateway, "memory");
        assert_eq!(status.schema_version, SCHEMA_VERSION);
        assert_eq!(status.queue.pending, 1);
        assert!(status.online);
    }

    #[test]
    fn test_lookup_services_use_long_ttl() {
        let gateway = MemoryGateway::new();
        let engine = engine(&gateway);
        let config = EngineConfig::default();
        assert_eq!(engine.places().ttl(), config.lookup_ttl());
        assert_eq!(engine.cities().ttl(), config.lookup_ttl());
        assert_eq!(engine.events().ttl(), config.default_ttl());
    }

    #[test]
    fn test_open_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            database_path: dir.path().join("nested").join("wayfarer.db"),
            ..Default::default()
        };

        let engine = Engine::open(&config, Arc::new(StaticCredentials::anonymous())).unwrap();
        assert!(config.database_path.exists());
        assert_eq!(engine.status().unwrap().gateway, "http");
    }
}
