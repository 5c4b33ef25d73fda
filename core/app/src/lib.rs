//! Wayfarer application layer.
//!
//! Typed entity models and the offline-first services built on the local
//! store, the remote gateway and the sync processor. [`Engine`] wires one of
//! each together.

pub mod config;
pub mod engine;
pub mod entity;
pub mod models;
pub mod service;

pub use config::{default_database_path, EngineConfig};
pub use engine::{Engine, EngineStatus};
pub use entity::Entity;
pub use models::{City, Document, Event, Expense, Note, PackingItem, Place, Trip};
pub use service::{
    CityService, DocumentService, EntityService, EventService, ExpenseService, NoteService,
    PackingService, PlaceService, TripService,
};

pub use wayfarer_common::{Error, ErrorKind, Result};
pub use wayfarer_remote::{Credential, SessionEvent, StaticCredentials, Upload};
pub use wayfarer_sync::{HaltReason, SyncReport};
