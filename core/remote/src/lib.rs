//! Remote gateway abstraction for Wayfarer.
//!
//! This module provides a trait-based interface to the REST backend, an
//! in-memory backend for tests, and the session and network signals the
//! engine reacts to.
//!
//! # Design Principles
//! - One path builder: services and the sync processor share `endpoint`
//! - Transport failures surface as `Error::Offline`, never as `Remote`
//! - A rejected or expired session is broadcast, not retried

pub mod auth;
pub mod endpoint;
pub mod gateway;
pub mod http;
pub mod memory;
pub mod network;

pub use auth::{Credential, CredentialProvider, SessionEvent, SessionNotifier, StaticCredentials};
pub use endpoint::{path_for, resource_key, upload_path, Route};
pub use gateway::{Method, RemoteGateway, Reply, Upload};
pub use http::{HttpGateway, DEFAULT_TIMEOUT};
pub use memory::{MemoryGateway, RecordedRequest};
pub use network::NetworkMonitor;
