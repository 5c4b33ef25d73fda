//! Wayfarer Sync Processor
//!
//! This module replays queued offline writes against the backend:
//! - Strict enqueue-order replay, parents before children
//! - Local-to-server identifier remapping, in-run and durable
//! - Per-entry failure isolation with a halt on connectivity loss
//! - A reconnect trigger driven by network reachability

pub mod processor;
pub mod reconnect;

pub use processor::{HaltReason, SyncProcessor, SyncReport};
pub use reconnect::ReconnectTrigger;
