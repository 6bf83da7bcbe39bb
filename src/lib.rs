// ABOUTME: Library root for crm-replicator
// ABOUTME: Exposes watermark, fetch, schema, transform, load and sync components

pub mod commands;
pub mod config;
pub mod destination;
pub mod hubspot;
pub mod loader;
pub mod postgres;
pub mod schema;
pub mod sync;
pub mod transform;
pub mod utils;
pub mod watermark;

pub use config::{ObjectConfig, PropertySelection, SyncConfig};
pub use sync::{ObjectOutcome, RunReport, SyncEngine, SyncMode};
