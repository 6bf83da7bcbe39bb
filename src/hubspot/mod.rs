// ABOUTME: HubSpot CRM v3 source: paginated, incremental record fetch
// ABOUTME: Exposes the client, wire models, fetch outcome and error taxonomy

pub mod client;
pub mod error;
pub mod models;

pub use client::{CrmClient, FetchOutcome, RateLimitPolicy, LAST_MODIFIED_PROPERTY};
pub use error::FetchError;
pub use models::{ListPage, SourceRecord};
