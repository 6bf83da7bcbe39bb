// ABOUTME: PostgreSQL connectivity for the destination warehouse
// ABOUTME: Re-exports connection helpers used by the destination and watermark store

pub mod connection;

pub use connection::{connect, connect_with_retry};
