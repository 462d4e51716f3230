//! Seen-state store: the durable set of listing ids already handled.
//!
//! - `model`: records returned by the repository.
//! - `repo`: SQL-only functions plus `SqliteSeenStore`, the SQLite-backed
//!   `SeenStore`.
//!
//! The cycle only talks to the `SeenStore` trait, so any medium that offers a
//! durable existence check and idempotent insert can stand in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod model;
pub mod repo;

pub use model::SeenRecord;
pub use repo::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[async_trait]
pub trait SeenStore: Send + Sync {
    async fn has_seen(&self, listing_id: &str) -> Result<bool, StoreError>;

    /// Record `listing_id` as handled. Marking an id twice is a no-op. The
    /// write is durable once this returns `Ok`.
    async fn mark_seen(&self, listing_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}
