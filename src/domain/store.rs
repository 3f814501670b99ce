//! Storage seam for the pipeline.
//!
//! Every write is an independent idempotent upsert; there is no cross-item
//! transaction apart from the administrative [`CatalogStore::clear_all`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::entities::{EnrichedAlbum, EnrichedArtist};

/// Result of a conditional page-history upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The row was inserted or its hash changed.
    Written,
    /// The stored hash matches; nothing was written.
    Unchanged,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable store for entities and page history.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Upserts the history row for `page_url`. A matching hash is reported as
    /// [`UpsertOutcome::Unchanged`] and writes nothing.
    async fn upsert_page_history(
        &self,
        page_url: &str,
        hash: &str,
        checked_on: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Upserts an artist keyed on its catalogue URL.
    async fn upsert_artist(&self, artist: &EnrichedArtist) -> Result<(), StoreError>;

    /// Upserts an album keyed on `(artist_url, name)`.
    async fn upsert_album(&self, album: &EnrichedAlbum) -> Result<(), StoreError>;

    /// Clears all catalogue data in one serializable transaction.
    async fn clear_all(&self) -> Result<(), StoreError>;
}
