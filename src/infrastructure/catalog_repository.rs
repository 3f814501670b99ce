//! SQLite implementation of the catalogue store.
//!
//! Every operation is a single idempotent upsert; the page-history upsert is
//! conditional so an unchanged hash writes nothing and is reported as such.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::entities::{EnrichedAlbum, EnrichedArtist};
use crate::domain::store::{CatalogStore, StoreError, UpsertOutcome};

pub struct SqliteCatalogStore {
    pool: SqlitePool,
}

impl SqliteCatalogStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() { None } else { Some(s) }
}

fn non_zero(year: i32) -> Option<i32> {
    if year == 0 { None } else { Some(year) }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn upsert_page_history(
        &self,
        page_url: &str,
        hash: &str,
        checked_on: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        // The WHERE clause turns a same-hash update into a no-op, which makes
        // RETURNING yield no row.
        let row = sqlx::query(
            r#"
            INSERT INTO page_history (page_url, hash, checked_on)
            VALUES (?, ?, ?)
            ON CONFLICT (page_url) DO UPDATE
                SET hash = excluded.hash, checked_on = excluded.checked_on
                WHERE page_history.hash <> excluded.hash
            RETURNING page_url
            "#,
        )
        .bind(page_url)
        .bind(hash)
        .bind(checked_on)
        .fetch_optional(&self.pool)
        .await?;

        Ok(if row.is_some() {
            UpsertOutcome::Written
        } else {
            UpsertOutcome::Unchanged
        })
    }

    async fn upsert_artist(&self, enriched: &EnrichedArtist) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO artists (url, name, bio, image_url, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (url) DO UPDATE SET
                name = excluded.name,
                bio = excluded.bio,
                image_url = excluded.image_url,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&enriched.artist.url)
        .bind(&enriched.artist.name)
        .bind(non_empty(&enriched.artist.bio))
        .bind(non_empty(&enriched.image_url))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_album(&self, enriched: &EnrichedAlbum) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO albums (artist_url, name, page_url, rating, year, image_url, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (artist_url, name) DO UPDATE SET
                page_url = excluded.page_url,
                rating = excluded.rating,
                year = excluded.year,
                image_url = excluded.image_url,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&enriched.album.artist_url)
        .bind(&enriched.album.name)
        .bind(&enriched.album.page_url)
        .bind(enriched.album.rating)
        .bind(non_zero(enriched.album.year))
        .bind(non_empty(&enriched.cover_url))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM albums").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM artists").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM page_history").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
