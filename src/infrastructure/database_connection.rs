// Database connection and pool management
// This module handles SQLite database connections using sqlx

use std::path::Path;

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Create the database file (and parent directory) if missing
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        if !db_path.starts_with(':') && !Path::new(db_path).exists() {
            if let Some(parent) = Path::new(db_path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(db_path)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// In-memory database for tests; a single connection so state is shared.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_artists_sql = r#"
            CREATE TABLE IF NOT EXISTS artists (
                url TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                bio TEXT,
                image_url TEXT,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        "#;

        let create_albums_sql = r#"
            CREATE TABLE IF NOT EXISTS albums (
                artist_url TEXT NOT NULL,
                name TEXT NOT NULL,
                page_url TEXT NOT NULL,
                rating REAL NOT NULL,
                year INTEGER,
                image_url TEXT,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (artist_url, name)
            )
        "#;

        let create_page_history_sql = r#"
            CREATE TABLE IF NOT EXISTS page_history (
                page_url TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                checked_on DATETIME NOT NULL
            )
        "#;

        let create_indexes_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_albums_artist_url ON albums (artist_url);
            CREATE INDEX IF NOT EXISTS idx_albums_year ON albums (year);
        "#;

        sqlx::query(create_artists_sql).execute(&self.pool).await?;
        sqlx::query(create_albums_sql).execute(&self.pool).await?;
        sqlx::query(create_page_history_sql).execute(&self.pool).await?;
        sqlx::query(create_indexes_sql).execute(&self.pool).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn database_connection_and_migration() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test.db");
        let database_url = format!("sqlite:{}", db_path.display());

        let db = DatabaseConnection::new(&database_url).await?;
        db.migrate().await?;

        let result =
            sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='artists'")
                .fetch_optional(db.pool())
                .await?;
        assert!(result.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn in_memory_database_migrates() -> Result<()> {
        let db = DatabaseConnection::in_memory().await?;
        db.migrate().await?;

        let result =
            sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='page_history'")
                .fetch_optional(db.pool())
                .await?;
        assert!(result.is_some());
        Ok(())
    }
}
