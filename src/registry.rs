// src/registry.rs

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// A known plate and who it belongs to.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RegistryRecord {
    pub plate: String,
    pub owner: String,
    pub model: String,
}

/// Handle to the known-plates store. Opened once at startup and passed into
/// the pipeline; cloning shares the underlying pool.
#[derive(Clone)]
pub struct PlateRegistry {
    pool: SqlitePool,
}

impl PlateRegistry {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid registry database URL: {database_url}"))?
            .create_if_missing(true);

        // The pipeline issues lookups sequentially; a single connection keeps
        // in-memory databases coherent as well.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to connect to plate registry")?;

        info!("✓ Plate registry connected: {}", database_url);
        Ok(Self { pool })
    }

    /// Create the plates table if it does not exist. Idempotent; run once at
    /// startup, never on the per-frame path.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS plates (
                plate TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                model TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create plates table")?;
        Ok(())
    }

    /// Exact-match read by primary key. `Ok(None)` means the plate is not
    /// registered; `Err` means the store itself failed, and callers must keep
    /// the two apart.
    pub async fn lookup(&self, plate: &str) -> Result<Option<RegistryRecord>, sqlx::Error> {
        sqlx::query_as::<_, RegistryRecord>(
            "SELECT plate, owner, model FROM plates WHERE plate = ?1",
        )
        .bind(plate)
        .fetch_optional(&self.pool)
        .await
    }

    /// Insert a new plate record. Uniqueness is enforced by the primary key.
    /// Not used on the recognition path, which is read-only.
    pub async fn register(&self, plate: &str, owner: &str, model: &str) -> Result<()> {
        sqlx::query("INSERT INTO plates (plate, owner, model) VALUES (?1, ?2, ?3)")
            .bind(plate)
            .bind(owner)
            .bind(model)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to register plate {plate}"))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
