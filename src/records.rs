//! Read-only view of the catalog record store
//!
//! The pipeline does not own catalog records; it only needs to know whether a
//! record exists and which source reference it points at. [`RecordStore`] is
//! the seam, [`SqliteRecordStore`] reads an existing SQLite table.

use async_trait::async_trait;
use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::RecordStoreConfig;
use crate::error::{Error, Result};
use crate::types::TrackId;

/// What the pipeline needs to know about one catalog record
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TrackRecord {
    /// Record id, also the artifact id
    pub id: TrackId,
    /// Remote reference to fetch audio from, if the record has one
    pub source_ref: Option<String>,
}

/// Catalog lookups used by the pipeline
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one record
    async fn get_record(&self, id: TrackId) -> Result<Option<TrackRecord>>;

    /// Whether a record with `id` exists
    async fn record_exists(&self, id: TrackId) -> Result<bool> {
        Ok(self.get_record(id).await?.is_some())
    }

    /// Every record id, ascending
    async fn record_ids(&self) -> Result<Vec<TrackId>>;
}

/// [`RecordStore`] over a SQLite table
///
/// Table and column names come from [`RecordStoreConfig`] and are validated by
/// [`Config::validate`](crate::config::Config::validate) before being
/// interpolated into queries.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
    get_sql: String,
    exists_sql: String,
    ids_sql: String,
}

impl SqliteRecordStore {
    /// Open the configured database read-only
    pub async fn connect(config: &RecordStoreConfig) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{}", config.database_path.display()))
                .map_err(|e| {
                    Error::config(
                        "records.database_path",
                        format!("Failed to parse database path: {e}"),
                    )
                })?
                .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        tracing::info!(
            path = %config.database_path.display(),
            table = %config.table,
            "Record store connected"
        );

        Ok(Self::from_pool(pool, config))
    }

    /// Use an existing pool (e.g. one shared with the embedding application)
    pub fn from_pool(pool: SqlitePool, config: &RecordStoreConfig) -> Self {
        let table = &config.table;
        let id = &config.id_column;
        let source = &config.source_column;

        Self {
            get_sql: format!(
                r#"SELECT "{id}" AS id, "{source}" AS source_ref FROM "{table}" WHERE "{id}" = ?"#
            ),
            exists_sql: format!(r#"SELECT EXISTS(SELECT 1 FROM "{table}" WHERE "{id}" = ?)"#),
            ids_sql: format!(r#"SELECT "{id}" FROM "{table}" ORDER BY "{id}""#),
            pool,
        }
    }

    /// Close the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get_record(&self, id: TrackId) -> Result<Option<TrackRecord>> {
        let record = sqlx::query_as::<_, TrackRecord>(&self.get_sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn record_exists(&self, id: TrackId) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar(&self.exists_sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists != 0)
    }

    async fn record_ids(&self) -> Result<Vec<TrackId>> {
        let ids = sqlx::query_scalar::<_, TrackId>(&self.ids_sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}
