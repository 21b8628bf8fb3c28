//! SQLite archive of published prototype sets.
//!
//! Three tables:
//! - `prototype_versions`: one row per published set, one of them active
//! - `tag_prototypes`: centroid, threshold and counts per tag and version
//! - `tag_label_embeddings`: label embeddings per tag and version
//!
//! Vectors are stored as little-endian f32 blobs.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lectag_core::error::StoreError;
use lectag_core::{EmbeddingVector, PrototypeRecord, PrototypeSet};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

/// One archived version as listed by [`PrototypeArchive::list_versions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedVersion {
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub num_prototypes: usize,
    pub num_low_data: usize,
    pub is_active: bool,
}

pub struct PrototypeArchive {
    pool: SqlitePool,
}

impl PrototypeArchive {
    /// Open an archive from a SQLite URL or path.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?;
        // each in-memory connection is its own database
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        Self::connect(options, max_connections, url).await
    }

    /// Open (creating if needed) an archive file.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("Failed to create {}: {e}", parent.display())))?;
        }
        let options = SqliteConnectOptions::new().filename(path);
        Self::connect(options, 4, &path.display().to_string()).await
    }

    async fn connect(
        options: SqliteConnectOptions,
        max_connections: u32,
        label: &str,
    ) -> Result<Self, StoreError> {
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let archive = Self { pool };
        archive.run_migrations().await?;
        info!("Prototype archive initialized at {label}");
        Ok(archive)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS prototype_versions (
                version        INTEGER PRIMARY KEY,
                created_at     TEXT NOT NULL,
                num_prototypes INTEGER NOT NULL,
                num_low_data   INTEGER NOT NULL DEFAULT 0,
                is_active      INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("prototype_versions table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tag_prototypes (
                version       INTEGER NOT NULL REFERENCES prototype_versions(version) ON DELETE CASCADE,
                tag_id        TEXT NOT NULL,
                centroid      BLOB NOT NULL,
                threshold     REAL NOT NULL,
                example_count INTEGER NOT NULL,
                calibrated    INTEGER NOT NULL DEFAULT 1,
                low_data      INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (version, tag_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("tag_prototypes table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tag_label_embeddings (
                version   INTEGER NOT NULL REFERENCES prototype_versions(version) ON DELETE CASCADE,
                tag_id    TEXT NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (version, tag_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("tag_label_embeddings table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tag_prototypes_tag_id ON tag_prototypes(tag_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("tag_id index: {e}")))?;

        debug!("Prototype archive migrations complete");
        Ok(())
    }

    /// Persist a published set and mark it as the active version.
    ///
    /// Archived versions are never replaced; saving a version that already
    /// exists fails with [`StoreError::VersionExists`].
    pub async fn save(&self, set: &PrototypeSet) -> Result<u64, StoreError> {
        let version = to_i64(set.version)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;

        let existing = sqlx::query("SELECT 1 FROM prototype_versions WHERE version = ?")
            .bind(version)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        if existing.is_some() {
            return Err(StoreError::VersionExists(set.version));
        }

        sqlx::query("UPDATE prototype_versions SET is_active = 0 WHERE is_active = 1")
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("deactivate: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO prototype_versions (version, created_at, num_prototypes, num_low_data, is_active)
            VALUES (?, ?, ?, ?, 1)
            "#,
        )
        .bind(version)
        .bind(set.created_at.to_rfc3339())
        .bind(set.len() as i64)
        .bind(set.low_data_count() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("insert version: {e}")))?;

        for record in set.records() {
            sqlx::query(
                r#"
                INSERT INTO tag_prototypes
                    (version, tag_id, centroid, threshold, example_count, calibrated, low_data)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(version)
            .bind(record.tag_id.as_str())
            .bind(vector_to_blob(&record.centroid))
            .bind(record.threshold as f64)
            .bind(record.example_count as i64)
            .bind(record.calibrated)
            .bind(record.low_data)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("insert prototype {}: {e}", record.tag_id)))?;
        }

        for (tag_id, embedding) in &set.label_embeddings {
            sqlx::query(
                "INSERT INTO tag_label_embeddings (version, tag_id, embedding) VALUES (?, ?, ?)",
            )
            .bind(version)
            .bind(tag_id.as_str())
            .bind(vector_to_blob(embedding))
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("insert label embedding {tag_id}: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;

        info!(version = set.version, prototypes = set.len(), "Archived prototype set");
        Ok(set.version)
    }

    /// Load one archived version.
    pub async fn load(&self, version: u64) -> Result<Option<PrototypeSet>, StoreError> {
        let row = sqlx::query("SELECT version, created_at FROM prototype_versions WHERE version = ?")
            .bind(to_i64(version)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        match row {
            Some(row) => self.load_row(&row).await.map(Some),
            None => Ok(None),
        }
    }

    /// Load the active version, if any.
    pub async fn load_active(&self) -> Result<Option<PrototypeSet>, StoreError> {
        let row = sqlx::query(
            "SELECT version, created_at FROM prototype_versions WHERE is_active = 1 ORDER BY version DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        match row {
            Some(row) => self.load_row(&row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn load_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<PrototypeSet, StoreError> {
        let version: i64 = row
            .try_get("version")
            .map_err(|e| StoreError::QueryFailed(format!("version column: {e}")))?;
        let created_at = parse_timestamp(row)?;

        let rows = sqlx::query(
            r#"
            SELECT tag_id, centroid, threshold, example_count, calibrated, low_data
            FROM tag_prototypes WHERE version = ? ORDER BY tag_id
            "#,
        )
        .bind(version)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let records = rows
            .iter()
            .map(|r| Self::row_to_record(r, version as u64, created_at))
            .collect::<Result<Vec<_>, _>>()?;

        let label_rows =
            sqlx::query("SELECT tag_id, embedding FROM tag_label_embeddings WHERE version = ?")
                .bind(version)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let mut label_embeddings: BTreeMap<String, EmbeddingVector> = BTreeMap::new();
        for r in &label_rows {
            let tag_id: String = r
                .try_get("tag_id")
                .map_err(|e| StoreError::QueryFailed(format!("tag_id column: {e}")))?;
            let blob: Vec<u8> = r
                .try_get("embedding")
                .map_err(|e| StoreError::QueryFailed(format!("embedding column: {e}")))?;
            label_embeddings.insert(tag_id, blob_to_vector(&blob));
        }

        let mut set = PrototypeSet::from_records(records, label_embeddings)?;
        // an archived set with no prototype rows still has a known identity
        set.version = version as u64;
        set.created_at = created_at;
        debug!(version, prototypes = set.len(), "Loaded archived prototype set");
        Ok(set)
    }

    fn row_to_record(
        row: &sqlx::sqlite::SqliteRow,
        version: u64,
        created_at: DateTime<Utc>,
    ) -> Result<PrototypeRecord, StoreError> {
        let tag_id: String = row
            .try_get("tag_id")
            .map_err(|e| StoreError::QueryFailed(format!("tag_id column: {e}")))?;
        let blob: Vec<u8> = row
            .try_get("centroid")
            .map_err(|e| StoreError::QueryFailed(format!("centroid column: {e}")))?;
        let threshold: f64 = row
            .try_get("threshold")
            .map_err(|e| StoreError::QueryFailed(format!("threshold column: {e}")))?;
        let example_count: i64 = row
            .try_get("example_count")
            .map_err(|e| StoreError::QueryFailed(format!("example_count column: {e}")))?;
        let calibrated: bool = row.try_get("calibrated").unwrap_or(true);
        let low_data: bool = row.try_get("low_data").unwrap_or(false);

        Ok(PrototypeRecord {
            version,
            tag_id,
            centroid: blob_to_vector(&blob),
            threshold: threshold as f32,
            example_count: example_count.max(0) as usize,
            created_at,
            calibrated,
            low_data,
        })
    }

    /// All archived versions, newest first.
    pub async fn list_versions(&self) -> Result<Vec<ArchivedVersion>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT version, created_at, num_prototypes, num_low_data, is_active
            FROM prototype_versions ORDER BY version DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let version: i64 = row
                    .try_get("version")
                    .map_err(|e| StoreError::QueryFailed(format!("version column: {e}")))?;
                let num_prototypes: i64 = row.try_get("num_prototypes").unwrap_or(0);
                let num_low_data: i64 = row.try_get("num_low_data").unwrap_or(0);
                let is_active: bool = row
                    .try_get("is_active")
                    .map_err(|e| StoreError::QueryFailed(format!("is_active column: {e}")))?;
                Ok(ArchivedVersion {
                    version: version as u64,
                    created_at: parse_timestamp(row)?,
                    num_prototypes: num_prototypes.max(0) as usize,
                    num_low_data: num_low_data.max(0) as usize,
                    is_active,
                })
            })
            .collect()
    }

    /// Mark an archived version active (rollback across restarts).
    pub async fn activate(&self, version: u64) -> Result<(), StoreError> {
        let version_i64 = to_i64(version)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;

        let updated = sqlx::query("UPDATE prototype_versions SET is_active = 1 WHERE version = ?")
            .bind(version_i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("activate: {e}")))?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::VersionNotFound(version));
        }

        sqlx::query("UPDATE prototype_versions SET is_active = 0 WHERE version != ?")
            .bind(version_i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("deactivate: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;
        info!(version, "Activated archived prototype set");
        Ok(())
    }

    /// The active version's record for one tag.
    pub async fn tag_record(&self, tag_id: &str) -> Result<Option<PrototypeRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT tp.tag_id, tp.centroid, tp.threshold, tp.example_count, tp.calibrated,
                   tp.low_data, pv.version, pv.created_at
            FROM tag_prototypes tp
            JOIN prototype_versions pv ON tp.version = pv.version
            WHERE tp.tag_id = ? AND pv.is_active = 1
            "#,
        )
        .bind(tag_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row
            .try_get("version")
            .map_err(|e| StoreError::QueryFailed(format!("version column: {e}")))?;
        let created_at = parse_timestamp(&row)?;
        Self::row_to_record(&row, version as u64, created_at).map(Some)
    }

    /// Highest archived version number (0 when empty).
    pub async fn latest_version(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS latest FROM prototype_versions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let latest: i64 = row
            .try_get("latest")
            .map_err(|e| StoreError::QueryFailed(format!("latest column: {e}")))?;
        Ok(latest.max(0) as u64)
    }
}

fn to_i64(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Storage(format!("version {version} out of range")))
}

fn parse_timestamp(row: &sqlx::sqlite::SqliteRow) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = row
        .try_get("created_at")
        .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("created_at {raw:?}: {e}")))
}

/// Serialize a vector to little-endian bytes.
fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> EmbeddingVector {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
