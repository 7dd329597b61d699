//! SQLite-backed asset index.
//!
//! Holds the `asset` rows and the `doc_asset` link table. Every operation
//! exists in two forms: a pool-level method that opens (and for writes,
//! commits) its own transaction, and a `*_tx` associated function that runs
//! against a caller-supplied connection so several steps can share one
//! transaction.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::Asset;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection};
use std::sync::Arc;

/// Grace window before an unlinked asset counts as an orphan.
/// Prevents reaping an asset whose save has not linked it yet.
const DEFAULT_ORPHAN_GRACE_SECS: i64 = 300;

/// Run database migrations. Call once at startup before constructing stores
/// over a shared pool.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Relational index over vault contents
#[derive(Clone)]
pub struct AssetStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    orphan_grace: chrono::Duration,
}

impl AssetStore {
    /// Connect a fresh pool and run migrations
    pub async fn connect(database_url: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        run_migrations(&pool).await?;

        Ok(Self::with_pool(pool, clock))
    }

    /// Use an existing pool (migrations must already be run)
    pub fn with_pool(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            orphan_grace: chrono::Duration::seconds(DEFAULT_ORPHAN_GRACE_SECS),
        }
    }

    /// Override the orphan grace window (tests)
    pub fn with_orphan_grace(mut self, grace: chrono::Duration) -> Self {
        self.orphan_grace = grace;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or refresh an asset row. Returns whether a row for this hash
    /// already existed. On conflict `alias`, `ext`, `bytes` and `mime` are
    /// rewritten but the original `created_at` is preserved.
    pub async fn upsert(&self, asset: &Asset) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let existed = Self::upsert_tx(&mut *tx, asset).await?;
        tx.commit().await?;
        Ok(existed)
    }

    pub async fn upsert_tx(conn: &mut SqliteConnection, asset: &Asset) -> Result<bool> {
        asset.validate()?;

        // The upsert itself is a single atomic statement; the prior SELECT
        // only feeds the informational `existed` flag.
        let existed = sqlx::query("SELECT 1 FROM asset WHERE hash = ?")
            .bind(&asset.hash)
            .fetch_optional(&mut *conn)
            .await?
            .is_some();

        sqlx::query(
            "INSERT INTO asset (hash, alias, ext, bytes, mime, created_at) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(hash) DO UPDATE SET
                 alias = excluded.alias,
                 ext = excluded.ext,
                 bytes = excluded.bytes,
                 mime = excluded.mime",
        )
        .bind(&asset.hash)
        .bind(&asset.alias)
        .bind(&asset.ext)
        .bind(asset.bytes as i64)
        .bind(&asset.mime)
        .bind(format_timestamp(&asset.created_at))
        .execute(&mut *conn)
        .await?;

        Ok(existed)
    }

    pub async fn get_by_hash(&self, hash: &str) -> Result<Asset> {
        let mut conn = self.pool.acquire().await?;
        Self::get_by_hash_tx(&mut *conn, hash).await
    }

    pub async fn get_by_hash_tx(conn: &mut SqliteConnection, hash: &str) -> Result<Asset> {
        crate::content::validate_hash(hash)?;

        let row = sqlx::query(
            "SELECT hash, alias, ext, bytes, mime, created_at FROM asset WHERE hash = ?",
        )
        .bind(hash)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound {
            hash: hash.to_string(),
        })?;

        asset_from_row(&row)
    }

    /// Remove an asset row. Links cascade away with it.
    pub async fn delete(&self, hash: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::delete_tx(&mut *tx, hash).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_tx(conn: &mut SqliteConnection, hash: &str) -> Result<()> {
        crate::content::validate_hash(hash)?;

        let result = sqlx::query("DELETE FROM asset WHERE hash = ?")
            .bind(hash)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                hash: hash.to_string(),
            });
        }
        Ok(())
    }

    /// Record that a document references an asset. Idempotent.
    pub async fn link_to_document(&self, hash: &str, doc_path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::link_to_document_tx(&mut *tx, hash, doc_path).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn link_to_document_tx(
        conn: &mut SqliteConnection,
        hash: &str,
        doc_path: &str,
    ) -> Result<()> {
        crate::content::validate_hash(hash)?;
        if doc_path.is_empty() {
            return Err(Error::MissingField {
                field: "doc_path".to_string(),
            });
        }

        sqlx::query("INSERT OR IGNORE INTO doc_asset (path, hash) VALUES (?, ?)")
            .bind(doc_path)
            .bind(hash)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Remove one document link
    pub async fn unlink_from_document(&self, hash: &str, doc_path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::unlink_from_document_tx(&mut *tx, hash, doc_path).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn unlink_from_document_tx(
        conn: &mut SqliteConnection,
        hash: &str,
        doc_path: &str,
    ) -> Result<()> {
        crate::content::validate_hash(hash)?;

        let result = sqlx::query("DELETE FROM doc_asset WHERE path = ? AND hash = ?")
            .bind(doc_path)
            .bind(hash)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::LinkNotFound {
                doc_path: doc_path.to_string(),
                hash: hash.to_string(),
            });
        }
        Ok(())
    }

    /// Remove every link a document holds. Zero links is not an error.
    /// Returns the number of removed rows.
    pub async fn unlink_all_from_document(&self, doc_path: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let count = Self::unlink_all_from_document_tx(&mut *tx, doc_path).await?;
        tx.commit().await?;
        Ok(count)
    }

    pub async fn unlink_all_from_document_tx(
        conn: &mut SqliteConnection,
        doc_path: &str,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM doc_asset WHERE path = ?")
            .bind(doc_path)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Assets a document references, newest first
    pub async fn get_document_assets(&self, doc_path: &str) -> Result<Vec<Asset>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_document_assets_tx(&mut *conn, doc_path).await
    }

    pub async fn get_document_assets_tx(
        conn: &mut SqliteConnection,
        doc_path: &str,
    ) -> Result<Vec<Asset>> {
        let rows = sqlx::query(
            "SELECT a.hash, a.alias, a.ext, a.bytes, a.mime, a.created_at
             FROM asset a
             JOIN doc_asset da ON da.hash = a.hash
             WHERE da.path = ?
             ORDER BY a.created_at DESC",
        )
        .bind(doc_path)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(asset_from_row).collect()
    }

    /// Assets with no links whose `created_at` is past the grace window
    pub async fn get_orphaned_assets(&self) -> Result<Vec<Asset>> {
        let cutoff = self.clock.now() - self.orphan_grace;
        let mut conn = self.pool.acquire().await?;
        Self::get_orphaned_assets_tx(&mut *conn, cutoff).await
    }

    pub async fn get_orphaned_assets_tx(
        conn: &mut SqliteConnection,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Asset>> {
        // RFC3339 UTC strings with fixed nanosecond precision compare
        // lexicographically, so the cutoff can be bound as text.
        let rows = sqlx::query(
            "SELECT a.hash, a.alias, a.ext, a.bytes, a.mime, a.created_at
             FROM asset a
             LEFT JOIN doc_asset da ON da.hash = a.hash
             WHERE da.hash IS NULL AND a.created_at < ?
             ORDER BY a.created_at ASC",
        )
        .bind(format_timestamp(&cutoff))
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(asset_from_row).collect()
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn asset_from_row(row: &SqliteRow) -> Result<Asset> {
    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Database {
            msg: format!("invalid created_at in asset row: {}", e),
        })?
        .with_timezone(&Utc);

    Ok(Asset {
        hash: row.get("hash"),
        alias: row.get("alias"),
        ext: row.get("ext"),
        bytes: row.get::<i64, _>("bytes") as u64,
        mime: row.get("mime"),
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};

    async fn make_store() -> AssetStore {
        // A single connection keeps the in-memory database shared
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        AssetStore::with_pool(pool, Arc::new(SystemClock))
    }

    async fn make_store_with_clock(clock: ManualClock) -> AssetStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        AssetStore::with_pool(pool, Arc::new(clock))
    }

    fn make_asset(fill: u8, created_at: DateTime<Utc>) -> Asset {
        Asset {
            hash: format!("{:02x}", fill).repeat(32),
            alias: "@proj".to_string(),
            ext: ".png".to_string(),
            bytes: 42,
            mime: "image/png".to_string(),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_upsert_reports_existed_and_preserves_created_at() {
        let store = make_store().await;
        let original = make_asset(0xab, Utc::now());

        assert!(!store.upsert(&original).await.unwrap());

        // Re-upload of the same content under a new name in another project
        let mut renamed = original.clone();
        renamed.alias = "@other".to_string();
        renamed.ext = ".jpg".to_string();
        renamed.mime = "image/jpeg".to_string();
        renamed.created_at = original.created_at + chrono::Duration::hours(1);

        assert!(store.upsert(&renamed).await.unwrap());

        let stored = store.get_by_hash(&original.hash).await.unwrap();
        assert_eq!(stored.alias, "@other");
        assert_eq!(stored.ext, ".jpg");
        assert_eq!(stored.mime, "image/jpeg");
        assert_eq!(stored.created_at, original.created_at);
    }

    #[tokio::test]
    async fn test_upsert_validates_first() {
        let store = make_store().await;
        let mut bad = make_asset(0x01, Utc::now());
        bad.bytes = 0;
        assert!(matches!(
            store.upsert(&bad).await,
            Err(Error::EmptyData)
        ));
    }

    #[tokio::test]
    async fn test_get_and_delete_missing() {
        let store = make_store().await;
        let hash = "0f".repeat(32);

        assert!(matches!(
            store.get_by_hash(&hash).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            store.delete(&hash).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_link_is_idempotent_and_unlink_removes() {
        let store = make_store().await;
        let asset = make_asset(0x11, Utc::now());
        store.upsert(&asset).await.unwrap();

        store.link_to_document(&asset.hash, "notes/a.md").await.unwrap();
        store.link_to_document(&asset.hash, "notes/a.md").await.unwrap();

        let linked = store.get_document_assets("notes/a.md").await.unwrap();
        assert_eq!(linked.len(), 1);

        store
            .unlink_from_document(&asset.hash, "notes/a.md")
            .await
            .unwrap();
        assert!(store.get_document_assets("notes/a.md").await.unwrap().is_empty());

        assert!(matches!(
            store.unlink_from_document(&asset.hash, "notes/a.md").await,
            Err(Error::LinkNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_unlink_all_counts_rows() {
        let store = make_store().await;
        let a = make_asset(0x21, Utc::now());
        let b = make_asset(0x22, Utc::now());
        store.upsert(&a).await.unwrap();
        store.upsert(&b).await.unwrap();

        store.link_to_document(&a.hash, "doc.md").await.unwrap();
        store.link_to_document(&b.hash, "doc.md").await.unwrap();

        assert_eq!(store.unlink_all_from_document("doc.md").await.unwrap(), 2);
        // Second pass removes nothing and is not an error
        assert_eq!(store.unlink_all_from_document("doc.md").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_document_assets_newest_first() {
        let store = make_store().await;
        let t0 = Utc::now();

        let older = make_asset(0x31, t0 - chrono::Duration::hours(2));
        let newer = make_asset(0x32, t0);
        store.upsert(&older).await.unwrap();
        store.upsert(&newer).await.unwrap();
        store.link_to_document(&older.hash, "doc.md").await.unwrap();
        store.link_to_document(&newer.hash, "doc.md").await.unwrap();

        let assets = store.get_document_assets("doc.md").await.unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].hash, newer.hash);
        assert_eq!(assets[1].hash, older.hash);
    }

    #[tokio::test]
    async fn test_orphans_respect_grace_window() {
        let clock = ManualClock::new(Utc::now());
        let store = make_store_with_clock(clock.clone()).await;

        let orphan = make_asset(0x41, clock.now());
        let linked = make_asset(0x42, clock.now());
        store.upsert(&orphan).await.unwrap();
        store.upsert(&linked).await.unwrap();
        store.link_to_document(&linked.hash, "doc.md").await.unwrap();

        // Inside the grace window the fresh upload is protected
        assert!(store.get_orphaned_assets().await.unwrap().is_empty());

        clock.advance(chrono::Duration::minutes(6));

        let orphans = store.get_orphaned_assets().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].hash, orphan.hash);
    }

    #[tokio::test]
    async fn test_delete_cascades_links() {
        let store = make_store().await;
        let asset = make_asset(0x51, Utc::now());
        store.upsert(&asset).await.unwrap();
        store.link_to_document(&asset.hash, "doc.md").await.unwrap();

        store.delete(&asset.hash).await.unwrap();
        assert!(store.get_document_assets("doc.md").await.unwrap().is_empty());
    }
}
