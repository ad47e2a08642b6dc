//! Database module for tempbox.
//!
//! Two physical SQLite stores back the system: the **active** store
//! (read-write, migrated, authoritative for new data) and an optional
//! **historical** store (frozen, opened read-only, never migrated).
//! Both are explicit objects created once at startup and handed to the
//! components that need them; see [`Stores`].

mod merger;
mod retry;
mod schema;

pub use merger::{DualStoreMerger, Record};
pub use retry::{with_retry, RetryPolicy};
pub use schema::MIGRATIONS;

use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::{Config, DatabaseConfig};
use crate::{Result, TempboxError};

/// Connection pool type used by all repositories.
pub type DbPool = SqlitePool;

/// Options shared by every store opened by the process.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// SQLite busy timeout.
    pub busy_timeout: Duration,
    /// Retry policy for transient errors.
    pub retry: RetryPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl StoreOptions {
    /// Build store options from the application configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.database, RetryPolicy::from(&config.retry))
    }

    fn new(database: &DatabaseConfig, retry: RetryPolicy) -> Self {
        Self {
            max_connections: database.max_connections.max(1),
            busy_timeout: Duration::from_millis(database.busy_timeout_ms),
            retry,
        }
    }
}

/// Database wrapper owning a SQLite connection pool.
pub struct Database {
    pool: DbPool,
    retry: RetryPolicy,
    read_only: bool,
}

impl Database {
    /// Open (or create) a read-write database at the specified path.
    ///
    /// Parent directories are created and pending migrations applied.
    pub async fn open(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening active database at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connect = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect)
            .await
            .map_err(|e| TempboxError::DatabaseConnection(e.to_string()))?;

        let db = Self {
            pool,
            retry: options.retry,
            read_only: false,
        };
        db.migrate().await?;

        Ok(db)
    }

    /// Open an existing database read-only.
    ///
    /// Returns `Ok(None)` when the file does not exist. No migrations are run.
    pub async fn open_read_only(
        path: impl AsRef<Path>,
        options: &StoreOptions,
    ) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            info!("Historical database {:?} does not exist, skipping", path);
            return Ok(None);
        }
        info!("Opening historical database at {:?} (read-only)", path);

        let connect = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect)
            .await
            .map_err(|e| TempboxError::DatabaseConnection(e.to_string()))?;

        Ok(Some(Self {
            pool,
            retry: options.retry,
            read_only: true,
        }))
    }

    /// Open a migrated in-memory database for testing.
    ///
    /// The pool holds a single connection that is never recycled, since an
    /// in-memory SQLite database lives only as long as its connection.
    pub async fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory database");
        let connect = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| TempboxError::DatabaseConnection(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect)
            .await
            .map_err(|e| TempboxError::DatabaseConnection(e.to_string()))?;

        let db = Self {
            pool,
            retry: RetryPolicy::default(),
            read_only: false,
        };
        db.migrate().await?;

        Ok(db)
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Whether the store was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Run a store operation under this store's retry policy.
    pub async fn with_retry<T, F, Fut>(&self, op: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry::with_retry(&self.retry, op, f).await
    }

    /// Close all pooled connections.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the current schema version.
    pub async fn schema_version(&self) -> Result<i64> {
        if !self.table_exists("schema_version").await? {
            return Ok(0);
        }

        let version: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&self.pool)
                .await?;

        Ok(version)
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        let current_version = self.schema_version().await?;
        let migrations = MIGRATIONS;

        if current_version as usize >= migrations.len() {
            debug!("Database is up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating database from version {} to {}",
            current_version,
            migrations.len()
        );

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version     INTEGER PRIMARY KEY,
                applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        for (i, migration) in migrations.iter().enumerate().skip(current_version as usize) {
            let version = (i + 1) as i64;
            info!("Applying migration v{}", version);

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(migration).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            debug!("Migration v{} applied successfully", version);
        }

        info!(
            "Database migration complete (now at version {})",
            migrations.len()
        );
        Ok(())
    }

    /// Check if a table exists.
    pub async fn table_exists(&self, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
        )
        .bind(table_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// The pair of physical stores the process works with.
#[derive(Debug)]
pub struct Stores {
    active: Database,
    historical: Option<Database>,
}

impl Stores {
    /// Wrap already-opened stores.
    pub fn new(active: Database, historical: Option<Database>) -> Self {
        Self { active, historical }
    }

    /// Open both stores according to the configuration.
    ///
    /// A historical store that is missing or fails to open is logged and
    /// skipped; the process then runs on the active store alone.
    pub async fn open(config: &Config) -> Result<Self> {
        let options = StoreOptions::from_config(config);
        let active = Database::open(&config.database.active_path, &options).await?;

        let historical = match &config.database.historical_path {
            Some(path) => match Database::open_read_only(path, &options).await {
                Ok(db) => db,
                Err(e) => {
                    warn!("Historical database unavailable, continuing without it: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Self::new(active, historical))
    }

    /// The active (read-write) store.
    pub fn active(&self) -> &Database {
        &self.active
    }

    /// The historical (read-only) store, if any.
    pub fn historical(&self) -> Option<&Database> {
        self.historical.as_ref()
    }

    /// A merged view over both stores.
    pub fn merger(&self) -> DualStoreMerger<'_> {
        DualStoreMerger::new(&self.active, self.historical.as_ref())
    }

    /// Close both stores.
    pub async fn close(self) {
        if let Some(historical) = self.historical {
            historical.close().await;
        }
        self.active.close().await;
        info!("Stores closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap() as usize, MIGRATIONS.len());
        assert!(!db.is_read_only());
    }

    #[tokio::test]
    async fn test_tables_exist() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(db.table_exists("addresses").await.unwrap());
        assert!(db.table_exists("messages").await.unwrap());
        assert!(db.table_exists("spam_rules").await.unwrap());
        assert!(db.table_exists("tombstones").await.unwrap());
        assert!(db.table_exists("schema_version").await.unwrap());
        assert!(!db.table_exists("nonexistent").await.unwrap());
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let db = Database::open_in_memory().await.unwrap();
        let fk_enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(fk_enabled, 1);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap() as usize, MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_open_file_database_and_reopen_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("active.db");
        let options = StoreOptions::default();

        {
            let db = Database::open(&path, &options).await.unwrap();
            assert!(db.table_exists("addresses").await.unwrap());
            db.close().await;
        }

        let reopened = Database::open_read_only(&path, &options)
            .await
            .unwrap()
            .expect("file exists");
        assert!(reopened.is_read_only());
        assert_eq!(
            reopened.schema_version().await.unwrap() as usize,
            MIGRATIONS.len()
        );

        let write = sqlx::query("DELETE FROM addresses")
            .execute(reopened.pool())
            .await;
        assert!(write.is_err());
    }

    #[tokio::test]
    async fn test_open_read_only_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        let db = Database::open_read_only(&path, &StoreOptions::default())
            .await
            .unwrap();
        assert!(db.is_none());
    }

    #[tokio::test]
    async fn test_stores_open_without_historical() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.active_path = dir.path().join("a.db").to_string_lossy().into_owned();
        config.database.historical_path =
            Some(dir.path().join("gone.db").to_string_lossy().into_owned());

        let stores = Stores::open(&config).await.unwrap();
        assert!(stores.historical().is_none());
        stores.close().await;
    }
}
