use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::ConnectOptions;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::error::{StorageError, StorageResult};

/// Where the gateway database lives and how its pool behaves
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite file; parent directories are created on open
    pub path: PathBuf,

    pub max_connections: u32,

    /// Idle connections kept open
    pub min_connections: u32,

    /// How long a writer waits for a locked database
    pub busy_timeout: Duration,

    /// How long a caller waits for a free pooled connection
    pub acquire_timeout: Duration,

    /// Recycle pooled connections after this long
    pub max_lifetime: Duration,

    pub create_if_missing: bool,

    /// Apply pending migrations on open
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("attractap.db"),
            max_connections: 10,
            min_connections: 2,
            busy_timeout: Duration::from_secs(10),
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(30 * 60),
            create_if_missing: true,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn auto_migrate(mut self, migrate: bool) -> Self {
        self.auto_migrate = migrate;
        self
    }

    /// Connection options for a file database: WAL journal, foreign keys on.
    fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(self.create_if_missing)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.busy_timeout)
            .disable_statement_logging()
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .max_lifetime(Some(self.max_lifetime))
    }
}

/// Pooled SQLite database holding readers, cards, users and usage
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the database described by `config`.
    ///
    /// ```no_run
    /// use attractap_storage::connection::{Database, DatabaseConfig};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = Database::new(DatabaseConfig::new("data/attractap.db").max_connections(4)).await?;
    /// db.health_check().await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// [`StorageError::Configuration`] when the parent directory cannot be
    /// created, database or migration errors otherwise.
    pub async fn new(config: DatabaseConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::Configuration(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let pool = config
            .pool_options()
            .connect_with(config.connect_options())
            .await?;
        let db = Self { pool };

        if config.auto_migrate {
            db.migrate().await?;
        }

        tracing::info!(path = %config.path.display(), "database ready");
        Ok(db)
    }

    /// Migrated database that lives as long as the pool.
    ///
    /// The pool holds a single connection, since every SQLite memory
    /// connection would otherwise see its own empty database.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply the migrations embedded from the workspace `migrations/` directory.
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool once checked-out connections come back.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
