// Storage schema and database management

use rusqlite::{Connection, OpenFlags, Params, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised by the relational store adapter
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be opened (missing file, permissions, bad locator)
    #[error("Cannot open store at '{locator}': {reason}")]
    Connection {
        /// Locator that was being opened
        locator: String,
        /// Engine or validation message
        reason: String,
    },

    /// A statement was invalid or violated a constraint
    #[error("Query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Whether to enable WAL mode
    pub wal_enabled: bool,

    /// Cache size in pages
    pub cache_size_pages: Option<usize>,

    /// How long to wait on a locked database before failing
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            wal_enabled: false,
            cache_size_pages: Some(2000),
            busy_timeout_ms: 5000,
        }
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS experiments (
        experimentid INTEGER PRIMARY KEY,
        name TEXT UNIQUE NOT NULL,
        description TEXT
    )",
    "CREATE TABLE IF NOT EXISTS members (
        memberid INTEGER PRIMARY KEY,
        experiment INTEGER NOT NULL REFERENCES experiments(experimentid),
        position INTEGER NOT NULL,
        handle TEXT NOT NULL,
        model TEXT,
        perturbation TEXT,
        initialization_time INTEGER,
        forecast_hour INTEGER,
        UNIQUE(experiment, handle)
    )",
    "CREATE TABLE IF NOT EXISTS analyses (
        analysis INTEGER PRIMARY KEY,
        experiment INTEGER NOT NULL REFERENCES experiments(experimentid),
        name TEXT NOT NULL,
        description TEXT,
        operation TEXT NOT NULL,
        parameters TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS analysis_results (
        analysis INTEGER NOT NULL REFERENCES analyses(analysis),
        member INTEGER NOT NULL REFERENCES members(memberid),
        position INTEGER NOT NULL,
        input_handle TEXT NOT NULL,
        output_handle TEXT NOT NULL,
        metrics TEXT,
        PRIMARY KEY(analysis, position)
    )",
    "CREATE INDEX IF NOT EXISTS idx_members_experiment ON members(experiment, position)",
    "CREATE INDEX IF NOT EXISTS idx_analyses_experiment ON analyses(experiment)",
];

/// Connection to the metadata database.
///
/// One `Store` is opened per run and dropped when the run ends; dropping it
/// closes the underlying SQLite handle.
pub struct Store {
    conn: Connection,
    path: PathBuf,
    config: StoreConfig,
}

impl Store {
    /// Open an existing store. Never creates the database file.
    pub fn connect<P: AsRef<Path>>(locator: P, config: StoreConfig) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Self::open_with_flags(locator.as_ref(), flags, config)
    }

    /// Open (creating if needed) a store and provision the fixed schema.
    pub fn create<P: AsRef<Path>>(locator: P, config: StoreConfig) -> Result<Self> {
        let store = Self::open_with_flags(locator.as_ref(), OpenFlags::default(), config)?;
        store.initialize_schema()?;
        Ok(store)
    }

    fn open_with_flags(path: &Path, flags: OpenFlags, config: StoreConfig) -> Result<Self> {
        let locator = path.to_string_lossy().to_string();
        let connection_error = |reason: String| StoreError::Connection {
            locator: locator.clone(),
            reason,
        };

        if locator.trim().is_empty() {
            return Err(connection_error("empty locator".to_string()));
        }

        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| connection_error(e.to_string()))?;

        // SQLite opens lazily; touching the catalog surfaces non-database files here.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| connection_error(e.to_string()))?;

        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| connection_error(e.to_string()))?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| connection_error(e.to_string()))?;

        if config.wal_enabled {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| connection_error(e.to_string()))?;
        }

        if let Some(cache_size) = config.cache_size_pages {
            conn.pragma_update(None, "cache_size", cache_size)
                .map_err(|e| connection_error(e.to_string()))?;
        }

        debug!(locator = %locator, "store opened");

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            config,
        })
    }

    /// Initialize database schema
    pub fn initialize_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            self.conn.execute(statement, [])?;
        }
        Ok(())
    }

    /// Execute a parameterized statement, returning the number of changed rows
    pub fn execute<P: Params>(&self, statement: &str, params: P) -> Result<usize> {
        Ok(self.conn.execute(statement, params)?)
    }

    /// Run a parameterized query and map every row
    pub fn query<T, P, F>(&self, statement: &str, params: P, map: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(statement)?;
        let rows = stmt
            .query_map(params, map)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Begin a transaction; it rolls back unless committed
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Get the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Path of the backing database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory that member handles are resolved against
    pub fn base_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}
