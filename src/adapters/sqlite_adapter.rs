//! SQLite key-value store backing the screening cache.

use crate::domain::error::LowvolError;
use crate::ports::cache_port::KeyValueStore;
use crate::ports::config_port::ConfigPort;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OptionalExtension, params};
use std::path::Path;
use tracing::debug;

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, LowvolError> {
        let db_path = config.require_string("cache", "path")?;
        let pool_size = config.get_int("cache", "pool_size", 4).clamp(1, 64) as u32;
        Self::open(Path::new(&db_path), pool_size)
    }

    pub fn open(path: &Path, pool_size: u32) -> Result<Self, LowvolError> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e: r2d2::Error| LowvolError::DatabaseQuery {
                reason: format!("{}: {}", path.display(), e),
            })?;
        let store = Self { pool };
        store.initialize_schema()?;
        debug!("cache store at {}", path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, LowvolError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| LowvolError::DatabaseQuery {
                reason: e.to_string(),
            })?;
        let store = Self { pool };
        store.initialize_schema()?;
        Ok(store)
    }

    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, LowvolError> {
        self.pool
            .get()
            .map_err(|e: r2d2::Error| LowvolError::DatabaseQuery {
                reason: e.to_string(),
            })
    }

    fn initialize_schema(&self) -> Result<(), LowvolError> {
        self.connection()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS cache (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );",
            )
            .map_err(|e: rusqlite::Error| LowvolError::DatabaseQuery {
                reason: e.to_string(),
            })
    }

    pub fn len(&self) -> Result<usize, LowvolError> {
        let count: i64 = self
            .connection()?
            .query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))
            .map_err(|e: rusqlite::Error| LowvolError::DatabaseQuery {
                reason: e.to_string(),
            })?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, LowvolError> {
        Ok(self.len()? == 0)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, LowvolError> {
        self.connection()?
            .query_row(
                "SELECT value FROM cache WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e: rusqlite::Error| LowvolError::DatabaseQuery {
                reason: e.to_string(),
            })
    }

    fn put(&self, key: &str, value: &str) -> Result<(), LowvolError> {
        self.connection()?
            .execute(
                "INSERT OR REPLACE INTO cache (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e: rusqlite::Error| LowvolError::DatabaseQuery {
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
