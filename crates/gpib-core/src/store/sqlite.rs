//! SQLite-backed instrument store.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::capability::CapabilityRegistry;
use crate::config::StoreConfig;
use crate::error::{GpibError, Result};
use crate::models::{Instrument, InstrumentConfig, InstrumentId, InstrumentPatch};

const SELECT_COLUMNS: &str = "SELECT id, name, type, gpib_address, description, auto_connect,
        measurement_type, \"range\", resolution, created_at, updated_at
     FROM instruments";

/// Where the store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

impl DatabaseLocation {
    /// Parse a connection string.
    ///
    /// Accepts `sqlite://<path>`, `sqlite::memory:`, `:memory:` or a bare path.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(GpibError::Config {
                message: "database URL is empty".to_string(),
            });
        }
        if StoreConfig::MEMORY_URLS.contains(&url) {
            return Ok(DatabaseLocation::Memory);
        }
        if let Some(path) = url.strip_prefix(StoreConfig::SQLITE_SCHEME) {
            return Ok(DatabaseLocation::File(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = url.split_once("://") {
            return Err(GpibError::Config {
                message: format!("unsupported database scheme '{}': only sqlite is available", scheme),
            });
        }
        Ok(DatabaseLocation::File(PathBuf::from(url)))
    }
}

/// Durable CRUD over instrument records.
///
/// Uses `Arc<Mutex<Connection>>` for thread safety; the lock is held for one
/// read-modify-write at a time, which makes `update` atomic.
#[derive(Clone)]
pub struct InstrumentStore {
    conn: Arc<Mutex<Connection>>,
    registry: Arc<CapabilityRegistry>,
}

impl InstrumentStore {
    /// Open the store from a connection string.
    pub fn open(database_url: &str, registry: Arc<CapabilityRegistry>) -> Result<Self> {
        match DatabaseLocation::parse(database_url)? {
            DatabaseLocation::Memory => Self::open_in_memory(registry),
            DatabaseLocation::File(path) => Self::open_at(&path, registry),
        }
    }

    /// Open the store at a specific path.
    ///
    /// Creates the database and parent directories if they don't exist.
    pub fn open_at(db_path: &Path, registry: Arc<CapabilityRegistry>) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| GpibError::io_with_path(e, parent))?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA busy_timeout={};\n\
             PRAGMA synchronous=NORMAL;",
            StoreConfig::BUSY_TIMEOUT_MS,
        ))?;
        Self::ensure_schema(&conn)?;
        debug!("Opened instrument store at {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            registry,
        })
    }

    pub fn open_in_memory(registry: Arc<CapabilityRegistry>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            registry,
        })
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS instruments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                gpib_address INTEGER NOT NULL,
                description TEXT,
                auto_connect INTEGER NOT NULL DEFAULT 0,
                measurement_type TEXT NOT NULL DEFAULT 'DC_VOLTAGE',
                \"range\" TEXT NOT NULL DEFAULT 'AUTO',
                resolution TEXT NOT NULL DEFAULT '6.5',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_instruments_name ON instruments(name);",
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| GpibError::Database {
            message: "Failed to acquire instrument store lock".to_string(),
            source: None,
        })
    }

    // ========================================
    // Instrument CRUD
    // ========================================

    /// List all instruments in insertion order.
    pub fn list(&self) -> Result<Vec<Instrument>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))?;
        let rows = stmt.query_map([], instrument_from_row)?;

        let mut instruments = Vec::new();
        for row in rows {
            instruments.push(row?);
        }
        Ok(instruments)
    }

    /// Instruments flagged for connection at startup.
    pub fn list_auto_connect(&self) -> Result<Vec<Instrument>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE auto_connect = 1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map([], instrument_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(GpibError::from)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM instruments", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn get(&self, id: InstrumentId) -> Result<Instrument> {
        let conn = self.lock_conn()?;
        Self::fetch(&conn, id)?.ok_or(GpibError::NotFound { id })
    }

    fn fetch(conn: &Connection, id: InstrumentId) -> Result<Option<Instrument>> {
        let instrument = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                instrument_from_row,
            )
            .optional()?;
        Ok(instrument)
    }

    /// Validate and insert a new instrument.
    pub fn create(&self, patch: InstrumentPatch) -> Result<Instrument> {
        let config = patch.into_new_config(&self.registry)?;
        let now = Utc::now();
        let stamp = now.to_rfc3339();

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO instruments (name, type, gpib_address, description, auto_connect,
                 measurement_type, \"range\", resolution, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                config.name,
                config.model,
                config.gpib_address,
                config.description,
                config.auto_connect,
                config.measurement_type.as_str(),
                config.range.as_db_string(),
                config.resolution.as_db_string(),
                stamp,
                stamp,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Created instrument {} ({})", id, config.name);

        Ok(Instrument {
            id,
            config,
            created_at: now,
            updated_at: now,
        })
    }

    /// Merge a patch onto an existing instrument.
    ///
    /// On validation failure the stored record is left unchanged.
    pub fn update(&self, id: InstrumentId, patch: InstrumentPatch) -> Result<Instrument> {
        let conn = self.lock_conn()?;
        let current = Self::fetch(&conn, id)?.ok_or(GpibError::NotFound { id })?;
        let config = patch.apply_to(&current.config, &self.registry)?;
        let updated_at = Utc::now().max(current.created_at);

        conn.execute(
            "UPDATE instruments SET name = ?1, type = ?2, gpib_address = ?3, description = ?4,
                 auto_connect = ?5, measurement_type = ?6, \"range\" = ?7, resolution = ?8,
                 updated_at = ?9
             WHERE id = ?10",
            params![
                config.name,
                config.model,
                config.gpib_address,
                config.description,
                config.auto_connect,
                config.measurement_type.as_str(),
                config.range.as_db_string(),
                config.resolution.as_db_string(),
                updated_at.to_rfc3339(),
                id,
            ],
        )?;
        debug!("Updated instrument {}", id);

        Ok(Instrument {
            id,
            config,
            created_at: current.created_at,
            updated_at,
        })
    }

    pub fn delete(&self, id: InstrumentId) -> Result<()> {
        let conn = self.lock_conn()?;
        let rows = conn.execute("DELETE FROM instruments WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(GpibError::NotFound { id });
        }
        debug!("Deleted instrument {}", id);
        Ok(())
    }
}

fn conversion_error<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn parse_column<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(index)?;
    text.parse::<T>().map_err(|e| conversion_error(index, e))
}

fn timestamp_column(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, e))
}

fn instrument_from_row(row: &Row<'_>) -> rusqlite::Result<Instrument> {
    Ok(Instrument {
        id: row.get(0)?,
        config: InstrumentConfig {
            name: row.get(1)?,
            model: row.get(2)?,
            gpib_address: row.get(3)?,
            description: row.get(4)?,
            auto_connect: row.get(5)?,
            measurement_type: parse_column(row, 6)?,
            range: parse_column(row, 7)?,
            resolution: parse_column(row, 8)?,
        },
        created_at: timestamp_column(row, 9)?,
        updated_at: timestamp_column(row, 10)?,
    })
}
