pub mod migrations;
pub mod models;
pub mod store;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::StoreError;

pub use store::{SqliteStore, Store};

/// Type alias for the shared database connection.
/// rusqlite is synchronous, so it sits in Arc<Mutex> and every call goes
/// through tokio::task::spawn_blocking.
pub type DbPool = Arc<Mutex<Connection>>;

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, StoreError> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("gateway.db");
    let mut conn = Connection::open(&db_path)?;

    // WAL for concurrent readers
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Open a fresh in-memory database with the full schema applied.
pub fn init_memory_db() -> Result<DbPool, StoreError> {
    let mut conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrations::migrations().to_latest(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}
