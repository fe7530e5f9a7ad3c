//! Database module for the SQLite instrument and bar cache

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{TradingError, TradingResult};

pub mod bar_service;
pub mod bars;
pub mod instruments;

pub use bar_service::BarService;
pub use bars::BarCache;
pub use instruments::InstrumentStore;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Shared SQLite connection
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file, creating its directory if needed
    pub fn new<P: AsRef<Path>>(path: P) -> TradingResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| TradingError::FileWrite(e.to_string()))?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing)
    pub fn new_in_memory() -> TradingResult<Self> {
        let conn = Connection::open_in_memory()?;

        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Apply embedded migrations from `migrations/`
    pub fn run_migrations(&self) -> TradingResult<()> {
        let mut conn = self.lock()?;
        let report = embedded::migrations::runner().run(&mut *conn)?;
        for migration in report.applied_migrations() {
            tracing::info!("🗄️  Applied migration {}", migration);
        }
        Ok(())
    }

    pub(crate) fn lock(&self) -> TradingResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TradingError::Internal("database connection lock poisoned".to_string()))
    }

    /// Check database health
    pub fn health_check(&self) -> TradingResult<bool> {
        let conn = self.lock()?;
        let result: i32 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(result == 1)
    }
}
