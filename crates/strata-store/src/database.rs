//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. Typed CRUD helpers live on
//! [`Tables`], which borrows either the plain connection or an open
//! [`StoreTxn`], so the same code serves one-off reads and the single
//! transaction a sync payload is applied in.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use directories::ProjectDirs;
use rusqlite::{Connection, Transaction};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

/// The handle shared by the sync handler, the crypto service and the loop.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Lock a shared database. A panic while holding the lock unwinds any open
/// [`StoreTxn`], which rolls back, so the connection is still usable.
pub fn lock(db: &SharedDatabase) -> MutexGuard<'_, Database> {
    db.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Database {
    /// Open (or create) the default database in the platform data directory:
    /// - Linux:   `~/.local/share/strata/strata.db`
    /// - macOS:   `~/Library/Application Support/org.strata.strata/strata.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\strata\strata\data\strata.db`
    pub fn new() -> Result<Self> {
        let db_path = Self::default_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("org", "strata", "strata").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("strata.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// A private in-memory database, used by tests and ephemeral sessions.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Typed helpers over the plain connection. Each statement autocommits.
    pub fn tables(&self) -> Tables<'_> {
        Tables { conn: &self.conn }
    }

    /// Begin a transaction. Dropping the returned value without calling
    /// [`StoreTxn::commit`] rolls every write back.
    pub fn transaction(&mut self) -> Result<StoreTxn<'_>> {
        Ok(StoreTxn {
            txn: self.conn.transaction()?,
        })
    }

    pub fn into_shared(self) -> SharedDatabase {
        Arc::new(Mutex::new(self))
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

/// An open write transaction.
pub struct StoreTxn<'a> {
    txn: Transaction<'a>,
}

impl<'a> StoreTxn<'a> {
    pub fn tables(&self) -> Tables<'_> {
        Tables { conn: &self.txn }
    }

    pub fn commit(self) -> Result<()> {
        self.txn.commit()?;
        Ok(())
    }
}

/// Typed table access over a borrowed connection.
#[derive(Clone, Copy)]
pub struct Tables<'c> {
    pub(crate) conn: &'c Connection,
}

impl<'c> Deref for Tables<'c> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
    }
}
