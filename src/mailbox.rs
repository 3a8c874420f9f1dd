//! Mailbox Storage
//!
//! Durable key→payload-list store for payloads addressed to recipients with
//! no live verified connection. Entries are parked until the recipient next
//! identifies, then drained in one atomic fetch-and-clear.
//! Supports both in-memory (for testing) and SQLite (for production).

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};

use crate::error::StoreError;

/// A payload parked for an offline recipient.
///
/// The payload is an opaque string; the relay never parses it.
#[derive(Debug, Clone)]
pub struct MailboxEntry {
    pub payload: String,
    /// When the entry was stored (Unix timestamp in seconds).
    pub created_at_secs: u64,
}

impl MailboxEntry {
    pub fn new(payload: String) -> Self {
        let created_at_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        MailboxEntry {
            payload,
            created_at_secs,
        }
    }

    /// Checks if the entry has outlived its TTL.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let age = now.saturating_sub(self.created_at_secs);
        // Use >= so that a TTL of 0 means immediately expired
        age >= ttl.as_secs()
    }
}

/// Trait for mailbox storage backends.
///
/// `fetch_and_clear` is atomic per recipient key: no payload is ever
/// returned by two calls, and a failed call clears nothing.
pub trait MailboxStore: Send + Sync {
    /// Parks one payload for a recipient. Multiple stores for the same
    /// recipient accumulate as separate entries, in store order.
    fn store(&self, for_public_key: &str, payload: &str) -> Result<(), StoreError>;

    /// Drains all entries for a recipient, returning payloads in store
    /// order. All-or-nothing: on error, no entry has been cleared.
    fn fetch_and_clear(&self, for_public_key: &str) -> Result<Vec<String>, StoreError>;

    /// Removes all expired entries. Returns the number removed.
    fn cleanup_expired(&self, ttl: Duration) -> Result<usize, StoreError>;

    /// Total number of parked entries.
    fn entry_count(&self) -> usize;

    /// Number of recipients with parked entries.
    fn recipient_count(&self) -> usize;
}

// ============================================================================
// In-Memory Storage (for testing and development)
// ============================================================================

/// In-memory mailbox indexed by recipient public key.
pub struct MemoryMailboxStore {
    entries: RwLock<HashMap<String, VecDeque<MailboxEntry>>>,
}

impl MemoryMailboxStore {
    pub fn new() -> Self {
        MemoryMailboxStore {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryMailboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxStore for MemoryMailboxStore {
    fn store(&self, for_public_key: &str, payload: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap();
        entries
            .entry(for_public_key.to_string())
            .or_default()
            .push_back(MailboxEntry::new(payload.to_string()));
        Ok(())
    }

    fn fetch_and_clear(&self, for_public_key: &str) -> Result<Vec<String>, StoreError> {
        let mut entries = self.entries.write().unwrap();
        Ok(entries
            .remove(for_public_key)
            .map(|q| q.into_iter().map(|e| e.payload).collect())
            .unwrap_or_default())
    }

    fn cleanup_expired(&self, ttl: Duration) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().unwrap();
        let mut removed = 0;

        entries.retain(|_, queue| {
            let initial_len = queue.len();
            queue.retain(|e| !e.is_expired(ttl));
            removed += initial_len - queue.len();
            !queue.is_empty()
        });

        Ok(removed)
    }

    fn entry_count(&self) -> usize {
        let entries = self.entries.read().unwrap();
        entries.values().map(|q| q.len()).sum()
    }

    fn recipient_count(&self) -> usize {
        let entries = self.entries.read().unwrap();
        entries.len()
    }
}

// ============================================================================
// SQLite Storage (for production)
// ============================================================================

/// SQLite-backed persistent mailbox.
pub struct SqliteMailboxStore {
    conn: Mutex<Connection>,
}

impl SqliteMailboxStore {
    /// Opens or creates a SQLite database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // WAL allows readers and writers to operate concurrently
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS parcels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                for_public_key TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at_secs INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_parcels_recipient ON parcels(for_public_key)",
            [],
        )?;

        Ok(SqliteMailboxStore {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }
}

impl MailboxStore for SqliteMailboxStore {
    fn store(&self, for_public_key: &str, payload: &str) -> Result<(), StoreError> {
        let created_at_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO parcels (for_public_key, payload, created_at_secs)
             VALUES (?1, ?2, ?3)",
            params![for_public_key, payload, created_at_secs as i64],
        )?;
        Ok(())
    }

    fn fetch_and_clear(&self, for_public_key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        // One transaction so read and delete commit together: a failure
        // rolls back with every row still parked.
        let tx = conn.transaction()?;

        let payloads = {
            let mut stmt = tx.prepare(
                "SELECT payload FROM parcels WHERE for_public_key = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![for_public_key], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<String>, _>>()?
        };

        tx.execute(
            "DELETE FROM parcels WHERE for_public_key = ?1",
            params![for_public_key],
        )?;
        tx.commit()?;

        Ok(payloads)
    }

    fn cleanup_expired(&self, ttl: Duration) -> Result<usize, StoreError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let cutoff = now.saturating_sub(ttl.as_secs()) as i64;

        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM parcels WHERE created_at_secs <= ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    fn entry_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM parcels", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap_or(0) as usize
    }

    fn recipient_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(DISTINCT for_public_key) FROM parcels",
            [],
            |row| row.get::<_, i64>(0),
        )
        .unwrap_or(0) as usize
    }
}

// ============================================================================
// Storage Factory
// ============================================================================

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    /// In-memory storage (lost on restart).
    Memory,
    /// SQLite persistent storage.
    #[default]
    Sqlite,
}

/// Creates a mailbox store based on the backend type.
pub fn create_mailbox_store(
    backend: StorageBackend,
    data_dir: Option<&Path>,
) -> Result<Box<dyn MailboxStore>, StoreError> {
    match backend {
        StorageBackend::Memory => Ok(Box::new(MemoryMailboxStore::new())),
        StorageBackend::Sqlite => {
            let path = data_dir
                .map(|d| d.join("parcels.db"))
                .unwrap_or_else(|| std::path::PathBuf::from("parcels.db"));

            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }

            Ok(Box::new(SqliteMailboxStore::open(&path)?))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
