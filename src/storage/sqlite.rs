//! Embedded SQLite storage backend.
//!
//! One table holds the whole bucket:
//!
//! ```text
//! tickets(key TEXT PRIMARY KEY, value TEXT NOT NULL)  -- WITHOUT ROWID
//! ```
//!
//! The writer connection sits behind a mutex, so write transactions are
//! serialized. Reads open their own read-only connection and run inside a
//! read transaction; with the WAL journal they see a consistent snapshot
//! while a writer commits.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use crate::error::{AppError, Result};
use crate::models::Ticket;
use crate::storage::{TicketScan, TicketStorage};

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    CREATE TABLE IF NOT EXISTS tickets (
        key   TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    ) WITHOUT ROWID;
";

const UPSERT: &str = "
    INSERT INTO tickets (key, value) VALUES (?1, ?2)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value
";

/// Ticket store backed by a single SQLite file.
pub struct SqliteStore {
    path: PathBuf,
    writer: Mutex<Connection>,
    scan_batch: usize,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    ///
    /// `scan_batch` is the number of records fetched per round trip by
    /// [`TicketStorage::get_all`].
    pub fn open(path: impl AsRef<Path>, scan_batch: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .map_err(|e| AppError::store(format!("could not open {}: {e}", path.display())))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;

        log::debug!("Opened ticket store at {}", path.display());

        Ok(Self {
            path,
            writer: Mutex::new(conn),
            scan_batch: scan_batch.max(1),
        })
    }

    /// Open a fresh read-only connection.
    fn reader(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn count_with(conn: &Connection) -> Result<usize> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tickets", [], |row| row.get(0))?;
        usize::try_from(count)
            .map_err(|_| AppError::store(format!("record count '{count}' is not representable")))
    }

    fn decode(key: &str, value: &str) -> Result<Ticket> {
        serde_json::from_str(value).map_err(|e| AppError::decode(format!("record {key}: {e}")))
    }
}

impl TicketStorage for SqliteStore {
    fn put(&self, tickets: &[Ticket]) -> Result<usize> {
        if tickets.is_empty() {
            return Ok(0);
        }

        // Encode before taking the lock so a bad record fails the batch early.
        let mut encoded = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            if ticket.key.is_empty() {
                return Err(AppError::validation("ticket key must not be empty"));
            }
            encoded.push((ticket.key.as_str(), serde_json::to_string(ticket)?));
        }

        let mut conn = self
            .writer
            .lock()
            .map_err(|_| AppError::store("writer connection lock poisoned"))?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT)?;
            for (key, value) in &encoded {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;

        Ok(encoded.len())
    }

    fn get_by_key(&self, key: &str) -> Result<Option<Ticket>> {
        let conn = self.reader()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM tickets WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        value.map(|v| Self::decode(key, &v)).transpose()
    }

    fn get_all(&self) -> Result<TicketScan<'_>> {
        let conn = self.reader()?;
        Ok(Box::new(TicketIter::new(conn, self.scan_batch)?))
    }

    fn slice(&self, low: i64, high: i64) -> Result<Vec<Ticket>> {
        let mut conn = self.reader()?;
        let tx = conn.transaction()?;
        let count = Self::count_with(&tx)?;

        let out_of_range = |bound: i64| usize::try_from(bound).map_or(true, |b| b > count);
        if low >= high || out_of_range(low) || out_of_range(high) {
            return Err(AppError::Range { low, high, count });
        }

        let mut stmt =
            tx.prepare("SELECT key, value FROM tickets ORDER BY key LIMIT ?1 OFFSET ?2")?;
        let rows = stmt.query_map(params![high - low, low], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut tickets = Vec::with_capacity((high - low) as usize);
        for row in rows {
            let (key, value) = row?;
            tickets.push(Self::decode(&key, &value)?);
        }
        Ok(tickets)
    }

    fn count(&self) -> Result<usize> {
        Self::count_with(&self.reader()?)
    }
}

/// Batched key-order scan over one read snapshot.
///
/// The snapshot is held for the lifetime of the iterator and released on
/// drop. A scan cannot be rewound; call `get_all` again for a new one.
pub struct TicketIter {
    conn: Connection,
    batch: usize,
    last_key: String,
    buffer: VecDeque<(String, String)>,
    exhausted: bool,
}

impl TicketIter {
    fn new(conn: Connection, batch: usize) -> Result<Self> {
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(Self {
            conn,
            batch,
            last_key: String::new(),
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    fn refill(&mut self) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, value FROM tickets WHERE key > ?1 ORDER BY key LIMIT ?2")?;
        let after = self.last_key.clone();
        let rows = stmt.query_map(params![after, self.batch as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut fetched = 0;
        for row in rows {
            let (key, value) = row?;
            self.last_key.clone_from(&key);
            self.buffer.push_back((key, value));
            fetched += 1;
        }
        if fetched < self.batch {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for TicketIter {
    type Item = Result<Ticket>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.refill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        let (key, value) = self.buffer.pop_front()?;
        Some(SqliteStore::decode(&key, &value))
    }
}
