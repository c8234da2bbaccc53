use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior, params};
use serde_json::Value;
use tracing::{debug, info, trace};

use tether_session::{BackingStore, InsertOutcome, SessionState};

use crate::{Result, SqliteStoreError};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Default minimum time between two expiry sweeps of one application, across
/// all peers.
pub const DEFAULT_INVALIDATION_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// How session attributes are stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Layout {
    /// All attributes as one JSON document on the session row.
    #[default]
    SingleRow,
    /// One row per attribute; only changed attributes are written.
    MultiRow,
}

/// Relational backing store on SQLite.
///
/// Thread-safe via internal `Mutex<Connection>`. Several stores (in one or
/// more processes) may open the same database file and act as peers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    app_name: String,
    layout: Layout,
    invalidation_check_interval: Duration,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run pending migrations.
    pub fn open(path: &Path, app_name: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::with_connection(conn, app_name)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory(app_name: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, app_name)
    }

    fn with_connection(conn: Connection, app_name: &str) -> Result<Self> {
        let mut store = Self {
            conn: Mutex::new(conn),
            app_name: app_name.to_string(),
            layout: Layout::default(),
            invalidation_check_interval: DEFAULT_INVALIDATION_CHECK_INTERVAL,
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&mut self) -> Result<()> {
        let conn = self.conn.get_mut();
        embedded::migrations::runner()
            .run(conn)
            .map_err(|e| SqliteStoreError::Migration(e.to_string()))?;
        Ok(())
    }

    /// Set the attribute layout.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the minimum time between expiry sweeps of this application.
    pub fn with_invalidation_check_interval(mut self, interval: Duration) -> Self {
        self.invalidation_check_interval = interval;
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Number of stored sessions for this application.
    pub fn session_count(&self) -> Result<usize> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM sessions WHERE app_name = ?1",
            params![self.app_name],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    // ── Reads ───────────────────────────────────────────────────────

    fn read_session(&self, id: &str) -> Result<Option<SessionState>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT creation_time, last_access, max_inactive, attributes
                 FROM sessions WHERE id = ?1 AND app_name = ?2",
                params![id, self.app_name],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i32>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((creation_time, last_access, max_inactive, document)) = row else {
            return Ok(None);
        };

        let attributes = match self.layout {
            Layout::SingleRow => serde_json::from_str(&document)?,
            Layout::MultiRow => self.read_attribute_rows(&conn, id)?,
        };
        Ok(Some(SessionState::stored(
            creation_time,
            last_access,
            max_inactive,
            attributes,
        )))
    }

    fn read_attribute_rows(&self, conn: &Connection, id: &str) -> Result<HashMap<String, Value>> {
        let mut stmt =
            conn.prepare("SELECT name, value FROM session_attributes WHERE id = ?1 AND app_name = ?2")?;
        let rows = stmt.query_map(params![id, self.app_name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut attributes = HashMap::new();
        for row in rows {
            let (name, value) = row?;
            attributes.insert(name, serde_json::from_str(&value)?);
        }
        Ok(attributes)
    }

    fn session_exists(&self, id: &str) -> Result<bool> {
        Ok(self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ?1 AND app_name = ?2",
                params![id, self.app_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    // ── Writes ──────────────────────────────────────────────────────

    fn insert(&self, id: &str, state: &SessionState) -> Result<InsertOutcome> {
        let document = match self.layout {
            Layout::SingleRow => serde_json::to_string(&state.attributes)?,
            Layout::MultiRow => "{}".to_string(),
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT INTO sessions (id, app_name, creation_time, last_access, max_inactive, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                self.app_name,
                state.creation_time,
                state.last_access_time,
                state.max_inactive_secs,
                document
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                debug!(session_id = %id, "Session row already exists");
                return Ok(InsertOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        if self.layout == Layout::MultiRow {
            for (name, value) in &state.attributes {
                self.upsert_attribute(&tx, id, name, value)?;
            }
        }
        tx.commit()?;
        trace!(session_id = %id, "Inserted session row");
        Ok(InsertOutcome::Inserted)
    }

    fn persist(&self, id: &str, state: &mut SessionState, write_all: bool) -> Result<bool> {
        match self.layout {
            Layout::SingleRow => self.persist_single_row(id, state, write_all),
            Layout::MultiRow => self.persist_multi_row(id, state, write_all),
        }
    }

    fn persist_single_row(&self, id: &str, state: &SessionState, write_all: bool) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = if write_all {
            let document = serde_json::to_string(&state.attributes)?;
            conn.execute(
                "UPDATE sessions SET last_access = ?1, max_inactive = ?2, attributes = ?3
                 WHERE id = ?4 AND app_name = ?5",
                params![
                    state.last_access_time,
                    state.max_inactive_secs,
                    document,
                    id,
                    self.app_name
                ],
            )?
        } else {
            conn.execute(
                "UPDATE sessions SET last_access = ?1, max_inactive = ?2
                 WHERE id = ?3 AND app_name = ?4",
                params![state.last_access_time, state.max_inactive_secs, id, self.app_name],
            )?
        };
        Ok(rows > 0)
    }

    /// Write the session row, then only the attributes that changed (or all of
    /// them when nothing is tracked and `write_all` is set). Clears dirty
    /// tracking once committed.
    fn persist_multi_row(&self, id: &str, state: &mut SessionState, write_all: bool) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let rows = tx.execute(
            "UPDATE sessions SET last_access = ?1, max_inactive = ?2
             WHERE id = ?3 AND app_name = ?4",
            params![state.last_access_time, state.max_inactive_secs, id, self.app_name],
        )?;
        if rows == 0 {
            return Ok(false);
        }

        let names: Vec<&String> = if write_all && !state.is_dirty() {
            state.attributes.keys().collect()
        } else {
            state.changed_attributes.iter().collect()
        };
        for name in names {
            if let Some(value) = state.attributes.get(name) {
                self.upsert_attribute(&tx, id, name, value)?;
            }
        }
        for name in &state.removed_attributes {
            tx.execute(
                "DELETE FROM session_attributes WHERE id = ?1 AND app_name = ?2 AND name = ?3",
                params![id, self.app_name, name],
            )?;
        }
        tx.commit()?;

        state.clear_dirty();
        Ok(true)
    }

    fn upsert_attribute(&self, tx: &Transaction<'_>, id: &str, name: &str, value: &Value) -> Result<()> {
        tx.execute(
            "INSERT INTO session_attributes (id, app_name, name, value) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id, app_name, name) DO UPDATE SET value = excluded.value",
            params![id, self.app_name, name, serde_json::to_string(value)?],
        )?;
        Ok(())
    }

    fn touch(&self, id: &str, now: i64) -> Result<u64> {
        let rows = self.conn.lock().execute(
            "UPDATE sessions SET last_access = ?1 WHERE id = ?2 AND app_name = ?3",
            params![now, id, self.app_name],
        )?;
        Ok(rows as u64)
    }

    fn touch_if_unchanged(&self, id: &str, expected: i64, now: i64) -> Result<u64> {
        let rows = self.conn.lock().execute(
            "UPDATE sessions SET last_access = ?1
             WHERE id = ?2 AND app_name = ?3 AND last_access = ?4",
            params![now, id, self.app_name, expected],
        )?;
        Ok(rows as u64)
    }

    fn touch_all(&self, times: &HashMap<String, i64>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("UPDATE sessions SET last_access = ?1 WHERE id = ?2 AND app_name = ?3")?;
            for (id, time) in times {
                stmt.execute(params![time, id, self.app_name])?;
            }
        }
        tx.commit()?;
        debug!(count = times.len(), "Wrote cached last-access times");
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        delete_rows(&tx, &self.app_name, id)?;
        tx.commit()?;
        Ok(())
    }

    // ── Expiry ──────────────────────────────────────────────────────

    /// Take the application's sweep lease if no peer has swept within the
    /// check interval. A lease stamped in the future is treated as stale.
    fn acquire_lease(&self, tx: &Transaction<'_>, now: i64) -> Result<bool> {
        let last_run: Option<i64> = tx
            .query_row(
                "SELECT last_run FROM invalidation_lease WHERE app_name = ?1",
                params![self.app_name],
                |row| row.get(0),
            )
            .optional()?;

        let Some(last_run) = last_run else {
            let rows = tx.execute(
                "INSERT OR IGNORE INTO invalidation_lease (app_name, last_run) VALUES (?1, ?2)",
                params![self.app_name, now],
            )?;
            return Ok(rows == 1);
        };

        let interval = i64::try_from(self.invalidation_check_interval.as_millis()).unwrap_or(i64::MAX);
        if last_run > now || last_run <= now.saturating_sub(interval) {
            let rows = tx.execute(
                "UPDATE invalidation_lease SET last_run = ?1 WHERE app_name = ?2 AND last_run = ?3",
                params![now, self.app_name, last_run],
            )?;
            return Ok(rows == 1);
        }
        Ok(false)
    }

    fn sweep(&self, now: i64, resident: &HashSet<String>) -> Result<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !self.acquire_lease(&tx, now)? {
            trace!(app = %self.app_name, "Another peer swept recently, skipping");
            return Ok(Vec::new());
        }

        let candidates: Vec<(String, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT id, last_access FROM sessions
                 WHERE app_name = ?1 AND max_inactive >= 0
                   AND ?2 - last_access > max_inactive * 1000",
            )?;
            let rows = stmt.query_map(params![self.app_name, now], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        let mut removed = Vec::new();
        for (id, last_access) in candidates {
            if resident.contains(&id) {
                continue;
            }
            let rows = tx.execute(
                "DELETE FROM sessions WHERE id = ?1 AND app_name = ?2 AND last_access = ?3",
                params![id, self.app_name, last_access],
            )?;
            if rows > 0 {
                tx.execute(
                    "DELETE FROM session_attributes WHERE id = ?1 AND app_name = ?2",
                    params![id, self.app_name],
                )?;
                removed.push(id);
            }
        }
        tx.commit()?;

        if !removed.is_empty() {
            info!(app = %self.app_name, removed = removed.len(), "Expired stored sessions");
        }
        Ok(removed)
    }
}

fn delete_rows(tx: &Transaction<'_>, app_name: &str, id: &str) -> Result<()> {
    tx.execute(
        "DELETE FROM sessions WHERE id = ?1 AND app_name = ?2",
        params![id, app_name],
    )?;
    tx.execute(
        "DELETE FROM session_attributes WHERE id = ?1 AND app_name = ?2",
        params![id, app_name],
    )?;
    Ok(())
}

impl BackingStore for SqliteStore {
    fn read_from_external(&self, id: &str) -> tether_session::Result<Option<SessionState>> {
        Ok(self.read_session(id)?)
    }

    fn insert_session(&self, id: &str, state: &SessionState) -> tether_session::Result<InsertOutcome> {
        Ok(self.insert(id, state)?)
    }

    fn persist_session(
        &self,
        id: &str,
        state: &mut SessionState,
        write_all: bool,
    ) -> tether_session::Result<bool> {
        Ok(self.persist(id, state, write_all)?)
    }

    fn update_last_access_time(&self, id: &str, now: i64) -> tether_session::Result<u64> {
        Ok(self.touch(id, now)?)
    }

    fn over_qual_last_access_time_update(
        &self,
        id: &str,
        expected: i64,
        now: i64,
    ) -> tether_session::Result<u64> {
        Ok(self.touch_if_unchanged(id, expected, now)?)
    }

    fn remove_persisted_session(&self, id: &str) -> tether_session::Result<()> {
        Ok(self.delete(id)?)
    }

    fn is_present(&self, id: &str) -> tether_session::Result<bool> {
        Ok(self.session_exists(id)?)
    }

    fn perform_invalidation(
        &self,
        now: i64,
        resident: &HashSet<String>,
    ) -> tether_session::Result<Vec<String>> {
        Ok(self.sweep(now, resident)?)
    }

    fn write_cached_last_access_times(&self, times: &HashMap<String, i64>) -> tether_session::Result<()> {
        Ok(self.touch_all(times)?)
    }

    fn manages_dirty_tracking(&self) -> bool {
        self.layout == Layout::MultiRow
    }
}
