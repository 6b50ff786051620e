//! SQLite-backed update-log store.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    config::Config,
    types::{PAGE_SIZE, RecordKind, Seq},
};

use super::{PersistError, PersistResult, UpdateStore};

/// SQLite implementation of [`crate::persist::UpdateStore`].
///
/// One table holds every document: update fragments and state-vector cache
/// rows share it, distinguished by the `kind` column. The auto-incrementing
/// `seq` primary key provides the global insertion order.
pub struct SqliteUpdateStore {
    conn: Option<Connection>,
    table: String,
}

impl SqliteUpdateStore {
    /// Opens or creates a store at `path` and bootstraps the schema.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>, config: &Config) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn, config)
    }

    /// Opens an in-memory store. Used by tests and doc examples.
    pub fn open_in_memory(config: &Config) -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn, config)
    }

    fn init_connection(conn: Connection, config: &Config) -> PersistResult<Self> {
        // The table name is interpolated into SQL below, so an unvalidated
        // name must never reach this point.
        config
            .validate()
            .map_err(|e| PersistError::Message(format!("invalid config: {e:?}")))?;
        let table = config.table_name.clone();

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                seq      INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_name TEXT NOT NULL,
                payload  BLOB NOT NULL,
                kind     INTEGER NOT NULL
            );"
        ))?;
        if config.use_index {
            // IF NOT EXISTS keeps index creation idempotent across boots;
            // no catalog probe needed.
            conn.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS \"{table}_doc_name_idx\"
                 ON \"{table}\" (doc_name);"
            ))?;
        }
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self {
            conn: Some(conn),
            table,
        })
    }

    fn conn(&self) -> PersistResult<&Connection> {
        self.conn.as_ref().ok_or(PersistError::Closed)
    }

    /// Total row count of both kinds for `doc`. Test observability hook.
    pub fn count_records(&self, doc: &str) -> PersistResult<usize> {
        let count: i64 = self.conn()?.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\" WHERE doc_name = ?1", self.table),
            params![doc],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl UpdateStore for SqliteUpdateStore {
    fn latest_seq(&mut self, doc: &str) -> PersistResult<Option<Seq>> {
        let seq: Option<i64> = self.conn()?.query_row(
            &format!(
                "SELECT MAX(seq) FROM \"{}\" WHERE doc_name = ?1 AND kind = ?2",
                self.table
            ),
            params![doc, RecordKind::Update.as_i64()],
            |row| row.get(0),
        )?;
        Ok(seq.map(|s| s as Seq))
    }

    fn append_update(&mut self, doc: &str, payload: &[u8]) -> PersistResult<Seq> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO \"{}\" (doc_name, payload, kind) VALUES (?1, ?2, ?3)",
                self.table
            ),
            params![doc, payload, RecordKind::Update.as_i64()],
        )?;
        Ok(conn.last_insert_rowid() as Seq)
    }

    fn get_state_vector(&mut self, doc: &str) -> PersistResult<Option<Vec<u8>>> {
        let payload: Option<Vec<u8>> = self
            .conn()?
            .query_row(
                &format!(
                    "SELECT payload FROM \"{}\" WHERE doc_name = ?1 AND kind = ?2 LIMIT 1",
                    self.table
                ),
                params![doc, RecordKind::SnapshotVector.as_i64()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn put_state_vector(&mut self, doc: &str, payload: &[u8]) -> PersistResult<()> {
        let conn = self.conn()?;
        let existing: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT seq FROM \"{}\" WHERE doc_name = ?1 AND kind = ?2 LIMIT 1",
                    self.table
                ),
                params![doc, RecordKind::SnapshotVector.as_i64()],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(seq) => {
                conn.execute(
                    &format!("UPDATE \"{}\" SET payload = ?1 WHERE seq = ?2", self.table),
                    params![payload, seq],
                )?;
            }
            None => {
                conn.execute(
                    &format!(
                        "INSERT INTO \"{}\" (doc_name, payload, kind) VALUES (?1, ?2, ?3)",
                        self.table
                    ),
                    params![doc, payload, RecordKind::SnapshotVector.as_i64()],
                )?;
            }
        }
        Ok(())
    }

    fn delete_updates_in(&mut self, doc: &str, from: Seq, to: Seq) -> PersistResult<()> {
        self.conn()?.execute(
            &format!(
                "DELETE FROM \"{}\"
                 WHERE doc_name = ?1 AND kind = ?2 AND seq >= ?3 AND seq < ?4",
                self.table
            ),
            params![
                doc,
                RecordKind::Update.as_i64(),
                from as i64,
                to as i64
            ],
        )?;
        Ok(())
    }

    fn read_updates_paged(
        &mut self,
        doc: &str,
        page: &mut dyn FnMut(&[Vec<u8>]),
    ) -> PersistResult<usize> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT payload FROM \"{}\"
             WHERE doc_name = ?1 AND kind = ?2
             ORDER BY seq ASC
             LIMIT ?3 OFFSET ?4",
            self.table
        ))?;

        let mut offset = 0usize;
        let mut total = 0usize;
        loop {
            let rows = stmt.query_map(
                params![
                    doc,
                    RecordKind::Update.as_i64(),
                    PAGE_SIZE as i64,
                    offset as i64
                ],
                |row| row.get::<_, Vec<u8>>(0),
            )?;
            let mut batch = Vec::with_capacity(PAGE_SIZE);
            for row in rows {
                batch.push(row?);
            }
            let fetched = batch.len();
            total += fetched;
            if fetched > 0 {
                page(&batch);
            }
            if fetched < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }
        Ok(total)
    }

    fn delete_doc(&mut self, doc: &str) -> PersistResult<()> {
        self.conn()?.execute(
            &format!("DELETE FROM \"{}\" WHERE doc_name = ?1", self.table),
            params![doc],
        )?;
        Ok(())
    }

    fn close(&mut self) -> PersistResult<()> {
        let conn = self.conn.take().ok_or(PersistError::Closed)?;
        conn.close().map_err(|(_, err)| PersistError::Sqlite(err))
    }
}
