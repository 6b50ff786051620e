/// SQLite implementation of the storage contract.
pub mod sqlite;

use crate::types::Seq;

/// Storage-layer failures. Never retried here; retry policy belongs to
/// callers.
#[derive(Debug)]
pub enum PersistError {
    /// The underlying connection or query failed.
    Sqlite(rusqlite::Error),
    /// The store was already closed.
    Closed,
    /// Anything without a more specific shape.
    Message(String),
}

impl From<rusqlite::Error> for PersistError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Convenience alias for storage results.
pub type PersistResult<T> = Result<T, PersistError>;

/// Raw row-level persistence operations. No CRDT awareness: payloads are
/// opaque blobs, ordering comes from the storage-assigned sequence.
///
/// Implementations do not retry; retry policy belongs to callers.
pub trait UpdateStore: Send {
    /// Highest sequence among update records for `doc`, or `None` when the
    /// document has no updates yet.
    fn latest_seq(&mut self, doc: &str) -> PersistResult<Option<Seq>>;

    /// Inserts one update record and returns its assigned sequence.
    fn append_update(&mut self, doc: &str, payload: &[u8]) -> PersistResult<Seq>;

    /// Raw payload of the document's state-vector cache row, if any.
    fn get_state_vector(&mut self, doc: &str) -> PersistResult<Option<Vec<u8>>>;

    /// Upserts the document's single state-vector cache row.
    fn put_state_vector(&mut self, doc: &str, payload: &[u8]) -> PersistResult<()>;

    /// Deletes update records with `from <= seq < to`. Snapshot-vector rows
    /// are never touched.
    fn delete_updates_in(&mut self, doc: &str, from: Seq, to: Seq) -> PersistResult<()>;

    /// Streams all update payloads for `doc` in ascending sequence order,
    /// invoking `page` once per fixed-size page, and returns the total
    /// record count. Bounds peak memory on long-uncompacted documents.
    fn read_updates_paged(
        &mut self,
        doc: &str,
        page: &mut dyn FnMut(&[Vec<u8>]),
    ) -> PersistResult<usize>;

    /// Deletes every record of both kinds for `doc`. Deleting a document
    /// that does not exist is a no-op, not an error.
    fn delete_doc(&mut self, doc: &str) -> PersistResult<()>;

    /// Releases the underlying connection. Further calls on this store
    /// fail with [`PersistError::Closed`].
    fn close(&mut self) -> PersistResult<()>;
}
