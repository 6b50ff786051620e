//! Shared primitive aliases and record-kind tags.

/// Monotonic storage sequence number, assigned by the storage layer.
///
/// Doubles as the compaction clock: a cached state vector is valid only
/// while its captured clock equals the latest update sequence.
pub type Seq = u64;

/// Rows fetched per page during paged replay.
pub const PAGE_SIZE: usize = 100;

/// Discriminator for the two row kinds sharing one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// An applyable CRDT update fragment.
    Update,
    /// The single upserted state-vector cache row for a document.
    SnapshotVector,
}

impl RecordKind {
    /// Stable on-disk tag.
    pub fn as_i64(self) -> i64 {
        match self {
            RecordKind::Update => 1,
            RecordKind::SnapshotVector => 2,
        }
    }
}
