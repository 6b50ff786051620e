//! Log replay, snapshot-vector caching, and compaction.

/// State-vector cache payload envelope.
pub mod codec;
/// Append/replay/flush algorithms.
pub mod journal;
