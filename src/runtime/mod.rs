//! Per-document serialization lanes and the public facade.

/// Facade implementation.
pub mod handle;
/// Per-document operation queues.
pub mod lane;
