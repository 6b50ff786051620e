//! Durable SQLite-backed persistence for yrs (Yjs) documents.
//!
//! Stores the binary update log of each CRDT document, rebuilds a
//! [`yrs::Doc`] on demand by replaying that log, and compacts the log
//! into a single full-state record once enough fragments accumulate.
//! A cached state vector per document answers sync handshakes without
//! replay. One serialized lane per document name makes concurrent access
//! safe without a global lock.
//!
//! # Examples
//!
//! ```
//! use ylog::{config::Config, runtime::handle::Ylog};
//! use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let persistence = Ylog::open_in_memory(Config::default()).expect("open");
//!
//! // Produce an update the way a collaboration session would.
//! let doc = Doc::new();
//! let text = doc.get_or_insert_text("body");
//! {
//!     let mut txn = doc.transact_mut();
//!     text.insert(&mut txn, 0, "hello");
//! }
//! let update = doc
//!     .transact()
//!     .encode_state_as_update_v1(&StateVector::default());
//!
//! persistence.store_update("room-1", &update).await.expect("store");
//!
//! // Materialize the persisted state into a fresh doc.
//! let loaded = persistence.get_doc("room-1").await.expect("load");
//! let body = loaded.get_or_insert_text("body");
//! assert_eq!(body.get_string(&loaded.transact()), "hello");
//!
//! // The cached state vector answers sync handshakes without replay.
//! let sv = persistence.state_vector("room-1").await.expect("sv");
//! assert!(sv.is_some());
//!
//! persistence.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Recognized options and startup validation.
pub mod config;
/// Log replay, snapshot-vector caching, and compaction.
pub mod engine;
/// Storage abstraction and SQLite implementation.
pub mod persist;
/// Per-document lanes and the persistence facade.
pub mod runtime;
/// Shared primitive types and record kinds.
pub mod types;

pub use config::Config;
pub use runtime::handle::{RuntimeError, Ylog};
