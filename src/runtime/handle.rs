//! Public persistence facade.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use yrs::Doc;

use crate::{
    config::{Config, ConfigError},
    engine::journal::{EngineError, LogEngine},
    persist::{UpdateStore, sqlite::SqliteUpdateStore},
    runtime::lane::{DocLanes, LaneClosed},
    types::Seq,
};

/// Lane key reserved for shutdown. Real document names never collide with
/// it: the NUL byte keeps it out of any usable name space.
const SHUTDOWN_LANE: &str = "\u{0}ylog:shutdown";

/// Facade-level failures.
#[derive(Debug)]
pub enum RuntimeError {
    /// Invalid options, rejected before any storage work.
    Config(ConfigError),
    /// The underlying operation failed; local to this call, the
    /// document's lane keeps accepting operations.
    Engine(EngineError),
    /// The facade was shut down.
    Closed,
}

impl From<ConfigError> for RuntimeError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<EngineError> for RuntimeError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

impl From<LaneClosed> for RuntimeError {
    fn from(_: LaneClosed) -> Self {
        Self::Closed
    }
}

/// Durable persistence for CRDT documents, one serialized lane per
/// document name.
///
/// Every operation is queued on its document's lane, so concurrent calls
/// for one document run in submission order while distinct documents
/// proceed in parallel. Clones share the same store and lanes.
#[derive(Clone)]
pub struct Ylog {
    engine: Arc<LogEngine>,
    lanes: DocLanes,
    closed: Arc<AtomicBool>,
}

impl Ylog {
    /// Opens (or creates) a file-backed store at `path`.
    ///
    /// Configuration is validated before any connection is attempted.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self, RuntimeError> {
        config.validate()?;
        let store = SqliteUpdateStore::open(path, &config).map_err(EngineError::Persist)?;
        Ok(Self::from_store(Box::new(store), &config))
    }

    /// Opens an in-memory store. Used by tests and doc examples.
    pub fn open_in_memory(config: Config) -> Result<Self, RuntimeError> {
        config.validate()?;
        let store = SqliteUpdateStore::open_in_memory(&config).map_err(EngineError::Persist)?;
        Ok(Self::from_store(Box::new(store), &config))
    }

    /// Wraps an already-open store. Seam for test doubles.
    pub fn from_store(store: Box<dyn UpdateStore>, config: &Config) -> Self {
        Self {
            engine: Arc::new(LogEngine::new(store, config.flush_threshold)),
            lanes: DocLanes::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Materializes the persisted state of `doc` into a fresh [`Doc`].
    ///
    /// Reads that replay at least `flush_threshold` stored updates
    /// compact the log before returning.
    pub async fn get_doc(&self, doc: &str) -> Result<Doc, RuntimeError> {
        self.ensure_open()?;
        let engine = Arc::clone(&self.engine);
        let name = doc.to_string();
        let res = self
            .lanes
            .run(doc, async move { engine.materialize(&name).await })
            .await?;
        Ok(res?.0)
    }

    /// Durably appends one update and returns its storage sequence.
    pub async fn store_update(&self, doc: &str, update: &[u8]) -> Result<Seq, RuntimeError> {
        self.ensure_open()?;
        let engine = Arc::clone(&self.engine);
        let name = doc.to_string();
        let update = update.to_vec();
        let res = self
            .lanes
            .run(doc, async move { engine.append(&name, update).await })
            .await?;
        Ok(res?)
    }

    /// Current encoded state vector, or `None` for an unknown document.
    ///
    /// Served from the persisted cache when fresh; otherwise rebuilt,
    /// flushed back, and returned.
    pub async fn state_vector(&self, doc: &str) -> Result<Option<Vec<u8>>, RuntimeError> {
        self.ensure_open()?;
        let engine = Arc::clone(&self.engine);
        let name = doc.to_string();
        let res = self
            .lanes
            .run(doc, async move { engine.state_vector(&name).await })
            .await?;
        Ok(res?)
    }

    /// Minimal update bringing a peer at `known_sv` up to the persisted
    /// state, as `Y.encodeStateAsUpdate(doc, stateVector)` would.
    pub async fn diff(&self, doc: &str, known_sv: &[u8]) -> Result<Vec<u8>, RuntimeError> {
        self.ensure_open()?;
        let engine = Arc::clone(&self.engine);
        let name = doc.to_string();
        let sv = known_sv.to_vec();
        let res = self
            .lanes
            .run(doc, async move { engine.diff(&name, &sv).await })
            .await?;
        Ok(res?)
    }

    /// Deletes `doc` and all associated records. Idempotent.
    pub async fn clear_doc(&self, doc: &str) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        let engine = Arc::clone(&self.engine);
        let name = doc.to_string();
        let res = self
            .lanes
            .run(doc, async move { engine.clear(&name).await })
            .await?;
        Ok(res?)
    }

    /// Closes the underlying store. Must be the last call; runs on a
    /// reserved lane so no per-document chain can interleave with
    /// teardown, and flips every later operation to
    /// [`RuntimeError::Closed`].
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::Closed);
        }
        let engine = Arc::clone(&self.engine);
        let res = self
            .lanes
            .run(SHUTDOWN_LANE, async move { engine.close().await })
            .await?;
        Ok(res?)
    }

    fn ensure_open(&self) -> Result<(), RuntimeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RuntimeError::Closed);
        }
        Ok(())
    }
}
