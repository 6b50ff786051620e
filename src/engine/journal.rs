//! Append, replay, and compaction over the update log.

use std::sync::Arc;

use tokio::{sync::Mutex, task};
use yrs::{
    Doc, ReadTxn, StateVector, Transact, Update,
    updates::{decoder::Decode, encoder::Encode},
};

use crate::{
    engine::codec::{decode_sv_cache, encode_sv_cache},
    persist::{PersistError, UpdateStore},
    types::Seq,
};

/// Log & snapshot engine failures.
#[derive(Debug)]
pub enum EngineError {
    /// Underlying storage failed or is closed.
    Persist(PersistError),
    /// A caller-supplied update or state vector could not be decoded or
    /// applied.
    Crdt(String),
    /// A stored state-vector cache payload was unreadable.
    Codec(String),
}

impl From<PersistError> for EngineError {
    fn from(value: PersistError) -> Self {
        Self::Persist(value)
    }
}

/// Convenience alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;

/// Merge and compaction algorithms over an [`UpdateStore`].
///
/// All storage work runs on the blocking pool while holding the store
/// lock; callers are expected to already be serialized per document by
/// the lane layer, so the lock only arbitrates cross-document access to
/// the shared connection.
pub struct LogEngine {
    store: Arc<Mutex<Box<dyn UpdateStore>>>,
    flush_threshold: usize,
}

impl LogEngine {
    /// Wraps `store` with the given compaction threshold.
    pub fn new(store: Box<dyn UpdateStore>, flush_threshold: usize) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            flush_threshold,
        }
    }

    /// Appends one update and returns its assigned sequence.
    ///
    /// The first update for a document also writes a snapshot-vector row
    /// at clock 0, so document existence is always detectable from the
    /// snapshot row alone, even before any compaction.
    pub async fn append(&self, doc: &str, update: Vec<u8>) -> EngineResult<Seq> {
        let store = Arc::clone(&self.store);
        let doc = doc.to_string();
        run_blocking(move || {
            let mut store = store.blocking_lock();
            append_locked(&mut **store, &doc, &update)
        })
        .await
    }

    /// Rebuilds the document by replaying every stored update in order.
    ///
    /// Returns the populated document and the replayed update count. When
    /// the count reaches the flush threshold the log is compacted before
    /// returning, so replay cost stays amortized across reads.
    pub async fn materialize(&self, doc: &str) -> EngineResult<(Doc, usize)> {
        let (ydoc, count) = self.replay(doc).await?;
        if count >= self.flush_threshold {
            log::debug!("ylog: compacting {doc} after replaying {count} updates");
            let (full_state, sv) = encode_doc(&ydoc);
            self.flush(doc, full_state, sv).await?;
        }
        Ok((ydoc, count))
    }

    /// Collapses the document's log into one full-state update plus a
    /// refreshed snapshot-vector row, deleting every older fragment.
    pub async fn flush(&self, doc: &str, full_state: Vec<u8>, sv: Vec<u8>) -> EngineResult<Seq> {
        let store = Arc::clone(&self.store);
        let doc = doc.to_string();
        run_blocking(move || {
            let mut store = store.blocking_lock();
            flush_locked(&mut **store, &doc, &full_state, &sv)
        })
        .await
    }

    /// Current encoded state vector, or `None` for a document with no
    /// updates.
    ///
    /// Fast path: the cached vector is returned untouched while its
    /// captured clock still equals the latest update sequence. Otherwise
    /// the document is replayed and the refreshed vector is flushed back,
    /// compacting the log in the same step.
    pub async fn state_vector(&self, doc: &str) -> EngineResult<Option<Vec<u8>>> {
        let store = Arc::clone(&self.store);
        let name = doc.to_string();
        let probe = run_blocking(move || {
            let mut store = store.blocking_lock();
            probe_cache_locked(&mut **store, &name)
        })
        .await?;

        match probe {
            CacheProbe::Missing => Ok(None),
            CacheProbe::Fresh(sv) => Ok(Some(sv)),
            CacheProbe::Stale => {
                let (ydoc, _count) = self.replay(doc).await?;
                let (full_state, sv) = encode_doc(&ydoc);
                self.flush(doc, full_state, sv.clone()).await?;
                Ok(Some(sv))
            }
        }
    }

    /// Minimal update bringing a peer at `known_sv` up to the persisted
    /// state.
    pub async fn diff(&self, doc: &str, known_sv: &[u8]) -> EngineResult<Vec<u8>> {
        let sv = StateVector::decode_v1(known_sv).map_err(|e| EngineError::Crdt(e.to_string()))?;
        let (ydoc, _count) = self.materialize(doc).await?;
        let txn = ydoc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    /// Deletes every record for `doc`. Idempotent.
    pub async fn clear(&self, doc: &str) -> EngineResult<()> {
        let store = Arc::clone(&self.store);
        let doc = doc.to_string();
        run_blocking(move || {
            let mut store = store.blocking_lock();
            store.delete_doc(&doc).map_err(EngineError::from)
        })
        .await
    }

    /// Releases the underlying store. At most once.
    pub async fn close(&self) -> EngineResult<()> {
        let store = Arc::clone(&self.store);
        run_blocking(move || {
            let mut store = store.blocking_lock();
            store.close().map_err(EngineError::from)
        })
        .await
    }

    /// Paged replay without the compaction trigger.
    async fn replay(&self, doc: &str) -> EngineResult<(Doc, usize)> {
        let store = Arc::clone(&self.store);
        let doc = doc.to_string();
        run_blocking(move || {
            let mut store = store.blocking_lock();
            materialize_locked(&mut **store, &doc)
        })
        .await
    }
}

enum CacheProbe {
    Missing,
    Fresh(Vec<u8>),
    Stale,
}

async fn run_blocking<T, F>(f: F) -> EngineResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> EngineResult<T> + Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Persist(PersistError::Message(format!("join error: {e}"))))?
}

fn append_locked(store: &mut dyn UpdateStore, doc: &str, update: &[u8]) -> EngineResult<Seq> {
    if store.latest_seq(doc)?.is_none() {
        // First update for this document: derive its state vector from a
        // throwaway doc and record it at clock 0 so the document is
        // discoverable without scanning updates.
        let decoded =
            Update::decode_v1(update).map_err(|e| EngineError::Crdt(e.to_string()))?;
        let ydoc = Doc::new();
        let sv = {
            let mut txn = ydoc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| EngineError::Crdt(e.to_string()))?;
            txn.state_vector().encode_v1()
        };
        let payload = encode_sv_cache(0, &sv).map_err(EngineError::Codec)?;
        store.put_state_vector(doc, &payload)?;
    }
    Ok(store.append_update(doc, update)?)
}

fn flush_locked(
    store: &mut dyn UpdateStore,
    doc: &str,
    full_state: &[u8],
    sv: &[u8],
) -> EngineResult<Seq> {
    let clock = append_locked(store, doc, full_state)?;
    let payload = encode_sv_cache(clock, sv).map_err(EngineError::Codec)?;
    store.put_state_vector(doc, &payload)?;
    store.delete_updates_in(doc, 0, clock)?;
    Ok(clock)
}

fn materialize_locked(store: &mut dyn UpdateStore, doc: &str) -> EngineResult<(Doc, usize)> {
    let ydoc = Doc::new();
    let count = {
        let mut txn = ydoc.transact_mut();
        store.read_updates_paged(doc, &mut |payloads| {
            for payload in payloads {
                // Replay must not wedge on one bad row; skip and report.
                match Update::decode_v1(payload) {
                    Ok(update) => {
                        if let Err(e) = txn.apply_update(update) {
                            log::warn!("ylog: skipping unappliable update for {doc}: {e}");
                        }
                    }
                    Err(e) => {
                        log::warn!("ylog: skipping undecodable update for {doc}: {e}");
                    }
                }
            }
        })?
    };
    Ok((ydoc, count))
}

fn probe_cache_locked(store: &mut dyn UpdateStore, doc: &str) -> EngineResult<CacheProbe> {
    let Some(raw) = store.get_state_vector(doc)? else {
        return Ok(CacheProbe::Missing);
    };
    let (clock, sv) = decode_sv_cache(&raw).map_err(EngineError::Codec)?;
    let latest = store.latest_seq(doc)?;
    Ok(if latest == Some(clock) {
        CacheProbe::Fresh(sv)
    } else {
        CacheProbe::Stale
    })
}

/// Full-state update plus encoded state vector of a materialized doc.
fn encode_doc(ydoc: &Doc) -> (Vec<u8>, Vec<u8>) {
    let txn = ydoc.transact();
    (
        txn.encode_state_as_update_v1(&StateVector::default()),
        txn.state_vector().encode_v1(),
    )
}
