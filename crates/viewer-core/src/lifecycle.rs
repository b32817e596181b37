//! Document lifecycle
//!
//! Owns the single live document handle. Opening a new source supersedes the
//! previous load, disposes the previous handle, runs the caller's teardown
//! (stopping background work, clearing caches) and only then starts the new
//! open. Results of superseded opens are destroyed without being published.

use crate::backend::{BackendError, DocumentHandle, DocumentSource, PageBackend};
use crate::error::{EngineError, EngineResult};
use crate::events::DocumentState;
use pageflow_scheduler::{Generation, GenerationCounter};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

enum Slot {
    Empty,
    Loading {
        source: DocumentSource,
        task: AbortHandle,
    },
    Ready {
        source: DocumentSource,
        handle: Arc<dyn DocumentHandle>,
    },
    Errored {
        source: DocumentSource,
    },
}

impl Slot {
    fn state(&self) -> DocumentState {
        match self {
            Slot::Empty => DocumentState::Empty,
            Slot::Loading { .. } => DocumentState::Loading,
            Slot::Ready { .. } => DocumentState::Ready,
            Slot::Errored { .. } => DocumentState::Errored,
        }
    }

    fn source(&self) -> Option<&DocumentSource> {
        match self {
            Slot::Empty => None,
            Slot::Loading { source, .. } | Slot::Ready { source, .. } | Slot::Errored { source } => {
                Some(source)
            }
        }
    }

    fn dispose(self) {
        match self {
            Slot::Loading { source, task } => {
                debug!(%source, "aborting superseded open");
                task.abort();
            }
            Slot::Ready { source, handle } => {
                debug!(%source, "destroying document handle");
                handle.destroy();
            }
            Slot::Empty | Slot::Errored { .. } => {}
        }
    }
}

/// A freshly opened document and the load generation it belongs to.
pub struct OpenedDocument {
    pub handle: Arc<dyn DocumentHandle>,
    pub generation: Generation,
}

/// Counters describing lifecycle activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleStats {
    /// Opens that published a handle
    pub opened: u64,
    /// Handles destroyed because their open had been superseded
    pub discarded: u64,
    /// Opens that failed
    pub failed: u64,
}

/// Owner of the document slot.
pub struct DocumentLifecycleManager {
    backend: Arc<dyn PageBackend>,
    loads: GenerationCounter,
    slot: Mutex<Slot>,
    opened: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
}

impl DocumentLifecycleManager {
    /// Create a manager that opens through `backend` and supersedes loads
    /// through `loads`.
    pub fn new(backend: Arc<dyn PageBackend>, loads: GenerationCounter) -> Self {
        Self {
            backend,
            loads,
            slot: Mutex::new(Slot::Empty),
            opened: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Open `source`, superseding any load in flight.
    ///
    /// `teardown` runs after the previous document has been disposed and
    /// before the backend is asked for the new one.
    ///
    /// Returns `Ok(None)` when this open was superseded before it finished.
    ///
    /// # Errors
    /// Returns [`EngineError::Load`] when the backend cannot open the
    /// source. The slot is left in the errored state without a handle.
    pub async fn open<F>(&self, source: DocumentSource, teardown: F) -> EngineResult<Option<OpenedDocument>>
    where
        F: Future<Output = ()>,
    {
        let generation = {
            let mut slot = self.slot.lock();
            let generation = self.loads.bump();
            std::mem::replace(&mut *slot, Slot::Empty).dispose();
            generation
        };
        info!(%source, generation = generation.value(), "opening document");

        teardown.await;

        let backend = self.backend.clone();
        let task = {
            let mut slot = self.slot.lock();
            if !generation.is_current() {
                debug!(%source, "open superseded during teardown");
                return Ok(None);
            }
            let open_source = source.clone();
            let task = tokio::spawn(async move { backend.open(&open_source).await });
            *slot = Slot::Loading {
                source: source.clone(),
                task: task.abort_handle(),
            };
            task
        };

        let result = match task.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => {
                debug!(%source, "open aborted");
                return Ok(None);
            }
            Err(err) => Err(BackendError::Unavailable(format!("open task failed: {err}"))),
        };

        let mut slot = self.slot.lock();
        if !generation.is_current() {
            drop(slot);
            if let Ok(handle) = result {
                debug!(%source, "discarding document from superseded open");
                handle.destroy();
                self.discarded.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(None);
        }

        match result {
            Ok(handle) => {
                info!(%source, page_count = handle.page_count(), "document opened");
                *slot = Slot::Ready {
                    source,
                    handle: handle.clone(),
                };
                self.opened.fetch_add(1, Ordering::Relaxed);
                Ok(Some(OpenedDocument { handle, generation }))
            }
            Err(err) if err.is_cancellation() => {
                debug!(%source, "open cancelled by backend");
                *slot = Slot::Empty;
                Ok(None)
            }
            Err(err) => {
                warn!(%source, error = %err, "failed to open document");
                *slot = Slot::Errored { source };
                self.failed.fetch_add(1, Ordering::Relaxed);
                Err(EngineError::Load(err))
            }
        }
    }

    /// Supersede any load and dispose the current document.
    pub fn close(&self) {
        let mut slot = self.slot.lock();
        self.loads.bump();
        std::mem::replace(&mut *slot, Slot::Empty).dispose();
    }

    /// The live handle, if a document is ready
    pub fn document(&self) -> Option<Arc<dyn DocumentHandle>> {
        match &*self.slot.lock() {
            Slot::Ready { handle, .. } => Some(handle.clone()),
            _ => None,
        }
    }

    /// Page count of the live document (0 when none)
    pub fn page_count(&self) -> u32 {
        self.document().map_or(0, |doc| doc.page_count())
    }

    pub fn state(&self) -> DocumentState {
        self.slot.lock().state()
    }

    /// Source of the current or last attempted document
    pub fn source(&self) -> Option<DocumentSource> {
        self.slot.lock().source().cloned()
    }

    /// Capture the current load generation
    pub fn generation(&self) -> Generation {
        self.loads.capture()
    }

    pub fn stats(&self) -> LifecycleStats {
        LifecycleStats {
            opened: self.opened.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
