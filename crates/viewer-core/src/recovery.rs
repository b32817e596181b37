//! Render conflict recovery
//!
//! Every failure reported by the render surface is classified: superseded
//! work is dropped, surface-busy races are recovered by remounting the page
//! under a new render epoch, everything else becomes a page-scoped error.

use crate::backend::{BackendError, RenderOutcome};
use crate::error::EngineError;
use crate::window::MountedSet;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Consecutive races on one page before the failure is surfaced
pub const MAX_CONSECUTIVE_REMOUNTS: u32 = 8;

/// What to do about a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Superseded work; drop silently
    Ignore,
    /// Transient surface race; remount the page
    Remount,
    /// Genuine failure; report to the host
    Surface,
}

/// Classify a backend failure
pub fn classify(error: &BackendError) -> RecoveryAction {
    match error {
        BackendError::Cancelled => RecoveryAction::Ignore,
        BackendError::SurfaceBusy(_) => RecoveryAction::Remount,
        _ => RecoveryAction::Surface,
    }
}

/// Decision for one render outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The page rendered at `height`
    Rendered { height: f32 },
    /// The outcome was stale or cancelled
    Discarded,
    /// The page must be remounted under `epoch`
    Remount { epoch: u64 },
    /// The page failed; report it
    Failed(EngineError),
}

#[derive(Debug, Default, Clone, Copy)]
struct PageEpoch {
    epoch: u64,
    races: u32,
}

/// Per-page render epochs and race bookkeeping.
#[derive(Debug, Default)]
pub struct RenderConflictRecovery {
    pages: Mutex<HashMap<u32, PageEpoch>>,
    next_epoch: AtomicU64,
    remounts: AtomicU64,
}

impl RenderConflictRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch of `page`, allocating one for a newly mounted page
    pub fn epoch(&self, page: u32) -> u64 {
        if let Some(entry) = self.pages.lock().get(&page) {
            return entry.epoch;
        }
        let epoch = self.allocate();
        self.pages.lock().entry(page).or_insert(PageEpoch { epoch, races: 0 }).epoch
    }

    /// Whether an outcome rendered under `epoch` is still wanted
    pub fn is_current(&self, page: u32, epoch: u64) -> bool {
        self.pages.lock().get(&page).is_some_and(|entry| entry.epoch == epoch)
    }

    /// Move `page` to a fresh epoch, invalidating renders in flight.
    pub fn bump(&self, page: u32) -> u64 {
        let epoch = self.allocate();
        let mut pages = self.pages.lock();
        let entry = pages.entry(page).or_default();
        entry.epoch = epoch;
        epoch
    }

    /// Forget pages that are no longer mounted
    pub fn retain(&self, mounted: &MountedSet) {
        self.pages.lock().retain(|page, _| mounted.contains(*page));
    }

    /// Forget every page
    pub fn reset(&self) {
        self.pages.lock().clear();
    }

    /// Total remounts triggered by races
    pub fn remounts(&self) -> u64 {
        self.remounts.load(Ordering::Relaxed)
    }

    /// Decide what to do with `outcome`, rendered for `page` under `epoch`.
    pub fn resolve(&self, page: u32, epoch: u64, outcome: RenderOutcome) -> Resolution {
        if !self.is_current(page, epoch) {
            debug!(page, epoch, "dropping render outcome from stale epoch");
            return Resolution::Discarded;
        }

        let error = match outcome {
            RenderOutcome::Rendered { height } => {
                if let Some(entry) = self.pages.lock().get_mut(&page) {
                    entry.races = 0;
                }
                return Resolution::Rendered { height };
            }
            RenderOutcome::LoadingFailed(error) | RenderOutcome::RenderingFailed(error) => error,
        };

        match classify(&error) {
            RecoveryAction::Ignore => {
                debug!(page, epoch, "render cancelled");
                Resolution::Discarded
            }
            RecoveryAction::Remount => {
                let races = {
                    let mut pages = self.pages.lock();
                    let entry = pages.entry(page).or_default();
                    entry.races += 1;
                    entry.races
                };
                if races > MAX_CONSECUTIVE_REMOUNTS {
                    warn!(page, races, "render race persists, giving up");
                    return Resolution::Failed(EngineError::Render { page, source: error });
                }
                let epoch = self.bump(page);
                self.remounts.fetch_add(1, Ordering::Relaxed);
                debug!(page, epoch, races, "render race, remounting page");
                Resolution::Remount { epoch }
            }
            RecoveryAction::Surface => {
                warn!(page, %error, "page render failed");
                Resolution::Failed(EngineError::Render { page, source: error })
            }
        }
    }

    fn allocate(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1
    }
}
