//! Host-facing events and snapshots

use crate::boundary::{Edge, Notice};
use crate::error::{EngineError, ErrorPhase};
use crate::navigation::NavigationOutcome;
use serde::Serialize;

/// State of the document slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    /// No document requested
    Empty,
    /// An open is in flight
    Loading,
    /// A document handle is live
    Ready,
    /// The last open failed; no handle is held
    Errored,
}

/// Events delivered to the host on the engine's channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A document finished opening
    Loaded { page_count: u32 },
    /// A load failure or a page-scoped render failure
    Error {
        message: String,
        phase: ErrorPhase,
        page: Option<u32>,
    },
    /// The mounted set changed
    WindowChanged {
        mounted: Vec<u32>,
        added: Vec<u32>,
        removed: Vec<u32>,
    },
    /// The engine moved the scroll position
    ScrollTo { offset: f32 },
    /// A boundary notice was raised
    Notice { id: u64, edge: Edge, message: String },
    /// The boundary notice expired
    NoticeCleared { id: u64 },
    /// A page must be remounted; outcomes from older epochs are ignored
    Remount { page: u32, epoch: u64 },
}

impl EngineEvent {
    pub(crate) fn error(err: &EngineError) -> Self {
        let page = match err {
            EngineError::Render { page, .. } => Some(*page),
            _ => None,
        };
        EngineEvent::Error {
            message: err.to_string(),
            phase: err.phase(),
            page,
        }
    }

    pub(crate) fn notice(notice: &Notice) -> Self {
        EngineEvent::Notice {
            id: notice.id,
            edge: notice.edge,
            message: notice.message.clone(),
        }
    }
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub document: DocumentState,
    pub source: Option<String>,
    pub page_count: u32,
    pub mounted: Vec<u32>,
    pub scroll_top: f32,
    pub container_height: f32,
    pub effective_scale: f32,
    pub cached_heights: usize,
    /// Whether a height preload pass is still running
    pub preloading: bool,
    pub notice: Option<Notice>,
    pub navigation: Option<NavigationOutcome>,
}
