//! Page rendering backend contracts
//!
//! The viewer never rasterizes anything itself. It opens documents through a
//! [`PageBackend`], measures pages through short-lived [`PageHandle`]s and
//! asks a [`RenderSurface`] to paint mounted pages. Page numbers are 1-based
//! on every one of these seams.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Identifier of the document to open (URL, path, blob id, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DocumentSource(String);

impl DocumentSource {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentSource {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DocumentSource {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Page size at a given scale, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageViewport {
    pub width: f32,
    pub height: f32,
}

/// Failures reported by the rendering backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("render surface busy: {0}")]
    SurfaceBusy(String),
    #[error("render error: {0}")]
    Render(String),
}

impl BackendError {
    /// Whether the operation was superseded rather than failed
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BackendError::Cancelled)
    }
}

/// Opens documents.
#[async_trait]
pub trait PageBackend: Send + Sync + 'static {
    /// Open `source`. May fail for unreachable or corrupt sources.
    async fn open(&self, source: &DocumentSource) -> Result<Arc<dyn DocumentHandle>, BackendError>;
}

/// An open document.
///
/// Exactly one live handle exists per engine; the engine calls
/// [`DocumentHandle::destroy`] before opening the next one.
#[async_trait]
pub trait DocumentHandle: Send + Sync {
    /// Number of pages in the document
    fn page_count(&self) -> u32;

    /// Fetch page `page` (1-based). The backend is expected to cache pages
    /// internally; callers re-fetch instead of retaining handles.
    async fn page(&self, page: u32) -> Result<Box<dyn PageHandle>, BackendError>;

    /// Release the document's resources.
    fn destroy(&self);
}

/// A page borrowed for one measurement or render.
pub trait PageHandle: Send {
    /// Size of the page at `scale`
    fn viewport(&self, scale: f32) -> PageViewport;

    /// Release the page. Consumes the handle so it cannot be reused.
    fn cleanup(self: Box<Self>);
}

/// Fetch `page`, read its size at `scale`, and release it.
pub async fn measure_page(
    document: &dyn DocumentHandle,
    page: u32,
    scale: f32,
) -> Result<PageViewport, BackendError> {
    let handle = document.page(page).await?;
    let viewport = handle.viewport(scale);
    handle.cleanup();
    Ok(viewport)
}

/// What a render surface reports after painting a page.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// The page was painted; `height` is the measured element height
    Rendered { height: f32 },
    /// The page could not be fetched from the document
    LoadingFailed(BackendError),
    /// The page was fetched but painting failed
    RenderingFailed(BackendError),
}

/// Paints pages for the host.
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Paint `page` of `document` at `scale`.
    async fn paint(&self, document: Arc<dyn DocumentHandle>, page: u32, scale: f32) -> RenderOutcome;
}
