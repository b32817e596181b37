//! Pageflow Viewer Library
//!
//! Virtualized paginated-document viewer engine. Only a bounded window of
//! pages is mounted at once; page heights are measured in the background;
//! navigation anchors are resolved against geometry that may still be
//! arriving. Rendering itself is delegated to a [`PageBackend`] and an
//! optional [`RenderSurface`].

pub mod backend;
pub mod boundary;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod layout;
pub mod lifecycle;
pub mod navigation;
pub mod preload;
pub mod recovery;
pub mod scale;
pub mod sim;
pub mod visibility;
pub mod window;

pub use backend::{
    BackendError, DocumentHandle, DocumentSource, PageBackend, PageHandle, PageViewport,
    RenderOutcome, RenderSurface,
};
pub use boundary::{Edge, GuardOutcome, Notice, ScrollBoundaryGuard, ScrollBounds};
pub use config::{ConfigError, EngineConfig};
pub use engine::{ViewerEngine, ViewerEngineBuilder};
pub use error::{EngineError, EngineResult, ErrorPhase};
pub use events::{DocumentState, EngineEvent, EngineSnapshot};
pub use layout::PageLayout;
pub use lifecycle::DocumentLifecycleManager;
pub use navigation::{NavigationController, NavigationOutcome, NavigationTarget};
pub use preload::{HeightPreloader, PreloadReport};
pub use recovery::RenderConflictRecovery;
pub use visibility::VisibilityObserver;
pub use window::{MountedSet, ViewportWindowManager, WindowChange};
