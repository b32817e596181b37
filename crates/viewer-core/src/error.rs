//! Engine error taxonomy

use crate::backend::BackendError;
use crate::config::ConfigError;
use serde::Serialize;

/// Which part of the pipeline an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPhase {
    /// Opening the document
    Load,
    /// Fetching or painting one page
    Render,
}

/// Errors surfaced by the engine.
///
/// Cancellation never appears here: superseded work is discarded silently.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("failed to open document: {0}")]
    Load(BackendError),
    #[error("failed to render page {page}: {source}")]
    Render { page: u32, source: BackendError },
    #[error("no document is open")]
    NoDocument,
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Phase reported to the host alongside the message
    pub fn phase(&self) -> ErrorPhase {
        match self {
            EngineError::Render { .. } => ErrorPhase::Render,
            _ => ErrorPhase::Load,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_errors_report_render_phase() {
        let err = EngineError::Render {
            page: 4,
            source: BackendError::Render("bad glyph".into()),
        };
        assert_eq!(err.phase(), ErrorPhase::Render);
        assert_eq!(err.to_string(), "failed to render page 4: render error: bad glyph");
    }

    #[test]
    fn load_errors_report_load_phase() {
        let err = EngineError::Load(BackendError::Unavailable("404".into()));
        assert_eq!(err.phase(), ErrorPhase::Load);
        assert!(err.to_string().contains("source unavailable"));
    }
}
