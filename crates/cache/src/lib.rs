//! Pageflow Cache Library
//!
//! Per-page geometry cache with session-scoped writes.

pub mod geometry;

pub use geometry::{GeometryCache, GeometryStats, HeightSource, PageHeight, PageNumber, WriteOutcome};
