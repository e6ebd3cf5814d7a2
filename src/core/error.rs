//! Error types for the helixcloud engine

use thiserror::Error;

/// Main error type for the engine
///
/// Soft conditions (short sequence windows, batch estimate drift, arena
/// exhaustion, degenerate cameras) are not represented here; they have
/// sentinel values or logged fallbacks instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid cell size: {0} (must be finite and > 0)")]
    InvalidCellSize(f32),

    #[error("Invalid LOD table: {0}")]
    InvalidLodTable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ingest error: {0}")]
    Ingest(String),
}
