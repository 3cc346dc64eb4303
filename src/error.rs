//! Error types for the BetterClaw core pipeline.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BetterClawError>;

/// Error taxonomy for the triage pipeline.
///
/// Per the error handling design, most of these are caught at the
/// component boundary and turned into a log line or a fail-open decision
/// rather than propagated outward; this enum exists for the cases that do
/// need to be returned to a caller (config load, RPC validation).
#[derive(Error, Debug)]
pub enum BetterClawError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("judgment layer error: {0}")]
    Judgment(String),

    #[error("delivery error: {0}")]
    Delivery(String),
}
