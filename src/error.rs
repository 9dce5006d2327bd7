// Error types module

use thiserror::Error;

use crate::redirects::RedirectError;

/// Top-level error for process startup and the offline rebuild command.
///
/// Request handling never produces these: every fallible step on the request
/// path has a safe fallback value instead.
#[derive(Error, Debug)]
pub enum EdgeError {
    /// Configuration errors (invalid YAML, missing env vars, failed validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Redirect table or filter errors surfaced outside request handling
    #[error("Redirect error: {0}")]
    Redirects(#[from] RedirectError),

    /// Runtime or filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
