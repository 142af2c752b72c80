//! Error types for the detection pipeline.
//!
//! Nothing here is fatal to a page session: the detector turns every failure
//! into a skipped cycle. These variants exist so callers (the session driver,
//! the CLI) can tell "no board yet" apart from a bad selector or a broken
//! settings file.

use thiserror::Error;

/// Errors raised by the board locator, selector parsing and detector lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    /// No board container matched any candidate selector (common before a game loads)
    #[error("no chessboard element found on the page")]
    BoardNotFound,

    /// The detector is not attached to a page
    #[error("detector is not attached")]
    Detached,

    /// A selector string could not be parsed
    #[error("invalid selector: {0}")]
    InvalidSelector(String),
}

/// Errors reading the settings file. Callers log these and fall back to defaults.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type alias for detection operations
pub type DetectResult<T> = Result<T, DetectError>;
