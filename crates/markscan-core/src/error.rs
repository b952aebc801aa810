//! Error types.
//!
//! Configuration problems surface as [`ScanError`] when a layout, key or
//! image buffer is built. Per-frame failures are [`FrameError`] and are
//! always recoverable: the caller moves on to the next frame.

use thiserror::Error;

/// Errors raised while building layouts, answer keys or input buffers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScanError {
    /// A region definition violates its invariants.
    #[error("invalid region `{name}`: {reason}")]
    InvalidRegion {
        /// Region name as given.
        name: String,
        /// What is wrong with it.
        reason: String,
    },
    /// Two regions in one layout share a name.
    #[error("duplicate region name `{0}`")]
    DuplicateRegion(String),
    /// The answer key contains the same (subject, question) twice.
    #[error("duplicate answer key entry for `{subject}` question {question}")]
    DuplicateKeyEntry {
        /// Subject name.
        subject: String,
        /// Zero-based question index.
        question: usize,
    },
    /// The answer key names an option that can never be marked.
    #[error("invalid option `{option}` for `{subject}` question {question}")]
    InvalidKeyOption {
        /// Subject name.
        subject: String,
        /// Zero-based question index.
        question: usize,
        /// Offending character.
        option: char,
    },
    /// An input buffer does not match its declared geometry.
    #[error("invalid image: {0}")]
    InvalidImage(String),
    /// JSON input could not be parsed.
    #[cfg(feature = "serde")]
    #[error("failed to parse {what}: {message}")]
    Parse {
        /// What was being parsed (layout, key, config).
        what: &'static str,
        /// Parser message.
        message: String,
    },
}

/// Recoverable per-frame failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The frame has no pixels.
    #[error("empty frame")]
    EmptyFrame,
    /// No convex four-sided outline was found.
    #[error("paper not found")]
    PaperNotFound,
    /// The located outline could not be mapped onto the target rectangle.
    #[error("degenerate perspective transform")]
    DegenerateTransform,
}
