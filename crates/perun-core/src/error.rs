//! Error types for Perun.
//!
//! This module provides a unified error type for all Perun operations,
//! designed for professional API exposure to bindings and services.

use thiserror::Error;

/// Result type alias for Perun operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Perun operations.
///
/// Each variant includes a descriptive error message suitable for end-users.
/// Error codes follow the pattern `PERUN-XXX` for easy debugging.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid argument (PERUN-001).
    ///
    /// Out-of-range parameter, `k = 0`, unknown metric, and similar
    /// precondition violations at the API boundary.
    #[error("[PERUN-001] Invalid argument: {0}")]
    InvalidArgument(String),

    /// Dimension mismatch (PERUN-002).
    #[error("[PERUN-002] Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Index not initialized (PERUN-003).
    ///
    /// Search or mutation called on an empty or unloaded index.
    #[error("[PERUN-003] Index not initialized: {0}")]
    NotInitialized(String),

    /// Index already initialized (PERUN-004).
    ///
    /// Deserialization attempted on a live index.
    #[error("[PERUN-004] Index already initialized: {0}")]
    AlreadyInitialized(String),

    /// IO error (PERUN-005).
    #[error("[PERUN-005] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (PERUN-006).
    #[error("[PERUN-006] Serialization error: {0}")]
    Serialization(String),

    /// Schema or version mismatch while loading persisted state (PERUN-007).
    #[error("[PERUN-007] Schema mismatch for '{schema}': {message}")]
    SchemaMismatch {
        /// Schema identifier found or expected.
        schema: String,
        /// Details of the incompatibility.
        message: String,
    },

    /// Feature not implemented by this build (PERUN-008).
    #[error("[PERUN-008] Not implemented: {0}")]
    NotImplemented(String),

    /// Hardware lacks a capability a compressed layout requires (PERUN-009).
    ///
    /// Raised only in [`FallbackMode::Error`](crate::fallback::FallbackMode);
    /// the other modes fall back to an uncompressed representation.
    #[error("[PERUN-009] Unsupported hardware: {0}")]
    UnsupportedHardware(String),

    /// Internal runtime error (PERUN-010).
    ///
    /// Indicates an unexpected internal failure. Please report if encountered.
    #[error("[PERUN-010] Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Returns the error code (e.g., "PERUN-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "PERUN-001",
            Self::DimensionMismatch { .. } => "PERUN-002",
            Self::NotInitialized(_) => "PERUN-003",
            Self::AlreadyInitialized(_) => "PERUN-004",
            Self::Io(_) => "PERUN-005",
            Self::Serialization(_) => "PERUN-006",
            Self::SchemaMismatch { .. } => "PERUN-007",
            Self::NotImplemented(_) => "PERUN-008",
            Self::UnsupportedHardware(_) => "PERUN-009",
            Self::Runtime(_) => "PERUN-010",
        }
    }

    /// Returns true if this error is recoverable by the caller.
    ///
    /// Runtime errors indicate violated internal invariants and are not
    /// recoverable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Runtime(_))
    }

    /// Convenience constructor for dimension mismatches.
    #[must_use]
    pub const fn dimensions(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
