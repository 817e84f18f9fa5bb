//! Error types for the transferscan library.
//!
//! This module provides structured, typed errors for every failure scenario
//! in the pipeline. The library never panics; all errors are returned as
//! `Result` values, and every transfer-level failure ends up as a
//! [`TransferFailure`] that is published on the error channel.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Terminal failure of a single transfer.
///
/// Each variant maps to exactly one error notification. The `Display`
/// output is the human-readable `message` carried by the published
/// [`TransferError`](crate::core::TransferError).
#[derive(Debug, Error)]
pub enum TransferFailure {
    /// The request declared a non-JSON content type.
    #[error("Wrong request Content-type: {content_type}")]
    ContentType {
        /// The content type the caller actually sent.
        content_type: String,
    },

    /// The request body could not be parsed into a transfer record.
    #[error("Malformed request body: {reason}")]
    MalformedRequest {
        /// Parser diagnostic.
        reason: String,
    },

    /// The worker pool refused the job.
    #[error("{reason}")]
    QueueRejected {
        /// Why admission failed.
        reason: String,
    },

    /// The file could not be fetched into local staging.
    #[error("Can't save the file received in the request")]
    Download {
        /// Underlying downloader error.
        #[source]
        source: DownloadError,
    },

    /// The scanning engine reported an operational error.
    #[error("Error during the scan Error message: {message}")]
    ScanExecution {
        /// Message reported by the engine.
        message: String,
    },

    /// The staging file could not be removed after a successful scan.
    #[error("Exception caught when trying to delete temp file: {}.", path.display())]
    Cleanup {
        /// Path of the staging file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Anything the pipeline did not anticipate, including panics.
    #[error("Unhandled error during scan: {detail}")]
    Unhandled {
        /// Description of what went wrong.
        detail: String,
    },
}

impl TransferFailure {
    /// Returns a stable, lowercase name for the failure kind (for logs).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContentType { .. } => "content_type",
            Self::MalformedRequest { .. } => "malformed_request",
            Self::QueueRejected { .. } => "queue_rejected",
            Self::Download { .. } => "download",
            Self::ScanExecution { .. } => "scan_execution",
            Self::Cleanup { .. } => "cleanup",
            Self::Unhandled { .. } => "unhandled",
        }
    }

    /// Creates a `ContentType` failure.
    pub fn content_type(content_type: impl Into<String>) -> Self {
        Self::ContentType {
            content_type: content_type.into(),
        }
    }

    /// Creates an `Unhandled` failure.
    pub fn unhandled(detail: impl Into<String>) -> Self {
        Self::Unhandled {
            detail: detail.into(),
        }
    }
}

/// Errors raised while fetching a remote file into local staging.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The storage endpoint answered with a non-success status.
    #[error("storage returned HTTP {status} for '{url}'")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL, without credentials.
        url: String,
    },

    /// The request could not be sent or the body could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The requested blob or container name is unusable.
    #[error("invalid blob location '{container}/{name}'")]
    InvalidLocation {
        /// Container (or path) component.
        container: String,
        /// Blob name component.
        name: String,
    },

    /// Writing the staging file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a notification transport.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The channel has no usable endpoint configured.
    #[error("no endpoint configured for channel '{channel}'")]
    MissingEndpoint {
        /// Channel name.
        channel: String,
    },

    /// The endpoint rejected the event.
    #[error("channel '{channel}' rejected event with HTTP {status}")]
    Rejected {
        /// Channel name.
        channel: String,
        /// HTTP status code.
        status: u16,
    },

    /// The request could not be sent.
    #[error("transport error on channel '{channel}': {message}")]
    Transport {
        /// Channel name.
        channel: String,
        /// Error message.
        message: String,
    },

    /// The payload could not be serialized.
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the temp storage manager.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The staging directory could not be created or written.
    #[error("cannot create staging file in '{}': {source}", dir.display())]
    Acquire {
        /// Staging directory.
        dir: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The staging file could not be removed.
    #[error("cannot remove staging file '{}': {source}", path.display())]
    Release {
        /// Staging file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors internal to a scanning backend.
///
/// Backends convert these into [`ScanOutcome::error`](crate::core::ScanOutcome::error)
/// before returning, so they never cross the [`Scanner`](crate::core::Scanner) boundary.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The scanning engine is unavailable or not responding.
    #[error("engine '{engine}' is unavailable: {reason}")]
    EngineUnavailable {
        /// Name of the engine that is unavailable.
        engine: String,
        /// Human-readable reason for unavailability.
        reason: String,
    },

    /// The scan operation timed out.
    #[error("scan timed out after {elapsed:?} on engine '{engine}'")]
    Timeout {
        /// Name of the engine that timed out.
        engine: String,
        /// How long the operation ran before timing out.
        elapsed: Duration,
    },

    /// Failed to connect to the scanning engine.
    #[error("connection to engine '{engine}' failed: {message}")]
    ConnectionFailed {
        /// Name of the engine.
        engine: String,
        /// Error message describing the failure.
        message: String,
    },

    /// The file exceeds the maximum allowed size.
    #[error("file size {size} bytes exceeds maximum {max} bytes")]
    FileTooLarge {
        /// Actual file size in bytes.
        size: u64,
        /// Maximum allowed size in bytes.
        max: u64,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl ScanError {
    /// Creates an `EngineUnavailable` error.
    pub fn engine_unavailable(engine: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            engine: engine.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(engine: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            engine: engine.into(),
            elapsed,
        }
    }

    /// Creates a `ConnectionFailed` error.
    pub fn connection_failed(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            engine: engine.into(),
            message: message.into(),
        }
    }

    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
