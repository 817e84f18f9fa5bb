//! # Transferscan
//!
//! A scan step for file-transfer pipelines: accept a request naming a stored
//! file, fetch it, scan it for malware, and publish the outcome on a
//! notification channel. The caller gets an immediate acknowledgment; the
//! verdict arrives out of band.
//!
//! ## Overview
//!
//! - A `/scan` request carries a [`TransferInfo`]. Valid requests are queued
//!   on a bounded [`WorkerPool`] and answered with `202 Accepted`.
//! - A worker runs the [`ScanOrchestrator`]: stage the file in a temporary
//!   slot, hand it to the [`Scanner`], release the slot.
//! - Exactly one notification ends every transfer: `Completed` with the
//!   annotated record, or `Error` with a [`TransferError`] that echoes the
//!   transfer's identity.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use transferscan::backends::{MockDownloader, MockScanner};
//! use transferscan::config::{EnvSource, SettingsHandle};
//! use transferscan::notify::{MemoryPublisher, NotificationPublisher};
//! use transferscan::{ScanOrchestrator, TransferInfo, TransferState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Arc::new(SettingsHandle::load(Arc::new(EnvSource::new()))?);
//!     let publisher = NotificationPublisher::new(
//!         Arc::new(MemoryPublisher::new()),
//!         Arc::clone(&settings),
//!     );
//!
//!     let orchestrator = ScanOrchestrator::builder()
//!         .downloader(MockDownloader::with_content(b"file content".to_vec()))
//!         .scanner(MockScanner::new_clean())
//!         .publisher(publisher)
//!         .settings(settings)
//!         .build()?;
//!
//!     let info = TransferInfo::new("t-1", "report.pdf", "uploads");
//!     assert_eq!(orchestrator.run(info).await, TransferState::Completed);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `default` - Includes the ClamAV backend
//! - `clamav` - ClamAV backend support (required by the `transferscan` binary)
//!
//! ## Architecture
//!
//! - **Core**: Transfer records, scanner outcome, capability traits, errors
//! - **Backends**: Blob downloader, ClamAV scanner, test doubles
//! - **Config**: Layered sources and the refreshable settings snapshot
//! - **Storage**: Guaranteed-release staging files
//! - **Manager**: The per-transfer state machine and the worker pool
//! - **Notify**: Event Grid envelopes and channel delivery
//! - **Http**: Request classification, listeners, graceful shutdown

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod backends;
pub mod config;
pub mod core;
pub mod http;
pub mod manager;
pub mod notify;
pub mod storage;

// Re-export commonly used types at the crate root
pub use crate::core::{
    DownloadError, Downloader, PublishError, ScanError, ScanInfo, ScanOutcome, Scanner,
    TransferError, TransferFailure, TransferInfo,
};

pub use crate::config::{ConfigError, Settings, SettingsHandle};
pub use crate::manager::{ScanOrchestrator, TransferState, WorkerPool};
pub use crate::notify::{EventKind, NotificationPublisher};

/// Prelude module for convenient imports.
///
/// ```rust
/// use transferscan::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigSource, Settings, SettingsHandle};
    pub use crate::core::{
        DownloadError, Downloader, ScanError, ScanInfo, ScanOutcome, Scanner, TransferError,
        TransferFailure, TransferInfo,
    };
    pub use crate::manager::{ScanOrchestrator, SubmitError, TransferState, WorkerPool};
    pub use crate::notify::{EventKind, EventPublisher, NotificationPublisher};
    pub use crate::storage::{TempSlot, TempStorage};
}
