//! Concrete collaborators for the transfer pipeline.
//!
//! ## Available Backends
//!
//! - [`blob`] - Downloads files from Azure Blob Storage with a SAS token
//! - [`clamav`] - ClamAV via the clamd socket protocol (requires `clamav` feature)
//! - [`mock`] - A mock scanner and downloader for testing
//!
//! ## Implementing a Custom Scanner
//!
//! To add a new scanning engine, implement the `Scanner` trait:
//!
//! ```rust,ignore
//! use transferscan::core::{Scanner, ScanOutcome, ScanError};
//! use async_trait::async_trait;
//! use std::path::Path;
//!
//! #[derive(Debug)]
//! pub struct MyScanner {
//!     // Your scanner's configuration
//! }
//!
//! #[async_trait]
//! impl Scanner for MyScanner {
//!     fn name(&self) -> &str {
//!         "my-scanner"
//!     }
//!
//!     async fn scan(&self, path: &Path) -> ScanOutcome {
//!         // Operational failures are reported, not raised
//!         ScanOutcome::error("not implemented")
//!     }
//!
//!     async fn health_check(&self) -> Result<(), ScanError> {
//!         Ok(())
//!     }
//! }
//! ```

pub mod blob;
pub mod mock;

#[cfg(feature = "clamav")]
pub mod clamav;

// Re-exports
pub use blob::BlobDownloader;
pub use mock::{MockBehavior, MockDownloader, MockScanner};

#[cfg(feature = "clamav")]
pub use clamav::{ClamAvConfig, ClamAvScanner};
