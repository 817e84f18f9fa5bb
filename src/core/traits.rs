//! Capability traits for the external collaborators of the pipeline.
//!
//! The orchestrator only sees these narrow interfaces; concrete engines and
//! storage clients live in [`crate::backends`].

use crate::core::error::{DownloadError, ScanError};
use crate::core::result::ScanOutcome;

use async_trait::async_trait;
use std::fmt::Debug;
use std::path::Path;

/// The core trait for malware scanning engines.
///
/// # Implementation Notes
///
/// - Implementations must be `Send + Sync` for use from worker tasks.
/// - `scan` never fails at the type level: connection problems, timeouts and
///   engine errors are reported as [`ScanOutcome::error`].
/// - Health checks should be lightweight and not require file data.
///
/// # Example Implementation
///
/// ```rust,ignore
/// use transferscan::core::{Scanner, ScanOutcome, ScanError};
/// use async_trait::async_trait;
/// use std::path::Path;
///
/// #[derive(Debug)]
/// struct MyScanner;
///
/// #[async_trait]
/// impl Scanner for MyScanner {
///     fn name(&self) -> &str {
///         "my-scanner"
///     }
///
///     async fn scan(&self, path: &Path) -> ScanOutcome {
///         ScanOutcome::clean()
///     }
///
///     async fn health_check(&self) -> Result<(), ScanError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Scanner: Send + Sync + Debug {
    /// Returns the name of this scanner engine.
    fn name(&self) -> &str;

    /// Scans the file at `path`.
    async fn scan(&self, path: &Path) -> ScanOutcome;

    /// Verifies the engine is reachable and operational.
    async fn health_check(&self) -> Result<(), ScanError>;
}

/// Fetches a remotely stored file into a local staging path.
#[async_trait]
pub trait Downloader: Send + Sync + Debug {
    /// Downloads `file_name` from `container` and writes it to `dest`.
    ///
    /// `dest` already exists and is empty; implementations overwrite it.
    async fn download(
        &self,
        file_name: &str,
        container: &str,
        dest: &Path,
    ) -> Result<(), DownloadError>;
}

/// An arc-wrapped scanner for shared ownership.
pub type ArcScanner = std::sync::Arc<dyn Scanner>;

/// An arc-wrapped downloader for shared ownership.
pub type ArcDownloader = std::sync::Arc<dyn Downloader>;
