//! Core types and traits for the transferscan library.
//!
//! - [`types`] - Transfer records: `TransferInfo`, `ScanInfo`, `TransferError`
//! - [`result`] - The scanner's `ScanOutcome`
//! - [`traits`] - The `Scanner` and `Downloader` capabilities
//! - [`error`] - Structured error types

pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::{DownloadError, PublishError, ScanError, StorageError, TransferFailure};
pub use result::ScanOutcome;
pub use traits::{ArcDownloader, ArcScanner, Downloader, Scanner};
pub use types::{ScanInfo, TransferError, TransferInfo};
