//! Mock collaborators for testing.
//!
//! This module provides a configurable scanner and downloader that simulate
//! the pipeline's external engines without network access.

use crate::core::{DownloadError, Downloader, ScanError, ScanOutcome, Scanner};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What the mock scanner does when asked to scan.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Return this outcome.
    Outcome(ScanOutcome),
    /// Panic inside `scan`, to exercise the orchestrator's outer boundary.
    Panic(String),
}

/// A mock scanner for testing purposes.
///
/// # Examples
///
/// ```rust
/// use transferscan::backends::MockScanner;
/// use std::time::Duration;
///
/// // Reports every file as clean
/// let scanner = MockScanner::new_clean();
///
/// // Reports every file as infected
/// let scanner = MockScanner::new_threat("Eicar-Test-Signature");
///
/// // Reports an engine failure after a delay
/// let scanner = MockScanner::new_error("engine offline")
///     .with_latency(Duration::from_millis(100));
/// ```
#[derive(Debug)]
pub struct MockScanner {
    name: String,
    behavior: MockBehavior,
    latency: Option<Duration>,
    scan_count: AtomicU64,
    scanned: Mutex<Vec<PathBuf>>,
    unhealthy: AtomicBool,
}

impl MockScanner {
    /// Creates a mock scanner that reports clean.
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            behavior: MockBehavior::Outcome(ScanOutcome::clean()),
            latency: None,
            scan_count: AtomicU64::new(0),
            scanned: Mutex::new(Vec::new()),
            unhealthy: AtomicBool::new(false),
        }
    }

    /// Creates a mock scanner that always reports clean.
    pub fn new_clean() -> Self {
        Self::new()
    }

    /// Creates a mock scanner that always reports `threat_type`.
    pub fn new_threat(threat_type: impl Into<String>) -> Self {
        Self::new().with_behavior(MockBehavior::Outcome(ScanOutcome::threat(threat_type)))
    }

    /// Creates a mock scanner that always reports an engine error.
    pub fn new_error(message: impl Into<String>) -> Self {
        Self::new().with_behavior(MockBehavior::Outcome(ScanOutcome::error(message)))
    }

    /// Creates a mock scanner that panics while scanning.
    pub fn new_panicking(message: impl Into<String>) -> Self {
        Self::new().with_behavior(MockBehavior::Panic(message.into()))
    }

    /// Sets the behavior.
    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Sets the simulated latency for scans.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns the number of scans performed.
    pub fn scan_count(&self) -> u64 {
        self.scan_count.load(Ordering::Relaxed)
    }

    /// Returns the paths handed to `scan`, in order.
    pub fn scanned_paths(&self) -> Vec<PathBuf> {
        self.scanned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Sets the health status.
    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::Relaxed);
    }
}

impl Default for MockScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for MockScanner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scan(&self, path: &Path) -> ScanOutcome {
        self.scan_count.fetch_add(1, Ordering::Relaxed);
        self.scanned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(path.to_path_buf());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match &self.behavior {
            MockBehavior::Outcome(outcome) => outcome.clone(),
            MockBehavior::Panic(message) => panic!("{message}"),
        }
    }

    async fn health_check(&self) -> Result<(), ScanError> {
        if self.unhealthy.load(Ordering::Relaxed) {
            return Err(ScanError::engine_unavailable(
                &self.name,
                "mock scanner is unhealthy",
            ));
        }
        Ok(())
    }
}

/// A mock downloader that writes fixed content or fails.
///
/// ```rust
/// use transferscan::backends::MockDownloader;
///
/// let downloader = MockDownloader::with_content(b"hello".to_vec());
/// let failing = MockDownloader::failing();
/// ```
#[derive(Debug)]
pub struct MockDownloader {
    content: Option<Vec<u8>>,
    latency: Option<Duration>,
    requests: Mutex<Vec<(String, String)>>,
}

impl MockDownloader {
    /// Creates a downloader that writes `content` into the staging file.
    pub fn with_content(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: Some(content.into()),
            latency: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Creates a downloader whose every download fails with HTTP 404.
    pub fn failing() -> Self {
        Self {
            content: None,
            latency: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sets the simulated latency for downloads.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Returns the `(file_name, container)` pairs requested so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(
        &self,
        file_name: &str,
        container: &str,
        dest: &Path,
    ) -> Result<(), DownloadError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((file_name.to_string(), container.to_string()));

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match &self.content {
            Some(content) => {
                tokio::fs::write(dest, content).await?;
                Ok(())
            }
            None => Err(DownloadError::Status {
                status: 404,
                url: format!("mock://{container}/{file_name}"),
            }),
        }
    }
}
