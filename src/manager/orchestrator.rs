//! The per-transfer pipeline: download, scan, clean up, notify.

use crate::config::SettingsHandle;
use crate::core::{
    ArcDownloader, ArcScanner, Downloader, ScanError, Scanner, StorageError, TransferError,
    TransferFailure, TransferInfo,
};
use crate::notify::NotificationPublisher;
use crate::storage::TempStorage;

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// Progress of one transfer through the pipeline.
///
/// [`ScanOrchestrator::run`] returns the last state reached: `Completed` on
/// success, the matching `*Failed` state when a stage failed, or `Errored`
/// for failures outside the named stages (staging allocation, panics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Accepted, nothing done yet.
    Received,
    /// Fetching the file into staging.
    Downloading,
    /// The file is staged.
    Downloaded,
    /// The download failed.
    DownloadFailed,
    /// Waiting for the engine's verdict.
    Scanning,
    /// The verdict is attached.
    Scanned,
    /// The engine reported an error.
    ScanFailed,
    /// Releasing the staging file.
    CleaningUp,
    /// The staging file is gone.
    Cleaned,
    /// The staging file could not be removed.
    CleanupFailed,
    /// Success; a `Completed` notification was attempted.
    Completed,
    /// Failure outside the named stages.
    Errored,
}

impl TransferState {
    /// Returns `true` for `Completed`.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    fn failed(self) -> Self {
        match self {
            Self::Downloading => Self::DownloadFailed,
            Self::Scanning => Self::ScanFailed,
            Self::CleaningUp => Self::CleanupFailed,
            _ => Self::Errored,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Builder for a [`ScanOrchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    downloader: Option<ArcDownloader>,
    scanner: Option<ArcScanner>,
    publisher: Option<NotificationPublisher>,
    settings: Option<Arc<SettingsHandle>>,
}

impl OrchestratorBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the downloader.
    pub fn downloader<D: Downloader + 'static>(mut self, downloader: D) -> Self {
        self.downloader = Some(Arc::new(downloader));
        self
    }

    /// Sets a shared downloader.
    pub fn arc_downloader(mut self, downloader: ArcDownloader) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Sets the scanner.
    pub fn scanner<S: Scanner + 'static>(mut self, scanner: S) -> Self {
        self.scanner = Some(Arc::new(scanner));
        self
    }

    /// Sets a shared scanner.
    pub fn arc_scanner(mut self, scanner: ArcScanner) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Sets the notification publisher.
    pub fn publisher(mut self, publisher: NotificationPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Sets the settings handle; staging uses its `temp_dir`.
    pub fn settings(mut self, settings: Arc<SettingsHandle>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Builds the orchestrator.
    pub fn build(self) -> Result<ScanOrchestrator, ScanError> {
        let missing = |what: &str| ScanError::configuration(format!("{what} is required"));
        Ok(ScanOrchestrator {
            downloader: self.downloader.ok_or_else(|| missing("a downloader"))?,
            scanner: self.scanner.ok_or_else(|| missing("a scanner"))?,
            publisher: self.publisher.ok_or_else(|| missing("a publisher"))?,
            settings: self.settings.ok_or_else(|| missing("a settings handle"))?,
        })
    }
}

/// Runs one transfer end to end and publishes exactly one notification.
#[derive(Debug)]
pub struct ScanOrchestrator {
    downloader: ArcDownloader,
    scanner: ArcScanner,
    publisher: NotificationPublisher,
    settings: Arc<SettingsHandle>,
}

impl ScanOrchestrator {
    /// Creates a new builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Returns the scanner engine.
    pub fn scanner(&self) -> &ArcScanner {
        &self.scanner
    }

    /// Returns the notification publisher.
    pub fn publisher(&self) -> &NotificationPublisher {
        &self.publisher
    }

    /// Processes `info` and reports the outcome on the matching channel.
    ///
    /// Never fails and never unwinds: errors and panics raised anywhere in
    /// the pipeline become an `Unhandled` error notification.
    pub async fn run(&self, info: TransferInfo) -> TransferState {
        let span = tracing::info_span!("transfer", transfer_id = %info.transfer_id());
        self.run_inner(info).instrument(span).await
    }

    async fn run_inner(&self, info: TransferInfo) -> TransferState {
        tracing::info!(
            file_name = %info.file_name(),
            container = %info.file_path(),
            "Scan started"
        );

        let mut state = TransferState::Received;
        let result = AssertUnwindSafe(self.pipeline(info.clone(), &mut state))
            .catch_unwind()
            .await;

        let failure = match result {
            Ok(Ok(annotated)) => {
                let delivery = self.publisher.notify_completed(&annotated).await;
                tracing::info!(?delivery, "Scan completed");
                return TransferState::Completed;
            }
            Ok(Err(failure)) => failure,
            Err(panic) => TransferFailure::unhandled(panic_detail(panic.as_ref())),
        };

        let state = state.failed();
        tracing::warn!(
            %state,
            failure = failure.kind(),
            error = %failure,
            "Scan failed"
        );
        let error = TransferError::from_transfer(&info, failure.to_string());
        self.publisher.notify_error(&error).await;
        state
    }

    async fn pipeline(
        &self,
        info: TransferInfo,
        state: &mut TransferState,
    ) -> Result<TransferInfo, TransferFailure> {
        let settings = self.settings.snapshot().await;
        let storage = TempStorage::new(&settings.temp_dir);
        let slot = storage
            .acquire()
            .await
            .map_err(|e| TransferFailure::unhandled(e.to_string()))?;

        *state = TransferState::Downloading;
        self.downloader
            .download(info.file_name(), info.file_path(), slot.path())
            .await
            .map_err(|source| TransferFailure::Download { source })?;
        *state = TransferState::Downloaded;
        tracing::debug!(path = %slot.path().display(), "File staged");

        *state = TransferState::Scanning;
        let outcome = self.scanner.scan(slot.path()).await;
        let Some(scan_info) = outcome.verdict() else {
            return Err(TransferFailure::ScanExecution {
                message: outcome.error_message().to_string(),
            });
        };
        *state = TransferState::Scanned;
        tracing::info!(
            engine = %self.scanner.name(),
            is_threat = scan_info.is_threat,
            threat_type = ?scan_info.threat_type,
            "Verdict received"
        );
        let annotated = info.with_scan_info(scan_info);

        *state = TransferState::CleaningUp;
        storage.release(slot).await.map_err(|e| match e {
            StorageError::Release { path, source } => TransferFailure::Cleanup { path, source },
            other => TransferFailure::unhandled(other.to_string()),
        })?;
        *state = TransferState::Cleaned;

        Ok(annotated)
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockDownloader, MockScanner};
    use crate::config::{required_values, Settings};
    use crate::core::ScanOutcome;
    use crate::notify::{EventKind, MemoryPublisher};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Gives a clean verdict after removing the staged file out from under
    /// the pipeline.
    #[derive(Debug, Default)]
    struct DeletingScanner {
        scanned: Mutex<Option<PathBuf>>,
    }

    #[async_trait]
    impl Scanner for DeletingScanner {
        fn name(&self) -> &str {
            "deleting"
        }

        async fn scan(&self, path: &Path) -> ScanOutcome {
            if let Err(e) = tokio::fs::remove_file(path).await {
                return ScanOutcome::error(e.to_string());
            }
            *self.scanned.lock().unwrap() = Some(path.to_path_buf());
            ScanOutcome::clean()
        }

        async fn health_check(&self) -> Result<(), ScanError> {
            Ok(())
        }
    }

    struct Harness {
        memory: Arc<MemoryPublisher>,
        staging: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                memory: Arc::new(MemoryPublisher::new()),
                staging: TempDir::new().unwrap(),
            }
        }

        fn orchestrator(&self, downloader: MockDownloader, scanner: ArcScanner) -> ScanOrchestrator {
            let source = required_values().with("TEMP_DIR", self.staging.path().to_string_lossy());
            let settings = Arc::new(SettingsHandle::fixed(Settings::from_source(&source).unwrap()));
            ScanOrchestrator::builder()
                .downloader(downloader)
                .arc_scanner(scanner)
                .publisher(NotificationPublisher::new(
                    Arc::clone(&self.memory) as _,
                    Arc::clone(&settings),
                ))
                .settings(settings)
                .build()
                .unwrap()
        }

        fn staged_files(&self) -> usize {
            std::fs::read_dir(self.staging.path()).unwrap().count()
        }
    }

    fn transfer() -> TransferInfo {
        TransferInfo::new("t-100", "report.pdf", "uploads")
            .with_originating_user("alice@example.org")
            .with_on_behalf_of_user("bob@example.org")
            .with_origination_date_time("2024-05-01T10:00:00Z")
    }

    #[tokio::test]
    async fn test_clean_file_completes_and_releases_staging() {
        let harness = Harness::new();
        let scanner = Arc::new(MockScanner::new_clean());
        let orchestrator = harness.orchestrator(
            MockDownloader::with_content(b"%PDF".to_vec()),
            Arc::clone(&scanner) as _,
        );

        assert_eq!(orchestrator.run(transfer()).await, TransferState::Completed);

        let completed = harness.memory.events_of(EventKind::Completed);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].data["transferId"], "t-100");
        assert_eq!(completed[0].data["scanInfo"]["isThreat"], false);
        assert!(harness.memory.events_of(EventKind::Error).is_empty());
        assert_eq!(scanner.scan_count(), 1);
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_threat_is_reported_as_completed() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(
            MockDownloader::with_content(b"X5O!P%@AP".to_vec()),
            Arc::new(MockScanner::new_threat("Eicar-Test-Signature")),
        );

        assert_eq!(orchestrator.run(transfer()).await, TransferState::Completed);

        let completed = harness.memory.events_of(EventKind::Completed);
        assert_eq!(completed[0].data["scanInfo"]["isThreat"], true);
        assert_eq!(
            completed[0].data["scanInfo"]["threatType"],
            "Eicar-Test-Signature"
        );
    }

    #[tokio::test]
    async fn test_download_failure_skips_scan() {
        let harness = Harness::new();
        let scanner = Arc::new(MockScanner::new_clean());
        let orchestrator =
            harness.orchestrator(MockDownloader::failing(), Arc::clone(&scanner) as _);

        assert_eq!(orchestrator.run(transfer()).await, TransferState::DownloadFailed);

        let errors = harness.memory.events_of(EventKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].data["message"],
            "Can't save the file received in the request"
        );
        assert_eq!(errors[0].data["originatingUserPrincipalName"], "alice@example.org");
        assert_eq!(scanner.scan_count(), 0);
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_scanner_error_releases_staging() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(
            MockDownloader::with_content(b"data".to_vec()),
            Arc::new(MockScanner::new_error("clamd: can't allocate memory")),
        );

        assert_eq!(orchestrator.run(transfer()).await, TransferState::ScanFailed);

        let errors = harness.memory.events_of(EventKind::Error);
        assert_eq!(
            errors[0].data["message"],
            "Error during the scan Error message: clamd: can't allocate memory"
        );
        assert!(harness.memory.events_of(EventKind::Completed).is_empty());
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_scanner_panic_becomes_unhandled_error() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator(
            MockDownloader::with_content(b"data".to_vec()),
            Arc::new(MockScanner::new_panicking("engine exploded")),
        );

        assert_eq!(orchestrator.run(transfer()).await, TransferState::ScanFailed);

        let errors = harness.memory.events_of(EventKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].data["message"],
            "Unhandled error during scan: engine exploded"
        );
        assert_eq!(harness.staged_files(), 0);
    }

    #[tokio::test]
    async fn test_unusable_staging_dir_is_unhandled() {
        let harness = Harness::new();
        let blocker = harness.staging.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let source = required_values().with("TEMP_DIR", blocker.to_string_lossy());
        let settings = Arc::new(SettingsHandle::fixed(Settings::from_source(&source).unwrap()));
        let orchestrator = ScanOrchestrator::builder()
            .downloader(MockDownloader::with_content(b"data".to_vec()))
            .scanner(MockScanner::new_clean())
            .publisher(NotificationPublisher::new(
                Arc::clone(&harness.memory) as _,
                Arc::clone(&settings),
            ))
            .settings(settings)
            .build()
            .unwrap();

        assert_eq!(orchestrator.run(transfer()).await, TransferState::Errored);
        let errors = harness.memory.events_of(EventKind::Error);
        assert!(errors[0].data["message"]
            .as_str()
            .unwrap()
            .starts_with("Unhandled error during scan:"));
    }

    #[tokio::test]
    async fn test_cleanup_failure_discards_verdict() {
        let harness = Harness::new();
        let scanner = Arc::new(DeletingScanner::default());
        let orchestrator = harness.orchestrator(
            MockDownloader::with_content(b"data".to_vec()),
            Arc::clone(&scanner) as _,
        );

        assert_eq!(orchestrator.run(transfer()).await, TransferState::CleanupFailed);

        let staged = scanner.scanned.lock().unwrap().clone().unwrap();
        assert!(harness.memory.events_of(EventKind::Completed).is_empty());
        let errors = harness.memory.events_of(EventKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].data["message"],
            format!(
                "Exception caught when trying to delete temp file: {}.",
                staged.display()
            )
        );
        assert_eq!(errors[0].data["transferId"], "t-100");
        assert!(errors[0].data.get("scanInfo").is_none());
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = ScanOrchestrator::builder().build().unwrap_err();
        assert!(err.to_string().contains("downloader"));
    }

    #[test]
    fn test_failed_state_mapping() {
        assert_eq!(TransferState::Downloading.failed(), TransferState::DownloadFailed);
        assert_eq!(TransferState::Scanning.failed(), TransferState::ScanFailed);
        assert_eq!(TransferState::CleaningUp.failed(), TransferState::CleanupFailed);
        assert_eq!(TransferState::Received.failed(), TransferState::Errored);
    }
}
