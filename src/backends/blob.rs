//! Azure Blob Storage downloader.
//!
//! Files are fetched with a plain `GET` on
//! `https://{account}.{host}/{container}/{blob}?{sas}` and streamed chunk by
//! chunk into the staging file. Account, host and SAS token come from the
//! current settings snapshot, so a refreshed token is picked up by the next
//! download.

use crate::config::{SettingsHandle, StorageSettings};
use crate::core::{DownloadError, Downloader};

use async_trait::async_trait;
use reqwest::Url;
use secrecy::ExposeSecret;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Downloads blobs from the upload storage account.
#[derive(Debug, Clone)]
pub struct BlobDownloader {
    client: reqwest::Client,
    settings: Arc<SettingsHandle>,
    endpoint: Option<Url>,
}

impl BlobDownloader {
    /// Creates a downloader whose requests time out after `timeout`.
    pub fn new(settings: Arc<SettingsHandle>, timeout: Duration) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DownloadError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            settings,
            endpoint: None,
        })
    }

    /// Uses `endpoint` as the account URL instead of
    /// `https://{account}.{host}`, e.g. for a local storage emulator.
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    fn account_url(&self, storage: &StorageSettings) -> Result<Url, DownloadError> {
        match &self.endpoint {
            Some(endpoint) => Ok(endpoint.clone()),
            None => Url::parse(&format!("https://{}.{}", storage.account_name, storage.host))
                .map_err(|e| DownloadError::Transport(format!("invalid storage account URL: {e}"))),
        }
    }
}

/// Builds the blob URL without credentials.
///
/// `name` may contain `/` separators for virtual directories; each segment
/// is percent-encoded on its own.
pub fn blob_url(account_url: &Url, container: &str, name: &str) -> Result<Url, DownloadError> {
    let invalid = || DownloadError::InvalidLocation {
        container: container.to_string(),
        name: name.to_string(),
    };
    if container.is_empty() || name.is_empty() {
        return Err(invalid());
    }

    let mut url = account_url.clone();
    url.set_query(None);
    {
        let mut segments = url.path_segments_mut().map_err(|()| invalid())?;
        segments.pop_if_empty().push(container);
        segments.extend(name.split('/').filter(|s| !s.is_empty()));
    }
    Ok(url)
}

#[async_trait]
impl Downloader for BlobDownloader {
    async fn download(
        &self,
        file_name: &str,
        container: &str,
        dest: &Path,
    ) -> Result<(), DownloadError> {
        let settings = self.settings.snapshot().await;
        let url = blob_url(&self.account_url(&settings.storage)?, container, file_name)?;

        let mut signed = url.clone();
        let sas = settings.storage.sas_token.expose_secret();
        signed.set_query(Some(sas.trim_start_matches('?')));

        let mut response = self
            .client
            .get(signed)
            .send()
            .await
            .map_err(|e| DownloadError::Transport(e.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(DownloadError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut bytes = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DownloadError::Transport(e.without_url().to_string()))?
        {
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::debug!(url = %url, bytes, "Blob downloaded");
        Ok(())
    }
}
