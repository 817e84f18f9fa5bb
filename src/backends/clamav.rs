//! ClamAV scanning backend.
//!
//! This module provides a scanner implementation that communicates with
//! ClamAV via its socket protocol (clamd).
//!
//! # Requirements
//!
//! - ClamAV daemon (clamd) must be running
//! - Access to the clamd socket (Unix socket or TCP)
//!
//! # Protocol
//!
//! Uses the null-terminated `zINSTREAM` command: the file is sent as
//! length-prefixed chunks followed by a zero-length chunk, and clamd answers
//! with a single `stream: ...` line.

use crate::config::ClamAvSettings;
use crate::core::{ScanError, ScanOutcome, Scanner};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const ENGINE: &str = "clamav";
const CHUNK_SIZE: usize = 64 * 1024;

/// ClamAV scanner configuration.
#[derive(Debug, Clone)]
pub struct ClamAvConfig {
    /// Path to the Unix socket.
    pub socket_path: Option<PathBuf>,

    /// TCP host and port (alternative to socket).
    pub tcp_address: Option<String>,

    /// Connection timeout.
    pub connection_timeout: Duration,

    /// Upper bound for a whole INSTREAM exchange.
    pub scan_timeout: Duration,

    /// Files above this size are not sent.
    pub max_file_size: u64,
}

impl Default for ClamAvConfig {
    fn default() -> Self {
        Self {
            socket_path: Some(PathBuf::from(crate::config::DEFAULT_CLAMAV_SOCKET)),
            tcp_address: None,
            connection_timeout: Duration::from_secs(10),
            scan_timeout: Duration::from_secs(300),
            max_file_size: 100 * 1024 * 1024, // 100 MB
        }
    }
}

impl ClamAvConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from the service settings.
    pub fn from_settings(settings: &ClamAvSettings) -> Self {
        Self {
            socket_path: settings.socket_path.clone(),
            tcp_address: settings.tcp_address.clone(),
            scan_timeout: settings.scan_timeout,
            ..Self::default()
        }
    }

    /// Uses a Unix socket.
    pub fn with_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self.tcp_address = None;
        self
    }

    /// Uses a TCP connection.
    pub fn with_tcp(mut self, address: impl Into<String>) -> Self {
        self.tcp_address = Some(address.into());
        self.socket_path = None;
        self
    }

    /// Sets the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets the scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Sets the maximum file size.
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }
}

/// Either transport clamd listens on.
trait ClamdStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ClamdStream for T {}

/// ClamAV scanner implementation.
///
/// # Example
///
/// ```rust,ignore
/// use transferscan::backends::ClamAvScanner;
/// use transferscan::backends::clamav::ClamAvConfig;
///
/// let config = ClamAvConfig::new()
///     .with_tcp("127.0.0.1:3310");
///
/// let scanner = ClamAvScanner::new(config)?;
/// ```
#[derive(Debug)]
pub struct ClamAvScanner {
    config: ClamAvConfig,
}

impl ClamAvScanner {
    /// Creates a new ClamAV scanner with the given configuration.
    pub fn new(config: ClamAvConfig) -> Result<Self, ScanError> {
        if config.socket_path.is_none() && config.tcp_address.is_none() {
            return Err(ScanError::configuration(
                "Either socket_path or tcp_address must be specified",
            ));
        }
        #[cfg(not(unix))]
        {
            if config.tcp_address.is_none() {
                return Err(ScanError::configuration(
                    "Unix sockets not supported on this platform",
                ));
            }
        }

        Ok(Self { config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClamAvConfig {
        &self.config
    }

    /// Parses a clamd reply such as `stream: Eicar-Test-Signature FOUND`.
    fn parse_response(response: &str) -> ScanOutcome {
        let response = response.trim_end_matches('\0').trim();

        if response.ends_with("OK") {
            ScanOutcome::clean()
        } else if let Some(rest) = response.strip_suffix("FOUND") {
            let threat_name = rest
                .split_once(':')
                .map(|(_, name)| name)
                .unwrap_or(rest)
                .trim();
            let threat_name = if threat_name.is_empty() {
                "Unknown"
            } else {
                threat_name
            };
            ScanOutcome::threat(threat_name)
        } else if let Some(rest) = response.strip_suffix("ERROR") {
            ScanOutcome::error(rest.trim().trim_start_matches("stream:").trim())
        } else {
            ScanOutcome::error(format!("Unexpected response: {response}"))
        }
    }

    async fn open_stream(&self) -> std::io::Result<Box<dyn ClamdStream>> {
        #[cfg(unix)]
        {
            if let Some(socket_path) = &self.config.socket_path {
                let stream = tokio::net::UnixStream::connect(socket_path).await?;
                return Ok(Box::new(stream));
            }
        }
        let address = self.config.tcp_address.as_deref().unwrap_or_default();
        let stream = tokio::net::TcpStream::connect(address).await?;
        Ok(Box::new(stream))
    }

    async fn connect(&self) -> Result<Box<dyn ClamdStream>, ScanError> {
        tokio::time::timeout(self.config.connection_timeout, self.open_stream())
            .await
            .map_err(|_| ScanError::connection_failed(ENGINE, "connection timed out"))?
            .map_err(|e| ScanError::connection_failed(ENGINE, e.to_string()))
    }

    /// Streams the file at `path` to clamd and returns the raw reply.
    async fn scan_file(&self, path: &Path) -> Result<String, ScanError> {
        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        if size > self.config.max_file_size {
            return Err(ScanError::FileTooLarge {
                size,
                max: self.config.max_file_size,
            });
        }

        let mut stream = self.connect().await?;
        let io_err = |e: std::io::Error| ScanError::connection_failed(ENGINE, e.to_string());

        stream.write_all(b"zINSTREAM\0").await.map_err(io_err)?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream
                .write_all(&(n as u32).to_be_bytes())
                .await
                .map_err(io_err)?;
            stream.write_all(&buf[..n]).await.map_err(io_err)?;
        }

        // Zero-length chunk ends the stream
        stream.write_all(&0u32.to_be_bytes()).await.map_err(io_err)?;
        stream.flush().await.map_err(io_err)?;

        let mut response = String::new();
        stream.read_to_string(&mut response).await.map_err(io_err)?;
        Ok(response)
    }
}

#[async_trait]
impl Scanner for ClamAvScanner {
    fn name(&self) -> &str {
        ENGINE
    }

    async fn scan(&self, path: &Path) -> ScanOutcome {
        let start = Instant::now();
        let result = tokio::time::timeout(self.config.scan_timeout, self.scan_file(path))
            .await
            .unwrap_or_else(|_| Err(ScanError::timeout(ENGINE, start.elapsed())));

        match result {
            Ok(response) => {
                let outcome = Self::parse_response(&response);
                tracing::debug!(
                    duration_ms = start.elapsed().as_millis(),
                    response = %response.trim_end_matches('\0').trim(),
                    "clamd replied"
                );
                outcome
            }
            Err(e) => {
                tracing::warn!(error = %e, "clamd scan failed");
                ScanOutcome::error(e.to_string())
            }
        }
    }

    async fn health_check(&self) -> Result<(), ScanError> {
        let mut stream = self.connect().await?;
        let io_err = |e: std::io::Error| ScanError::connection_failed(ENGINE, e.to_string());

        stream.write_all(b"zPING\0").await.map_err(io_err)?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await.map_err(io_err)?;

        if response.trim_end_matches('\0').trim() == "PONG" {
            Ok(())
        } else {
            Err(ScanError::engine_unavailable(
                ENGINE,
                format!("Unexpected response: {response}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serves one clamd exchange and returns the bytes of the streamed file.
    async fn fake_clamd(reply: &'static str) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut command = [0u8; 10];
            socket.read_exact(&mut command).await.unwrap();
            assert_eq!(&command, b"zINSTREAM\0");

            let mut received = Vec::new();
            loop {
                let len = socket.read_u32().await.unwrap() as usize;
                if len == 0 {
                    break;
                }
                let mut chunk = vec![0u8; len];
                socket.read_exact(&mut chunk).await.unwrap();
                received.extend_from_slice(&chunk);
            }
            socket.write_all(reply.as_bytes()).await.unwrap();
            received
        });
        (address, handle)
    }

    #[test]
    fn test_parse_response_clean() {
        let outcome = ClamAvScanner::parse_response("stream: OK\0");
        assert!(outcome.is_clean());
    }

    #[test]
    fn test_parse_response_infected() {
        let outcome = ClamAvScanner::parse_response("stream: Eicar-Test-Signature FOUND\0");
        assert!(outcome.is_threat);
        assert_eq!(outcome.threat_type.as_deref(), Some("Eicar-Test-Signature"));
    }

    #[test]
    fn test_parse_response_error() {
        let outcome = ClamAvScanner::parse_response("INSTREAM size limit exceeded. ERROR");
        assert!(outcome.is_error);
        assert_eq!(outcome.error_message(), "INSTREAM size limit exceeded.");
    }

    #[test]
    fn test_config_builder() {
        let config = ClamAvConfig::new()
            .with_socket("/custom/path.sock")
            .with_scan_timeout(Duration::from_secs(60));

        assert_eq!(
            config.socket_path,
            Some(PathBuf::from("/custom/path.sock"))
        );
        assert_eq!(config.scan_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_requires_connection_method() {
        let config = ClamAvConfig {
            socket_path: None,
            tcp_address: None,
            ..ClamAvConfig::default()
        };
        assert!(ClamAvScanner::new(config).is_err());
    }

    #[tokio::test]
    async fn test_instream_over_tcp() {
        let (address, server) = fake_clamd("stream: Eicar-Test-Signature FOUND\0").await;
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sample");
        std::fs::write(&path, b"X5O!P%@AP[4\\PZX54(P^)7CC)7}").unwrap();

        let scanner = ClamAvScanner::new(ClamAvConfig::new().with_tcp(address)).unwrap();
        let outcome = scanner.scan(&path).await;

        assert!(outcome.is_threat);
        assert_eq!(server.await.unwrap(), std::fs::read(&path).unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_scan_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sample");
        std::fs::write(&path, b"data").unwrap();

        let scanner = ClamAvScanner::new(
            ClamAvConfig::new().with_socket(dir.path().join("missing.ctl")),
        )
        .unwrap();
        let outcome = scanner.scan(&path).await;
        assert!(outcome.is_error);
        assert!(scanner.health_check().await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_file_is_not_sent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sample");
        std::fs::write(&path, vec![0u8; 32]).unwrap();

        let scanner = ClamAvScanner::new(
            ClamAvConfig::new()
                .with_tcp("127.0.0.1:9")
                .with_max_file_size(16),
        )
        .unwrap();
        let outcome = scanner.scan(&path).await;
        assert!(outcome.error_message().contains("exceeds maximum"));
    }
}
