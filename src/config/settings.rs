//! The immutable settings snapshot and its refresh handle.

use crate::config::sources::ConfigSource;
use crate::config::ConfigError;

use secrecy::SecretString;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Default storage host for upload accounts.
pub const DEFAULT_STORAGE_HOST: &str = "blob.core.usgovcloudapi.net";

/// Default clamd control socket.
pub const DEFAULT_CLAMAV_SOCKET: &str = "/var/run/clamav/clamd.ctl";

/// Certificate and key used by the TLS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    /// PEM certificate chain.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
}

/// Upload storage account the files are fetched from.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Storage account name.
    pub account_name: String,
    /// Shared access signature appended to every blob URL.
    pub sas_token: SecretString,
    /// Blob service host suffix, e.g. `blob.core.windows.net`.
    pub host: String,
}

/// Address and credential of one notification topic.
#[derive(Debug, Clone)]
pub struct TopicSettings {
    /// Topic endpoint URI.
    pub uri: String,
    /// Topic access key.
    pub key: SecretString,
}

/// How to reach clamd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClamAvSettings {
    /// Unix socket path; wins over `tcp_address` when both are set.
    pub socket_path: Option<PathBuf>,
    /// `host:port` of a TCP clamd.
    pub tcp_address: Option<String>,
    /// Upper bound for one INSTREAM exchange.
    pub scan_timeout: Duration,
}

/// Service configuration, built once and shared by reference.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Plaintext listener port.
    pub http_port: u16,
    /// TLS listener port.
    pub https_port: u16,
    /// TLS material; the TLS listener is disabled when absent.
    pub tls: Option<TlsPaths>,
    /// Directory for staging files.
    pub temp_dir: PathBuf,
    /// Number of worker tasks running transfers.
    pub max_concurrent_scans: usize,
    /// Number of accepted transfers that may wait for a worker.
    pub queue_capacity: usize,
    /// Delivery attempts per notification (1 = attempt once).
    pub publish_attempts: u32,
    /// Pause before the first redelivery; doubles for each further one.
    pub publish_backoff: Duration,
    /// Ceiling for a single redelivery pause.
    pub publish_max_backoff: Duration,
    /// Period of the configuration refresh task; `None` disables it.
    pub refresh_interval: Option<Duration>,
    /// How long shutdown waits for in-flight HTTP connections.
    pub shutdown_grace: Duration,
    /// Upload storage account.
    pub storage: StorageSettings,
    /// Topic receiving `Completed` events.
    pub completed_topic: TopicSettings,
    /// Topic receiving `Error` events.
    pub error_topic: TopicSettings,
    /// Scanner connection.
    pub clamav: ClamAvSettings,
}

impl Settings {
    /// Builds a snapshot from `source`, applying defaults and validation.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let cert = source.get("TLS_CERT_PATH");
        let key = source.get("TLS_KEY_PATH");
        let tls = match (cert, key) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::missing("TLS_KEY_PATH")),
            (None, Some(_)) => return Err(ConfigError::missing("TLS_CERT_PATH")),
        };

        let refresh_secs: u64 = parse_or(source, "CONFIG_REFRESH_SECS", 300)?;
        let clamav_tcp = source.get("CLAMAV_TCP");
        let clamav_socket = source
            .get("CLAMAV_SOCKET")
            .map(PathBuf::from)
            .or_else(|| clamav_tcp.is_none().then(|| PathBuf::from(DEFAULT_CLAMAV_SOCKET)));

        let settings = Self {
            http_port: parse_or(source, "HTTP_PORT", 80)?,
            https_port: parse_or(source, "HTTPS_PORT", 443)?,
            tls,
            temp_dir: source
                .get("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("transferscan")),
            max_concurrent_scans: parse_or(source, "MAX_CONCURRENT_SCANS", 4)?,
            queue_capacity: parse_or(source, "QUEUE_CAPACITY", 64)?,
            publish_attempts: parse_or(source, "PUBLISH_ATTEMPTS", 1)?,
            publish_backoff: Duration::from_millis(parse_or(source, "PUBLISH_BACKOFF_MS", 500)?),
            publish_max_backoff: Duration::from_millis(parse_or(
                source,
                "PUBLISH_MAX_BACKOFF_MS",
                10_000,
            )?),
            refresh_interval: (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs)),
            shutdown_grace: Duration::from_secs(parse_or(source, "SHUTDOWN_GRACE_SECS", 30)?),
            storage: StorageSettings {
                account_name: required(source, "UPLOAD_STORAGE_ACCOUNT_NAME")?,
                sas_token: secret(source, "UPLOAD_STORAGE_ACCOUNT_SAS_TOKEN")?,
                host: source
                    .get("STORAGE_HOST")
                    .unwrap_or_else(|| DEFAULT_STORAGE_HOST.to_string()),
            },
            completed_topic: TopicSettings {
                uri: required(source, "SCAN_COMPLETED_TOPIC_URI")?,
                key: secret(source, "SCAN_COMPLETED_TOPIC_KEY")?,
            },
            error_topic: TopicSettings {
                uri: required(source, "SCAN_ERROR_TOPIC_URI")?,
                key: secret(source, "SCAN_ERROR_TOPIC_KEY")?,
            },
            clamav: ClamAvSettings {
                socket_path: clamav_socket,
                tcp_address: clamav_tcp,
                scan_timeout: Duration::from_secs(parse_or(source, "SCAN_TIMEOUT_SECS", 300)?),
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_scans == 0 {
            return Err(ConfigError::invalid("MAX_CONCURRENT_SCANS", "0", "must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("QUEUE_CAPACITY", "0", "must be at least 1"));
        }
        if self.publish_attempts == 0 {
            return Err(ConfigError::invalid("PUBLISH_ATTEMPTS", "0", "must be at least 1"));
        }
        Ok(())
    }
}

fn required(source: &dyn ConfigSource, key: &str) -> Result<String, ConfigError> {
    source.get(key).ok_or_else(|| ConfigError::missing(key))
}

fn secret(source: &dyn ConfigSource, key: &str) -> Result<SecretString, ConfigError> {
    required(source, key).map(|value| SecretString::new(value.into()))
}

fn parse_or<T>(source: &dyn ConfigSource, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match source.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, &raw, e.to_string())),
    }
}

/// Shared access to the current [`Settings`] snapshot.
///
/// Readers clone the inner `Arc` and keep using that snapshot for the whole
/// transfer; [`SettingsHandle::refresh`] swaps in a new one atomically.
#[derive(Debug)]
pub struct SettingsHandle {
    current: RwLock<Arc<Settings>>,
    source: Option<Arc<dyn ConfigSource>>,
}

impl SettingsHandle {
    /// Loads the first snapshot from `source`.
    pub fn load(source: Arc<dyn ConfigSource>) -> Result<Self, ConfigError> {
        let settings = Settings::from_source(source.as_ref())?;
        Ok(Self {
            current: RwLock::new(Arc::new(settings)),
            source: Some(source),
        })
    }

    /// Wraps a fixed snapshot; `refresh` becomes a no-op.
    pub fn fixed(settings: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
            source: None,
        }
    }

    /// Returns the current snapshot.
    pub async fn snapshot(&self) -> Arc<Settings> {
        Arc::clone(&*self.current.read().await)
    }

    /// Re-reads the source and replaces the snapshot.
    ///
    /// On error the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<(), ConfigError> {
        let Some(source) = &self.source else {
            return Ok(());
        };
        source.reload()?;
        let settings = Settings::from_source(source.as_ref())?;
        *self.current.write().await = Arc::new(settings);
        tracing::info!("Configuration snapshot refreshed");
        Ok(())
    }

    /// Refreshes the snapshot every `period` until the handle is dropped
    /// everywhere else.
    pub fn spawn_refresh(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let handle = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(handle) = handle.upgrade() else {
                    break;
                };
                if let Err(e) = handle.refresh().await {
                    tracing::warn!(error = %e, "Configuration refresh failed, keeping previous snapshot");
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::sources::MapSource;
    use secrecy::ExposeSecret;

    pub(crate) fn required_values() -> MapSource {
        MapSource::new()
            .with("UPLOAD_STORAGE_ACCOUNT_NAME", "uploads")
            .with("UPLOAD_STORAGE_ACCOUNT_SAS_TOKEN", "sv=2024&sig=abc")
            .with("SCAN_COMPLETED_TOPIC_URI", "https://completed.example/api/events")
            .with("SCAN_COMPLETED_TOPIC_KEY", "completed-key")
            .with("SCAN_ERROR_TOPIC_URI", "https://error.example/api/events")
            .with("SCAN_ERROR_TOPIC_KEY", "error-key")
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_source(&required_values()).unwrap();
        assert_eq!(settings.http_port, 80);
        assert_eq!(settings.https_port, 443);
        assert!(settings.tls.is_none());
        assert_eq!(settings.max_concurrent_scans, 4);
        assert_eq!(settings.queue_capacity, 64);
        assert_eq!(settings.publish_attempts, 1);
        assert_eq!(settings.publish_backoff, Duration::from_millis(500));
        assert_eq!(settings.publish_max_backoff, Duration::from_secs(10));
        assert_eq!(settings.refresh_interval, Some(Duration::from_secs(300)));
        assert_eq!(settings.storage.host, DEFAULT_STORAGE_HOST);
        assert_eq!(settings.storage.sas_token.expose_secret(), "sv=2024&sig=abc");
        assert_eq!(
            settings.clamav.socket_path,
            Some(PathBuf::from(DEFAULT_CLAMAV_SOCKET))
        );
    }

    #[test]
    fn test_missing_required_key() {
        let err = Settings::from_source(&MapSource::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
    }

    #[test]
    fn test_invalid_number() {
        let source = required_values().with("HTTP_PORT", "eighty");
        let err = Settings::from_source(&source).unwrap_err();
        assert!(err.to_string().contains("HTTP_PORT"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let source = required_values().with("MAX_CONCURRENT_SCANS", "0");
        assert!(Settings::from_source(&source).is_err());
    }

    #[test]
    fn test_tls_requires_both_paths() {
        let source = required_values().with("TLS_CERT_PATH", "/etc/tls/cert.pem");
        assert!(Settings::from_source(&source).is_err());

        let source = source.with("TLS_KEY_PATH", "/etc/tls/key.pem");
        let settings = Settings::from_source(&source).unwrap();
        assert_eq!(
            settings.tls.unwrap().key_path,
            PathBuf::from("/etc/tls/key.pem")
        );
    }

    #[test]
    fn test_tcp_clamav_disables_default_socket() {
        let source = required_values().with("CLAMAV_TCP", "127.0.0.1:3310");
        let settings = Settings::from_source(&source).unwrap();
        assert_eq!(settings.clamav.socket_path, None);
        assert_eq!(settings.clamav.tcp_address.as_deref(), Some("127.0.0.1:3310"));
    }

    #[tokio::test]
    async fn test_fixed_handle_refresh_is_noop() {
        let settings = Settings::from_source(&required_values()).unwrap();
        let handle = SettingsHandle::fixed(settings);
        handle.refresh().await.unwrap();
        assert_eq!(handle.snapshot().await.http_port, 80);
    }
}
