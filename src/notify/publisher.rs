//! Channel routing and delivery of terminal notifications.

use crate::config::SettingsHandle;
use crate::core::{PublishError, TransferError, TransferInfo};
use crate::manager::retry::{retry_async, RetryConfig};
use crate::notify::events::{emit_completed, emit_error, emit_lost, EventEnvelope, EventKind};

use async_trait::async_trait;
use secrecy::SecretString;
use std::fmt::Debug;
use std::sync::Arc;

/// Address and credential of one notification channel.
#[derive(Debug, Clone)]
pub struct ChannelEndpoint {
    /// Which channel this is.
    pub kind: EventKind,
    /// Topic endpoint URI.
    pub uri: String,
    /// Topic access key.
    pub key: SecretString,
}

/// Transport that delivers one envelope to one channel.
#[async_trait]
pub trait EventPublisher: Send + Sync + Debug {
    /// Sends `event` to `endpoint`. A single attempt; no internal retry.
    async fn send(
        &self,
        endpoint: &ChannelEndpoint,
        event: &EventEnvelope,
    ) -> Result<(), PublishError>;
}

/// What finally reached a channel for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The intended notification was delivered.
    Delivered(EventKind),
    /// `Completed` could not be delivered; an `Error` went out instead.
    Fallback,
    /// Nothing could be delivered.
    Lost,
}

/// Publishes transfer outcomes on the `completed` and `error` channels.
///
/// Endpoints are read from the current settings snapshot at publish time,
/// so a configuration refresh takes effect for the next notification.
#[derive(Debug, Clone)]
pub struct NotificationPublisher {
    transport: Arc<dyn EventPublisher>,
    settings: Arc<SettingsHandle>,
}

impl NotificationPublisher {
    /// Creates a publisher over `transport`.
    pub fn new(transport: Arc<dyn EventPublisher>, settings: Arc<SettingsHandle>) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Publishes `payload` on the channel selected by `kind`, redelivering
    /// as configured by the current snapshot.
    pub async fn publish<T>(&self, kind: EventKind, payload: &T) -> Result<(), PublishError>
    where
        T: serde::Serialize + Sync,
    {
        self.deliver(kind, payload, None).await
    }

    async fn deliver<T>(
        &self,
        kind: EventKind,
        payload: &T,
        policy: Option<RetryConfig>,
    ) -> Result<(), PublishError>
    where
        T: serde::Serialize + Sync,
    {
        let settings = self.settings.snapshot().await;
        let topic = match kind {
            EventKind::Completed => &settings.completed_topic,
            EventKind::Error => &settings.error_topic,
        };
        if topic.uri.is_empty() {
            return Err(PublishError::MissingEndpoint {
                channel: kind.channel().to_string(),
            });
        }
        let endpoint = ChannelEndpoint {
            kind,
            uri: topic.uri.clone(),
            key: topic.key.clone(),
        };

        let envelope = EventEnvelope::new(kind, payload)?;
        let policy = policy.unwrap_or_else(|| RetryConfig::from_settings(&settings));
        retry_async(&policy, || self.transport.send(&endpoint, &envelope)).await
    }

    /// Publishes a successful scan on the `completed` channel.
    ///
    /// If that fails, one `Error` notification describing the publish
    /// failure is attempted so the transfer is not left without an outcome.
    pub async fn notify_completed(&self, info: &TransferInfo) -> Delivery {
        match self.publish(EventKind::Completed, info).await {
            Ok(()) => {
                emit_completed(info);
                Delivery::Delivered(EventKind::Completed)
            }
            Err(e) => {
                tracing::warn!(
                    transfer_id = %info.transfer_id(),
                    error = %e,
                    "Completed notification failed, reporting on error channel"
                );
                let fallback = TransferError::from_transfer(
                    info,
                    format!("Failed to publish scan result: {e}"),
                );
                match self.notify_error(&fallback).await {
                    Delivery::Delivered(_) => Delivery::Fallback,
                    other => other,
                }
            }
        }
    }

    /// Publishes a failure on the `error` channel.
    pub async fn notify_error(&self, error: &TransferError) -> Delivery {
        self.report_error(error, None).await
    }

    /// Publishes a request rejection on the `error` channel with a single
    /// attempt, so the rejected caller is answered without backoff pauses.
    pub async fn notify_rejected(&self, error: &TransferError) -> Delivery {
        self.report_error(error, Some(RetryConfig::single())).await
    }

    async fn report_error(&self, error: &TransferError, policy: Option<RetryConfig>) -> Delivery {
        match self.deliver(EventKind::Error, error, policy).await {
            Ok(()) => {
                emit_error(error);
                Delivery::Delivered(EventKind::Error)
            }
            Err(e) => {
                emit_lost(EventKind::Error, error.transfer_id(), &e.to_string());
                tracing::error!(
                    transfer_id = %error.transfer_id(),
                    message = %error.message(),
                    "Undelivered transfer error"
                );
                Delivery::Lost
            }
        }
    }
}
