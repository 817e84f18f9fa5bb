//! Notification envelope and log emission.

use crate::core::{TransferError, TransferInfo};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subject stamped on every scan event.
pub const EVENT_SUBJECT: &str = "FileTransferService/Scan";

/// Schema version of the event payloads.
pub const DATA_VERSION: &str = "1.0";

/// Terminal event kind; selects the notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// The scan finished and the verdict is attached.
    Completed,
    /// The transfer failed.
    Error,
}

impl EventKind {
    /// Lowercase channel name.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// An event in the Event Grid schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique event id.
    pub id: String,

    /// Fixed subject, see [`EVENT_SUBJECT`].
    pub subject: String,

    /// Event kind used as the type tag.
    pub event_type: EventKind,

    /// When the event was produced.
    pub event_time: DateTime<Utc>,

    /// Payload schema version, see [`DATA_VERSION`].
    pub data_version: String,

    /// The `TransferInfo` or `TransferError` payload.
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Wraps `payload` in a new envelope.
    pub fn new<T: Serialize>(kind: EventKind, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject: EVENT_SUBJECT.to_string(),
            event_type: kind,
            event_time: Utc::now(),
            data_version: DATA_VERSION.to_string(),
            data: serde_json::to_value(payload)?,
        })
    }

    /// Returns the `transferId` of the payload, if present.
    pub fn transfer_id(&self) -> Option<&str> {
        self.data.get("transferId").and_then(|v| v.as_str())
    }
}

/// Logs a delivered `Completed` notification.
pub fn emit_completed(info: &TransferInfo) {
    let (is_threat, threat_type) = info
        .scan_info()
        .map(|s| (s.is_threat, s.threat_type.as_deref()))
        .unwrap_or((false, None));

    tracing::info!(
        target: "transferscan::notify",
        event_type = "Completed",
        transfer_id = %info.transfer_id(),
        file_name = %info.file_name(),
        file_path = %info.file_path(),
        is_threat,
        threat_type = ?threat_type,
        "Scan completed"
    );
}

/// Logs a delivered `Error` notification.
pub fn emit_error(error: &TransferError) {
    tracing::info!(
        target: "transferscan::notify",
        event_type = "Error",
        transfer_id = %error.transfer_id(),
        file_name = %error.file_name(),
        message = %error.message(),
        "Scan error reported"
    );
}

/// Logs a notification that could not be delivered on any channel.
pub fn emit_lost(kind: EventKind, transfer_id: &str, reason: &str) {
    tracing::error!(
        target: "transferscan::notify",
        event_type = %kind,
        transfer_id = %transfer_id,
        reason = %reason,
        "Notification lost"
    );
}
