//! Scan outcome returned by scanning engines.
//!
//! `ScanOutcome` is a result-of-result: the scan call itself can fail
//! operationally (`is_error`) independently of the threat verdict.

use crate::core::types::ScanInfo;
use serde::{Deserialize, Serialize};

/// What a [`Scanner`](crate::core::Scanner) reports for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    /// The engine could not complete the scan.
    pub is_error: bool,

    /// Engine diagnostic when `is_error` is set.
    pub error_message: Option<String>,

    /// A threat was detected.
    pub is_threat: bool,

    /// Threat name when `is_threat` is set.
    pub threat_type: Option<String>,
}

impl ScanOutcome {
    /// A completed scan with no threat.
    pub fn clean() -> Self {
        Self::default()
    }

    /// A completed scan that detected `threat_type`.
    pub fn threat(threat_type: impl Into<String>) -> Self {
        Self {
            is_threat: true,
            threat_type: Some(threat_type.into()),
            ..Self::default()
        }
    }

    /// A scan that could not be completed.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Returns `true` if the scan completed and found nothing.
    pub fn is_clean(&self) -> bool {
        !self.is_error && !self.is_threat
    }

    /// The verdict to attach to the transfer, or `None` on operational error.
    pub fn verdict(&self) -> Option<ScanInfo> {
        if self.is_error {
            return None;
        }
        Some(ScanInfo {
            is_threat: self.is_threat,
            threat_type: self.threat_type.clone().filter(|_| self.is_threat),
        })
    }

    /// The engine diagnostic, or a placeholder when none was given.
    pub fn error_message(&self) -> &str {
        self.error_message.as_deref().unwrap_or("unknown scanner error")
    }
}
