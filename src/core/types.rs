//! Transfer records exchanged with the caller and the notification channels.
//!
//! Property names are camelCase on the wire. Inbound request bodies are
//! matched case-insensitively, so `TransferId`, `transferid` and
//! `TRANSFERID` all bind to `transferId`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Canonical property names of a [`TransferInfo`].
const TRANSFER_FIELDS: &[&str] = &[
    "transferId",
    "originatingUserPrincipalName",
    "onBehalfOfUserPrincipalName",
    "originationDateTime",
    "fileName",
    "filePath",
];

/// Identity and routing record for one scan request.
///
/// Identity fields are fixed once parsed. The scan verdict can only be
/// attached through [`TransferInfo::with_scan_info`], which consumes the
/// record, so a transfer is annotated at most once and only by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferInfo {
    transfer_id: String,
    originating_user_principal_name: String,
    on_behalf_of_user_principal_name: String,
    origination_date_time: String,
    file_name: String,
    file_path: String,
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    scan_info: Option<ScanInfo>,
}

impl TransferInfo {
    /// Creates a new record with the storage location of the file.
    pub fn new(
        transfer_id: impl Into<String>,
        file_name: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            file_name: file_name.into(),
            file_path: file_path.into(),
            ..Self::default()
        }
    }

    /// Sets the originating user principal name.
    pub fn with_originating_user(mut self, upn: impl Into<String>) -> Self {
        self.originating_user_principal_name = upn.into();
        self
    }

    /// Sets the on-behalf-of user principal name.
    pub fn with_on_behalf_of_user(mut self, upn: impl Into<String>) -> Self {
        self.on_behalf_of_user_principal_name = upn.into();
        self
    }

    /// Sets the origination timestamp as sent by the upstream service.
    pub fn with_origination_date_time(mut self, value: impl Into<String>) -> Self {
        self.origination_date_time = value.into();
        self
    }

    /// Parses a request body, matching property names case-insensitively.
    ///
    /// Unknown properties and `null` values are ignored; missing fields
    /// default to empty strings. Any inbound `scanInfo` is discarded.
    pub fn from_json_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(body)?;
        let Value::Object(map) = value else {
            return Err(serde::de::Error::custom("expected a JSON object"));
        };
        serde_json::from_value(Value::Object(canonicalize(map)))
    }

    /// Extracts whatever identity can be recovered from a body.
    ///
    /// Used on rejection paths, where the body may be in the wrong format.
    /// Fields that are absent or not strings stay empty.
    pub fn from_partial_body(body: &[u8]) -> Self {
        let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        let map = canonicalize(map);
        let field = |name: &str| {
            map.get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            transfer_id: field("transferId"),
            originating_user_principal_name: field("originatingUserPrincipalName"),
            on_behalf_of_user_principal_name: field("onBehalfOfUserPrincipalName"),
            origination_date_time: field("originationDateTime"),
            file_name: field("fileName"),
            file_path: field("filePath"),
            scan_info: None,
        }
    }

    /// Returns the record annotated with a scan verdict.
    pub fn with_scan_info(self, scan_info: ScanInfo) -> Self {
        Self {
            scan_info: Some(scan_info),
            ..self
        }
    }

    /// Correlation key of the transfer.
    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    /// Principal that started the transfer.
    pub fn originating_user_principal_name(&self) -> &str {
        &self.originating_user_principal_name
    }

    /// Principal the transfer was made for.
    pub fn on_behalf_of_user_principal_name(&self) -> &str {
        &self.on_behalf_of_user_principal_name
    }

    /// Origination timestamp, verbatim from the request.
    pub fn origination_date_time(&self) -> &str {
        &self.origination_date_time
    }

    /// Name of the stored file (blob name).
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Storage container holding the file.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// The verdict, once the scan has succeeded.
    pub fn scan_info(&self) -> Option<&ScanInfo> {
        self.scan_info.as_ref()
    }
}

impl fmt::Display for TransferInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.transfer_id, self.file_path, self.file_name)
    }
}

/// Rewrites the keys of a request object to their canonical spelling.
fn canonicalize(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let canonical = TRANSFER_FIELDS
                .iter()
                .find(|field| field.eq_ignore_ascii_case(&key))
                .map_or(key, |field| (*field).to_string());
            (canonical, value)
        })
        .collect()
}

/// Threat verdict of a successful scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanInfo {
    /// Whether the engine detected a threat.
    pub is_threat: bool,

    /// Threat name; only meaningful when `is_threat` is set.
    pub threat_type: Option<String>,
}

impl ScanInfo {
    /// Verdict for a clean file.
    pub fn clean() -> Self {
        Self::default()
    }

    /// Verdict for an infected file.
    pub fn threat(threat_type: impl Into<String>) -> Self {
        Self {
            is_threat: true,
            threat_type: Some(threat_type.into()),
        }
    }
}

/// Failure record correlated to a [`TransferInfo`].
///
/// Only constructible from the in-flight transfer, so consumers can always
/// join an error back to the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferError {
    transfer_id: String,
    originating_user_principal_name: String,
    on_behalf_of_user_principal_name: String,
    origination_date_time: String,
    file_name: String,
    message: String,
}

impl TransferError {
    /// Builds the error record for `transfer` with a human-readable message.
    pub fn from_transfer(transfer: &TransferInfo, message: impl Into<String>) -> Self {
        Self {
            transfer_id: transfer.transfer_id.clone(),
            originating_user_principal_name: transfer.originating_user_principal_name.clone(),
            on_behalf_of_user_principal_name: transfer.on_behalf_of_user_principal_name.clone(),
            origination_date_time: transfer.origination_date_time.clone(),
            file_name: transfer.file_name.clone(),
            message: message.into(),
        }
    }

    /// Correlation key of the failed transfer.
    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    /// Principal that started the transfer.
    pub fn originating_user_principal_name(&self) -> &str {
        &self.originating_user_principal_name
    }

    /// Principal the transfer was made for.
    pub fn on_behalf_of_user_principal_name(&self) -> &str {
        &self.on_behalf_of_user_principal_name
    }

    /// Origination timestamp, verbatim from the request.
    pub fn origination_date_time(&self) -> &str {
        &self.origination_date_time
    }

    /// Name of the stored file.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// What went wrong.
    pub fn message(&self) -> &str {
        &self.message
    }
}
