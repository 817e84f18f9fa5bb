//! Event Grid topic transport.
//!
//! Posts a single-element JSON array in the Event Grid schema to the topic
//! endpoint, authenticated with the topic access key.

use crate::core::PublishError;
use crate::notify::events::EventEnvelope;
use crate::notify::publisher::{ChannelEndpoint, EventPublisher};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::time::Duration;

const SAS_KEY_HEADER: &str = "aeg-sas-key";

/// Delivers events to Event Grid custom topics over HTTPS.
#[derive(Debug, Clone)]
pub struct EventGridPublisher {
    client: reqwest::Client,
}

impl EventGridPublisher {
    /// Creates a publisher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Transport {
                channel: "*".to_string(),
                message: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EventPublisher for EventGridPublisher {
    async fn send(
        &self,
        endpoint: &ChannelEndpoint,
        event: &EventEnvelope,
    ) -> Result<(), PublishError> {
        let channel = endpoint.kind.channel();
        let body = serde_json::to_vec(&[event])?;

        let response = self
            .client
            .post(&endpoint.uri)
            .header(SAS_KEY_HEADER, endpoint.key.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| PublishError::Transport {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(PublishError::Rejected {
                channel: channel.to_string(),
                status: response.status().as_u16(),
            });
        }

        tracing::debug!(
            channel,
            event_id = %event.id,
            "Event delivered"
        );
        Ok(())
    }
}
