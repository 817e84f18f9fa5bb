//! In-memory notification transport for tests and local runs.

use crate::core::PublishError;
use crate::notify::events::{EventEnvelope, EventKind};
use crate::notify::publisher::{ChannelEndpoint, EventPublisher};

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Records every delivered event instead of sending it anywhere.
///
/// # Examples
///
/// ```rust
/// use transferscan::notify::{EventKind, MemoryPublisher};
///
/// // Accepts everything
/// let publisher = MemoryPublisher::new();
///
/// // Rejects the completed channel, e.g. to exercise fallbacks
/// let publisher = MemoryPublisher::new().failing(EventKind::Completed);
/// ```
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<(ChannelEndpoint, EventEnvelope)>>,
    failing: HashSet<EventKind>,
    attempts: AtomicU64,
    delivered: Notify,
}

impl MemoryPublisher {
    /// Creates a publisher that accepts every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send to `kind` fail with a transport error.
    pub fn failing(mut self, kind: EventKind) -> Self {
        self.failing.insert(kind);
        self
    }

    /// Returns all delivered events with the endpoint they were sent to.
    pub fn events(&self) -> Vec<(ChannelEndpoint, EventEnvelope)> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Returns the delivered events of one kind.
    pub fn events_of(&self, kind: EventKind) -> Vec<EventEnvelope> {
        self.events()
            .into_iter()
            .filter(|(endpoint, _)| endpoint.kind == kind)
            .map(|(_, event)| event)
            .collect()
    }

    /// Number of delivered events.
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Returns `true` if nothing was delivered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of send attempts, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Waits until at least `count` events were delivered.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.delivered.notified();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn send(
        &self,
        endpoint: &ChannelEndpoint,
        event: &EventEnvelope,
    ) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        if self.failing.contains(&endpoint.kind) {
            return Err(PublishError::Transport {
                channel: endpoint.kind.channel().to_string(),
                message: "simulated failure".to_string(),
            });
        }

        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((endpoint.clone(), event.clone()));
        self.delivered.notify_waiters();
        Ok(())
    }
}
