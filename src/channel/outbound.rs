//! Outbound sender task
//!
//! Drains the outbound queue in order and delivers each message through the
//! sink, retrying failed sends with a doubling backoff. A message that still
//! fails after the last retry is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ChannelError, OutboundMessage, OutputSink};
use crate::config::OutboundConfig;

/// Retry settings for one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first failure
    pub retries: u32,
    /// Delay before the first retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl From<&OutboundConfig> for RetryPolicy {
    fn from(config: &OutboundConfig) -> Self {
        Self {
            retries: config.send_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based); rate limits win over backoff
    fn delay(&self, attempt: u32, error: &ChannelError) -> Duration {
        match error {
            ChannelError::RateLimited(secs) => Duration::from_secs(*secs),
            _ => self.backoff.saturating_mul(1 << (attempt - 1).min(16)),
        }
    }
}

/// Deliver one message, retrying per `policy`
pub async fn deliver(
    sink: &dyn OutputSink,
    message: &OutboundMessage,
    policy: RetryPolicy,
) -> Result<(), ChannelError> {
    let mut attempt = 0;
    loop {
        match sink.send_text(message.chat_id, &message.text).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                let delay = policy.delay(attempt, &e);
                debug!(error = %e, attempt, ?delay, "send failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run the sender until every queue handle is dropped
pub async fn run_outbound(
    sink: Arc<dyn OutputSink>,
    mut rx: mpsc::Receiver<OutboundMessage>,
    policy: RetryPolicy,
) {
    info!("Outbound sender started");
    let mut dropped = 0u64;

    while let Some(message) = rx.recv().await {
        if let Err(e) = deliver(sink.as_ref(), &message, policy).await {
            dropped += 1;
            warn!(
                chat_id = message.chat_id,
                chars = message.text.chars().count(),
                error = %e,
                "dropping outbound message"
            );
        }
    }

    info!(dropped, "Outbound sender stopped");
}
