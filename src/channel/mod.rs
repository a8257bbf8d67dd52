//! Outbound messaging
//!
//! Everything the bridge says to the operator (agent output and status
//! replies) goes through one bounded queue drained by a single sender task.
//! The [`OutputSink`] trait is the seam to the messaging backend.

mod outbound;

pub use outbound::*;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from channel operations
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned error: {0}")]
    Api(String),

    #[error("rate limited, retry after {0}s")]
    RateLimited(u64),
}

/// A plain-text message addressed to one chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_id: i64,
    pub text: String,
}

impl OutboundMessage {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
        }
    }
}

/// Delivery endpoint for outbound messages
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Deliver one plain-text message
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ChannelError>;
}
