//! Raw HTTP calls to the Telegram Bot API.
//!
//! Wraps reqwest for `sendMessage` and `getUpdates`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, warn};

use crate::channel::{ChannelError, OutputSink};

use super::types::{ApiResponse, SentMessage, Update};

/// Slack on top of the long-poll timeout before the HTTP request gives up
const POLL_GRACE: Duration = Duration::from_secs(10);

/// Default limit on a whole `sendMessage` request
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Low-level Telegram Bot API client.
pub struct TelegramApi {
    client: Client,
    base_url: String,
    send_timeout: Duration,
}

impl TelegramApi {
    /// Create a new API client with a custom base URL (for self-hosted Bot API servers).
    pub fn with_base_url(bot_token: &str, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: format!("{}/bot{}", base_url.trim_end_matches('/'), bot_token),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Give up on a `sendMessage` request after `timeout`
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Send a plain-text message to a chat.
    ///
    /// Returns the sent message's ID on success.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, ChannelError> {
        let body = json!({
            "chat_id": chat_id,
            "text": text,
        });

        debug!("sendMessage to chat_id={chat_id}");

        let resp = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .timeout(self.send_timeout)
            .json(&body)
            .send()
            .await?;

        let api_resp: ApiResponse<SentMessage> = resp.json().await?;
        let sent = check_response(api_resp, "sendMessage")?;
        Ok(sent.map(|m| m.message_id).unwrap_or(0))
    }

    /// Long-poll for new message updates.
    ///
    /// `offset` should be set to `last_update_id + 1` to acknowledge
    /// previously received updates.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, ChannelError> {
        let mut body = json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });

        if let Some(off) = offset {
            body["offset"] = json!(off);
        }

        let resp = self
            .client
            .post(format!("{}/getUpdates", self.base_url))
            .timeout(Duration::from_secs(timeout_secs) + POLL_GRACE)
            .json(&body)
            .send()
            .await?;

        let api_resp: ApiResponse<Vec<Update>> = resp.json().await?;
        Ok(check_response(api_resp, "getUpdates")?.unwrap_or_default())
    }
}

#[async_trait]
impl OutputSink for TelegramApi {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        self.send_message(chat_id, text).await.map(|_| ())
    }
}

/// Map a Bot API envelope to its result, turning `ok: false` into an error
fn check_response<T>(resp: ApiResponse<T>, method: &str) -> Result<Option<T>, ChannelError> {
    if resp.ok {
        return Ok(resp.result);
    }

    if let Some(secs) = resp.parameters.and_then(|p| p.retry_after) {
        warn!("{method} rate limited for {secs}s");
        return Err(ChannelError::RateLimited(secs));
    }

    let desc = resp.description.unwrap_or_default();
    warn!(code = ?resp.error_code, "{method} failed: {desc}");
    Err(ChannelError::Api(desc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_includes_token() {
        let api = TelegramApi::with_base_url("123:abc", "http://localhost:8081/");
        assert_eq!(api.base_url, "http://localhost:8081/bot123:abc");
        assert_eq!(api.send_timeout, DEFAULT_SEND_TIMEOUT);
    }

    #[tokio::test]
    async fn send_message_gives_up_on_unresponsive_server() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let api = TelegramApi::with_base_url("123:abc", &format!("http://{addr}"))
            .with_send_timeout(Duration::from_millis(200));
        let result = tokio::time::timeout(Duration::from_secs(5), api.send_message(1, "hi"))
            .await
            .expect("sendMessage hung past its timeout");

        match result {
            Err(ChannelError::Http(e)) => assert!(e.is_timeout()),
            other => panic!("Expected timeout, got {:?}", other),
        }
        server.abort();
    }

    #[test]
    fn check_response_ok() {
        let resp: ApiResponse<SentMessage> =
            serde_json::from_str(r#"{"ok": true, "result": {"message_id": 5}}"#).unwrap();
        let sent = check_response(resp, "sendMessage").unwrap();
        assert_eq!(sent.unwrap().message_id, 5);
    }

    #[test]
    fn check_response_api_error() {
        let resp: ApiResponse<SentMessage> = serde_json::from_str(
            r#"{"ok": false, "error_code": 400, "description": "Bad Request: chat not found"}"#,
        )
        .unwrap();
        match check_response(resp, "sendMessage") {
            Err(ChannelError::Api(desc)) => assert!(desc.contains("chat not found")),
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn check_response_rate_limited() {
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(
            r#"{"ok": false, "error_code": 429, "description": "Too Many Requests", "parameters": {"retry_after": 3}}"#,
        )
        .unwrap();
        assert!(matches!(
            check_response(resp, "getUpdates"),
            Err(ChannelError::RateLimited(3))
        ));
    }
}
