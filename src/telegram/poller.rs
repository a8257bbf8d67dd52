//! Long-polling loop for Telegram Bot API `getUpdates`.
//!
//! Turns text messages into [`InboundEvent`]s and forwards them through a
//! channel. Authorization is left to the bridge handler, so every sender is
//! passed through with its identity.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::bridge::InboundEvent;

use super::api::TelegramApi;
use super::types::Update;

/// Longest pause between failed polls
const MAX_BACKOFF_SECS: u64 = 60;

/// Map one update to an event, skipping non-text messages and ignored commands
pub fn event_from_update(update: &Update) -> Option<InboundEvent> {
    let msg = update.message.as_ref()?;
    let from = msg.from.as_ref()?;
    let text = msg.text.as_deref()?;
    InboundEvent::from_text(from.id, msg.chat.id, text)
}

/// Run the long-polling loop until a shutdown signal arrives.
///
/// `getUpdates` failures back off exponentially from 1s up to 60s.
pub async fn poll_loop(
    api: Arc<TelegramApi>,
    poll_timeout: u64,
    event_tx: mpsc::Sender<InboundEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut offset: Option<i64> = None;
    let mut backoff_secs = 1u64;

    info!("Telegram poller started");

    loop {
        let updates = tokio::select! {
            result = api.get_updates(offset, poll_timeout) => result,
            _ = shutdown_rx.recv() => {
                info!("Telegram poller shutting down");
                return;
            }
        };

        match updates {
            Ok(updates) => {
                backoff_secs = 1;

                for update in updates {
                    // Advance offset to acknowledge this update
                    offset = Some(update.update_id + 1);

                    let Some(event) = event_from_update(&update) else {
                        debug!(update_id = update.update_id, "skipping update");
                        continue;
                    };
                    debug!(
                        update_id = update.update_id,
                        message_id = update.message.as_ref().map(|m| m.message_id),
                        sender = event.sender_id,
                        "inbound event"
                    );

                    if event_tx.send(event).await.is_err() {
                        warn!("event channel closed, stopping poller");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, backoff_secs, "getUpdates failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                    _ = shutdown_rx.recv() => {
                        info!("Telegram poller shutting down");
                        return;
                    }
                }
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::EventKind;

    fn update(json: &str) -> Update {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn text_message_becomes_event() {
        let u = update(
            r#"{"update_id": 1, "message": {"message_id": 1,
                "from": {"id": 42, "first_name": "Op", "is_bot": false},
                "chat": {"id": 42, "type": "private"}, "date": 0, "text": "run tests"}}"#,
        );
        let event = event_from_update(&u).unwrap();
        assert_eq!(event.sender_id, 42);
        assert_eq!(event.chat_id, 42);
        assert_eq!(event.kind, EventKind::Text("run tests".into()));
    }

    #[test]
    fn sender_identity_comes_from_user_not_chat() {
        let u = update(
            r#"{"update_id": 2, "message": {"message_id": 1,
                "from": {"id": 42, "first_name": "Op", "is_bot": false},
                "chat": {"id": -1001, "type": "group"}, "date": 0, "text": "/start"}}"#,
        );
        let event = event_from_update(&u).unwrap();
        assert_eq!(event.sender_id, 42);
        assert_eq!(event.chat_id, -1001);
        assert_eq!(event.kind, EventKind::Start);
    }

    #[test]
    fn skips_updates_without_usable_text() {
        let no_message = update(r#"{"update_id": 3}"#);
        assert!(event_from_update(&no_message).is_none());

        let no_text = update(
            r#"{"update_id": 4, "message": {"message_id": 1,
                "from": {"id": 42, "first_name": "Op", "is_bot": false},
                "chat": {"id": 42, "type": "private"}, "date": 0}}"#,
        );
        assert!(event_from_update(&no_text).is_none());

        let no_sender = update(
            r#"{"update_id": 5, "message": {"message_id": 1,
                "chat": {"id": -100, "type": "channel"}, "date": 0, "text": "hi"}}"#,
        );
        assert!(event_from_update(&no_sender).is_none());

        let other_command = update(
            r#"{"update_id": 6, "message": {"message_id": 1,
                "from": {"id": 42, "first_name": "Op", "is_bot": false},
                "chat": {"id": 42, "type": "private"}, "date": 0, "text": "/help"}}"#,
        );
        assert!(event_from_update(&other_command).is_none());
    }
}
