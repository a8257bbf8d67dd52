//! Inbound event handler
//!
//! The foreground context of the bridge. Checks every event against the
//! authorized identity, drives the supervisor and queues status replies.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::protocol::{EventKind, InboundEvent, StatusText, UNAUTHORIZED_REPLY};
use crate::agent::{SessionError, Supervisor};
use crate::channel::OutboundMessage;

/// Dispatches inbound events for the single authorized operator
pub struct BridgeHandler {
    supervisor: Arc<Supervisor>,
    outbound: mpsc::Sender<OutboundMessage>,
    authorized_id: i64,
    max_message_length: usize,
    text: StatusText,
}

impl BridgeHandler {
    pub fn new(
        supervisor: Arc<Supervisor>,
        outbound: mpsc::Sender<OutboundMessage>,
        authorized_id: i64,
        max_message_length: usize,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            supervisor,
            outbound,
            authorized_id,
            max_message_length,
            text: StatusText::new(agent_name),
        }
    }

    /// Handle events until the channel closes or a shutdown signal arrives
    pub async fn run(
        self,
        mut events: mpsc::Receiver<InboundEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!(authorized_id = self.authorized_id, "Bridge handler started");

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle(event).await,
                        None => {
                            debug!("Event channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping bridge handler");
                    break;
                }
            }
        }
    }

    /// Handle one inbound event
    pub async fn handle(&self, event: InboundEvent) {
        if event.sender_id != self.authorized_id {
            self.reject(event).await;
            return;
        }

        match event.kind {
            EventKind::Start => self.reply(event.chat_id, self.text.greeting()).await,
            EventKind::Restart => self.restart(event.chat_id).await,
            EventKind::Text(text) => self.forward(event.chat_id, &text).await,
        }
    }

    async fn reject(&self, event: InboundEvent) {
        match event.kind {
            EventKind::Start => {
                warn!(sender = event.sender_id, "Unauthorized /start attempt");
                self.reply(event.chat_id, UNAUTHORIZED_REPLY).await;
            }
            EventKind::Restart => {
                warn!(sender = event.sender_id, "Unauthorized /restart attempt");
            }
            EventKind::Text(_) => {
                warn!(sender = event.sender_id, "Unauthorized message attempt");
            }
        }
    }

    async fn restart(&self, chat_id: i64) {
        let outcome = self.supervisor.restart_session().await;

        if outcome.terminated.is_some() {
            self.reply(chat_id, self.text.terminated()).await;
        }

        match outcome.started {
            Ok(session_id) => {
                info!(%session_id, "Agent started");
                self.reply(chat_id, self.text.started()).await;
            }
            Err(e) => {
                error!(error = %e, "Failed to start agent");
                self.reply(chat_id, self.text.start_failed(&e)).await;
            }
        }
    }

    async fn forward(&self, chat_id: i64, text: &str) {
        let length = text.chars().count();
        if length > self.max_message_length {
            debug!(length, max = self.max_message_length, "Rejected oversized message");
            self.reply(chat_id, self.text.too_long(length, self.max_message_length))
                .await;
            return;
        }

        match self.supervisor.send_input(text).await {
            Ok(()) => {}
            Err(SessionError::NotRunning) => {
                self.reply(chat_id, self.text.not_running()).await;
            }
            Err(SessionError::InputBusy) => {
                warn!("Agent input queue full, message dropped");
                self.reply(chat_id, self.text.input_busy()).await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to write to agent");
                self.reply(chat_id, self.text.input_failed(&e)).await;
            }
        }
    }

    async fn reply(&self, chat_id: i64, text: impl Into<String>) {
        if self
            .outbound
            .send(OutboundMessage::text(chat_id, text))
            .await
            .is_err()
        {
            warn!("Outbound queue closed, reply dropped");
        }
    }
}
