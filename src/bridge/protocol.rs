//! Bridge protocol
//!
//! Inbound events delivered by the messaging backend and the fixed status
//! texts sent back to the operator.

/// What an inbound event asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Greeting / status request (`/start`)
    Start,
    /// Terminate the agent and start a fresh one (`/restart`)
    Restart,
    /// Free text to forward to the agent
    Text(String),
}

/// One inbound event from the messaging backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Numeric identity of the sender
    pub sender_id: i64,
    /// Chat that replies to this event go to
    pub chat_id: i64,
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn new(sender_id: i64, chat_id: i64, kind: EventKind) -> Self {
        Self {
            sender_id,
            chat_id,
            kind,
        }
    }

    /// Build an event from message text, `None` for commands the bridge ignores
    pub fn from_text(sender_id: i64, chat_id: i64, text: &str) -> Option<Self> {
        parse_text(text).map(|kind| Self::new(sender_id, chat_id, kind))
    }
}

/// Classify message text.
///
/// A bot command is `/name` or `/name@botname` at the very start, followed
/// by whitespace or the end of the text, where both names are made of ASCII
/// letters, digits and `_`. `/start` and `/restart` map to their events and
/// any other command is ignored. Everything else, including text that merely
/// starts with `/`, is forwarded verbatim.
pub fn parse_text(text: &str) -> Option<EventKind> {
    let Some(name) = command_name(text) else {
        return Some(EventKind::Text(text.to_string()));
    };

    match name {
        "start" => Some(EventKind::Start),
        "restart" => Some(EventKind::Restart),
        _ => None,
    }
}

/// Name of the bot command `text` starts with, if any
fn command_name(text: &str) -> Option<&str> {
    let rest = text.strip_prefix('/')?;
    let token = rest.split(char::is_whitespace).next().unwrap_or("");
    let (name, bot) = match token.split_once('@') {
        Some((name, bot)) => (name, Some(bot)),
        None => (token, None),
    };

    let is_word =
        |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if is_word(name) && bot.map_or(true, is_word) {
        Some(name)
    } else {
        None
    }
}

/// Reply sent to an unauthorized `/start`
pub const UNAUTHORIZED_REPLY: &str = "Unauthorized user.";

/// Status texts, parameterized by the agent's display name
#[derive(Debug, Clone)]
pub struct StatusText {
    agent: String,
}

impl StatusText {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent: agent_name.into(),
        }
    }

    pub fn greeting(&self) -> String {
        format!(
            "🤖 {name} Bridge Active.\n\
             Send a message to forward it to the agent.\n\
             Commands: /restart - Restart {name}",
            name = self.agent
        )
    }

    pub fn terminated(&self) -> String {
        format!("♻️ {} terminated. Restarting...", self.agent)
    }

    pub fn started(&self) -> String {
        format!("✅ {} started.", self.agent)
    }

    pub fn start_failed(&self, error: &dyn std::fmt::Display) -> String {
        format!("❌ Failed to start {}: {}", self.agent, error)
    }

    pub fn not_running(&self) -> String {
        format!("{} is not running. Use /restart to start it.", self.agent)
    }

    pub fn input_failed(&self, error: &dyn std::fmt::Display) -> String {
        format!("⚠️ Failed to send input to {}: {}", self.agent, error)
    }

    pub fn input_busy(&self) -> String {
        format!(
            "⏳ {} is not reading input. Message dropped; wait or /restart.",
            self.agent
        )
    }

    pub fn too_long(&self, length: usize, max: usize) -> String {
        format!("Message too long ({length} chars). Max is {max}.")
    }
}
