//! Telegram messaging backend
//!
//! A minimal Bot API client: long-polling for inbound messages and
//! `sendMessage` for everything outbound. [`TelegramApi`] implements
//! [`crate::channel::OutputSink`].

mod api;
mod poller;
mod types;

pub use api::TelegramApi;
pub use poller::poll_loop;
