//! Chat message composition and the cross-thread inbox for backend replies.
//!
//! The transport lives outside the core. Replies and speech transcripts are
//! produced on other threads and pushed into a [`ChatInbox`]; the session
//! drains it once per tick so agent state is only ever touched on the tick
//! thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ChatConfig;

#[derive(Debug, Error, PartialEq)]
pub enum ChatError {
    #[error("send ignored; cooldown has {remaining:.2}s left")]
    Cooldown { remaining: f32 },
    #[error("chat transport is not connected")]
    NotConnected,
    #[error("nothing to send")]
    Empty,
    #[error("chat transport failed: {0}")]
    Transport(String),
}

/// Outbound side of the chat backend.
pub trait ChatTransport {
    fn is_connected(&self) -> bool;
    fn send(&mut self, message: &str) -> Result<(), ChatError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum InboundMessage {
    Answer(String),
    Transcript(String),
}

/// Mutex-protected queue shared between producer threads and the tick loop.
#[derive(Debug, Clone, Default)]
pub struct ChatInbox {
    queue: Arc<Mutex<VecDeque<InboundMessage>>>,
}

impl ChatInbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<InboundMessage>> {
        // a producer that panicked mid-push leaves the queue itself intact
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, message: InboundMessage) {
        self.lock().push_back(message);
    }

    pub fn drain(&self) -> Vec<InboundMessage> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Joins the non-empty parts with `" | "`.
pub fn compose_message(status: &str, state: &str, user_text: &str) -> String {
    [status, state, user_text.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

#[derive(Debug, Clone)]
pub struct ChatComposer {
    cooldown: f32,
    clock: f32,
    last_send: Option<f32>,
    input_text: String,
    last_answer: String,
}

impl ChatComposer {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            cooldown: config.cooldown_secs.max(0.0),
            clock: 0.0,
            last_send: None,
            input_text: String::new(),
            last_answer: String::new(),
        }
    }

    pub fn input_text(&self) -> &str {
        &self.input_text
    }

    pub fn set_input_text(&mut self, text: impl Into<String>) {
        self.input_text = text.into();
    }

    pub fn last_answer(&self) -> &str {
        &self.last_answer
    }

    pub fn tick(&mut self, dt: f32) {
        self.clock += dt;
    }

    /// Composes and sends the current input. The cooldown window starts on
    /// every accepted press, even when the transport then refuses the send.
    pub fn send(
        &mut self,
        transport: &mut dyn ChatTransport,
        status: &str,
        state: &str,
    ) -> Result<String, ChatError> {
        if let Some(last) = self.last_send {
            let elapsed = self.clock - last;
            if elapsed < self.cooldown {
                log::debug!("chat send ignored during cooldown");
                return Err(ChatError::Cooldown {
                    remaining: self.cooldown - elapsed,
                });
            }
        }
        self.last_send = Some(self.clock);

        if !transport.is_connected() {
            log::warn!("chat transport not connected; message dropped");
            return Err(ChatError::NotConnected);
        }
        let message = compose_message(status, state, &self.input_text);
        if message.is_empty() {
            return Err(ChatError::Empty);
        }
        transport.send(&message)?;
        log::debug!("chat >>> {message}");
        self.input_text.clear();
        Ok(message)
    }

    pub fn apply_inbound(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Answer(text) => {
                if !text.is_empty() {
                    self.last_answer = text;
                }
            }
            InboundMessage::Transcript(text) => self.input_text = text,
        }
    }
}
