// Remote chat abstractions
//
// The remote reasoning service is modeled as a chat factory returning an
// opaque handle with ordered hidden state. The gateway trusts the handle
// to preserve conversational context and never shares one handle between
// sessions. The scripted client here is the in-process implementation for
// tests and offline runs; the production HTTP client lives in
// deepscope-gemini.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

use crate::error::{AnalysisError, Result};

/// Role of a priming turn injected before the dialogue starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Model,
}

/// A synthetic prior turn used to prime a fresh chat
#[derive(Debug, Clone)]
pub struct PrimingTurn {
    pub role: ChatRole,
    pub text: String,
}

impl PrimingTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            text: text.into(),
        }
    }
}

/// An open conversation with the remote service.
///
/// `send` suspends; implementations must preserve ordering of sends. A
/// handle is owned by exactly one session and is never called
/// concurrently (the session lock enforces this).
#[async_trait]
pub trait ChatHandle: Send + Sync {
    /// Send one message and return the remote's text response
    async fn send(&mut self, text: &str) -> Result<String>;
}

/// Boxed chat handle stored on a session
pub type BoxedChat = Box<dyn ChatHandle>;

/// Chat handle as held by a session: shared so that a cancelled operation
/// releases its guard without losing the handle, async-locked because the
/// logical session lock already serializes callers.
pub type SharedChat = std::sync::Arc<tokio::sync::Mutex<BoxedChat>>;

/// Wrap a fresh handle for storage on a session
pub fn share_chat(chat: BoxedChat) -> SharedChat {
    std::sync::Arc::new(tokio::sync::Mutex::new(chat))
}

/// Factory for chats against the remote service
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Open a fresh chat primed with the given synthetic turns
    async fn start_chat(&self, priming: Vec<PrimingTurn>) -> Result<BoxedChat>;
}

#[async_trait]
impl ChatClient for Arc<dyn ChatClient> {
    async fn start_chat(&self, priming: Vec<PrimingTurn>) -> Result<BoxedChat> {
        (**self).start_chat(priming).await
    }
}

// ============================================================================
// ScriptedChatClient - canned responses for tests and offline runs
// ============================================================================

/// Behavior of one scripted exchange
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this text
    Text(String),
    /// Fail with a rate-limit error
    RateLimited,
    /// Delay, then return this text (for budget-expiry tests)
    Delayed { millis: u64, text: String },
}

#[derive(Default)]
struct ScriptState {
    replies: VecDeque<ScriptedReply>,
    transcript: Vec<String>,
    chats_started: usize,
    in_flight: usize,
    max_in_flight: usize,
}

/// Chat client that replays a scripted sequence of replies.
///
/// All chats started from one client share a single reply queue, so a
/// test can script an entire multi-session scenario in send order. The
/// transcript records every message sent for assertions.
#[derive(Clone, Default)]
pub struct ScriptedChatClient {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor from plain response texts
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new();
        for r in responses {
            client.push(ScriptedReply::Text(r.into()));
        }
        client
    }

    /// Queue one scripted reply
    pub fn push(&self, reply: ScriptedReply) {
        self.state
            .lock()
            .expect("script state poisoned")
            .replies
            .push_back(reply);
    }

    /// Every message sent across all chats, in send order
    pub fn transcript(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("script state poisoned")
            .transcript
            .clone()
    }

    /// How many chats were started
    pub fn chats_started(&self) -> usize {
        self.state
            .lock()
            .expect("script state poisoned")
            .chats_started
    }

    /// Highest number of sends in flight at the same instant
    pub fn max_in_flight(&self) -> usize {
        self.state
            .lock()
            .expect("script state poisoned")
            .max_in_flight
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn start_chat(&self, priming: Vec<PrimingTurn>) -> Result<BoxedChat> {
        {
            let mut state = self.state.lock().expect("script state poisoned");
            state.chats_started += 1;
            for turn in &priming {
                if turn.role == ChatRole::User {
                    state.transcript.push(turn.text.clone());
                }
            }
        }
        Ok(Box::new(ScriptedChat {
            state: self.state.clone(),
        }))
    }
}

struct ScriptedChat {
    state: Arc<Mutex<ScriptState>>,
}

#[async_trait]
impl ChatHandle for ScriptedChat {
    async fn send(&mut self, text: &str) -> Result<String> {
        let reply = {
            let mut state = self.state.lock().expect("script state poisoned");
            state.transcript.push(text.to_string());
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.replies.pop_front()
        };
        let outcome = match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::RateLimited) => {
                Err(AnalysisError::RateLimit("scripted rate limit".into()))
            }
            Some(ScriptedReply::Delayed { millis, text }) => {
                sleep(Duration::from_millis(millis)).await;
                Ok(text)
            }
            None => Ok("I have no further observations.".to_string()),
        };
        self.state.lock().expect("script state poisoned").in_flight -= 1;
        outcome
    }
}

// ============================================================================
// Tests
// ============================================================================
