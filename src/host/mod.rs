//! The session host platform seam.
//!
//! The engine coordinates agent executions against a host that exposes
//! session-oriented primitives: create a session, dispatch a prompt, fetch
//! the transcript, poll liveness, abort. [`HostPlatform`] is the object-safe
//! async boundary; [`http::HttpHost`] is the production implementation and
//! tests script their own in-memory fakes against the same trait.

pub mod http;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HostError;

/// Opaque identifier for one agent execution on the host platform.
pub type SessionHandle = String;

/// Who produced a transcript turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// One turn of a session transcript, in delivery order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    /// Terminal finish marker: the host sets this on the assistant turn
    /// that ends a response.
    #[serde(default)]
    pub finished: bool,
}

/// Ordered transcript of a session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub turns: Vec<Turn>,
}

impl Transcript {
    /// Text of the last assistant turn, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
            .map(|t| t.text.as_str())
    }

    /// Whether the transcript carries a terminal finish marker on an
    /// assistant turn strictly after the last user turn. An idle report
    /// without this is a candidate "false idle".
    pub fn confirmed_complete(&self) -> bool {
        let last_user = self
            .turns
            .iter()
            .rposition(|t| t.role == TurnRole::User);
        let last_finished_assistant = self
            .turns
            .iter()
            .rposition(|t| t.role == TurnRole::Assistant && t.finished);

        match (last_finished_assistant, last_user) {
            (Some(a), Some(u)) => a > u,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Per-session liveness as reported by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Active,
    Idle,
}

/// Session-oriented primitives exposed by the host platform.
///
/// Implementations must be safe to share across concurrent delegations
/// (`Arc<dyn HostPlatform>`).
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Create a new session, optionally parented to an existing one.
    async fn create_session(
        &self,
        parent: Option<&str>,
        title: &str,
    ) -> Result<SessionHandle, HostError>;

    /// Send a prompt into a session on behalf of a role.
    async fn dispatch_prompt(
        &self,
        handle: &str,
        role: &str,
        content: &str,
        model: Option<&str>,
    ) -> Result<(), HostError>;

    /// Fetch the full ordered transcript of a session.
    async fn fetch_transcript(&self, handle: &str) -> Result<Transcript, HostError>;

    /// Poll liveness for a batch of sessions.
    async fn poll_liveness(
        &self,
        handles: &[SessionHandle],
    ) -> Result<HashMap<SessionHandle, Liveness>, HostError>;

    /// Abort a running session.
    async fn abort(&self, handle: &str) -> Result<(), HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: TurnRole, text: &str, finished: bool) -> Turn {
        Turn {
            role,
            text: text.to_string(),
            finished,
        }
    }

    #[test]
    fn confirmed_complete_requires_finish_after_last_user() {
        let transcript = Transcript {
            turns: vec![
                turn(TurnRole::User, "do the thing", false),
                turn(TurnRole::Assistant, "done", true),
            ],
        };
        assert!(transcript.confirmed_complete());

        // Finish marker before the last user turn: a stale completion.
        let transcript = Transcript {
            turns: vec![
                turn(TurnRole::User, "first", false),
                turn(TurnRole::Assistant, "done", true),
                turn(TurnRole::User, "follow-up", false),
            ],
        };
        assert!(!transcript.confirmed_complete());
    }

    #[test]
    fn unfinished_assistant_turn_is_not_complete() {
        let transcript = Transcript {
            turns: vec![
                turn(TurnRole::User, "go", false),
                turn(TurnRole::Assistant, "working on it", false),
            ],
        };
        assert!(!transcript.confirmed_complete());
    }

    #[test]
    fn empty_transcript_is_not_complete() {
        assert!(!Transcript::default().confirmed_complete());
    }

    #[test]
    fn last_assistant_text_skips_trailing_user_turns() {
        let transcript = Transcript {
            turns: vec![
                turn(TurnRole::Assistant, "first answer", true),
                turn(TurnRole::User, "another question", false),
            ],
        };
        assert_eq!(transcript.last_assistant_text(), Some("first answer"));
    }
}
