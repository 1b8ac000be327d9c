use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-level chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: content.into(),
        }
    }
}

/// One entry of a conversation. `synthesized` marks turns produced locally
/// (policy rejections, remote failures) rather than by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    pub synthesized: bool,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            synthesized: false,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            synthesized: false,
        }
    }

    pub fn synthesized(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            synthesized: true,
        }
    }

    pub fn to_message(&self) -> Message {
        Message::new(self.role, self.text.clone())
    }
}

/// Append-only log of turns. Turns are never reordered or edited; the only
/// way to shrink it is [`ConversationHistory::clear`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Commit a completed user/assistant pair in one step.
    pub fn append_exchange(&mut self, user: ConversationTurn, assistant: ConversationTurn) {
        self.turns.reserve(2);
        self.turns.push(user);
        self.turns.push(assistant);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of completed model exchanges (synthesized turns excluded).
    pub fn exchanges(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.role == Role::Assistant && !t.synthesized)
            .count()
    }

    /// The last `n` completed exchanges, oldest first, ready to be replayed to
    /// the model.
    pub fn recent_exchanges(&self, n: usize) -> Vec<ConversationTurn> {
        let committed: Vec<&ConversationTurn> =
            self.turns.iter().filter(|t| !t.synthesized).collect();
        let skip = committed.len().saturating_sub(n.saturating_mul(2));
        committed.into_iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.turns.len();
        self.turns.clear();
        removed
    }
}
