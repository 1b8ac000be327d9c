use crate::session::{ConversationTurn, Message, Role};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// A single call to the model. Built once through [`RequestBuilder`] and
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    model: String,
    system: Option<String>,
    history: Vec<ConversationTurn>,
    prompt: String,
    params: GenerationParams,
}

impl Request {
    pub fn builder(model: impl Into<String>, params: GenerationParams) -> RequestBuilder {
        RequestBuilder {
            model: model.into(),
            system: None,
            history: Vec::new(),
            prompt: String::new(),
            params,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn params(&self) -> GenerationParams {
        self.params
    }

    /// Messages in wire order: system, prior turns, then the prompt.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if let Some(system) = &self.system {
            messages.push(Message::new(Role::System, system.clone()));
        }
        messages.extend(self.history.iter().map(ConversationTurn::to_message));
        messages.push(Message::new(Role::User, self.prompt.clone()));
        messages
    }
}

pub struct RequestBuilder {
    model: String,
    system: Option<String>,
    history: Vec<ConversationTurn>,
    prompt: String,
    params: GenerationParams,
}

impl RequestBuilder {
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn history(mut self, turns: Vec<ConversationTurn>) -> Self {
        self.history = turns;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn build(self) -> Request {
        Request {
            model: self.model,
            system: self.system,
            history: self.history,
            prompt: self.prompt,
            params: self.params,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// What a transport hands back for one successful attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
            usage: None,
        }
    }
}

/// A successful call, as seen by callers of the API client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub text: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    pub attempts: u32,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
