use crate::config::Settings;
use async_trait::async_trait;
use domain::error::{AnalyzerError, RemoteFailure};
use domain::request::{Completion, Request, TokenUsage};
use domain::session::Message;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

const USER_AGENT: &str = concat!("audiolens/", env!("CARGO_PKG_VERSION"));

/// One attempt against the remote chat-completions endpoint. Implementations
/// classify every failure; they never retry.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn complete(&self, request: &Request) -> Result<Completion, RemoteFailure>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    safe_prompt: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Clone)]
pub struct MistralClient {
    client: Arc<Client>,
    endpoint: String,
    api_key: String,
}

impl MistralClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, AnalyzerError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                AnalyzerError::Configuration(format!("failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            client: Arc::new(client),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, AnalyzerError> {
        Self::new(settings.api_url.clone(), settings.api_key.clone())
    }
}

#[async_trait]
impl ChatTransport for MistralClient {
    async fn complete(&self, request: &Request) -> Result<Completion, RemoteFailure> {
        let params = request.params();
        let body = ChatRequest {
            model: request.model(),
            messages: request.messages(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            safe_prompt: true,
        };
        debug!(
            "posting {} messages to {} (model {})",
            body.messages.len(),
            self.endpoint,
            body.model
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_reqwest)?;

        if !status.is_success() {
            return Err(RemoteFailure::from_status(status.as_u16(), &error_message(&text)));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| RemoteFailure::permanent(format!("malformed response body: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RemoteFailure::permanent("response contained no message content"))?;

        Ok(Completion {
            text: content.trim().to_string(),
            model: parsed.model,
            usage: parsed.usage,
        })
    }
}

fn classify_reqwest(err: reqwest::Error) -> RemoteFailure {
    if err.is_builder() || err.is_redirect() {
        RemoteFailure::permanent(format!("request failed: {}", err))
    } else if err.is_timeout() {
        RemoteFailure::transient(format!("request timed out: {}", err))
    } else {
        RemoteFailure::transient(format!("connection failed: {}", err))
    }
}

/// Pull a readable message out of a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    value
        .pointer("/error/message")
        .or_else(|| value.get("message"))
        .or_else(|| value.get("detail"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}
