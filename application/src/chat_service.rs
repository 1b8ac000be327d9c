//! Interactive chat over the completion service.
//!
//! A [`ChatSession`] owns its history exclusively and handles one turn at a
//! time. History only changes once a turn has an outcome: a completed
//! exchange appends the user and assistant turns together, a rejected or
//! failed turn appends one synthesized assistant turn, and a cancelled turn
//! appends nothing.

use crate::guardrail_service::GuardrailFilter;
use crate::prompt_builder;
use domain::error::AnalyzerError;
use domain::models::AudioAnalysis;
use domain::request::{GenerationParams, Request, Response};
use domain::safety_policy::{Direction, GuardrailVerdict};
use domain::session::{ConversationHistory, ConversationTurn};
use infrastructure::config::Settings;
use infrastructure::resilient_client::CompletionService;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingInput,
    Processing,
    Closed,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("chat session is closed")]
    Closed,
    #[error("a message is already being processed")]
    Busy,
}

#[derive(Debug)]
pub enum TurnOutcome {
    Reply { text: String, response: Response },
    Rejected { reason: String },
    Failed { message: String, attempts: Option<u32> },
    Cancelled,
}

pub struct ChatSession {
    client: Arc<dyn CompletionService>,
    guardrail: GuardrailFilter,
    model: String,
    params: GenerationParams,
    context_exchanges: usize,
    system_prompt: String,
    analysis_source: Option<String>,
    history: ConversationHistory,
    state: SessionState,
}

impl ChatSession {
    pub fn new(
        client: Arc<dyn CompletionService>,
        guardrail: GuardrailFilter,
        model: impl Into<String>,
        params: GenerationParams,
        context_exchanges: usize,
    ) -> Self {
        Self {
            client,
            guardrail,
            model: model.into(),
            params,
            context_exchanges,
            system_prompt: prompt_builder::chat_system_prompt(None),
            analysis_source: None,
            history: ConversationHistory::new(),
            state: SessionState::Idle,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        client: Arc<dyn CompletionService>,
        guardrail: GuardrailFilter,
    ) -> Self {
        Self::new(
            client,
            guardrail,
            settings.model.clone(),
            settings.params,
            settings.chat_context_exchanges,
        )
    }

    /// Seed the session with an analysed file. Its features go into the
    /// system message and off-topic follow-ups are no longer rejected.
    pub fn with_analysis(mut self, analysis: &AudioAnalysis, source: impl Into<String>) -> Self {
        let source = source.into();
        self.system_prompt = prompt_builder::chat_system_prompt(Some((analysis, &source)));
        self.analysis_source = Some(source);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn analysis_source(&self) -> Option<&str> {
        self.analysis_source.as_deref()
    }

    /// Idle -> AwaitingInput. Sending from Idle does this implicitly.
    pub fn start(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Closed => Err(SessionError::Closed),
            SessionState::Processing => Err(SessionError::Busy),
            _ => {
                self.state = SessionState::AwaitingInput;
                Ok(())
            }
        }
    }

    pub async fn send(&mut self, text: &str) -> Result<TurnOutcome, SessionError> {
        self.send_cancellable(text, &CancellationToken::new()).await
    }

    pub async fn send_cancellable(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError> {
        let mut turn = TurnGuard::begin(self)?;
        Ok(turn.process(text, cancel).await)
    }

    async fn process(&mut self, text: &str, cancel: &CancellationToken) -> TurnOutcome {
        let context_available = self.analysis_source.is_some();
        let user_text = match self.guardrail.check(text, Direction::Outbound, context_available) {
            GuardrailVerdict::Allow => text.trim().to_string(),
            GuardrailVerdict::Rewrite(rewritten) => rewritten,
            GuardrailVerdict::Reject(reason) => {
                self.history.append(ConversationTurn::synthesized(format!(
                    "I can't help with that: {}",
                    reason
                )));
                return TurnOutcome::Rejected { reason };
            }
        };

        let request = Request::builder(self.model.clone(), self.params)
            .system(self.system_prompt.clone())
            .history(self.history.recent_exchanges(self.context_exchanges))
            .prompt(user_text.clone())
            .build();
        debug!("sending chat turn with {} history turns", request.history().len());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("chat turn cancelled");
                return TurnOutcome::Cancelled;
            }
            result = self.client.send(request) => result,
        };

        match result {
            Ok(response) => {
                let inbound =
                    self.guardrail.check(&response.text, Direction::Inbound, context_available);
                let reply = match inbound {
                    GuardrailVerdict::Rewrite(filtered) => filtered,
                    _ => response.text.clone(),
                };
                self.history.append_exchange(
                    ConversationTurn::user(user_text),
                    ConversationTurn::assistant(reply.clone()),
                );
                TurnOutcome::Reply { text: reply, response }
            }
            Err(e) => {
                warn!("chat turn failed: {}", e);
                let attempts = match &e {
                    AnalyzerError::RemoteUnavailable { attempts, .. } => Some(*attempts),
                    _ => None,
                };
                let message = e.to_string();
                self.history.append(ConversationTurn::synthesized(format!(
                    "Sorry, I couldn't get a response: {}",
                    message
                )));
                TurnOutcome::Failed { message, attempts }
            }
        }
    }

    /// Ask the model for a recap of the conversation. Nothing is appended to
    /// the history; `Ok(None)` when there is nothing to summarise.
    pub async fn summary(&mut self) -> Result<Option<Result<String, AnalyzerError>>, SessionError> {
        self.start()?;
        if self.history.exchanges() == 0 {
            return Ok(None);
        }
        let turn = TurnGuard::begin(self)?;
        let request = Request::builder(turn.model.clone(), turn.params)
            .system(turn.system_prompt.clone())
            .prompt(prompt_builder::summary_prompt(turn.history.turns()))
            .build();
        let result = turn.client.send(request).await.map(|response| {
            match turn.guardrail.check(&response.text, Direction::Inbound, true) {
                GuardrailVerdict::Rewrite(filtered) => filtered,
                _ => response.text,
            }
        });
        Ok(Some(result))
    }

    /// Drop all turns. Returns how many were removed.
    pub fn clear(&mut self) -> Result<usize, SessionError> {
        self.start()?;
        let removed = self.history.clear();
        info!("cleared {} conversation turns", removed);
        Ok(removed)
    }

    /// Terminal. The history stays readable.
    pub fn quit(&mut self) {
        self.state = SessionState::Closed;
    }
}

/// Keeps the session in `Processing` for one turn. Dropping it, including
/// when the caller abandons the turn's future mid-await, puts the session
/// back to `AwaitingInput`.
struct TurnGuard<'a> {
    session: &'a mut ChatSession,
}

impl<'a> TurnGuard<'a> {
    fn begin(session: &'a mut ChatSession) -> Result<Self, SessionError> {
        session.start()?;
        session.state = SessionState::Processing;
        Ok(Self { session })
    }
}

impl Deref for TurnGuard<'_> {
    type Target = ChatSession;

    fn deref(&self) -> &ChatSession {
        self.session
    }
}

impl DerefMut for TurnGuard<'_> {
    fn deref_mut(&mut self) -> &mut ChatSession {
        self.session
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.session.state == SessionState::Processing {
            self.session.state = SessionState::AwaitingInput;
        }
    }
}
