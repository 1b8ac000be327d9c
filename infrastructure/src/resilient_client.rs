use crate::config::Settings;
use crate::mistral_client::{ChatTransport, MistralClient};
use crate::retry::{RetryDecision, RetryPolicy, RetryState, Sleeper, TokioSleeper};
use async_trait::async_trait;
use domain::error::{AnalyzerError, RemoteFailure};
use domain::request::{Completion, Request, Response};
use shared::telemetry::Telemetry;
use tracing::{debug, error, info, warn};

/// Anything that can turn a [`Request`] into a [`Response`]. The chat session
/// and analysis service only see this seam.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response, AnalyzerError>;
}

/// Wraps a transport with validation, per-attempt timeouts, bounded retry
/// and a total deadline.
pub struct ResilientClient<T, S = TokioSleeper> {
    transport: T,
    sleeper: S,
    policy: RetryPolicy,
    allowed_models: Vec<String>,
}

impl ResilientClient<MistralClient> {
    pub fn from_settings(settings: &Settings) -> Result<Self, AnalyzerError> {
        Ok(Self::new(
            MistralClient::from_settings(settings)?,
            settings.retry,
            settings.allowed_models.clone(),
        ))
    }
}

impl<T: ChatTransport> ResilientClient<T> {
    pub fn new(transport: T, policy: RetryPolicy, allowed_models: Vec<String>) -> Self {
        Self {
            transport,
            sleeper: TokioSleeper,
            policy,
            allowed_models,
        }
    }
}

impl<T: ChatTransport, S: Sleeper> ResilientClient<T, S> {
    pub fn with_sleeper<S2: Sleeper>(self, sleeper: S2) -> ResilientClient<T, S2> {
        ResilientClient {
            transport: self.transport,
            sleeper,
            policy: self.policy,
            allowed_models: self.allowed_models,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn sleeper(&self) -> &S {
        &self.sleeper
    }

    fn validate(&self, request: &Request) -> Result<(), AnalyzerError> {
        if request.prompt().trim().is_empty() {
            return Err(AnalyzerError::InvalidRequest("prompt must not be empty".to_string()));
        }
        if !self.allowed_models.iter().any(|m| m == request.model()) {
            return Err(AnalyzerError::InvalidRequest(format!(
                "model `{}` is not allowed",
                request.model()
            )));
        }
        Ok(())
    }

    async fn attempt(
        &self,
        request: &Request,
        state: &RetryState,
        clock: &Telemetry,
    ) -> Result<Completion, RemoteFailure> {
        let timeout = state.attempt_timeout(clock.remaining(self.policy.total_deadline));
        match tokio::time::timeout(timeout, self.transport.complete(request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RemoteFailure::timeout(timeout)),
        }
    }
}

#[async_trait]
impl<T: ChatTransport, S: Sleeper> CompletionService for ResilientClient<T, S> {
    async fn send(&self, request: Request) -> Result<Response, AnalyzerError> {
        self.validate(&request)?;

        let clock = Telemetry::new();
        let mut state = RetryState::new(self.policy);
        loop {
            let attempt = state.begin_attempt();
            debug!("attempt {}/{}", attempt, self.policy.max_attempts);

            let failure = match self.attempt(&request, &state, &clock).await {
                Ok(completion) => {
                    info!(
                        "completion received after {} attempt(s) in {:?}",
                        attempt,
                        clock.elapsed()
                    );
                    return Ok(Response {
                        text: completion.text,
                        model: completion.model.unwrap_or_else(|| request.model().to_string()),
                        usage: completion.usage,
                        latency: clock.elapsed(),
                        attempts: attempt,
                    });
                }
                Err(failure) => failure,
            };

            let jitter: f64 = rand::random();
            match state.on_failure(&failure, clock.elapsed(), jitter) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        "attempt {} failed ({}), retrying in {}ms",
                        attempt,
                        failure,
                        delay.as_millis()
                    );
                    self.sleeper.sleep(delay).await;
                }
                RetryDecision::GiveUp(reason) => {
                    error!("giving up after {} attempt(s) ({:?}): {}", attempt, reason, failure);
                    return Err(AnalyzerError::RemoteUnavailable {
                        attempts: attempt,
                        cause: failure,
                    });
                }
            }
        }
    }
}
