//! Shared fixtures for the integration tests: stand-ins for the remote model
//! at both seams (transport and completion service), a sleeper that records
//! instead of waiting, and synthetic audio.

use async_trait::async_trait;
use domain::error::{AnalyzerError, RemoteFailure};
use domain::request::{Completion, Request, Response};
use hound::{SampleFormat, WavSpec, WavWriter};
use infrastructure::mistral_client::ChatTransport;
use infrastructure::resilient_client::CompletionService;
use infrastructure::retry::Sleeper;
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Completion service that either echoes the prompt back or always fails.
pub struct StubCompletion {
    calls: AtomicUsize,
    fail_with: Option<RemoteFailure>,
}

impl StubCompletion {
    pub fn echo() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    pub fn failing(cause: RemoteFailure) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_with: Some(cause),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for StubCompletion {
    async fn send(&self, request: Request) -> Result<Response, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(cause) => Err(AnalyzerError::RemoteUnavailable {
                attempts: 1,
                cause: cause.clone(),
            }),
            None => Ok(Response {
                text: request.prompt().to_string(),
                model: request.model().to_string(),
                usage: None,
                latency: Duration::ZERO,
                attempts: 1,
            }),
        }
    }
}

/// Transport that plays back a fixed script of outcomes, then keeps
/// answering with `fallback`.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Completion, RemoteFailure>>>,
    fallback: Result<Completion, RemoteFailure>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(
        script: impl IntoIterator<Item = Result<Completion, RemoteFailure>>,
        fallback: Result<Completion, RemoteFailure>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    /// `failures` transient 503s followed by success.
    pub fn unavailable_then_ok(failures: usize, text: &str) -> Self {
        Self::new(
            (0..failures).map(|_| Err(RemoteFailure::from_status(503, "service unavailable"))),
            Ok(Completion::text(text)),
        )
    }

    pub fn always(outcome: Result<Completion, RemoteFailure>) -> Self {
        Self::new(Vec::new(), outcome)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn complete(&self, _request: &Request) -> Result<Completion, RemoteFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap_or_else(|p| p.into_inner()).pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap_or_else(|p| p.into_inner()).push(duration);
    }
}

pub fn sine_wave(freq: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
    (0..(seconds * sample_rate as f32) as usize)
        .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Write mono 16-bit PCM.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
    }
    writer.finalize()
}
