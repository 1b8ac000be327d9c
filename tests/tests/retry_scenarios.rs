use domain::error::{AnalyzerError, RemoteFailure};
use domain::request::{Completion, GenerationParams, Request};
use infrastructure::mistral_client::MistralClient;
use infrastructure::resilient_client::{CompletionService, ResilientClient};
use infrastructure::retry::RetryPolicy;
use serde_json::json;
use std::time::Duration;
use tests::{RecordingSleeper, ScriptedTransport};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "mistral-small";

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(800),
        attempt_timeout: Duration::from_secs(5),
        total_deadline: Duration::from_secs(60),
    }
}

fn request(prompt: &str) -> Request {
    Request::builder(MODEL, GenerationParams::default())
        .system("You are an audio analysis assistant.")
        .prompt(prompt)
        .build()
}

fn client(
    transport: ScriptedTransport,
    max_attempts: u32,
) -> ResilientClient<ScriptedTransport, RecordingSleeper> {
    ResilientClient::new(transport, policy(max_attempts), vec![MODEL.to_string()])
        .with_sleeper(RecordingSleeper::default())
}

#[tokio::test]
async fn three_unavailable_then_success_takes_four_attempts() {
    let client = client(ScriptedTransport::unavailable_then_ok(3, "the tempo is steady"), 5);

    let response = client.send(request("describe the tempo")).await.unwrap();

    assert_eq!(response.text, "the tempo is steady");
    assert_eq!(response.attempts, 4);
    assert_eq!(client.transport().calls(), 4);
    assert_eq!(client.sleeper().delays().len(), 3);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let client = client(
        ScriptedTransport::always(Err(RemoteFailure::from_status(401, "invalid api key"))),
        5,
    );

    let err = client.send(request("describe the tempo")).await.unwrap_err();

    match err {
        AnalyzerError::RemoteUnavailable { attempts, cause } => {
            assert_eq!(attempts, 1);
            assert_eq!(cause.status, Some(401));
            assert!(!cause.is_transient());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.transport().calls(), 1);
    assert!(client.sleeper().delays().is_empty());
}

#[tokio::test]
async fn transient_failures_stop_at_the_attempt_limit() {
    for max_attempts in 1..=6 {
        let client = client(
            ScriptedTransport::always(Err(RemoteFailure::from_status(429, "slow down"))),
            max_attempts,
        );
        let err = client.send(request("what is rms energy?")).await.unwrap_err();
        assert!(matches!(
            err,
            AnalyzerError::RemoteUnavailable { attempts, .. } if attempts == max_attempts
        ));
        assert_eq!(client.transport().calls(), max_attempts as usize);

        let delays = client.sleeper().delays();
        assert_eq!(delays.len(), max_attempts as usize - 1);
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(800)));
    }
}

#[test]
fn backoff_window_grows_then_caps() {
    let p = policy(10);
    let ceilings: Vec<Duration> = (0..8).map(|retry| p.ceiling(retry)).collect();
    assert!(ceilings.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*ceilings.last().unwrap(), p.max_delay);
    // Expected full-jitter delay is half the window.
    for retry in 0..8 {
        assert_eq!(p.delay(retry, 0.5), p.ceiling(retry) / 2);
    }
}

#[tokio::test]
async fn identical_requests_yield_identical_responses() {
    let answer = Completion::text("a spectrogram maps time to frequency");
    let client = client(ScriptedTransport::always(Ok(answer)), 3);
    let first = client.send(request("what is a spectrogram?")).await.unwrap();
    for _ in 0..5 {
        let again = client.send(request("what is a spectrogram?")).await.unwrap();
        assert_eq!(again.text, first.text);
    }
}

#[tokio::test]
async fn http_client_recovers_from_503s() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": MODEL,
            "choices": [{"message": {"role": "assistant", "content": "OK"}}]
        })))
        .with_priority(2)
        .mount(&server)
        .await;

    let transport = MistralClient::new(
        format!("{}/v1/chat/completions", server.uri()),
        "test-api-key-123",
    )
    .unwrap();
    let client = ResilientClient::new(transport, policy(5), vec![MODEL.to_string()])
        .with_sleeper(RecordingSleeper::default());

    let response = client.send(request("health check")).await.unwrap();
    assert_eq!(response.text, "OK");
    assert_eq!(response.attempts, 4);
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(4));
}
