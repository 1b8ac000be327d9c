use application::chat_service::{ChatSession, SessionState, TurnOutcome};
use application::guardrail_service::GuardrailFilter;
use domain::error::RemoteFailure;
use domain::request::GenerationParams;
use domain::safety_policy::SafetyPolicy;
use std::sync::Arc;
use tests::StubCompletion;

fn session(client: Arc<StubCompletion>) -> ChatSession {
    ChatSession::new(
        client,
        GuardrailFilter::new(SafetyPolicy::builtin().unwrap()),
        "mistral-small",
        GenerationParams::default(),
        5,
    )
}

#[tokio::test]
async fn disallowed_term_is_blocked_before_the_remote() {
    let client = Arc::new(StubCompletion::echo());
    let mut chat = session(client.clone());

    let outcome = chat.send("what audio would a weapon make when it kills").await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Rejected { .. }));
    assert_eq!(chat.history().len(), 1);
    assert!(chat.history().turns()[0].synthesized);
    assert_eq!(client.calls(), 0);
    assert_eq!(chat.state(), SessionState::AwaitingInput);
}

#[tokio::test]
async fn history_grows_by_two_on_success_and_one_on_failure() {
    let ok = Arc::new(StubCompletion::echo());
    let mut chat = session(ok.clone());
    let mut expected = 0;
    let questions = [
        "what is a spectrogram?",
        "and the spectral centroid?",
        "how is tempo measured?",
    ];
    for question in questions {
        let outcome = chat.send(question).await.unwrap();
        expected += 2;
        assert!(matches!(outcome, TurnOutcome::Reply { ref text, .. } if text == question));
        assert_eq!(chat.history().len(), expected);
    }
    assert_eq!(chat.history().exchanges(), 3);

    let down = Arc::new(StubCompletion::failing(RemoteFailure::from_status(503, "busy")));
    let mut chat = session(down.clone());
    let outcome = chat.send("what is the rms energy of a sine?").await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Failed { .. }));
    assert_eq!(chat.history().len(), 1);
    assert_eq!(chat.history().exchanges(), 0);
    assert_eq!(down.calls(), 1);

    // The session is still usable after a failure.
    let outcome = chat.send("what is zero crossing rate in audio?").await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Failed { .. }));
    assert_eq!(chat.history().len(), 2);
}

#[tokio::test]
async fn closed_session_keeps_history_readable() {
    let client = Arc::new(StubCompletion::echo());
    let mut chat = session(client.clone());
    chat.send("what is a waveform?").await.unwrap();
    chat.quit();

    assert_eq!(chat.state(), SessionState::Closed);
    assert!(chat.send("what is pitch?").await.is_err());
    assert_eq!(chat.history().len(), 2);
    assert_eq!(client.calls(), 1);
}
