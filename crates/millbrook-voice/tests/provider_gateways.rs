//! Wire-level tests for the provider gateways against a local axum server.
//!
//! Each test stands up a throwaway router on an ephemeral port and points a
//! real client at it, so the multipart shape, headers, payloads, and error
//! mapping are all exercised without touching the actual providers.

use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use millbrook_core::{
    CharacterRegistry, CompletionBackend, DialogueError, Message, OpenAiCompletion, Role,
    DEFAULT_VOICE_ID,
};
use millbrook_voice::{
    CapturedAudio, ElevenLabsStt, ElevenLabsTts, SynthesisBackend, TranscriptionBackend,
};

/// Bind an ephemeral port, serve the app in the background, return a base url.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn spoken_take() -> CapturedAudio {
    CapturedAudio {
        samples: vec![0.1; 320],
        sample_rate: 16_000,
        captured_at: Utc::now(),
    }
}

fn empty_take() -> CapturedAudio {
    CapturedAudio {
        samples: Vec::new(),
        sample_rate: 16_000,
        captured_at: Utc::now(),
    }
}

#[tokio::test]
async fn transcription_uploads_wav_and_reads_text() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let fields: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let api_key: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let app = Router::new().route(
        "/v1/speech-to-text",
        post({
            let fields = Arc::clone(&fields);
            let api_key = Arc::clone(&api_key);
            move |headers: HeaderMap, mut multipart: Multipart| {
                let fields = Arc::clone(&fields);
                let api_key = Arc::clone(&api_key);
                async move {
                    *api_key.lock().unwrap() = headers
                        .get("xi-api-key")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    while let Some(field) = multipart.next_field().await.unwrap() {
                        let name = field.name().unwrap_or_default().to_string();
                        let data = field.bytes().await.unwrap().to_vec();
                        fields.lock().unwrap().push((name, data));
                    }
                    Json(json!({ "text": "Evening, barkeep." }))
                }
            }
        }),
    );
    let base = serve(app).await;

    let stt = ElevenLabsStt::new("test-key").unwrap().with_base_url(base);
    let text = stt.transcribe(&spoken_take()).await.unwrap();
    assert_eq!(text, "Evening, barkeep.");

    assert_eq!(api_key.lock().unwrap().as_deref(), Some("test-key"));
    let fields = fields.lock().unwrap();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0].0, "file");
    assert_eq!(&fields[0].1[0..4], b"RIFF"); // a WAV file, not raw PCM
    assert_eq!(fields[1].0, "model_id");
    assert_eq!(fields[1].1, b"scribe_v1");
}

#[tokio::test]
async fn transcription_accepts_the_transcript_key() {
    let app = Router::new().route(
        "/v1/speech-to-text",
        post(|| async { Json(json!({ "transcript": "hullo" })) }),
    );
    let base = serve(app).await;

    let stt = ElevenLabsStt::new("k").unwrap().with_base_url(base);
    assert_eq!(stt.transcribe(&spoken_take()).await.unwrap(), "hullo");
}

#[tokio::test]
async fn transcription_maps_provider_failures() {
    let app = Router::new().route(
        "/v1/speech-to-text",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "scribe exploded") }),
    );
    let base = serve(app).await;

    let stt = ElevenLabsStt::new("k").unwrap().with_base_url(base);
    match stt.transcribe(&spoken_take()).await.unwrap_err() {
        DialogueError::Provider { status, detail } => {
            assert_eq!(status, 500);
            assert!(detail.contains("scribe exploded"));
        }
        other => panic!("expected Provider, got {other:?}"),
    }
}

#[tokio::test]
async fn transcription_refuses_an_empty_take_locally() {
    // nothing listens on this port; the guard must fire before any request
    let stt = ElevenLabsStt::new("k")
        .unwrap()
        .with_base_url("http://127.0.0.1:9");
    let err = stt.transcribe(&empty_take()).await.unwrap_err();
    assert!(matches!(err, DialogueError::EmptyInput));
}

fn voice_router(hits: Arc<Mutex<Vec<String>>>, default_status: StatusCode) -> Router {
    Router::new().route(
        "/v1/text-to-speech/:voice",
        post(move |Path(voice): Path<String>| {
            let hits = Arc::clone(&hits);
            async move {
                hits.lock().unwrap().push(voice.clone());
                if voice != DEFAULT_VOICE_ID {
                    StatusCode::NOT_FOUND.into_response()
                } else if default_status == StatusCode::OK {
                    (StatusCode::OK, b"mp3 bytes".to_vec()).into_response()
                } else {
                    (default_status, "voice server on fire").into_response()
                }
            }
        }),
    )
}

#[tokio::test]
async fn synthesis_falls_back_once_when_the_voice_is_missing() {
    let hits: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let base = serve(voice_router(Arc::clone(&hits), StatusCode::OK)).await;

    let tts = ElevenLabsTts::new("k").unwrap().with_base_url(base);
    let clip = tts.synthesize("Well now.", "voice-gone").await.unwrap();

    assert_eq!(clip, b"mp3 bytes");
    assert_eq!(
        *hits.lock().unwrap(),
        vec!["voice-gone".to_string(), DEFAULT_VOICE_ID.to_string()]
    );
}

#[tokio::test]
async fn synthesis_never_retries_the_fallback_voice_itself() {
    let hits: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().route(
        "/v1/text-to-speech/:voice",
        post({
            let hits = Arc::clone(&hits);
            move |Path(voice): Path<String>| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.lock().unwrap().push(voice);
                    StatusCode::NOT_FOUND
                }
            }
        }),
    );
    let base = serve(app).await;

    let tts = ElevenLabsTts::new("k").unwrap().with_base_url(base);
    let err = tts.synthesize("Well now.", DEFAULT_VOICE_ID).await.unwrap_err();

    assert!(matches!(err, DialogueError::SynthesisFailed(_)));
    assert_eq!(hits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn a_failing_fallback_is_terminal() {
    let hits: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let base = serve(voice_router(
        Arc::clone(&hits),
        StatusCode::INTERNAL_SERVER_ERROR,
    ))
    .await;

    let tts = ElevenLabsTts::new("k").unwrap().with_base_url(base);
    match tts.synthesize("Well now.", "voice-gone").await.unwrap_err() {
        DialogueError::SynthesisFailed(detail) => {
            assert!(detail.contains("500"));
            assert!(detail.contains("voice server on fire"));
        }
        other => panic!("expected SynthesisFailed, got {other:?}"),
    }
    assert_eq!(hits.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn non_missing_voice_failures_do_not_fall_back() {
    let hits: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().route(
        "/v1/text-to-speech/:voice",
        post({
            let hits = Arc::clone(&hits);
            move |Path(voice): Path<String>| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.lock().unwrap().push(voice);
                    (StatusCode::SERVICE_UNAVAILABLE, "maintenance")
                }
            }
        }),
    );
    let base = serve(app).await;

    let tts = ElevenLabsTts::new("k").unwrap().with_base_url(base);
    match tts.synthesize("Well now.", "voice-a").await.unwrap_err() {
        DialogueError::SynthesisFailed(detail) => assert!(detail.contains("503")),
        other => panic!("expected SynthesisFailed, got {other:?}"),
    }
    assert_eq!(*hits.lock().unwrap(), vec!["voice-a".to_string()]);
}

#[tokio::test]
async fn synthesis_refuses_blank_arguments_locally() {
    let tts = ElevenLabsTts::new("k")
        .unwrap()
        .with_base_url("http://127.0.0.1:9");
    assert!(matches!(
        tts.synthesize("   ", "voice-a").await.unwrap_err(),
        DialogueError::InvalidArgument(_)
    ));
    assert!(matches!(
        tts.synthesize("Well now.", "").await.unwrap_err(),
        DialogueError::InvalidArgument(_)
    ));
}

fn transcript_entry(id: u64, content: &str) -> Message {
    Message {
        id,
        role: if id % 2 == 0 { Role::Assistant } else { Role::User },
        content: content.to_string(),
        timestamp: Utc::now(),
        character_id: "barnaby".to_string(),
        character_name: "Barnaby Goodbarrel".to_string(),
    }
}

#[tokio::test]
async fn completion_sends_prompt_window_and_schema() {
    let captured: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let auth: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let app = Router::new().route(
        "/chat/completions",
        post({
            let captured = Arc::clone(&captured);
            let auth = Arc::clone(&auth);
            move |headers: HeaderMap, Json(body): Json<Value>| {
                let captured = Arc::clone(&captured);
                let auth = Arc::clone(&auth);
                async move {
                    *auth.lock().unwrap() = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    *captured.lock().unwrap() = Some(body);
                    Json(json!({ "reply": "Aye, welcome.", "prompt_delta": null }))
                }
            }
        }),
    );
    let base = serve(app).await;

    let backend = OpenAiCompletion::new("test-key").unwrap().with_base_url(base);
    let registry = CharacterRegistry::village_roster();
    let barnaby = registry.get("barnaby").unwrap();
    let history: Vec<Message> = (1..=9)
        .map(|i| transcript_entry(i, &format!("line {i}")))
        .collect();

    let reply = backend
        .complete(barnaby, "the prompt", &history, "what's the news?")
        .await
        .unwrap();
    assert_eq!(reply.reply, "Aye, welcome.");
    assert_eq!(reply.prompt_delta, None);

    assert_eq!(auth.lock().unwrap().as_deref(), Some("Bearer test-key"));
    let body = captured.lock().unwrap().clone().unwrap();
    assert_eq!(body["model"], "gpt-4.1");
    assert_eq!(body["temperature"].as_f64().unwrap() as f32, 0.8);
    assert_eq!(body["max_output_tokens"], 200);

    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 8); // system + six-entry window + new line
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[0]["content"], "the prompt");
    assert_eq!(messages[1]["content"], "line 4");
    assert_eq!(messages[7]["role"], "user");
    assert_eq!(messages[7]["content"], "what's the news?");

    assert_eq!(body["response_schema"]["required"], json!(["reply"]));
    assert_eq!(body["response_schema"]["additionalProperties"], json!(false));
}

#[tokio::test]
async fn completion_rejects_nonconforming_payloads() {
    let registry = CharacterRegistry::village_roster();
    let barnaby = registry.get("barnaby").unwrap();

    let app = Router::new().route(
        "/chat/completions",
        post(|| async { Json(json!({ "reply": 42 })) }),
    );
    let base = serve(app).await;
    let backend = OpenAiCompletion::new("k").unwrap().with_base_url(base);
    let err = backend
        .complete(barnaby, "prompt", &[], "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, DialogueError::SchemaViolation(_)));

    let app = Router::new().route(
        "/chat/completions",
        post(|| async { Json(json!({ "prompt_delta": "only" })) }),
    );
    let base = serve(app).await;
    let backend = OpenAiCompletion::new("k").unwrap().with_base_url(base);
    let err = backend
        .complete(barnaby, "prompt", &[], "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, DialogueError::SchemaViolation(_)));
}

#[tokio::test]
async fn completion_surfaces_provider_status() {
    let app = Router::new().route(
        "/chat/completions",
        post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
    );
    let base = serve(app).await;

    let backend = OpenAiCompletion::new("k").unwrap().with_base_url(base);
    let registry = CharacterRegistry::village_roster();
    let barnaby = registry.get("barnaby").unwrap();
    match backend
        .complete(barnaby, "prompt", &[], "hello")
        .await
        .unwrap_err()
    {
        DialogueError::Provider { status, detail } => {
            assert_eq!(status, 429);
            assert!(detail.contains("slow down"));
        }
        other => panic!("expected Provider, got {other:?}"),
    }
}
